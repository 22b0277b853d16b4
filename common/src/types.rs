use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{alias::AliasValues, watermark::Watermark};

/// Identity a device presents to the platform during activation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    #[serde(rename = "productId")]
    pub product_id: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

impl DeviceIdentity {
    pub fn new(product_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            device_id: device_id.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.product_id, self.device_id)
    }
}

/// Opaque token issued by activation and attached to every later request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    const VISIBLE_CHARS: usize = 10;

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// First characters of the token followed by a mask, safe for logs.
    pub fn redacted(&self) -> String {
        let visible: String = self.0.chars().take(Self::VISIBLE_CHARS).collect();
        format!("{visible}..............................")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.redacted()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature: f32,
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActuatorState {
    pub on: bool,
}

impl ActuatorState {
    pub const OFF: Self = Self { on: false };
    pub const ON: Self = Self { on: true };

    pub fn as_str(self) -> &'static str {
        if self.on {
            "On"
        } else {
            "Off"
        }
    }

    /// Wire value of the actuator alias.
    pub fn alias_value(self) -> &'static str {
        if self.on {
            "1"
        } else {
            "0"
        }
    }

    pub fn parse_alias_value(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" => Some(Self::ON),
            "0" | "false" | "off" => Some(Self::OFF),
            _ => None,
        }
    }
}

/// Reasons an authenticated request did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Credential invalid or expired.
    Unauthorized,
    BadRequest,
    MethodNotAllowed,
    Other(u16),
    /// The request never produced a response (connection, TLS or timeout).
    Unreachable(String),
}

impl Rejection {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            400 => Self::BadRequest,
            405 => Self::MethodNotAllowed,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => f.write_str("401: bad auth, credential may be invalid"),
            Self::BadRequest => f.write_str("400: bad request, check syntax"),
            Self::MethodNotAllowed => f.write_str("405: bad method"),
            Self::Other(status) => write!(f, "{status}: request failed"),
            Self::Unreachable(reason) => write!(f, "platform unreachable: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    Issued(Credential),
    /// The platform already issued a credential for this identity.
    AlreadyActivated,
    /// The identity is unknown to the platform.
    NotFound,
    TransientFailure(u16),
    Unreachable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Value(AliasValues),
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LongPollOutcome {
    Changed {
        values: AliasValues,
        watermark: Option<Watermark>,
    },
    /// Nothing newer than the supplied watermark arrived before the timeout.
    Unchanged,
    Rejected(Rejection),
}
