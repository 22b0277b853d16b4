use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::types::DeviceIdentity;

pub const DEFAULT_DEVICE_ID: &str = "000001";
pub const PLATFORM_DOMAIN: &str = "m2.exosite.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("product id is required")]
    MissingProductId,

    #[error("device id is required")]
    MissingDeviceId,

    #[error("invalid platform host {host:?}: {source}")]
    InvalidHost {
        host: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    #[serde(rename = "productId")]
    pub product_id: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Overrides the `<productId>.m2.exosite.com` host.
    pub host: Option<String>,
    #[serde(rename = "promptForIdentity")]
    pub prompt_for_identity: bool,
    #[serde(rename = "longPollTimeoutMs")]
    pub long_poll_timeout_ms: u64,
    #[serde(rename = "requestTimeoutMs")]
    pub request_timeout_ms: u64,
    #[serde(rename = "tickIntervalMs")]
    pub tick_interval_ms: u64,
    #[serde(rename = "statusIntervalSecs")]
    pub status_interval_secs: u64,
    /// Stop after this many ticks; zero runs until shutdown.
    #[serde(rename = "maxTicks")]
    pub max_ticks: u64,
    #[serde(rename = "notFoundRetryTicks")]
    pub not_found_retry_ticks: u32,
    #[serde(rename = "showHttpRequests")]
    pub show_http_requests: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            product_id: String::new(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            host: None,
            prompt_for_identity: false,
            long_poll_timeout_ms: 2_000,
            request_timeout_ms: 10_000,
            tick_interval_ms: 1_000,
            status_interval_secs: 10,
            max_ticks: 100,
            not_found_retry_ticks: 10,
            show_http_requests: false,
        }
    }
}

impl DeviceConfig {
    pub fn sanitize(&mut self) {
        self.product_id = self.product_id.trim().to_string();
        self.device_id = self.device_id.trim().to_string();
        if self
            .host
            .as_deref()
            .is_some_and(|host| host.trim().is_empty())
        {
            self.host = None;
        }

        self.long_poll_timeout_ms = self.long_poll_timeout_ms.clamp(100, 300_000);
        self.request_timeout_ms = self.request_timeout_ms.clamp(500, 120_000);
        self.tick_interval_ms = self.tick_interval_ms.clamp(10, 3_600_000);
        self.status_interval_secs = self.status_interval_secs.max(1);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.product_id.is_empty() {
            return Err(ConfigError::MissingProductId);
        }
        if self.device_id.is_empty() {
            return Err(ConfigError::MissingDeviceId);
        }
        self.base_url().map(|_| ())
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.product_id.clone(), self.device_id.clone())
    }

    pub fn default_host(&self) -> String {
        format!("{}.{PLATFORM_DOMAIN}", self.product_id)
    }

    /// Base URL of the platform API. Hosts without a scheme use HTTPS.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let host = self.host.clone().unwrap_or_else(|| self.default_host());
        let candidate = if host.contains("://") {
            host.clone()
        } else {
            format!("https://{host}")
        };
        Url::parse(&candidate).map_err(|source| ConfigError::InvalidHost { host, source })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    #[serde(rename = "initialTemperature")]
    pub initial_temperature: f32,
    #[serde(rename = "initialHumidity")]
    pub initial_humidity: f32,
    #[serde(rename = "temperatureMin")]
    pub temperature_min: f32,
    #[serde(rename = "temperatureMax")]
    pub temperature_max: f32,
    #[serde(rename = "humidityMin")]
    pub humidity_min: f32,
    #[serde(rename = "humidityMax")]
    pub humidity_max: f32,
    #[serde(rename = "maxStep")]
    pub max_step: f32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            initial_temperature: 70.0,
            initial_humidity: 50.0,
            temperature_min: 1.0,
            temperature_max: 120.0,
            humidity_min: 1.0,
            humidity_max: 100.0,
            max_step: 0.2,
        }
    }
}

impl TelemetryConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if !self.temperature_min.is_finite() || !self.temperature_max.is_finite() {
            self.temperature_min = defaults.temperature_min;
            self.temperature_max = defaults.temperature_max;
        }
        if self.temperature_min > self.temperature_max {
            std::mem::swap(&mut self.temperature_min, &mut self.temperature_max);
        }

        if !self.humidity_min.is_finite() || !self.humidity_max.is_finite() {
            self.humidity_min = defaults.humidity_min;
            self.humidity_max = defaults.humidity_max;
        }
        if self.humidity_min > self.humidity_max {
            std::mem::swap(&mut self.humidity_min, &mut self.humidity_max);
        }

        self.max_step = if self.max_step.is_finite() {
            self.max_step.abs()
        } else {
            defaults.max_step
        };

        if !self.initial_temperature.is_finite() {
            self.initial_temperature = defaults.initial_temperature;
        }
        self.initial_temperature = self
            .initial_temperature
            .clamp(self.temperature_min, self.temperature_max);

        if !self.initial_humidity.is_finite() {
            self.initial_humidity = defaults.initial_humidity;
        }
        self.initial_humidity = self
            .initial_humidity
            .clamp(self.humidity_min, self.humidity_max);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub device: DeviceConfig,
    pub telemetry: TelemetryConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.device.sanitize();
        self.telemetry.sanitize();
    }
}
