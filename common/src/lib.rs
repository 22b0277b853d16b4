pub mod alias;
pub mod config;
pub mod session;
pub mod telemetry;
pub mod types;
pub mod watermark;

pub use alias::*;
pub use config::{ConfigError, DeviceConfig, RuntimeConfig, TelemetryConfig};
pub use session::{
    ActivationEffect, ActuatorUpdate, Session, SessionPhase, TickFlow, TickStart, ACTUATOR_ALIAS,
};
pub use telemetry::next_value;
pub use types::{
    ActivationOutcome, ActuatorState, Credential, DeviceIdentity, LongPollOutcome, ReadOutcome,
    Rejection, SensorReading, WriteOutcome,
};
pub use watermark::{InvalidWatermark, Watermark, WatermarkTable};
