use rand::Rng;

use crate::{config::TelemetryConfig, types::SensorReading};

/// One bounded random-walk step: `previous` plus a uniform delta in
/// `[-max_step, max_step]`, clamped to `[lower, upper]`.
pub fn next_value<R: Rng + ?Sized>(
    rng: &mut R,
    previous: f32,
    lower: f32,
    upper: f32,
    max_step: f32,
) -> f32 {
    let step = if max_step.is_finite() {
        max_step.abs()
    } else {
        0.0
    };
    let delta = if step > 0.0 {
        rng.random_range(-step..=step)
    } else {
        0.0
    };
    (previous + delta).clamp(lower, upper)
}

impl SensorReading {
    pub fn initial(config: &TelemetryConfig) -> Self {
        Self {
            temperature: config
                .initial_temperature
                .clamp(config.temperature_min, config.temperature_max),
            humidity: config
                .initial_humidity
                .clamp(config.humidity_min, config.humidity_max),
        }
    }

    /// Advances both channels by one random-walk step.
    pub fn step<R: Rng + ?Sized>(&self, rng: &mut R, config: &TelemetryConfig) -> Self {
        Self {
            temperature: next_value(
                rng,
                self.temperature,
                config.temperature_min,
                config.temperature_max,
                config.max_step,
            ),
            humidity: next_value(
                rng,
                self.humidity,
                config.humidity_min,
                config.humidity_max,
                config.max_step,
            ),
        }
    }
}
