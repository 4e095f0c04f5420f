//! ==============================================================================
//! sampler.rs - turns raw sensor output into validated readings
//! ==============================================================================
//!
//! purpose:
//!     one call per tick. a failed read or an implausible / glitched value
//!     yields None, and the caller must then leave every consumer untouched.
//!
//! filtering:
//!     - humidity must be in (0, 100], temperature within the configured band
//!     - a humidity jump larger than spike_threshold_pct is dropped once; if the
//!       next accepted-range value still disagrees with the old baseline it
//!       becomes the new baseline
//!
//! ==============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::SensorConfig;
use crate::dewpoint;
use crate::domain::Reading;
use crate::error::SensorReadError;
use crate::hal::Sensor;

pub struct SensorSampler {
    sensor: Arc<dyn Sensor>,
    config: SensorConfig,
    last_humidity: Option<f64>,
    spike_pending: bool,
}

impl SensorSampler {
    pub fn new(sensor: Arc<dyn Sensor>, config: SensorConfig) -> Self {
        Self {
            sensor,
            config,
            last_humidity: None,
            spike_pending: false,
        }
    }

    /// read the sensor on the blocking pool and validate the result
    ///
    /// a read that outlives sensor.read_timeout_ms is abandoned as a timeout
    pub async fn sample(&mut self, now: DateTime<Utc>) -> Option<Reading> {
        let sensor = self.sensor.clone();
        let read = tokio::task::spawn_blocking(move || sensor.read());
        let raw = match tokio::time::timeout(self.config.read_timeout(), read).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!("sensor task join error: {}", e);
                return None;
            }
            Err(_) => Err(SensorReadError::Timeout),
        };

        match raw {
            Ok((temperature_c, humidity_pct)) => self.accept(temperature_c, humidity_pct, now),
            Err(e) => {
                warn!(pin = self.config.gpio_pin, "DHT11 read failed: {}", e);
                None
            }
        }
    }

    /// validate one raw sample
    pub fn accept(&mut self, temperature_c: f64, humidity_pct: f64, now: DateTime<Utc>) -> Option<Reading> {
        if !self.in_band(temperature_c, humidity_pct) {
            debug!(temperature_c, humidity_pct, "discarding implausible reading");
            return None;
        }

        if let Some(previous) = self.last_humidity {
            if (humidity_pct - previous).abs() > self.config.spike_threshold_pct {
                if !self.spike_pending {
                    self.spike_pending = true;
                    warn!("Humidity spike ignored once (prev {:.1}% -> {:.1}%)", previous, humidity_pct);
                    return None;
                }
                info!(
                    "Humidity change persisted; accepting new baseline {:.1}% (prev {:.1}%)",
                    humidity_pct, previous
                );
            }
        }
        self.spike_pending = false;
        self.last_humidity = Some(humidity_pct);

        let dew_point_c = dewpoint::compute(temperature_c, humidity_pct);
        Some(Reading {
            timestamp: now,
            temperature_c,
            humidity_pct,
            dew_point_c,
            delta_c: temperature_c - dew_point_c,
        })
    }

    fn in_band(&self, temperature_c: f64, humidity_pct: f64) -> bool {
        temperature_c.is_finite()
            && humidity_pct.is_finite()
            && humidity_pct > 0.0
            && humidity_pct <= 100.0
            && temperature_c >= self.config.min_temperature_c
            && temperature_c <= self.config.max_temperature_c
    }
}
