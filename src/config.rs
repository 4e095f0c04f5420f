//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `dew-heater.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - PollingConfig: How often the control loop samples the sensor.
//!     - SensorConfig / RelayConfig: GPIO pins and plausibility band.
//!     - ControlConfig: Hysteresis thresholds, warm-up.
//!     - ForcedRunConfig / DaylightConfig: Predictive pre-heat policy.
//!     - AmbientConfig: Forecast location and freshness.
//!
//! every section is `#[serde(default)]` so a file only needs the keys it changes.
//!
//! ==============================================================================

use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub polling: PollingConfig,
    pub sensor: SensorConfig,
    pub relay: RelayConfig,
    pub control: ControlConfig,
    pub forced_run: ForcedRunConfig,
    pub daylight: DaylightConfig,
    pub ambient: AmbientConfig,
    pub live: LiveConfig,
    pub logging: LoggingConfig,
    pub web: WebConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: 10 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorConfig {
    pub gpio_pin: u8,
    pub min_temperature_c: f64,
    pub max_temperature_c: f64,
    /// humidity jump (percentage points) treated as a glitch the first time
    pub spike_threshold_pct: f64,
    /// a read still running after this is abandoned and the tick skipped
    pub read_timeout_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            gpio_pin: 16,
            min_temperature_c: -40.0,
            max_temperature_c: 80.0,
            spike_threshold_pct: 15.0,
            read_timeout_ms: 5000,
        }
    }
}

impl SensorConfig {
    pub fn read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RelayConfig {
    pub gpio_pin: u8,
    /// relay energizes on HIGH
    pub active_high: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { gpio_pin: 26, active_high: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControlConfig {
    /// relay turns on once temperature - dew point drops to this
    pub on_threshold_c: f64,
    /// relay turns off once the delta climbs back to on_threshold_c + this
    pub deadband_margin_c: f64,
    pub warmup_minutes: i64,
    /// warm-up, daylight and cooldown also suppress hysteresis turn-on
    pub gate_hysteresis_on: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            on_threshold_c: 5.0,
            deadband_margin_c: 5.0,
            warmup_minutes: 15,
            gate_hysteresis_on: false,
        }
    }
}

impl ControlConfig {
    pub fn off_threshold_c(&self) -> f64 {
        self.on_threshold_c + self.deadband_margin_c
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ForcedRunConfig {
    /// start a forced run when enclosure temp - forecast temp is below this
    pub temp_diff_c: f64,
    pub duration_minutes: i64,
    pub cooldown_minutes: i64,
}

impl Default for ForcedRunConfig {
    fn default() -> Self {
        Self {
            temp_diff_c: 6.0,
            duration_minutes: 30,
            cooldown_minutes: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DaylightConfig {
    pub enabled: bool,
    /// the block starts this long after sunrise and ends this long before sunset
    pub margin_minutes: i64,
}

impl Default for DaylightConfig {
    fn default() -> Self {
        Self { enabled: true, margin_minutes: 30 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AmbientConfig {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub api_url: String,
    pub refresh_seconds: u64,
    /// snapshots older than this are ignored by the forced-run rule
    pub max_age_seconds: i64,
}

impl Default for AmbientConfig {
    fn default() -> Self {
        Self {
            latitude: None,
            longitude: None,
            api_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            refresh_seconds: 600,
            max_age_seconds: 1800,
        }
    }
}

impl AmbientConfig {
    pub fn location(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LiveConfig {
    /// events buffered per subscriber before the oldest are dropped (power of two)
    pub queue_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self { queue_capacity: 8 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_readings: bool,
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_readings: true,
            log_dir: PathBuf::from("Temp_Humidity_Logs"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".to_string() }
    }
}

/// upper bound for every timer window (one week)
const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;

fn check_minutes(key: &str, minutes: i64) -> anyhow::Result<()> {
    if !(0..=MAX_WINDOW_MINUTES).contains(&minutes) {
        bail!("{} must be between 0 and {}", key, MAX_WINDOW_MINUTES);
    }
    Ok(())
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: HostConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var("DEW_CONFIG") {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("config").join("dew-heater.toml"));
        paths.push(PathBuf::from("..").join("config").join("dew-heater.toml"));

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        tracing::warn!("No config file found - using defaults");
        Self::default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.polling.interval_seconds == 0 {
            bail!("polling.interval_seconds must be positive");
        }
        if self.sensor.min_temperature_c >= self.sensor.max_temperature_c {
            bail!("sensor temperature band is empty");
        }
        if self.control.deadband_margin_c < 0.0 {
            bail!("control.deadband_margin_c must not be negative");
        }
        if !self.live.queue_capacity.is_power_of_two() {
            bail!("live.queue_capacity must be a power of two");
        }
        let poll_ms = self.polling.interval_seconds.saturating_mul(1000);
        if self.sensor.read_timeout_ms == 0 || self.sensor.read_timeout_ms > poll_ms {
            bail!("sensor.read_timeout_ms must be positive and no longer than the poll interval");
        }
        check_minutes("control.warmup_minutes", self.control.warmup_minutes)?;
        check_minutes("forced_run.duration_minutes", self.forced_run.duration_minutes)?;
        check_minutes("forced_run.cooldown_minutes", self.forced_run.cooldown_minutes)?;
        check_minutes("daylight.margin_minutes", self.daylight.margin_minutes)?;
        if !(0..=MAX_WINDOW_MINUTES * 60).contains(&self.ambient.max_age_seconds) {
            bail!("ambient.max_age_seconds must be between 0 and {}", MAX_WINDOW_MINUTES * 60);
        }
        if self.ambient.refresh_seconds == 0 {
            bail!("ambient.refresh_seconds must be positive");
        }
        Ok(())
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        tracing::info!(
            poll_seconds = self.polling.interval_seconds,
            sensor_pin = self.sensor.gpio_pin,
            relay_pin = self.relay.gpio_pin,
            on_threshold_c = self.control.on_threshold_c,
            off_threshold_c = self.control.off_threshold_c(),
            forced_run_min = self.forced_run.duration_minutes,
            cooldown_min = self.forced_run.cooldown_minutes,
            forecast = self.ambient.location().is_some(),
            "host configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = HostConfig::parse(
            r#"
            [control]
            on_threshold_c = 0.5
            deadband_margin_c = 0.5

            [ambient]
            latitude = 47.6
            longitude = -122.3
            "#,
        )
        .unwrap();

        assert_eq!(config.control.on_threshold_c, 0.5);
        assert_eq!(config.control.off_threshold_c(), 1.0);
        assert_eq!(config.control.warmup_minutes, 15);
        assert_eq!(config.polling.interval_seconds, 10);
        assert_eq!(config.ambient.location(), Some((47.6, -122.3)));
        assert_eq!(config.live.queue_capacity, 8);
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = HostConfig::parse(include_str!("../config/dew-heater.toml")).unwrap();
        assert_eq!(config.sensor.gpio_pin, 16);
        assert_eq!(config.forced_run.cooldown_minutes, 60);
        assert_eq!(config.logging.log_dir, PathBuf::from("Temp_Humidity_Logs"));
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = HostConfig::parse("").unwrap();
        assert_eq!(config.relay.gpio_pin, 26);
        assert!(config.ambient.location().is_none());
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let err = HostConfig::parse("[polling]\ninterval_seconds = 0\n").unwrap_err();
        assert!(err.to_string().contains("interval_seconds"));
    }

    #[test]
    fn test_rejects_out_of_range_windows() {
        let err = HostConfig::parse("[forced_run]\nduration_minutes = 9223372036854775807\n").unwrap_err();
        assert!(err.to_string().contains("forced_run.duration_minutes"));
        assert!(HostConfig::parse("[forced_run]\ncooldown_minutes = -1\n").is_err());
        assert!(HostConfig::parse("[control]\nwarmup_minutes = 20000\n").is_err());
        assert!(HostConfig::parse("[daylight]\nmargin_minutes = 99999999999\n").is_err());
        assert!(HostConfig::parse("[ambient]\nmax_age_seconds = 9223372036854775807\n").is_err());
        assert!(HostConfig::parse("[forced_run]\nduration_minutes = 10080\n").is_ok());
    }

    #[test]
    fn test_read_timeout_bounded_by_poll_interval() {
        assert!(HostConfig::parse("[sensor]\nread_timeout_ms = 0\n").is_err());
        assert!(HostConfig::parse("[polling]\ninterval_seconds = 2\n[sensor]\nread_timeout_ms = 2500\n").is_err());
        let config = HostConfig::parse("[polling]\ninterval_seconds = 2\n[sensor]\nread_timeout_ms = 1500\n").unwrap();
        assert_eq!(config.sensor.read_timeout(), std::time::Duration::from_millis(1500));
    }

    #[test]
    fn test_rejects_odd_queue_capacity() {
        assert!(HostConfig::parse("[live]\nqueue_capacity = 5\n").is_err());
        assert!(HostConfig::parse("[live]\nqueue_capacity = 4\n").is_ok());
    }

    #[test]
    fn test_rejects_inverted_band() {
        let result = HostConfig::parse("[sensor]\nmin_temperature_c = 50.0\nmax_temperature_c = 10.0\n");
        assert!(result.is_err());
    }
}
