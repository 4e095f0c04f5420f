//! ==============================================================================
//! domain.rs - records passed between the sampler, state machine and consumers
//! ==============================================================================
//!
//! purpose:
//!     plain value types. a Reading or Transition is created once and handed
//!     off by value; only ControlState (state.rs) is mutated in place.
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidModeError;

/// a validated enclosure sample
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub temperature_c: f64,
    /// relative humidity (0-100%)
    pub humidity_pct: f64,
    pub dew_point_c: f64,
    /// temperature_c - dew_point_c
    pub delta_c: f64,
}

/// outside conditions as last reported by the forecast service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AmbientSnapshot {
    pub temperature_c: f64,
    pub dew_point_c: f64,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub sunrise: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sunset: Option<DateTime<Utc>>,
}

impl AmbientSnapshot {
    /// true while the snapshot is no older than `max_age`
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now.signed_duration_since(self.fetched_at) <= max_age
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Auto,
    Manual,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Manual => "manual",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = InvalidModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Mode::Auto),
            "manual" => Ok(Mode::Manual),
            other => Err(InvalidModeError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Hysteresis,
    Manual,
    ForcedRunStart,
    ForcedRunEnd,
    Cooldown,
}

impl TransitionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionReason::Hysteresis => "hysteresis",
            TransitionReason::Manual => "manual",
            TransitionReason::ForcedRunStart => "forced_run_start",
            TransitionReason::ForcedRunEnd => "forced_run_end",
            TransitionReason::Cooldown => "cooldown",
        }
    }
}

/// emitted only when relay_on actually changes value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub timestamp: DateTime<Utc>,
    pub previous_relay_on: bool,
    pub new_relay_on: bool,
    pub reason: TransitionReason,
}

/// immutable copy of ControlState handed to readers
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ControlSnapshot {
    pub mode: Mode,
    pub manual_on: bool,
    pub relay_on: bool,
    pub forced_run_until: Option<DateTime<Utc>>,
    pub forced_run_cooldown_until: Option<DateTime<Utc>>,
    pub last_reading: Option<Reading>,
}

/// what the live feed pushes to dashboard subscribers
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LiveEvent {
    Reading {
        #[serde(flatten)]
        reading: Reading,
        relay_on: bool,
        mode: Mode,
        manual_on: bool,
        ambient: Option<AmbientSnapshot>,
    },
    Transition(Transition),
}
