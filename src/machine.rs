//! ==============================================================================
//! machine.rs - relay decision logic
//! ==============================================================================
//!
//! purpose:
//!     decides the relay command for one tick from the current ControlState
//!     snapshot, the new Reading and the (possibly stale or absent) forecast.
//!     pure: nothing here touches hardware or the shared state, the controller
//!     applies the returned Decision.
//!
//! order of evaluation (auto mode):
//!     1. expire timers: a lapsed forced run opens the cooldown window
//!     2. an active forced run holds the relay on
//!     3. a new forced run may start (fresh forecast, not cooling down, warmed
//!        up, not daylight-blocked)
//!     4. hysteresis: on at delta <= on_threshold, off at delta >= off_threshold
//!
//! manual mode mirrors manual_on and skips 2-4.
//!
//! ==============================================================================

use chrono::{DateTime, Duration, Utc};

use crate::config::{ControlConfig, DaylightConfig, ForcedRunConfig, HostConfig};
use crate::domain::{AmbientSnapshot, ControlSnapshot, Mode, Reading, Transition, TransitionReason};
use crate::state::Commit;

/// why an auto turn-on was held back this tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hold {
    WarmUp,
    Daylight,
    Cooldown,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub relay_on: bool,
    /// set only when relay_on differs from the snapshot
    pub reason: Option<TransitionReason>,
    pub forced_run_until: Option<DateTime<Utc>>,
    pub forced_run_cooldown_until: Option<DateTime<Utc>>,
    pub forced_run_started: bool,
    pub held: Option<Hold>,
}

impl Decision {
    pub fn transition(&self, previous_relay_on: bool, now: DateTime<Utc>) -> Option<Transition> {
        self.reason.map(|reason| Transition {
            timestamp: now,
            previous_relay_on,
            new_relay_on: self.relay_on,
            reason,
        })
    }

    pub fn into_commit(self, last_reading: Option<Reading>) -> Commit {
        Commit {
            relay_on: self.relay_on,
            forced_run_until: self.forced_run_until,
            forced_run_cooldown_until: self.forced_run_cooldown_until,
            last_reading,
        }
    }
}

struct Timers {
    run_until: Option<DateTime<Utc>>,
    cooldown_until: Option<DateTime<Utc>>,
    run_ended: bool,
    cooldown_released: bool,
}

pub struct ControlStateMachine {
    control: ControlConfig,
    forced_run: ForcedRunConfig,
    daylight: DaylightConfig,
    ambient_max_age: Duration,
    started_at: DateTime<Utc>,
}

impl ControlStateMachine {
    pub fn new(config: &HostConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            control: config.control.clone(),
            forced_run: config.forced_run.clone(),
            daylight: config.daylight.clone(),
            ambient_max_age: Duration::seconds(config.ambient.max_age_seconds),
            started_at,
        }
    }

    /// full evaluation for a freshly accepted reading
    pub fn evaluate(
        &self,
        snapshot: &ControlSnapshot,
        reading: &Reading,
        ambient: Option<&AmbientSnapshot>,
        now: DateTime<Utc>,
    ) -> Decision {
        let timers = self.expire_timers(snapshot, now);
        if snapshot.mode == Mode::Manual {
            return self.manual(snapshot, timers);
        }

        let previous = snapshot.relay_on;
        let mut decision = Decision {
            relay_on: previous,
            reason: None,
            forced_run_until: timers.run_until,
            forced_run_cooldown_until: timers.cooldown_until,
            forced_run_started: false,
            held: None,
        };

        if timers.run_until.is_some_and(|until| now < until) {
            decision.set_relay(previous, true, TransitionReason::ForcedRunStart);
            return decision;
        }

        let warmed_up = now.signed_duration_since(self.started_at) >= Duration::minutes(self.control.warmup_minutes);
        let daylight = self.daylight_blocked(ambient, now);
        let cooling = timers.cooldown_until.is_some_and(|until| now < until);

        if warmed_up && !daylight && !cooling && self.forecast_dew_risk(reading, ambient, now) {
            decision.forced_run_until = Some(now + Duration::minutes(self.forced_run.duration_minutes));
            decision.forced_run_started = true;
            decision.set_relay(previous, true, TransitionReason::ForcedRunStart);
            return decision;
        }

        let delta = reading.delta_c;
        if !previous && delta <= self.control.on_threshold_c {
            let hold = if !self.control.gate_hysteresis_on {
                None
            } else if !warmed_up {
                Some(Hold::WarmUp)
            } else if daylight {
                Some(Hold::Daylight)
            } else if cooling {
                Some(Hold::Cooldown)
            } else {
                None
            };
            match hold {
                Some(hold) => decision.held = Some(hold),
                None => {
                    let reason = if self.control.gate_hysteresis_on && timers.cooldown_released {
                        TransitionReason::Cooldown
                    } else {
                        TransitionReason::Hysteresis
                    };
                    decision.set_relay(previous, true, reason);
                }
            }
        } else if previous && delta >= self.control.off_threshold_c() {
            let reason = if timers.run_ended {
                TransitionReason::ForcedRunEnd
            } else {
                TransitionReason::Hysteresis
            };
            decision.set_relay(previous, false, reason);
        }

        decision
    }

    /// manual command applied without a new reading (mode just changed)
    pub fn evaluate_manual(&self, snapshot: &ControlSnapshot, now: DateTime<Utc>) -> Option<Decision> {
        if snapshot.mode != Mode::Manual {
            return None;
        }
        let timers = self.expire_timers(snapshot, now);
        Some(self.manual(snapshot, timers))
    }

    fn manual(&self, snapshot: &ControlSnapshot, timers: Timers) -> Decision {
        let mut decision = Decision {
            relay_on: snapshot.relay_on,
            reason: None,
            forced_run_until: timers.run_until,
            forced_run_cooldown_until: timers.cooldown_until,
            forced_run_started: false,
            held: None,
        };
        decision.set_relay(snapshot.relay_on, snapshot.manual_on, TransitionReason::Manual);
        decision
    }

    fn expire_timers(&self, snapshot: &ControlSnapshot, now: DateTime<Utc>) -> Timers {
        let mut timers = Timers {
            run_until: snapshot.forced_run_until,
            cooldown_until: snapshot.forced_run_cooldown_until,
            run_ended: false,
            cooldown_released: false,
        };
        if timers.run_until.is_some_and(|until| now >= until) {
            timers.run_until = None;
            timers.cooldown_until = Some(now + Duration::minutes(self.forced_run.cooldown_minutes));
            timers.run_ended = true;
        }
        if timers.cooldown_until.is_some_and(|until| now >= until) {
            timers.cooldown_until = None;
            timers.cooldown_released = true;
        }
        timers
    }

    /// enclosure is within temp_diff_c of the forecast temperature
    fn forecast_dew_risk(&self, reading: &Reading, ambient: Option<&AmbientSnapshot>, now: DateTime<Utc>) -> bool {
        match ambient {
            Some(ambient) if ambient.is_fresh(now, self.ambient_max_age) => {
                reading.temperature_c - ambient.temperature_c < self.forced_run.temp_diff_c
            }
            _ => false,
        }
    }

    pub fn daylight_blocked(&self, ambient: Option<&AmbientSnapshot>, now: DateTime<Utc>) -> bool {
        if !self.daylight.enabled {
            return false;
        }
        let Some((sunrise, sunset)) = ambient.and_then(|a| a.sunrise.zip(a.sunset)) else {
            return false;
        };
        let margin = Duration::minutes(self.daylight.margin_minutes);
        now >= sunrise + margin && now <= sunset - margin
    }
}

impl Decision {
    fn set_relay(&mut self, previous: bool, target: bool, reason: TransitionReason) {
        self.relay_on = target;
        self.reason = (previous != target).then_some(reason);
    }
}
