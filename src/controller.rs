//! ==============================================================================
//! controller.rs - the sampling / control loop
//! ==============================================================================
//!
//! purpose:
//!     owns the per-tick pipeline and is the only writer of relay_on, the
//!     forced-run timers and last_reading.
//!
//! one tick:
//!
//!     sensor ──► sampler ──► machine ──► relay driver ──► ControlState
//!                  │ (None: stop here,                         │
//!                  │  nothing else runs)                       ▼
//!                  │                                    csv log + live feed
//!
//! wake-ups:
//!     - the poll interval (full tick)
//!     - request_mode (manual command applied at once, auto waits for a tick)
//!     - shutdown, checked only between ticks; the relay is driven off on exit
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::HostConfig;
use crate::domain::{AmbientSnapshot, LiveEvent, Reading, Transition};
use crate::error::HardwareWriteError;
use crate::hal::{Relay, Sensor};
use crate::live::LiveBroadcaster;
use crate::logs::EventSink;
use crate::machine::{ControlStateMachine, Decision};
use crate::sampler::SensorSampler;
use crate::state::ControlState;
use crate::weather::AmbientSource;

/// everything the loop talks to besides the shared state
pub struct Collaborators {
    pub sensor: Arc<dyn Sensor>,
    pub relay: Arc<dyn Relay>,
    pub ambient: Arc<dyn AmbientSource>,
    pub sink: Arc<dyn EventSink>,
}

enum Wake {
    Tick,
    ModeChanged,
}

pub struct Controller {
    sampler: SensorSampler,
    machine: ControlStateMachine,
    state: Arc<ControlState>,
    relay: Arc<dyn Relay>,
    relay_pin: u8,
    ambient: Arc<dyn AmbientSource>,
    sink: Arc<dyn EventSink>,
    live: LiveBroadcaster,
    poll: Duration,
    show_readings: bool,
    /// last pin write failed; the next decision is written even if unchanged
    relay_uncertain: bool,
}

impl Controller {
    pub fn new(
        config: &HostConfig,
        parts: Collaborators,
        state: Arc<ControlState>,
        live: LiveBroadcaster,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sampler: SensorSampler::new(parts.sensor, config.sensor.clone()),
            machine: ControlStateMachine::new(config, started_at),
            state,
            relay: parts.relay,
            relay_pin: config.relay.gpio_pin,
            ambient: parts.ambient,
            sink: parts.sink,
            live,
            poll: Duration::from_secs(config.polling.interval_seconds),
            show_readings: config.logging.show_readings,
            relay_uncertain: false,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        self.startup().await;

        let state = self.state.clone();
        let mut interval = tokio::time::interval(self.poll);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("control loop started ({}s interval)", self.poll.as_secs());

        loop {
            let wake = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => Wake::Tick,
                _ = state.mode_changed() => Wake::ModeChanged,
            };
            match wake {
                Wake::Tick => {
                    self.tick(Utc::now()).await;
                }
                Wake::ModeChanged => {
                    self.apply_manual(Utc::now()).await;
                }
            }
        }

        self.stop().await;
    }

    /// put the pin in the state ControlState starts with (off)
    pub async fn startup(&mut self) {
        if let Err(e) = self.drive(false).await {
            error!("failed to drive relay off at startup: {}", e);
        }
    }

    /// sample, decide, drive, commit, log, publish
    ///
    /// returns the transition made this tick, if any
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        let reading = self.sampler.sample(now).await?;
        let snapshot = self.state.get_snapshot().await;
        let ambient = self.ambient.latest();
        let decision = self.machine.evaluate(&snapshot, &reading, ambient.as_ref(), now);

        if decision.forced_run_started {
            info!(
                until = ?decision.forced_run_until,
                enclosure_c = reading.temperature_c,
                ambient_c = ?ambient.as_ref().map(|a| a.temperature_c),
                "forced run started"
            );
        }
        if let Some(hold) = decision.held {
            debug!(?hold, delta_c = reading.delta_c, "turn-on held back");
        }

        let transition = match self.apply(&decision, snapshot.relay_on, now).await {
            Ok(transition) => transition,
            Err(e) => {
                error!("relay write failed, retrying next tick: {}", e);
                self.state.record_reading(reading.clone()).await;
                self.report_reading(&reading, snapshot.relay_on, ambient).await;
                return None;
            }
        };

        self.state.commit(decision.clone().into_commit(Some(reading.clone()))).await;
        self.report_reading(&reading, decision.relay_on, ambient).await;
        if let Some(transition) = &transition {
            self.report_transition(transition);
        }
        transition
    }

    /// apply manual_on without waiting for a reading; no-op in auto mode
    pub async fn apply_manual(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        let snapshot = self.state.get_snapshot().await;
        let decision = self.machine.evaluate_manual(&snapshot, now)?;
        match self.apply(&decision, snapshot.relay_on, now).await {
            Ok(transition) => {
                self.state.commit(decision.into_commit(None)).await;
                if let Some(transition) = &transition {
                    self.report_transition(transition);
                }
                transition
            }
            Err(e) => {
                error!("manual relay command failed: {}", e);
                None
            }
        }
    }

    /// drive the pin when the decision changes it, or when its state is unknown;
    /// state is committed by the caller
    async fn apply(
        &mut self,
        decision: &Decision,
        previous_relay_on: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition>, HardwareWriteError> {
        let transition = decision.transition(previous_relay_on, now);
        if transition.is_some() || self.relay_uncertain {
            self.drive(decision.relay_on).await?;
        }
        Ok(transition)
    }

    async fn drive(&mut self, on: bool) -> Result<(), HardwareWriteError> {
        let relay = self.relay.clone();
        let result = match tokio::task::spawn_blocking(move || relay.set(on)).await {
            Ok(result) => result,
            Err(e) => Err(HardwareWriteError {
                pin: self.relay_pin,
                message: format!("relay task aborted: {}", e),
            }),
        };
        self.relay_uncertain = result.is_err();
        result
    }

    async fn stop(&mut self) {
        match self.drive(false).await {
            Ok(()) => {
                self.state.set_relay(false).await;
                info!("control loop stopped, relay off");
            }
            Err(e) => error!("failed to drive relay off on shutdown: {}", e),
        }
    }

    async fn report_reading(&self, reading: &Reading, relay_on: bool, ambient: Option<AmbientSnapshot>) {
        if self.show_readings {
            info!(
                "T={:.1}°C RH={:.1}% Dew={:.1}°C Δ={:.1}°C relay={}",
                reading.temperature_c,
                reading.humidity_pct,
                reading.dew_point_c,
                reading.delta_c,
                if relay_on { "on" } else { "off" }
            );
        } else {
            debug!(temp_c = reading.temperature_c, delta_c = reading.delta_c, relay_on, "reading");
        }

        self.sink.append_reading(reading, relay_on);

        let snapshot = self.state.get_snapshot().await;
        self.live.publish(LiveEvent::Reading {
            reading: reading.clone(),
            relay_on,
            mode: snapshot.mode,
            manual_on: snapshot.manual_on,
            ambient,
        });
    }

    fn report_transition(&self, transition: &Transition) {
        let relay = if transition.new_relay_on { "ON" } else { "OFF" };
        info!(reason = transition.reason.as_str(), "Relay -> {}", relay);
        self.sink.append_event(transition);
        if self.live.publish(LiveEvent::Transition(transition.clone())) == 0 {
            debug!("no live subscribers for transition");
        }
    }
}
