//! ==============================================================================
//! state.rs - the single shared control record
//! ==============================================================================
//!
//! this struct holds the control state shared between:
//! - the control loop (sole writer of relay_on, timers and last_reading)
//! - the web server (reads snapshots, requests mode changes)
//!
//! every operation takes the lock once, so a reader sees either the whole of a
//! commit or none of it. the lock is never held across an await on I/O.
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};

use crate::domain::{ControlSnapshot, Mode, Reading};
use crate::error::InvalidModeError;

/// result of one evaluation, written back in a single step
#[derive(Clone, Debug, PartialEq)]
pub struct Commit {
    pub relay_on: bool,
    pub forced_run_until: Option<DateTime<Utc>>,
    pub forced_run_cooldown_until: Option<DateTime<Utc>>,
    /// None leaves the stored reading as is
    pub last_reading: Option<Reading>,
}

#[derive(Default)]
pub struct ControlState {
    record: RwLock<ControlSnapshot>,
    mode_changed: Notify,
}

impl ControlState {
    /// auto mode, relay off, no timers
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_snapshot(&self) -> ControlSnapshot {
        self.record.read().await.clone()
    }

    /// validate and store a mode / manual command request
    ///
    /// the relay itself is only touched by the control loop, which is woken here.
    pub async fn request_mode(
        &self,
        mode: &str,
        manual_on: Option<bool>,
    ) -> Result<ControlSnapshot, InvalidModeError> {
        let mode: Mode = mode.parse()?;
        let snapshot = {
            let mut record = self.record.write().await;
            record.mode = mode;
            if let Some(manual_on) = manual_on {
                record.manual_on = manual_on;
            }
            record.clone()
        };
        self.mode_changed.notify_one();
        Ok(snapshot)
    }

    /// resolves after the next successful request_mode
    pub(crate) async fn mode_changed(&self) {
        self.mode_changed.notified().await;
    }

    pub(crate) async fn commit(&self, commit: Commit) {
        let mut record = self.record.write().await;
        record.relay_on = commit.relay_on;
        record.forced_run_until = commit.forced_run_until;
        record.forced_run_cooldown_until = commit.forced_run_cooldown_until;
        if let Some(reading) = commit.last_reading {
            record.last_reading = Some(reading);
        }
    }

    pub(crate) async fn record_reading(&self, reading: Reading) {
        self.record.write().await.last_reading = Some(reading);
    }

    pub(crate) async fn set_relay(&self, relay_on: bool) {
        self.record.write().await.relay_on = relay_on;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn reading(t: f64) -> Reading {
        Reading {
            timestamp: Utc::now(),
            temperature_c: t,
            humidity_pct: 80.0,
            dew_point_c: t - 3.0,
            delta_c: 3.0,
        }
    }

    #[tokio::test]
    async fn test_defaults() {
        let state = ControlState::new();
        let snap = state.get_snapshot().await;
        assert_eq!(snap.mode, Mode::Auto);
        assert!(!snap.manual_on);
        assert!(!snap.relay_on);
        assert!(snap.forced_run_until.is_none());
        assert!(snap.last_reading.is_none());
    }

    #[tokio::test]
    async fn test_invalid_mode_leaves_state_unchanged() {
        let state = ControlState::new();
        state.request_mode("manual", Some(true)).await.unwrap();
        state
            .commit(Commit {
                relay_on: true,
                forced_run_until: None,
                forced_run_cooldown_until: None,
                last_reading: Some(reading(9.0)),
            })
            .await;
        let before = state.get_snapshot().await;

        let err = state.request_mode("turbo", Some(false)).await.unwrap_err();
        assert_eq!(err, InvalidModeError("turbo".to_string()));
        assert_eq!(state.get_snapshot().await, before);
    }

    #[tokio::test]
    async fn test_manual_on_kept_when_omitted() {
        let state = ControlState::new();
        state.request_mode("manual", Some(true)).await.unwrap();
        let snap = state.request_mode("auto", None).await.unwrap();
        assert_eq!(snap.mode, Mode::Auto);
        assert!(snap.manual_on);
    }

    #[tokio::test]
    async fn test_request_never_writes_relay() {
        let state = ControlState::new();
        let snap = state.request_mode("manual", Some(true)).await.unwrap();
        assert!(!snap.relay_on);
    }

    #[tokio::test]
    async fn test_request_wakes_waiter() {
        let state = Arc::new(ControlState::new());
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.mode_changed().await })
        };
        state.request_mode("manual", Some(false)).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter not woken")
            .unwrap();
    }

    #[tokio::test]
    async fn test_commit_without_reading_keeps_last() {
        let state = ControlState::new();
        state.record_reading(reading(7.0)).await;
        state
            .commit(Commit {
                relay_on: true,
                forced_run_until: None,
                forced_run_cooldown_until: None,
                last_reading: None,
            })
            .await;
        let snap = state.get_snapshot().await;
        assert!(snap.relay_on);
        assert_eq!(snap.last_reading.unwrap().temperature_c, 7.0);
    }

    #[tokio::test]
    async fn test_concurrent_readers_see_whole_commits() {
        let state = Arc::new(ControlState::new());
        let writer = {
            let state = state.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let on = i % 2 == 0;
                    let until = on.then(Utc::now);
                    state
                        .commit(Commit {
                            relay_on: on,
                            forced_run_until: until,
                            forced_run_cooldown_until: until,
                            last_reading: None,
                        })
                        .await;
                    tokio::task::yield_now().await;
                }
            })
        };
        for _ in 0..200 {
            let snap = state.get_snapshot().await;
            assert_eq!(snap.relay_on, snap.forced_run_until.is_some());
            assert_eq!(snap.forced_run_until, snap.forced_run_cooldown_until);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }
}
