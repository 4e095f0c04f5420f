//! ==============================================================================
//! logs.rs - daily CSV logs of readings and relay transitions
//! ==============================================================================
//!
//! files (one pair per UTC day, under logging.log_dir):
//!     dew_heater_readings_YYYY-MM-DD.csv
//!         timestamp_iso,temp_c,humidity_pct,dew_point_c,relay_state
//!     dew_heater_events_YYYY-MM-DD.csv
//!         timestamp_iso,previous_relay,new_relay,reason
//!
//! the control loop only pushes onto a channel; a blocking worker owns the
//! files. a write failure is logged and the row is lost.
//!
//! ==============================================================================

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::mpsc;

use crate::domain::{Reading, Transition};

pub trait EventSink: Send + Sync {
    fn append_reading(&self, reading: &Reading, relay_on: bool);
    fn append_event(&self, transition: &Transition);
}

enum LogRecord {
    Reading { reading: Reading, relay_on: bool },
    Event(Transition),
}

const READINGS_HEADER: [&str; 5] = ["timestamp_iso", "temp_c", "humidity_pct", "dew_point_c", "relay_state"];
const EVENTS_HEADER: [&str; 4] = ["timestamp_iso", "previous_relay", "new_relay", "reason"];

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// synchronous file side, owned by the worker
struct LogWriter {
    dir: PathBuf,
}

impl LogWriter {
    fn path_for(&self, kind: &str, ts: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("dew_heater_{}_{}.csv", kind, ts.format("%Y-%m-%d")))
    }

    fn write(&self, record: &LogRecord) -> anyhow::Result<()> {
        match record {
            LogRecord::Reading { reading, relay_on } => {
                let path = self.path_for("readings", reading.timestamp);
                let row = [
                    iso(reading.timestamp),
                    format!("{:.1}", reading.temperature_c),
                    format!("{:.1}", reading.humidity_pct),
                    format!("{:.1}", reading.dew_point_c),
                    on_off(*relay_on).to_string(),
                ];
                append_row(&path, &READINGS_HEADER, &row)
            }
            LogRecord::Event(transition) => {
                let path = self.path_for("events", transition.timestamp);
                let row = [
                    iso(transition.timestamp),
                    on_off(transition.previous_relay_on).to_string(),
                    on_off(transition.new_relay_on).to_string(),
                    transition.reason.as_str().to_string(),
                ];
                append_row(&path, &EVENTS_HEADER, &row)
            }
        }
    }
}

fn append_row(path: &Path, header: &[&str], row: &[String]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let fresh = file.metadata().map(|m| m.len() == 0).unwrap_or(false);

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if fresh {
        writer.write_record(header)?;
    }
    writer.write_record(row)?;
    writer.flush()?;
    Ok(())
}

/// EventSink handle; cheap to call from the control loop
pub struct CsvLogger {
    tx: mpsc::UnboundedSender<LogRecord>,
}

impl CsvLogger {
    /// start the worker; it exits once every handle is dropped
    pub fn spawn(dir: PathBuf) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogRecord>();
        let writer = LogWriter { dir };
        let handle = tokio::task::spawn_blocking(move || {
            while let Some(record) = rx.blocking_recv() {
                if let Err(e) = writer.write(&record) {
                    tracing::error!("CSV log write failed: {:#}", e);
                }
            }
            tracing::debug!("csv log worker stopped");
        });
        (Self { tx }, handle)
    }

    fn push(&self, record: LogRecord) {
        if self.tx.send(record).is_err() {
            tracing::warn!("csv log worker gone; row dropped");
        }
    }
}

impl EventSink for CsvLogger {
    fn append_reading(&self, reading: &Reading, relay_on: bool) {
        self.push(LogRecord::Reading {
            reading: reading.clone(),
            relay_on,
        });
    }

    fn append_event(&self, transition: &Transition) {
        self.push(LogRecord::Event(transition.clone()));
    }
}
