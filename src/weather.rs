//! ==============================================================================
//! weather.rs - ambient forecast collaborator
//! ==============================================================================
//!
//! purpose:
//!     keeps the latest Open-Meteo snapshot (outside temperature, dew point,
//!     sunrise/sunset) in a cache the control loop can read without waiting.
//!
//! relationships:
//!     - refreshed by: a background task spawned from main.rs
//!     - read by: controller.rs (via AmbientSource)
//!     - staleness: judged by machine.rs, the cache hands out whatever it has
//!
//! ==============================================================================

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::AmbientConfig;
use crate::domain::AmbientSnapshot;

pub trait AmbientSource: Send + Sync {
    fn latest(&self) -> Option<AmbientSnapshot>;
}

/// used when no coordinates are configured
pub struct NoForecast;

impl AmbientSource for NoForecast {
    fn latest(&self) -> Option<AmbientSnapshot> {
        None
    }
}

#[derive(Default)]
pub struct AmbientCache {
    latest: RwLock<Option<AmbientSnapshot>>,
}

impl AmbientCache {
    pub fn store(&self, snapshot: AmbientSnapshot) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }
}

impl AmbientSource for AmbientCache {
    fn latest(&self) -> Option<AmbientSnapshot> {
        self.latest.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

// ==============================================================================
// open-meteo client
// ==============================================================================

#[derive(Deserialize)]
struct ForecastResponse {
    current: CurrentBlock,
    #[serde(default)]
    daily: Option<DailyBlock>,
}

#[derive(Deserialize)]
struct CurrentBlock {
    temperature_2m: f64,
    dew_point_2m: f64,
}

#[derive(Deserialize)]
struct DailyBlock {
    #[serde(default)]
    sunrise: Vec<String>,
    #[serde(default)]
    sunset: Vec<String>,
}

pub struct OpenMeteoClient {
    http: reqwest::Client,
    api_url: String,
    latitude: f64,
    longitude: f64,
}

impl OpenMeteoClient {
    pub fn new(config: &AmbientConfig) -> Result<Self> {
        let (latitude, longitude) = config
            .location()
            .ok_or_else(|| anyhow!("ambient latitude/longitude not configured"))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            latitude,
            longitude,
        })
    }

    pub async fn fetch(&self) -> Result<AmbientSnapshot> {
        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("latitude", self.latitude.to_string()),
                ("longitude", self.longitude.to_string()),
                ("current", "temperature_2m,dew_point_2m".to_string()),
                ("daily", "sunrise,sunset".to_string()),
                ("timezone", "GMT".to_string()),
                ("forecast_days", "1".to_string()),
            ])
            .send()
            .await
            .context("forecast request failed")?
            .error_for_status()
            .context("forecast request rejected")?;

        let body: ForecastResponse = response.json().await.context("forecast body not understood")?;
        Ok(snapshot_from(body, Utc::now()))
    }
}

fn snapshot_from(body: ForecastResponse, fetched_at: DateTime<Utc>) -> AmbientSnapshot {
    let (sunrise, sunset) = match &body.daily {
        Some(daily) => (
            daily.sunrise.first().and_then(|s| parse_gmt(s)),
            daily.sunset.first().and_then(|s| parse_gmt(s)),
        ),
        None => (None, None),
    };
    AmbientSnapshot {
        temperature_c: body.current.temperature_2m,
        dew_point_c: body.current.dew_point_2m,
        fetched_at,
        sunrise,
        sunset,
    }
}

/// open-meteo returns local ISO times without an offset; we ask for GMT
fn parse_gmt(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .ok()
        .map(|naive| naive.and_utc())
}

/// refresh the cache every `refresh_seconds` until shutdown
///
/// a failed fetch keeps the previous snapshot; it ages out through max_age.
pub fn spawn_refresh(
    client: OpenMeteoClient,
    cache: Arc<AmbientCache>,
    refresh: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            match client.fetch().await {
                Ok(snapshot) => {
                    tracing::info!(
                        ambient_temp_c = snapshot.temperature_c,
                        ambient_dew_c = snapshot.dew_point_c,
                        "ambient forecast refreshed"
                    );
                    cache.store(snapshot);
                }
                Err(e) => tracing::warn!("Ambient weather fetch failed: {:#}", e),
            }
        }
    })
}
