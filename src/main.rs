//! ==============================================================================
//! main.rs - dew heater host entry point
//! ==============================================================================
//!
//! purpose:
//!     keeps a camera enclosure above its dew point by switching a heater relay
//!     from DHT11 readings, with an optional forecast-driven pre-heat.
//!
//! responsibilities:
//!     - load configuration and set up logging
//!     - build the sensor / relay for this platform (mock or rppal)
//!     - start the forecast refresher, csv logger, control loop and web server
//!     - on ctrl-c: let the current tick finish, drive the relay off, exit
//!
//! relationships:
//!     - config.rs: HostConfig
//!     - controller.rs: the control loop (sampler.rs + machine.rs + state.rs)
//!     - weather.rs / logs.rs: collaborators the loop reads from / writes to
//!     - api.rs + live.rs: dashboard-facing surface
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                      rust host (this file)                    │
//!     │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//!     │  │ control loop │  │ web server   │  │ forecast refresher │  │
//!     │  │ (10s cycle)  │  │ (port 8080)  │  │ (10 min cycle)     │  │
//!     │  └──────┬───────┘  └──────┬───────┘  └─────────┬──────────┘  │
//!     │         │ writes          │ reads / requests   │ stores       │
//!     │         ▼                 ▼                    ▼              │
//!     │   ┌──────────────┐  ┌──────────────┐   ┌──────────────┐      │
//!     │   │ ControlState │  │ live feed    │   │ AmbientCache │      │
//!     │   └──────────────┘  └──────────────┘   └──────────────┘      │
//!     └──────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

mod api;
mod config;
mod controller;
mod dewpoint;
mod domain;
mod error;
mod gpio;
mod hal;
mod live;
mod logs;
mod machine;
mod sampler;
mod state;
mod weather;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::api::ApiState;
use crate::controller::{Collaborators, Controller};
use crate::live::LiveBroadcaster;
use crate::logs::CsvLogger;
use crate::state::ControlState;
use crate::weather::{AmbientCache, AmbientSource, NoForecast, OpenMeteoClient};

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // config is read before logging exists, so its own messages use the default filter
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt().with_env_filter(EnvFilter::new("info")).finish(),
        config::HostConfig::load_or_default,
    );
    init_tracing(&config.logging.level);

    tracing::info!("Dew Heater Host starting");
    config.print_summary();

    let shutdown = CancellationToken::new();

    // step 1: hardware
    let sensor = Arc::new(hal::Dht11::new(config.sensor.gpio_pin, config.sensor.read_timeout()));
    let relay = Arc::new(hal::RelayPin::new(config.relay.gpio_pin, config.relay.active_high)?);

    // step 2: forecast
    let mut background = Vec::new();
    let ambient: Arc<dyn AmbientSource> = match OpenMeteoClient::new(&config.ambient) {
        Ok(client) => {
            let cache = Arc::new(AmbientCache::default());
            background.push(weather::spawn_refresh(
                client,
                cache.clone(),
                Duration::from_secs(config.ambient.refresh_seconds.max(1)),
                shutdown.clone(),
            ));
            cache
        }
        Err(e) => {
            tracing::warn!("Forecast disabled: {}", e);
            Arc::new(NoForecast)
        }
    };

    // step 3: csv logs
    let (logger, log_worker) = CsvLogger::spawn(config.logging.log_dir.clone());

    // step 4: shared state + control loop
    let state = Arc::new(ControlState::new());
    let live = LiveBroadcaster::new(config.live.queue_capacity);
    let controller = Controller::new(
        &config,
        Collaborators {
            sensor,
            relay,
            ambient,
            sink: Arc::new(logger),
        },
        state.clone(),
        live.clone(),
        Utc::now(),
    );
    let control_loop = tokio::spawn(controller.run(shutdown.clone()));

    // step 5: web server
    let web = {
        let api = ApiState { control: state, live };
        let bind = config.web.bind.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = api::run_server(&bind, api, shutdown).await {
                tracing::error!("Web server error: {:#}", e);
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    shutdown.cancel();

    if let Err(e) = control_loop.await {
        tracing::error!("control loop task failed: {}", e);
    }
    for task in background {
        let _ = task.await;
    }
    let _ = web.await;
    // the controller held the last logger handle; the worker drains and exits
    if let Err(e) = log_worker.await {
        tracing::error!("csv log worker failed: {}", e);
    }

    tracing::info!("Dew Heater Host stopped");
    Ok(())
}
