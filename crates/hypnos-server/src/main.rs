//! # hypnos-server
//!
//! Daemon for the hypnos timetable peripheral.
//!
//! This binary provides:
//! - One protocol engine driving the peripheral over Bluetooth
//! - REST API for scanning, connecting, and managing the timetable
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, without radio hardware
//! cargo run --package hypnos-server --no-default-features --features mock-bluetooth
//!
//! # Production (on the host next to the peripheral)
//! HYPNOS_ENV=production ./hypnos-server
//! ```
//!
//! The configuration path defaults to the platform location and can be
//! overridden with `HYPNOS_CONFIG`.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;

use anyhow::Context;
use hypnos_core::{
    Config, EngineEvent, EngineOptions, JsonFileStore, ProtocolFacade, StatusStore,
};
use hypnos_server::api::create_router;
use hypnos_server::logging;
use hypnos_server::state::AppState;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

#[cfg(not(any(feature = "bluetooth", feature = "mock-bluetooth")))]
compile_error!("enable the `bluetooth` or `mock-bluetooth` feature");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::LogProfile::from_env())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting hypnos-server");

    let config_path = std::env::var_os("HYPNOS_CONFIG")
        .map_or_else(Config::default_path, PathBuf::from);
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    info!(path = %config_path.display(), timezone = %config.system.timezone, "Configuration loaded");

    let data_dir = config.data_dir();
    let store = StatusStore::new(JsonFileStore::open(&data_dir)?);
    info!(path = %data_dir.display(), "Status store opened");

    let facade = spawn_engine(&config, store.clone()).await?;
    let (sink, events) = mpsc::unbounded_channel();
    tokio::spawn(log_events(events));
    facade.init(sink).await?;

    let listen = config.server.listen.clone();
    let state = AppState::new(facade.clone(), store, config, config_path).shared();
    let app = create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;
    info!("Listening on {}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    facade.deinit().await?;
    info!("hypnos-server stopped");
    Ok(())
}

/// Start the engine on the BlueZ adapter.
#[cfg(feature = "bluetooth")]
async fn spawn_engine(config: &Config, store: StatusStore) -> anyhow::Result<ProtocolFacade> {
    let platform = hypnos_core::BluerPlatform::new(config.bluetooth.adapter.as_deref())
        .await
        .context("Bluetooth adapter unavailable")?;
    Ok(ProtocolFacade::spawn(
        platform,
        store,
        EngineOptions::from_config(config),
    ))
}

/// Start the engine on a simulated peripheral.
#[cfg(all(feature = "mock-bluetooth", not(feature = "bluetooth")))]
async fn spawn_engine(config: &Config, store: StatusStore) -> anyhow::Result<ProtocolFacade> {
    use hypnos_core::{MockPeripheral, MockPlatform, PeripheralId};

    let platform = MockPlatform::new();
    platform.add_peripheral(
        PeripheralId::parse("F1:E2:D3:C4:B5:A6")?,
        MockPeripheral::hypnos("Hypnos-Sim"),
    );
    warn!("Running against a simulated peripheral");
    Ok(ProtocolFacade::spawn(
        platform,
        store,
        EngineOptions::from_config(config),
    ))
}

/// Log what the engine reports.
async fn log_events(mut events: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::PeripheralDiscovered(handle) => {
                debug!(peripheral = %handle.id, name = ?handle.name, rssi = ?handle.rssi_dbm, "Discovered");
            }
            EngineEvent::ResultsCleared => debug!("Scan results cleared"),
            EngineEvent::StateChanged(state) => info!(%state, "Link state changed"),
            EngineEvent::SyncCompleted(snapshot) => {
                info!(battery = ?snapshot.battery_percent, "Peripheral synced");
            }
            EngineEvent::FieldSkipped {
                characteristic,
                message,
            } => warn!(%characteristic, %message, "Field left out of sync"),
            EngineEvent::Failed { kind, message } => warn!(?kind, %message, "Operation failed"),
            EngineEvent::LinkLost(id) => warn!(peripheral = %id, "Peripheral dropped the link"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
