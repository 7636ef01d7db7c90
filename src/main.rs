//! presence-stats - museum visitor presence statistics service
//!
//! Subscribes to room and exhibit presence sensors over MQTT, keeps live
//! room occupancy, persists every snapshot and viewing, and serves hourly
//! aggregates over HTTP.
//!
//! Module structure:
//! - `domain/` - Core types (events, records, aggregates, errors)
//! - `io/` - External interfaces (MQTT link, decoder, HTTP, store)
//! - `services/` - Business logic (occupancy, ingestion, aggregation)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use presence_stats::domain::IngestError;
use presence_stats::infra::{Config, Metrics};
use presence_stats::io::http::VERSION;
use presence_stats::io::{
    open_store, start_api_server, ApiState, LinkManager, MqttTransport, ReconnectPolicy,
    TopicRouter,
};
use presence_stats::services::{IngestService, OccupancyState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Museum presence statistics service
#[derive(Parser, Debug)]
#[command(name = "presence-stats", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %VERSION, "presence-stats starting");

    let args = Args::parse();
    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        topics = ?config.topics(),
        rooms = %config.room_count(),
        store = %config.store_backend().as_str(),
        http_port = %config.http_port(),
        http_auth = %config.http_auth_enabled(),
        "config_loaded"
    );

    let store = open_store(&config).context("failed to open event store")?;
    let metrics = Arc::new(Metrics::new());
    let occupancy = OccupancyState::shared(config.room_count());

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(config.channel_capacity());

    // Start ingestion link
    let link = LinkManager::new(
        MqttTransport::new(&config),
        TopicRouter::from_config(&config),
        ReconnectPolicy::from_config(&config),
        event_tx,
        metrics.clone(),
    );
    let link_state = link.subscribe_state();
    let mut link_handle = tokio::spawn(link.run(shutdown_rx.clone()));

    // Start ingestion - single writer of occupancy on the blocking pool, ends
    // when the link drops its sender
    let ingest = IngestService::new(occupancy.clone(), store.clone(), metrics.clone());
    let ingest_handle = tokio::spawn(ingest.run(event_rx));

    // Start HTTP API
    let api_state = Arc::new(ApiState::new(&config, store, occupancy, metrics.clone(), link_state));
    let http_port = config.http_port();
    let http_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_api_server(http_port, api_state, http_shutdown).await {
            error!(error = %e, "http_server_error");
        }
    });

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Run until Ctrl+C or the link stops on its own
    let finished = tokio::select! {
        result = &mut link_handle => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let link_result = match finished {
        Some(result) => result.context("link task panicked")?,
        None => {
            info!("shutdown_signal_received");
            let _ = shutdown_tx.send(true);
            link_handle.await.context("link task panicked")?
        }
    };

    ingest_handle.await.context("ingest task panicked")?;

    match link_result {
        Err(e @ IngestError::ReconnectExhausted { .. }) => {
            if config.exit_on_give_up() {
                let _ = shutdown_tx.send(true);
                metrics.report().log();
                return Err(e).context("ingestion link gave up");
            }
            warn!("link_gave_up_serving_stored_data");
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown_signal_received");
        }
        Err(e) => {
            error!(error = %e, "link_failed");
        }
        Ok(()) => {}
    }

    let _ = shutdown_tx.send(true);
    metrics.report().log();
    info!("presence-stats shutdown complete");
    Ok(())
}
