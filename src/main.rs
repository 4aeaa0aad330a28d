//! Quietzone - low-power geofencing for automatic ringer control
//!
//! Runs the tracking orchestrator against a simulated walker so zone
//! transitions and notifications can be observed from the logs.
//!
//! Module structure:
//! - `domain/` - Core value types (Place, AnchorPosition, NotificationEvent, history)
//! - `io/` - External seams (location, sensors, notifications, place store)
//! - `services/` - Tracking logic (dead reckoning, motion, anchor, grid, orchestrator)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use quietzone::infra::{Config, Metrics};
use quietzone::io::{
    InMemoryPlaceStore, JsonlDisplay, NotificationDisplay, SimulatedWalker, TracingDisplay,
};
use quietzone::services::{
    create_notification_worker, tracking_channel, NotificationBus, Orchestrator,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Quietzone - geofence tracking with dead reckoning
#[derive(Parser, Debug)]
#[command(name = "quietzone", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-tick detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("quietzone starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        tick_interval_secs = %config.tick_interval().as_secs(),
        places = %config.places().len(),
        cell_size_m = %config.cell_size_m(),
        reanchor_distance_m = %config.reanchor_distance_m(),
        dedup_window_ms = %config.dedup_window_ms(),
        history_file = %config.history_file(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(InMemoryPlaceStore::from_config(&config));
    let walker = Arc::new(SimulatedWalker::from_config(&config));

    // Notification display runs off the tick path
    let display: Arc<dyn NotificationDisplay> = match config.notification_file() {
        Some(path) => Arc::new(JsonlDisplay::new(path)),
        None => Arc::new(TracingDisplay),
    };
    let (notification_tx, worker) = create_notification_worker(
        display,
        metrics.clone(),
        config.notification_channel_capacity(),
    );
    let worker_handle = tokio::spawn(worker.run());

    let bus =
        NotificationBus::with_metrics(config.dedup_window_ms(), notification_tx, metrics.clone());

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let enabled_on_start = config.enabled_on_start();
    let mut orchestrator =
        Orchestrator::new(config, walker.clone(), walker, store, bus, metrics);
    if enabled_on_start {
        orchestrator.set_tracking_enabled(true);
    }

    // Handle shutdown on Ctrl+C
    let (handle, cmd_rx) = tracking_channel(32);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        if let Err(e) = handle.shutdown().await {
            warn!(error = %e, "shutdown_send_failed");
        }
    });

    // Run orchestrator - ticks until shutdown
    orchestrator.run(cmd_rx).await;

    // Dropping the orchestrator closes the notification channel; let the worker drain
    drop(orchestrator);
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "notification_worker_join_failed");
    }

    info!("quietzone shutdown complete");
    Ok(())
}
