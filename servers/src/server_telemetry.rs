use anyhow::{Context, Result};
use tokio::signal;

mod telemetry_logic;
use telemetry_logic::{config, scheduler, upstream::HttpSnapshotSource};

use lib_common::context::TenantKey;
use lib_common::loggers::setup_logging;
use lib_common::stores::RedisStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();

    let log_dir = config.log_dir.clone().unwrap_or_else(|| "./logs".into());
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    setup_logging("server_telemetry", &log_dir, &log_level)?;

    let redis_url = config
        .redis_url
        .clone()
        .context("no Redis URL configured")?;
    let metrics_service_url = config
        .metrics_service_url
        .clone()
        .context("no metrics service URL configured")?;

    let store = RedisStore::new(&redis_url)?
        .with_snapshot_ttl(config.snapshot_ttl_seconds.unwrap_or(3600));
    if !store.connect().await {
        log::warn!("Redis not reachable at startup - operations will retry per cycle");
    }

    let source = HttpSnapshotSource::new(metrics_service_url);
    let tenant = TenantKey::from(config.network_id.clone());

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let scheduler_handle = tokio::spawn(scheduler::run(
        store.clone(),
        source,
        tenant,
        config.publish_interval_seconds.unwrap_or(30),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for components to shut down
    let _ = tokio::try_join!(scheduler_handle);

    store.disconnect().await;

    log::info!("Shutdown complete.");
    Ok(())
}
