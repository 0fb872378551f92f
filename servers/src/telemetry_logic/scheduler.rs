use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;

use lib_common::context::{SnapshotSource, TenantKey};
use lib_common::stores::RedisStore;

/// Periodic publish loop: aggregate, persist the durable last snapshot,
/// fan out on the topology channel. The first tick fires immediately so a
/// freshly started service publishes without waiting a full interval.
///
/// Store operations are best-effort; this loop is the retry cadence, so a
/// failed cycle just waits for the next tick.
pub async fn run<S: SnapshotSource>(
    store: RedisStore,
    source: S,
    tenant: TenantKey,
    interval_seconds: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut publish_interval = interval(Duration::from_secs(interval_seconds));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Publish scheduler received shutdown signal.");
                break;
            }
            _ = publish_interval.tick() => {
                publish_cycle(&store, &source, &tenant).await;
            }
        }
    }
}

async fn publish_cycle<S: SnapshotSource>(store: &RedisStore, source: &S, tenant: &TenantKey) {
    match source.fetch_snapshot(tenant, false).await {
        Ok(Some(snapshot)) => {
            if !store.store_last_snapshot(&snapshot).await {
                log::warn!("Failed to persist the last snapshot");
            }
            if store.publish_topology_snapshot(&snapshot).await {
                log::debug!(
                    "Published topology snapshot for {} ({} nodes)",
                    tenant,
                    snapshot.total_nodes
                );
            } else {
                log::warn!("Failed to publish topology snapshot for {}", tenant);
            }
        }
        Ok(None) => log::info!("No snapshot available from the aggregator yet"),
        Err(e) => log::warn!("Snapshot aggregation failed: {}", e),
    }
}
