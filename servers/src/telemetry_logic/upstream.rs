use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use lib_common::context::{SnapshotSource, TenantKey};
use lib_common::models::TopologySnapshot;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// The aggregator wraps snapshots in a success envelope.
#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    snapshot: Option<TopologySnapshot>,
    #[serde(default)]
    message: Option<String>,
}

/// Snapshot source backed by the metrics service HTTP API.
///
/// A plain fetch reads the service's current snapshot; a forced refresh
/// asks it to regenerate from the latest data instead of serving its own
/// cache.
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self { client: reqwest::Client::new(), base_url: base_url.trim_end_matches('/').to_string() }
    }
}

impl SnapshotSource for HttpSnapshotSource {
    async fn fetch_snapshot(
        &self,
        tenant: &TenantKey,
        force_refresh: bool,
    ) -> anyhow::Result<Option<TopologySnapshot>> {
        let request = if force_refresh {
            self.client.post(format!("{}/api/metrics/snapshot/generate", self.base_url))
        } else {
            self.client.get(format!("{}/api/metrics/snapshot", self.base_url))
        };
        let request = match tenant.network_id() {
            Some(network_id) => request.query(&[("network_id", network_id)]),
            None => request,
        };

        let response = request
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .context("cannot reach the metrics service")?;

        if !response.status().is_success() {
            log::info!("Metrics service answered {} for {}", response.status(), tenant);
            return Ok(None);
        }

        let envelope: SnapshotEnvelope =
            response.json().await.context("malformed snapshot envelope")?;
        if envelope.success && envelope.snapshot.is_some() {
            Ok(envelope.snapshot)
        } else {
            log::warn!(
                "Metrics service returned 200 but no valid snapshot for {}: {}",
                tenant,
                envelope.message.as_deref().unwrap_or("no message")
            );
            Ok(None)
        }
    }
}
