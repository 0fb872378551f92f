use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use super::device_state::DeviceState;

const REPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// One health check result as delivered to the notification service.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub device_ip: String,
    pub success: bool,
    pub network_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<DeviceState>,
}

/// Outbound boundary for device state reports. Reporting is
/// fire-and-forget: failures are logged by the caller and never affect
/// the tracked state, which has already been committed.
pub trait NotificationSink: Send + Sync {
    fn report_device_state(
        &self,
        report: &DeviceReport,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Sink posting reports to the notification service's health-check intake.
pub struct HttpNotificationSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotificationSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self { client: reqwest::Client::new(), base_url: base_url.trim_end_matches('/').to_string() }
    }
}

impl NotificationSink for HttpNotificationSink {
    async fn report_device_state(&self, report: &DeviceReport) -> anyhow::Result<()> {
        let url = format!("{}/api/notifications/process-health-check", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(REPORT_TIMEOUT)
            .query(report)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            anyhow::bail!("notification service returned {}", response.status())
        }
    }
}
