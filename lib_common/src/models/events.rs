use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel carrying full topology snapshots and per-node updates.
pub const CHANNEL_TOPOLOGY: &str = "metrics:topology";
/// Channel carrying device health status changes.
pub const CHANNEL_HEALTH: &str = "metrics:health";
/// Channel carrying speed test results.
pub const CHANNEL_SPEED_TEST: &str = "metrics:speedtest";

/// Key under which the most recent snapshot is kept for late subscribers.
pub const KEY_LAST_SNAPSHOT: &str = "metrics:last_snapshot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsEventType {
    FullSnapshot,
    NodeUpdate,
    HealthUpdate,
    SpeedTestResult,
}

/// Envelope for every message published on the metrics channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsEvent {
    pub event_type: MetricsEventType,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl MetricsEvent {
    pub fn new(event_type: MetricsEventType, payload: serde_json::Value) -> Self {
        Self { event_type, timestamp: Utc::now(), payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_values() {
        assert_eq!(
            serde_json::to_string(&MetricsEventType::FullSnapshot).unwrap(),
            "\"full_snapshot\""
        );
        assert_eq!(
            serde_json::to_string(&MetricsEventType::SpeedTestResult).unwrap(),
            "\"speed_test_result\""
        );
    }

    #[test]
    fn test_event_round_trip() {
        let event = MetricsEvent::new(
            MetricsEventType::HealthUpdate,
            serde_json::json!({"node_id": "node-1", "status": "healthy"}),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: MetricsEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, MetricsEventType::HealthUpdate);
        assert_eq!(back.payload["node_id"], "node-1");
    }
}
