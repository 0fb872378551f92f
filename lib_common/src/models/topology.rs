use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health classification for a single monitored device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

/// Role of a device in the network topology. The wire values match the
/// aggregator's vocabulary, slashes included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceRole {
    #[serde(rename = "gateway/router")]
    GatewayRouter,
    #[serde(rename = "firewall")]
    Firewall,
    #[serde(rename = "switch/ap")]
    SwitchAp,
    #[serde(rename = "server")]
    Server,
    #[serde(rename = "service")]
    Service,
    #[serde(rename = "nas")]
    Nas,
    #[serde(rename = "client")]
    Client,
    #[serde(rename = "group")]
    Group,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl DeviceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::GatewayRouter => "gateway/router",
            DeviceRole::Firewall => "firewall",
            DeviceRole::SwitchAp => "switch/ap",
            DeviceRole::Server => "server",
            DeviceRole::Service => "service",
            DeviceRole::Nas => "nas",
            DeviceRole::Client => "client",
            DeviceRole::Group => "group",
            DeviceRole::Unknown => "unknown",
        }
    }
}

/// Latest ping probe result for a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMetrics {
    pub success: bool,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub avg_latency_ms: Option<f64>,
    #[serde(default)]
    pub packet_loss_percent: f64,
}

/// Rolling 24h availability counters for a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UptimeMetrics {
    #[serde(default)]
    pub uptime_percent_24h: Option<f64>,
    #[serde(default)]
    pub checks_passed_24h: u32,
    #[serde(default)]
    pub checks_failed_24h: u32,
    #[serde(default)]
    pub consecutive_failures: u32,
}

/// One open (or probed) TCP port on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortInfo {
    pub port: u16,
    pub open: bool,
    #[serde(default)]
    pub service: Option<String>,
}

/// Reachability of one external test IP probed through a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestIpMetrics {
    pub ip: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub status: HealthStatus,
}

/// Result of the most recent speed test run against a gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeedTestMetrics {
    pub success: bool,
    #[serde(default)]
    pub download_mbps: Option<f64>,
    #[serde(default)]
    pub upload_mbps: Option<f64>,
    #[serde(default)]
    pub ping_ms: Option<f64>,
    #[serde(default)]
    pub client_isp: Option<String>,
    #[serde(default)]
    pub server_sponsor: Option<String>,
    #[serde(default)]
    pub server_location: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Gateway / ISP connectivity information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub gateway_ip: String,
    #[serde(default)]
    pub test_ips: Vec<TestIpMetrics>,
    #[serde(default)]
    pub last_speed_test: Option<SpeedTestMetrics>,
}

/// Everything the aggregator knows about one device at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub name: String,
    pub ip: String,
    #[serde(default)]
    pub role: DeviceRole,
    #[serde(default)]
    pub status: HealthStatus,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub connection_speed: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub ping: Option<PingMetrics>,
    #[serde(default)]
    pub uptime: Option<UptimeMetrics>,
    #[serde(default)]
    pub open_ports: Vec<PortInfo>,
}

/// Point-in-time aggregate of network topology and health facts.
///
/// Produced by the aggregator, identified by its timestamp, and immutable
/// once published. A newer snapshot supersedes an older one wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub nodes: HashMap<String, NodeMetrics>,
    #[serde(default)]
    pub gateways: Vec<GatewayInfo>,
    #[serde(default)]
    pub connection_count: u32,
    #[serde(default)]
    pub total_nodes: u32,
    #[serde(default)]
    pub healthy_nodes: u32,
    #[serde(default)]
    pub degraded_nodes: u32,
    #[serde(default)]
    pub unhealthy_nodes: u32,
    #[serde(default)]
    pub unknown_nodes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_wire_values() {
        assert_eq!(serde_json::to_string(&HealthStatus::Healthy).unwrap(), "\"healthy\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"degraded\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Unhealthy).unwrap(), "\"unhealthy\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Unknown).unwrap(), "\"unknown\"");
    }

    #[test]
    fn test_device_role_wire_values() {
        assert_eq!(serde_json::to_string(&DeviceRole::GatewayRouter).unwrap(), "\"gateway/router\"");
        assert_eq!(serde_json::to_string(&DeviceRole::SwitchAp).unwrap(), "\"switch/ap\"");
        let role: DeviceRole = serde_json::from_str("\"nas\"").unwrap();
        assert_eq!(role, DeviceRole::Nas);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "node-1".to_string(),
            NodeMetrics {
                name: "router".to_string(),
                ip: "192.168.1.1".to_string(),
                role: DeviceRole::GatewayRouter,
                status: HealthStatus::Healthy,
                hostname: None,
                connection_speed: Some("1 Gbps".to_string()),
                notes: None,
                ping: Some(PingMetrics {
                    success: true,
                    latency_ms: Some(2.5),
                    avg_latency_ms: Some(2.2),
                    packet_loss_percent: 0.0,
                }),
                uptime: None,
                open_ports: vec![PortInfo { port: 443, open: true, service: Some("HTTPS".to_string()) }],
            },
        );
        let snapshot = TopologySnapshot {
            timestamp: Utc::now(),
            network_id: Some("net-a".to_string()),
            nodes,
            gateways: vec![GatewayInfo {
                gateway_ip: "192.168.1.1".to_string(),
                test_ips: vec![],
                last_speed_test: None,
            }],
            connection_count: 3,
            total_nodes: 1,
            healthy_nodes: 1,
            degraded_nodes: 0,
            unhealthy_nodes: 0,
            unknown_nodes: 0,
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: TopologySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.network_id.as_deref(), Some("net-a"));
        assert_eq!(back.nodes["node-1"].ip, "192.168.1.1");
        assert_eq!(back.gateways.len(), 1);
    }

    #[test]
    fn test_snapshot_tolerates_sparse_input() {
        // The aggregator may omit everything but the timestamp.
        let raw = r#"{"timestamp":"2024-06-01T12:00:00Z"}"#;
        let snapshot: TopologySnapshot = serde_json::from_str(raw).unwrap();
        assert!(snapshot.nodes.is_empty());
        assert!(snapshot.network_id.is_none());
        assert_eq!(snapshot.total_nodes, 0);
    }
}
