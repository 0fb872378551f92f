//! Renders a topology snapshot into the plain-text report served to API
//! consumers, together with a compact summary object.

use serde::Serialize;

use crate::models::topology::{DeviceRole, GatewayInfo, NodeMetrics, TopologySnapshot};

const SECTION_RULE: &str = "----------------------------------------";

// Fixed presentation order for the per-role sections.
const ROLE_SECTIONS: [(DeviceRole, &str); 8] = [
    (DeviceRole::GatewayRouter, "GATEWAYS & ROUTERS"),
    (DeviceRole::Firewall, "FIREWALLS"),
    (DeviceRole::SwitchAp, "SWITCHES & ACCESS POINTS"),
    (DeviceRole::Server, "SERVERS"),
    (DeviceRole::Service, "SERVICES"),
    (DeviceRole::Nas, "NAS DEVICES"),
    (DeviceRole::Client, "CLIENT DEVICES"),
    (DeviceRole::Unknown, "UNKNOWN DEVICES"),
];

/// Compact companion to the rendered context text.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextSummary {
    pub total_nodes: u32,
    pub healthy_nodes: u32,
    pub unhealthy_nodes: u32,
    pub gateway_count: u32,
    pub snapshot_timestamp: Option<String>,
    pub context_tokens_estimate: usize,
    pub loading: bool,
    pub unavailable: bool,
}

/// Build the report text and summary for one snapshot.
pub fn render_snapshot(snapshot: &TopologySnapshot) -> (String, ContextSummary) {
    let mut lines: Vec<String> = vec![
        "=".repeat(60),
        "NETWORK TOPOLOGY INFORMATION".to_string(),
        "=".repeat(60),
        String::new(),
        format!("Snapshot Time: {}", snapshot.timestamp.to_rfc3339()),
    ];

    push_health_summary(&mut lines, snapshot);
    push_nodes_by_role(&mut lines, snapshot);
    push_gateways(&mut lines, snapshot);

    if snapshot.connection_count > 0 {
        lines.push(String::new());
        lines.push(format!("NETWORK CONNECTIONS: {} total", snapshot.connection_count));
    }

    push_user_notes(&mut lines, snapshot);

    lines.push(String::new());
    lines.push("=".repeat(60));
    let context = lines.join("\n");

    let summary = ContextSummary {
        total_nodes: snapshot.total_nodes,
        healthy_nodes: snapshot.healthy_nodes,
        unhealthy_nodes: snapshot.unhealthy_nodes,
        gateway_count: snapshot.gateways.len() as u32,
        snapshot_timestamp: Some(snapshot.timestamp.to_rfc3339()),
        context_tokens_estimate: context.len() / 4,
        loading: false,
        unavailable: false,
    };
    (context, summary)
}

fn push_health_summary(lines: &mut Vec<String>, snapshot: &TopologySnapshot) {
    lines.push(String::new());
    lines.push("NETWORK SUMMARY".to_string());
    lines.push(format!("Total Devices: {}", snapshot.total_nodes));
    lines.push("Health Status:".to_string());
    lines.push(format!("  Healthy: {}", snapshot.healthy_nodes));
    if snapshot.degraded_nodes > 0 {
        lines.push(format!("  Degraded: {}", snapshot.degraded_nodes));
    }
    if snapshot.unhealthy_nodes > 0 {
        lines.push(format!("  Unhealthy: {}", snapshot.unhealthy_nodes));
    }
    if snapshot.unknown_nodes > 0 {
        lines.push(format!("  Unknown: {}", snapshot.unknown_nodes));
    }
}

fn push_nodes_by_role(lines: &mut Vec<String>, snapshot: &TopologySnapshot) {
    for (role, label) in ROLE_SECTIONS {
        let mut nodes: Vec<&NodeMetrics> =
            snapshot.nodes.values().filter(|node| node.role == role).collect();
        if nodes.is_empty() {
            continue;
        }
        // HashMap iteration order is arbitrary; keep the report stable.
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        lines.push(String::new());
        lines.push(label.to_string());
        lines.push(SECTION_RULE.to_string());
        for node in nodes {
            push_node(lines, node);
        }
    }
}

fn push_node(lines: &mut Vec<String>, node: &NodeMetrics) {
    lines.push(format!("  - {}", node.name));
    lines.push(format!("    IP: {}", node.ip));
    lines.push(format!("    Role: {}", node.role.as_str()));
    lines.push(format!("    Status: {}", node.status.as_str()));

    if let Some(hostname) = &node.hostname {
        if hostname != &node.name {
            lines.push(format!("    Hostname: {}", hostname));
        }
    }
    if let Some(speed) = &node.connection_speed {
        lines.push(format!("    Connection: {}", speed));
    }
    if let Some(ping) = &node.ping {
        if ping.success {
            if let Some(latency) = ping.avg_latency_ms.or(ping.latency_ms) {
                lines.push(format!("    Latency: {:.1}ms", latency));
            }
        }
    }
    if let Some(uptime) = &node.uptime {
        if let Some(percent) = uptime.uptime_percent_24h {
            lines.push(format!("    Uptime (24h): {:.1}%", percent));
        }
    }
    if !node.open_ports.is_empty() {
        let ports: Vec<String> = node
            .open_ports
            .iter()
            .take(5)
            .map(|p| match &p.service {
                Some(service) => format!("{} ({})", p.port, service),
                None => p.port.to_string(),
            })
            .collect();
        lines.push(format!("    Open Ports: {}", ports.join(", ")));
    }
    if let Some(notes) = &node.notes {
        lines.push(format!("    Notes: {}", notes));
    }
}

fn push_gateways(lines: &mut Vec<String>, snapshot: &TopologySnapshot) {
    if snapshot.gateways.is_empty() {
        return;
    }
    lines.push(String::new());
    lines.push("ISP & INTERNET CONNECTIVITY".to_string());
    lines.push(SECTION_RULE.to_string());
    for gateway in &snapshot.gateways {
        push_gateway(lines, gateway, snapshot);
    }
}

fn push_gateway(lines: &mut Vec<String>, gateway: &GatewayInfo, snapshot: &TopologySnapshot) {
    lines.push(String::new());
    lines.push(format!("  Gateway: {}", gateway.gateway_ip));

    let gateway_node = snapshot.nodes.values().find(|node| node.ip == gateway.gateway_ip);
    if let Some(node) = gateway_node {
        if node.name != gateway.gateway_ip {
            lines.push(format!("    Name: {}", node.name));
        }
    }

    if !gateway.test_ips.is_empty() {
        let healthy = gateway
            .test_ips
            .iter()
            .filter(|t| t.status == crate::models::topology::HealthStatus::Healthy)
            .count();
        lines.push(format!(
            "    External Connectivity: {}/{} test IPs healthy",
            healthy,
            gateway.test_ips.len()
        ));
        for test_ip in &gateway.test_ips {
            let display = match &test_ip.label {
                Some(label) => format!("{} ({})", test_ip.ip, label),
                None => test_ip.ip.clone(),
            };
            lines.push(format!("      - {}: {}", display, test_ip.status.as_str()));
        }
    }

    if let Some(speed_test) = &gateway.last_speed_test {
        if speed_test.success {
            if speed_test.download_mbps.is_some() || speed_test.upload_mbps.is_some() {
                let down = speed_test
                    .download_mbps
                    .map_or_else(|| "N/A".to_string(), |v| format!("{:.1}", v));
                let up = speed_test
                    .upload_mbps
                    .map_or_else(|| "N/A".to_string(), |v| format!("{:.1}", v));
                lines.push(format!("    Speed Test: down {} Mbps / up {} Mbps", down, up));
            }
            if let Some(ping_ms) = speed_test.ping_ms {
                lines.push(format!("    ISP Latency: {:.1}ms", ping_ms));
            }
            if let Some(isp) = &speed_test.client_isp {
                lines.push(format!("    ISP: {}", isp));
            }
            if let Some(timestamp) = &speed_test.timestamp {
                lines.push(format!("    Tested: {}", timestamp));
            }
        } else {
            let reason = speed_test.error_message.as_deref().unwrap_or("Unknown error");
            lines.push(format!("    Speed Test: Failed - {}", reason));
        }
    }

    if let Some(node) = gateway_node {
        if let Some(notes) = &node.notes {
            lines.push(format!("    Notes: {}", notes));
        }
    }
}

fn push_user_notes(lines: &mut Vec<String>, snapshot: &TopologySnapshot) {
    let mut noted: Vec<&NodeMetrics> = snapshot
        .nodes
        .values()
        .filter(|node| node.role != DeviceRole::Group && node.notes.is_some())
        .collect();
    if noted.is_empty() {
        return;
    }
    noted.sort_by(|a, b| a.name.cmp(&b.name));

    lines.push(String::new());
    lines.push("USER NOTES".to_string());
    lines.push(SECTION_RULE.to_string());
    for node in noted {
        lines.push(format!("  {} ({}):", node.name, node.ip));
        if let Some(notes) = &node.notes {
            for note_line in notes.trim().lines() {
                lines.push(format!("    {}", note_line));
            }
        }
    }
}

/// Placeholder served while a tenant waits for its first snapshot.
pub(crate) fn loading_context() -> (String, ContextSummary) {
    let context = "\
============================================================
NETWORK TOPOLOGY INFORMATION
============================================================

Network data is loading...

The network monitoring system is starting up and collecting initial data.
This typically takes 30-60 seconds after first launch.

General questions can still be answered while the first scan completes.
============================================================";
    let summary = ContextSummary {
        context_tokens_estimate: context.len() / 4,
        loading: true,
        ..ContextSummary::default()
    };
    (context.to_string(), summary)
}

/// Placeholder served when a previously healthy aggregator stops answering.
pub(crate) fn unavailable_context() -> (String, ContextSummary) {
    let context = "\
============================================================
NETWORK TOPOLOGY INFORMATION
============================================================

Network data is temporarily unavailable.

The metrics service may be restarting or experiencing issues.
Previous network data should be restored shortly.
============================================================";
    let summary = ContextSummary {
        context_tokens_estimate: context.len() / 4,
        unavailable: true,
        ..ContextSummary::default()
    };
    (context.to_string(), summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::topology::{
        HealthStatus, PingMetrics, PortInfo, SpeedTestMetrics, TestIpMetrics,
    };
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn sample_snapshot() -> TopologySnapshot {
        let mut nodes = HashMap::new();
        nodes.insert(
            "gw".to_string(),
            NodeMetrics {
                name: "edge-router".to_string(),
                ip: "192.168.1.1".to_string(),
                role: DeviceRole::GatewayRouter,
                status: HealthStatus::Healthy,
                hostname: Some("edge-router.lan".to_string()),
                connection_speed: Some("1 Gbps".to_string()),
                notes: Some("Rack A, top shelf".to_string()),
                ping: Some(PingMetrics {
                    success: true,
                    latency_ms: Some(3.0),
                    avg_latency_ms: Some(2.6),
                    packet_loss_percent: 0.0,
                }),
                uptime: None,
                open_ports: vec![PortInfo { port: 443, open: true, service: Some("HTTPS".to_string()) }],
            },
        );
        nodes.insert(
            "srv".to_string(),
            NodeMetrics {
                name: "files".to_string(),
                ip: "192.168.1.20".to_string(),
                role: DeviceRole::Nas,
                status: HealthStatus::Degraded,
                hostname: None,
                connection_speed: None,
                notes: None,
                ping: None,
                uptime: None,
                open_ports: vec![],
            },
        );
        TopologySnapshot {
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            network_id: Some("net-a".to_string()),
            nodes,
            gateways: vec![GatewayInfo {
                gateway_ip: "192.168.1.1".to_string(),
                test_ips: vec![TestIpMetrics {
                    ip: "1.1.1.1".to_string(),
                    label: Some("Cloudflare".to_string()),
                    status: HealthStatus::Healthy,
                }],
                last_speed_test: Some(SpeedTestMetrics {
                    success: true,
                    download_mbps: Some(940.2),
                    upload_mbps: Some(112.7),
                    ping_ms: Some(4.1),
                    ..SpeedTestMetrics::default()
                }),
            }],
            connection_count: 2,
            total_nodes: 2,
            healthy_nodes: 1,
            degraded_nodes: 1,
            unhealthy_nodes: 0,
            unknown_nodes: 0,
        }
    }

    #[test]
    fn test_render_contains_all_sections() {
        let (context, _) = render_snapshot(&sample_snapshot());
        assert!(context.contains("NETWORK TOPOLOGY INFORMATION"));
        assert!(context.contains("NETWORK SUMMARY"));
        assert!(context.contains("GATEWAYS & ROUTERS"));
        assert!(context.contains("NAS DEVICES"));
        assert!(context.contains("ISP & INTERNET CONNECTIVITY"));
        assert!(context.contains("NETWORK CONNECTIONS: 2 total"));
        assert!(context.contains("USER NOTES"));
    }

    #[test]
    fn test_render_node_details() {
        let (context, _) = render_snapshot(&sample_snapshot());
        assert!(context.contains("  - edge-router"));
        assert!(context.contains("    IP: 192.168.1.1"));
        assert!(context.contains("    Hostname: edge-router.lan"));
        assert!(context.contains("    Latency: 2.6ms"));
        assert!(context.contains("    Open Ports: 443 (HTTPS)"));
        assert!(context.contains("    External Connectivity: 1/1 test IPs healthy"));
        assert!(context.contains("      - 1.1.1.1 (Cloudflare): healthy"));
        assert!(context.contains("Speed Test: down 940.2 Mbps / up 112.7 Mbps"));
    }

    #[test]
    fn test_summary_mirrors_snapshot_rollups() {
        let (context, summary) = render_snapshot(&sample_snapshot());
        assert_eq!(summary.total_nodes, 2);
        assert_eq!(summary.healthy_nodes, 1);
        assert_eq!(summary.unhealthy_nodes, 0);
        assert_eq!(summary.gateway_count, 1);
        assert_eq!(summary.context_tokens_estimate, context.len() / 4);
        assert!(!summary.loading);
        assert!(!summary.unavailable);
        assert_eq!(summary.snapshot_timestamp.as_deref(), Some("2024-06-01T12:00:00+00:00"));
    }

    #[test]
    fn test_placeholders_are_flagged() {
        let (loading_text, loading) = loading_context();
        assert!(loading.loading);
        assert!(!loading.unavailable);
        assert_eq!(loading.total_nodes, 0);
        assert_eq!(loading.context_tokens_estimate, loading_text.len() / 4);

        let (unavailable_text, unavailable) = unavailable_context();
        assert!(unavailable.unavailable);
        assert!(!unavailable.loading);
        assert!(unavailable_text.contains("temporarily unavailable"));
    }
}
