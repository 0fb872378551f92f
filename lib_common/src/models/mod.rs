//! Shared data model for the telemetry services: the network topology
//! snapshot produced by the aggregator and the event envelope published
//! on the Redis channels.

pub mod events;
pub mod topology;

pub use events::{
    MetricsEvent, MetricsEventType, CHANNEL_HEALTH, CHANNEL_SPEED_TEST, CHANNEL_TOPOLOGY,
    KEY_LAST_SNAPSHOT,
};
pub use topology::{
    DeviceRole, GatewayInfo, HealthStatus, NodeMetrics, PingMetrics, PortInfo, SpeedTestMetrics,
    TestIpMetrics, TopologySnapshot, UptimeMetrics,
};
