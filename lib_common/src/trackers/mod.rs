//! Per-network device state tracking with change reporting.
//!
//! Health checks feed the tracker; it remembers each device's last known
//! state across restarts and forwards every check to the notification sink
//! together with the previous state, so the sink can run its own
//! transition logic.

mod device_state;
mod sink;

pub use device_state::{CheckMetrics, DeviceState, DeviceStateTracker};
pub use sink::{DeviceReport, HttpNotificationSink, NotificationSink};
