use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::sink::{DeviceReport, NotificationSink};

/// Last known reachability of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Online,
    Offline,
}

impl DeviceState {
    pub fn from_success(success: bool) -> Self {
        if success {
            DeviceState::Online
        } else {
            DeviceState::Offline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "online",
            DeviceState::Offline => "offline",
        }
    }
}

/// Optional measurements accompanying a health check.
#[derive(Debug, Clone, Default)]
pub struct CheckMetrics {
    pub latency_ms: Option<f64>,
    pub packet_loss: Option<f64>,
    pub device_name: Option<String>,
}

type NetworkStates = HashMap<String, DeviceState>;

/// Per-network last-known-state map with one JSON blob per network.
///
/// The blob is the sole durable copy across restarts; it is read in full on
/// first access per network and rewritten in full only when a device's
/// state changed or the device was never seen before, so steady-state
/// "still online" checks cause no disk writes. All mutation goes through
/// one async mutex, keeping the load-modify-persist sequence atomic and
/// file writes for different networks from interleaving.
pub struct DeviceStateTracker<S> {
    state_dir: PathBuf,
    sink: S,
    states: Mutex<HashMap<String, NetworkStates>>,
}

impl<S: NotificationSink> DeviceStateTracker<S> {
    pub fn new(state_dir: impl Into<PathBuf>, sink: S) -> Self {
        Self { state_dir: state_dir.into(), sink, states: Mutex::new(HashMap::new()) }
    }

    fn state_file(&self, network_id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", network_id))
    }

    /// Track one health check result and report it to the sink.
    ///
    /// Without a network id this is a strict no-op - no state is recorded
    /// and nothing is reported - so ad-hoc checks outside any registered
    /// network cannot pollute per-network state. Returns whether the report
    /// reached the sink.
    pub async fn update_and_report(
        &self,
        network_id: Option<&str>,
        device_ip: &str,
        success: bool,
        metrics: CheckMetrics,
    ) -> bool {
        let Some(network_id) = network_id else {
            log::debug!("Skipping device report for {} (no network id)", device_ip);
            return false;
        };

        let previous_state = self.update_device_state(network_id, device_ip, success).await;

        let report = DeviceReport {
            device_ip: device_ip.to_string(),
            success,
            network_id: network_id.to_string(),
            latency_ms: metrics.latency_ms,
            packet_loss: metrics.packet_loss,
            device_name: metrics.device_name,
            previous_state,
        };
        match self.sink.report_device_state(&report).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to report state of {} to the notification sink: {}", device_ip, e);
                false
            }
        }
    }

    /// Fan out a batch of check results concurrently. Returns how many
    /// reports reached the sink.
    pub async fn update_and_report_batch(
        &self,
        network_id: Option<&str>,
        results: Vec<(String, bool, CheckMetrics)>,
    ) -> usize {
        let reports = results.into_iter().map(|(device_ip, success, metrics)| async move {
            self.update_and_report(network_id, &device_ip, success, metrics).await
        });
        join_all(reports).await.into_iter().filter(|reported| *reported).count()
    }

    /// Returns the previous state after committing the current one.
    async fn update_device_state(
        &self,
        network_id: &str,
        device_ip: &str,
        success: bool,
    ) -> Option<DeviceState> {
        let mut states = self.states.lock().await;

        if !states.contains_key(network_id) {
            let loaded = load_network_states(&self.state_file(network_id), network_id).await;
            states.insert(network_id.to_string(), loaded);
        }
        let network_states = states.entry(network_id.to_string()).or_default();

        let previous_state = network_states.get(device_ip).copied();
        let current_state = DeviceState::from_success(success);
        network_states.insert(device_ip.to_string(), current_state);

        if previous_state != Some(current_state) {
            let snapshot = network_states.clone();
            save_network_states(&self.state_dir, &self.state_file(network_id), network_id, &snapshot)
                .await;
        }
        previous_state
    }

    /// Drop tracked state for one network (or all) from memory and disk.
    pub async fn clear_state_tracking(&self, network_id: Option<&str>) {
        let mut states = self.states.lock().await;
        match network_id {
            Some(network_id) => {
                states.remove(network_id);
                let _ = tokio::fs::remove_file(self.state_file(network_id)).await;
            }
            None => {
                states.clear();
                if let Ok(mut entries) = tokio::fs::read_dir(&self.state_dir).await {
                    while let Ok(Some(entry)) = entries.next_entry().await {
                        if entry.path().extension().is_some_and(|ext| ext == "json") {
                            let _ = tokio::fs::remove_file(entry.path()).await;
                        }
                    }
                }
            }
        }
    }

    /// Networks currently tracked in memory, for introspection.
    pub async fn tracked_networks(&self) -> Vec<String> {
        let states = self.states.lock().await;
        let mut networks: Vec<String> = states.keys().cloned().collect();
        networks.sort();
        networks
    }
}

async fn load_network_states(path: &Path, network_id: &str) -> NetworkStates {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => match serde_json::from_str::<NetworkStates>(&raw) {
            Ok(states) => {
                log::info!("Loaded {} device states for network {}", states.len(), network_id);
                states
            }
            Err(e) => {
                log::warn!("Corrupt state file for network {}, starting empty: {}", network_id, e);
                NetworkStates::new()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => NetworkStates::new(),
        Err(e) => {
            log::warn!("Failed to load states for network {}: {}", network_id, e);
            NetworkStates::new()
        }
    }
}

async fn save_network_states(
    state_dir: &Path,
    path: &Path,
    network_id: &str,
    states: &NetworkStates,
) {
    if let Err(e) = tokio::fs::create_dir_all(state_dir).await {
        log::warn!("Failed to create state directory {}: {}", state_dir.display(), e);
        return;
    }
    let json = match serde_json::to_string(states) {
        Ok(json) => json,
        Err(e) => {
            log::warn!("Failed to serialize states for network {}: {}", network_id, e);
            return;
        }
    };
    if let Err(e) = tokio::fs::write(path, json).await {
        log::warn!("Failed to save states for network {}: {}", network_id, e);
    }
}
