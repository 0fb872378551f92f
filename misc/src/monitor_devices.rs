//! # Device Reachability Monitor
//!
//! Periodically probes a list of devices over TCP and feeds the results to
//! the device state tracker, which persists per-network state and reports
//! transitions to the notification service.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::net::TcpStream;
use tokio::time::sleep;

use lib_common::loggers::setup_logging;
use lib_common::trackers::{CheckMetrics, DeviceStateTracker, HttpNotificationSink};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Command-line arguments for the device monitor.
#[derive(Parser, Debug)]
#[command(author, version, about = "Probes devices over TCP and tracks their online/offline state", long_about = None)]
pub struct Args {
    /// Probe interval in seconds.
    #[arg(short, long, default_value_t = 30)]
    pub interval: u64,

    /// Devices to probe, as host:port pairs.
    #[arg(short, long = "device", required = true)]
    pub devices: Vec<String>,

    /// Network the probed devices belong to. Without it, results are
    /// neither tracked nor reported.
    #[arg(long, env = "MONITOR_NETWORK_ID")]
    pub network_id: Option<String>,

    /// Directory holding the per-network state files.
    #[arg(long, env = "HEALTH_STATE_DIR", default_value = "./network_states")]
    pub state_dir: PathBuf,

    /// Base URL of the notification service.
    #[arg(long, env = "NOTIFICATION_SERVICE_URL", default_value = "http://localhost:8004")]
    pub notification_service_url: String,

    /// Directory for log files.
    #[arg(long, env = "MONITOR_LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,
}

/// TCP-connect reachability probe. Returns success and the connect latency.
async fn check_device(address: &str) -> (bool, Option<f64>) {
    let started = Instant::now();
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address)).await {
        Ok(Ok(_)) => (true, Some(started.elapsed().as_secs_f64() * 1000.0)),
        _ => (false, None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    setup_logging("monitor_devices", &args.log_dir, "info")?;

    if args.network_id.is_none() {
        warn!("No network id configured; probes will run but nothing is tracked or reported.");
    }

    let sink = HttpNotificationSink::new(args.notification_service_url.clone());
    let tracker = DeviceStateTracker::new(&args.state_dir, sink);

    info!(
        "Monitoring {} device(s) every {} seconds...",
        args.devices.len(),
        args.interval
    );

    loop {
        for address in &args.devices {
            let (success, latency_ms) = check_device(address).await;
            let device_ip = address.split(':').next().unwrap_or(address);

            let reported = tracker
                .update_and_report(
                    args.network_id.as_deref(),
                    device_ip,
                    success,
                    CheckMetrics { latency_ms, ..CheckMetrics::default() },
                )
                .await;

            match (success, latency_ms) {
                (true, Some(latency)) => {
                    info!("{} is reachable ({:.1}ms, reported: {})", address, latency, reported)
                }
                _ => warn!("{} is unreachable (reported: {})", address, reported),
            }
        }

        sleep(Duration::from_secs(args.interval)).await;
    }
}
