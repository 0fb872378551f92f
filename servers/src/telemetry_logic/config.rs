use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Network telemetry publishing service", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TELEMETRY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "REDIS_URL", help = "URL of the shared Redis instance.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "METRICS_SERVICE_URL", help = "Base URL of the snapshot aggregator service.")]
    pub metrics_service_url: Option<String>,

    #[clap(long, env = "TELEMETRY_NETWORK_ID", help = "Network to publish snapshots for. Unset means the legacy single-network deployment.")]
    pub network_id: Option<String>,

    #[clap(long, env = "TELEMETRY_PUBLISH_INTERVAL_SECONDS", help = "Seconds between publish cycles.")]
    pub publish_interval_seconds: Option<u64>,

    #[clap(long, env = "TELEMETRY_SNAPSHOT_TTL_SECONDS", help = "Expiry of the durable last snapshot in Redis.")]
    pub snapshot_ttl_seconds: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            redis_url: other.redis_url.or(self.redis_url),
            metrics_service_url: other.metrics_service_url.or(self.metrics_service_url),
            network_id: other.network_id.or(self.network_id),
            publish_interval_seconds: other.publish_interval_seconds.or(self.publish_interval_seconds),
            snapshot_ttl_seconds: other.snapshot_ttl_seconds.or(self.snapshot_ttl_seconds),
        }
    }
}

pub fn load_config() -> Config {
    // 1. Load defaults
    let default_config = Config {
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        redis_url: Some("redis://localhost:6379".to_string()),
        metrics_service_url: Some("http://localhost:8002".to_string()),
        publish_interval_seconds: Some(30),
        snapshot_ttl_seconds: Some(3600),
        ..Default::default()
    };

    // 2. Load from config file (server_telemetry.conf) if present.
    //    Allow overriding default config file path with CLI arg.
    let cli_args_for_path = Config::parse(); // Parse CLI to get potential config_path override early

    let config_file_path = cli_args_for_path
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_telemetry.conf"));

    let mut current_config = default_config;

    if config_file_path.exists() {
        if let Ok(config_str) = fs::read_to_string(&config_file_path) {
            if let Ok(file_config) = serde_json::from_str::<Config>(&config_str) {
                current_config = current_config.merge(file_config);
            } else {
                log::warn!(
                    "Failed to parse config file: {}. Falling back to other sources.",
                    config_file_path.display()
                );
            }
        } else {
            log::warn!(
                "Failed to read config file: {}. Falling back to other sources.",
                config_file_path.display()
            );
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // 3. Override with environment variables and CLI arguments.
    //    clap::Parser automatically handles env vars and CLI args; merge them
    //    over the file config.
    let cli_args_final = Config::parse();
    current_config.merge(cli_args_final)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_overrides() {
        let base = Config {
            redis_url: Some("redis://localhost:6379".to_string()),
            publish_interval_seconds: Some(30),
            ..Default::default()
        };
        let overrides = Config {
            publish_interval_seconds: Some(5),
            network_id: Some("net-a".to_string()),
            ..Default::default()
        };
        let merged = base.merge(overrides);
        assert_eq!(merged.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(merged.publish_interval_seconds, Some(5));
        assert_eq!(merged.network_id.as_deref(), Some("net-a"));
    }

    #[test]
    fn test_config_file_shape_is_camel_case() {
        let raw = r#"{
            "redisUrl": "redis://cache:6379",
            "metricsServiceUrl": "http://metrics:8002",
            "publishIntervalSeconds": 10
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.publish_interval_seconds, Some(10));
    }
}
