use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for the server.
///
/// CLI flags provide the plugins directory, cache budget, and snapshot
/// override; everything AWS-facing is resolved from the environment so
/// that backend adapters can rebuild their clients on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,
    #[serde(default = "default_cache_size")]
    pub max_cache_size: u64,
    #[serde(default)]
    pub override_snapshot: bool,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_region")]
    pub aws_region: String,
    #[serde(default)]
    pub s3_bucket: String,
    #[serde(default = "default_results_prefix")]
    pub results_prefix: String,
    #[serde(default = "default_meta_prefix")]
    pub meta_prefix: String,
    #[serde(default = "default_metadata_prefix")]
    pub metadata_prefix: String,
    #[serde(default)]
    pub batch_log_group: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5050
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_cache_size() -> u64 {
    1_073_741_824 // 1 GiB
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".data")
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_results_prefix() -> String {
    "results".to_string()
}

fn default_meta_prefix() -> String {
    "metadata".to_string()
}

fn default_metadata_prefix() -> String {
    "metadata".to_string()
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_backend_timeout_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            plugins_dir: default_plugins_dir(),
            max_cache_size: default_cache_size(),
            override_snapshot: false,
            data_dir: default_data_dir(),
            aws_region: default_region(),
            s3_bucket: String::new(),
            results_prefix: default_results_prefix(),
            meta_prefix: default_meta_prefix(),
            metadata_prefix: default_metadata_prefix(),
            batch_log_group: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            backend_timeout_secs: default_backend_timeout_secs(),
        }
    }
}

impl Config {
    /// Build a config from the environment, starting from defaults.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(region) = std::env::var("AWS_REGION") {
            config.aws_region = region;
        }
        if let Ok(bucket) = std::env::var("S3_BUCKET") {
            config.s3_bucket = bucket;
        }
        if let Ok(dir) = std::env::var("S3_RESULTS_DIR") {
            config.results_prefix = dir;
        }
        if let Ok(dir) = std::env::var("S3_META_DIR") {
            config.meta_prefix = dir;
        }
        if let Ok(dir) = std::env::var("STORAGE_METADATA_DIR") {
            config.metadata_prefix = dir;
        }
        if let Ok(group) = std::env::var("BATCH_LOG_STREAM_GROUP") {
            config.batch_log_group = group;
        }

        config
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("snapshot.bin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5050);
        assert_eq!(config.plugins_dir, PathBuf::from("plugins"));
        assert_eq!(config.max_cache_size, 1_073_741_824);
        assert!(!config.override_snapshot);
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.backend_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_config_partial_deserialization() {
        let json = r#"{"port": 9000, "max_cache_size": 1024}"#;
        let config: Config = serde_json::from_str(json).expect("deserialize");
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_cache_size, 1024);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.results_prefix, "results");
    }

    #[test]
    fn test_snapshot_path_under_data_dir() {
        let config = Config {
            data_dir: PathBuf::from("/var/lib/process-api"),
            ..Default::default()
        };
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/var/lib/process-api/snapshot.bin")
        );
    }
}
