//! Configuration: a TOML file plus a couple of CLI overrides.
//!
//! Mirrors the configuration surface the teacher's Cargo.toml already pulled
//! in `clap`/`serde`/`toml` for, just never used — this is that wiring.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::{StorageError, StorageResult};

#[derive(Debug, Parser)]
#[command(name = "storage-proxy", about = "Vfolder storage proxy")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    pub config: PathBuf,

    /// Force debug-level logging regardless of the config file.
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(rename = "storage-proxy")]
    pub storage_proxy: StorageProxyConfig,
    #[serde(rename = "api")]
    pub api: ApiConfig,
    pub volume: BTreeMap<String, VolumeConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct StorageProxyConfig {
    #[serde(rename = "node-id")]
    pub node_id: String,
    #[serde(rename = "scandir-limit", default)]
    pub scandir_limit: usize,
    #[serde(rename = "max-upload-size", default = "default_max_upload_size")]
    pub max_upload_size: u64,
    pub secret: String,
    #[serde(rename = "session-expire", default = "default_session_expire", deserialize_with = "deserialize_duration_secs")]
    pub session_expire: Duration,
}

fn default_max_upload_size() -> u64 {
    100 * 1024 * 1024 * 1024 // 100 GiB
}

fn default_session_expire() -> Duration {
    Duration::from_secs(15 * 60)
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub manager: ApiEndpointConfig,
    pub client: ApiEndpointConfig,
}

#[derive(Debug, Deserialize)]
pub struct ApiEndpointConfig {
    #[serde(rename = "service-addr")]
    pub service_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VolumeConfig {
    pub backend: String,
    pub path: String,
    #[serde(default = "default_fsprefix")]
    pub fsprefix: String,
}

fn default_fsprefix() -> String {
    ".".to_owned()
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
}

impl Config {
    pub fn load(cli: &Cli) -> StorageResult<Self> {
        let text = std::fs::read_to_string(&cli.config).map_err(|e| {
            StorageError::Config(format!("cannot read config file {}: {e}", cli.config.display()))
        })?;
        let mut config: Config = toml::from_str(&text)
            .map_err(|e| StorageError::Config(format!("invalid config file: {e}")))?;

        if cli.debug {
            config.logging.level = Some("debug".to_owned());
        }

        if config.volume.is_empty() {
            return Err(StorageError::Config("no [volume.*] sections configured".into()));
        }
        for (name, volume) in &config.volume {
            if !matches!(volume.backend.as_str(), "posix" | "xfs") {
                return Err(StorageError::Config(format!(
                    "volume '{name}' names unknown backend '{}'",
                    volume.backend
                )));
            }
        }

        Ok(config)
    }
}
