// src/config.rs

//! Monitor configuration: loading from TOML and defaults.

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// The address advertised in hello messages; defaults to `host`.
    pub announce_ip: Option<String>,

    /// A stable run ID for this monitor. Generated at startup when absent.
    pub run_id: Option<String>,

    /// Where config epochs are persisted. In-memory only when absent.
    pub epoch_file: Option<String>,

    pub masters: Vec<MasterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub quorum: usize,

    #[serde(with = "humantime_serde")]
    pub down_after: Duration,

    #[serde(with = "humantime_serde")]
    pub failover_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_reconfig_timeout")]
    pub reconfig_timeout: Duration,

    #[serde(default = "default_parallel_syncs")]
    pub parallel_syncs: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    26379
}

fn default_reconfig_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_parallel_syncs() -> usize {
    1
}

impl MonitorConfig {
    pub async fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: MonitorConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
