//! Daemon configuration
//!
//! Read from an optional TOML file; every field has a default so an empty
//! file (or none at all) gives a working in-memory gateway.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use vss_core::DEFAULT_ID_FIELD;

/// Which storage collaborator backs the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Document store with a change feed, push subscriptions
    Document,
    /// Pull-only time-series store, poll subscriptions
    #[default]
    Timeseries,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// VSS catalog file; the built-in catalog when unset
    pub datapoints: Option<PathBuf>,
    pub id_field: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            datapoints: None,
            id_field: DEFAULT_ID_FIELD.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_ms: 200 }
    }
}

impl GatewayConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply command-line overrides on top of the file values
    pub fn merge_with_args(
        mut self,
        port: Option<u16>,
        kind: Option<StoreKind>,
        datapoints: Option<PathBuf>,
    ) -> Self {
        if let Some(port) = port {
            self.server.port = port;
        }
        if let Some(kind) = kind {
            self.store.kind = kind;
        }
        if datapoints.is_some() {
            self.store.datapoints = datapoints;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms)
    }
}
