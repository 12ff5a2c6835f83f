use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL. When absent every store runs in memory.
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Orchestrator retry and timeout knobs
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransferConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Upper bound for a single ledger store call
    pub store_timeout_ms: u64,
    /// How long an in-flight claim stays exclusive before another worker may take it over
    pub claim_lease_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 10,
            max_backoff_ms: 500,
            store_timeout_ms: 3_000,
            claim_lease_ms: 30_000,
        }
    }
}

impl TransferConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_millis(self.claim_lease_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Consumer worker tasks
    pub workers: usize,
    /// Deliveries after which a message is dead-lettered
    pub max_deliveries: u32,
    pub visibility_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub nack_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            workers: 4,
            max_deliveries: 10,
            visibility_timeout_ms: 30_000,
            poll_interval_ms: 200,
            nack_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecoveryConfig {
    pub scan_interval_ms: u64,
    pub stale_threshold_ms: u64,
    pub batch_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 30_000,
            stale_threshold_ms: 60_000,
            batch_size: 100,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
