// logflume-config - Runtime configuration for the pipeline
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from LOGFLUME_CONFIG env var
// 3. Config file contents from LOGFLUME_CONFIG_CONTENT env var
// 4. Default config file locations (./logflume.toml, ./.logflume.toml)
// 5. Built-in defaults (lowest priority)

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

mod sources;
mod validation;

/// Main runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub consumer: ConsumerConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl RuntimeConfig {
    /// Load configuration from all sources with env overrides applied.
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Parse a TOML document into a config without touching files or env.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Ingest endpoint limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Largest accepted batch on POST /logs/batch.
    pub max_batch_records: usize,
    pub max_payload_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_batch_records: 5_000,
            max_payload_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Queue substrate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Partition count for the logs topic; serviceId hashes to a partition.
    pub partitions: usize,
    /// Most records a consumer pulls in one batch.
    pub poll_max_records: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            partitions: 3,
            poll_max_records: 500,
        }
    }
}

/// Batch consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Parallel consumer workers; partitions are assigned round-robin.
    pub workers: usize,
    /// Total durable-write attempts per batch (1 = no retry). Only
    /// transient store errors are retried.
    pub write_retry_attempts: u32,
    pub write_retry_backoff_ms: u64,
    /// Deadline for a single durable write.
    pub write_timeout_ms: u64,
}

impl ConsumerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn write_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.write_retry_backoff_ms)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            write_retry_attempts: 2,
            write_retry_backoff_ms: 100,
            write_timeout_ms: 5_000,
        }
    }
}

/// Realtime broadcaster policy levers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Most records drained per flush tick.
    pub max_payload: usize,
    /// Bounded queue capacity; the oldest entry is dropped at capacity.
    pub queue_cap: usize,
}

impl BroadcastConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 250,
            max_payload: 250,
            queue_cap: 2_000,
        }
    }
}

/// Search service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Deadline for one search-store or fallback query.
    pub query_timeout_ms: u64,
}

impl SearchConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 3_000,
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Entry count that triggers pruning of expired entries on insert.
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 1_024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_recommended_policy() {
        let config = RuntimeConfig::default();
        assert_eq!(config.queue.partitions, 3);
        assert_eq!(config.consumer.workers, 3);
        assert_eq!(config.broadcast.interval_ms, 250);
        assert_eq!(config.broadcast.max_payload, 250);
        assert_eq!(config.broadcast.queue_cap, 2_000);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.ingest.max_batch_records, 5_000);
        assert!(config.broadcast.enabled);
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let config = RuntimeConfig::from_toml(
            r#"
            [broadcast]
            enabled = false
            interval_ms = 100
            max_payload = 50
            queue_cap = 500

            [cache]
            ttl_secs = 60
            max_entries = 16
            "#,
        )
        .unwrap();
        assert!(!config.broadcast.enabled);
        assert_eq!(config.broadcast.interval_ms, 100);
        assert_eq!(config.cache.ttl_secs, 60);
        // Untouched sections keep defaults
        assert_eq!(config.queue.partitions, 3);
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        assert!(RuntimeConfig::from_toml("[queue]\npartitions = 0\npoll_max_records = 10").is_err());
    }
}
