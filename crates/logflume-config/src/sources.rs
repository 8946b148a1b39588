// Configuration source loading
//
// Loads configuration from multiple sources with priority:
// 1. Environment variables (highest)
// 2. Config file from LOGFLUME_CONFIG path
// 3. Inline config from LOGFLUME_CONFIG_CONTENT
// 4. Default config files (./logflume.toml, ./.logflume.toml)
// 5. Built-in defaults (lowest)

use std::env;
use std::path::Path;

use anyhow::{Context, Result};

use crate::{LogFormat, RuntimeConfig};

const ENV_PREFIX: &str = "LOGFLUME_";

/// Load configuration from all sources.
pub fn load_config() -> Result<RuntimeConfig> {
    let mut config = load_from_file()?.unwrap_or_default();

    apply_env_overrides(&mut config)?;

    config.validate()?;

    Ok(config)
}

/// Load configuration from file, if one is configured or present.
fn load_from_file() -> Result<Option<RuntimeConfig>> {
    // Check for explicit config file path
    if let Ok(path) = env::var("LOGFLUME_CONFIG") {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: RuntimeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        return Ok(Some(config));
    }

    // Check for inline config content
    if let Ok(content) = env::var("LOGFLUME_CONFIG_CONTENT") {
        let config: RuntimeConfig = toml::from_str(&content)
            .context("Failed to parse inline config from LOGFLUME_CONFIG_CONTENT")?;
        return Ok(Some(config));
    }

    // Try default config file locations
    for path in &["./logflume.toml", "./.logflume.toml"] {
        if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            let config: RuntimeConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path))?;
            return Ok(Some(config));
        }
    }

    Ok(None)
}

/// Apply environment variable overrides (highest priority).
fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<()> {
    // Server
    if let Some(addr) = get_env_string("LISTEN_ADDR")? {
        config.server.listen_addr = addr;
    }
    if let Some(level) = get_env_string("LOG_LEVEL")? {
        config.server.log_level = level;
    }
    if let Some(format) = get_env_string("LOG_FORMAT")? {
        config.server.log_format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    // Ingest
    if let Some(val) = get_env_usize("INGEST_MAX_BATCH_RECORDS")? {
        config.ingest.max_batch_records = val;
    }
    if let Some(val) = get_env_usize("INGEST_MAX_PAYLOAD_BYTES")? {
        config.ingest.max_payload_bytes = val;
    }

    // Queue
    if let Some(val) = get_env_usize("QUEUE_PARTITIONS")? {
        config.queue.partitions = val;
    }
    if let Some(val) = get_env_usize("QUEUE_POLL_MAX_RECORDS")? {
        config.queue.poll_max_records = val;
    }

    // Consumer
    if let Some(val) = get_env_usize("CONSUMER_WORKERS")? {
        config.consumer.workers = val;
    }
    if let Some(val) = get_env_u32("CONSUMER_WRITE_RETRY_ATTEMPTS")? {
        config.consumer.write_retry_attempts = val;
    }
    if let Some(val) = get_env_u64("CONSUMER_WRITE_RETRY_BACKOFF_MS")? {
        config.consumer.write_retry_backoff_ms = val;
    }
    if let Some(val) = get_env_u64("CONSUMER_WRITE_TIMEOUT_MS")? {
        config.consumer.write_timeout_ms = val;
    }

    // Broadcast
    if let Some(val) = get_env_bool("BROADCAST_ENABLED")? {
        config.broadcast.enabled = val;
    }
    if let Some(val) = get_env_u64("BROADCAST_INTERVAL_MS")? {
        config.broadcast.interval_ms = val;
    }
    if let Some(val) = get_env_usize("BROADCAST_MAX_PAYLOAD")? {
        config.broadcast.max_payload = val;
    }
    if let Some(val) = get_env_usize("BROADCAST_QUEUE_CAP")? {
        config.broadcast.queue_cap = val;
    }

    // Search
    if let Some(val) = get_env_u64("SEARCH_QUERY_TIMEOUT_MS")? {
        config.search.query_timeout_ms = val;
    }

    // Cache
    if let Some(val) = get_env_u64("CACHE_TTL_SECS")? {
        config.cache.ttl_secs = val;
    }
    if let Some(val) = get_env_usize("CACHE_MAX_ENTRIES")? {
        config.cache.max_entries = val;
    }

    Ok(())
}

/// Helper: Get environment variable as string.
fn get_env_string(key: &str) -> Result<Option<String>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match env::var(&full_key) {
        Ok(val) if !val.is_empty() => Ok(Some(val)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read env var {}", full_key)),
    }
}

/// Helper: Get environment variable as usize.
fn get_env_usize(key: &str) -> Result<Option<usize>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match get_env_string(key)? {
        Some(val) => {
            let parsed = val
                .parse::<usize>()
                .with_context(|| format!("{} must be a valid number", full_key))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Helper: Get environment variable as u64.
fn get_env_u64(key: &str) -> Result<Option<u64>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match get_env_string(key)? {
        Some(val) => {
            let parsed = val
                .parse::<u64>()
                .with_context(|| format!("{} must be a valid number", full_key))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Helper: Get environment variable as u32.
fn get_env_u32(key: &str) -> Result<Option<u32>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match get_env_string(key)? {
        Some(val) => {
            let parsed = val
                .parse::<u32>()
                .with_context(|| format!("{} must be a valid number", full_key))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Helper: Get environment variable as bool.
fn get_env_bool(key: &str) -> Result<Option<bool>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match get_env_string(key)? {
        Some(val) => {
            let parsed = match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => anyhow::bail!("{} must be true or false", full_key),
            };
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
