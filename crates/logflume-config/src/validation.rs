// Configuration validation
//
// Validates that required fields are present and values are sensible

use anyhow::{bail, Result};
use tracing::warn;

use crate::{
    BroadcastConfig, CacheConfig, ConsumerConfig, IngestConfig, QueueConfig, RuntimeConfig,
    SearchConfig, ServerConfig,
};

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_server_config(&config.server)?;
    validate_ingest_config(&config.ingest)?;
    validate_queue_config(&config.queue)?;
    validate_consumer_config(&config.consumer, &config.queue)?;
    validate_broadcast_config(&config.broadcast)?;
    validate_search_config(&config.search)?;
    validate_cache_config(&config.cache)?;

    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.listen_addr.is_empty() {
        bail!("server.listen_addr must not be empty");
    }

    if !config.listen_addr.contains(':') {
        bail!("server.listen_addr must be in format 'host:port'");
    }

    Ok(())
}

fn validate_ingest_config(config: &IngestConfig) -> Result<()> {
    if config.max_batch_records == 0 {
        bail!("ingest.max_batch_records must be greater than 0");
    }

    if config.max_payload_bytes == 0 {
        bail!("ingest.max_payload_bytes must be greater than 0");
    }

    if config.max_batch_records < 5_000 {
        warn!(
            max_batch_records = config.max_batch_records,
            "ingest.max_batch_records is below the recommended minimum of 5000"
        );
    }

    Ok(())
}

fn validate_queue_config(config: &QueueConfig) -> Result<()> {
    if config.partitions == 0 {
        bail!("queue.partitions must be greater than 0");
    }

    if config.poll_max_records == 0 {
        bail!("queue.poll_max_records must be greater than 0");
    }

    Ok(())
}

fn validate_consumer_config(config: &ConsumerConfig, queue: &QueueConfig) -> Result<()> {
    if config.workers == 0 {
        bail!("consumer.workers must be greater than 0");
    }

    if config.write_retry_attempts == 0 {
        bail!("consumer.write_retry_attempts must be at least 1");
    }

    if config.write_timeout_ms == 0 {
        bail!("consumer.write_timeout_ms must be greater than 0");
    }

    if config.workers > queue.partitions {
        warn!(
            workers = config.workers,
            partitions = queue.partitions,
            "consumer.workers exceeds queue.partitions; extra workers will idle"
        );
    }

    Ok(())
}

fn validate_broadcast_config(config: &BroadcastConfig) -> Result<()> {
    if config.interval_ms == 0 {
        bail!("broadcast.interval_ms must be greater than 0");
    }

    if config.max_payload == 0 {
        bail!("broadcast.max_payload must be greater than 0");
    }

    if config.queue_cap == 0 {
        bail!("broadcast.queue_cap must be greater than 0");
    }

    if config.max_payload > config.queue_cap {
        warn!(
            max_payload = config.max_payload,
            queue_cap = config.queue_cap,
            "broadcast.max_payload exceeds broadcast.queue_cap; flushes can never fill"
        );
    }

    Ok(())
}

fn validate_search_config(config: &SearchConfig) -> Result<()> {
    if config.query_timeout_ms == 0 {
        bail!("search.query_timeout_ms must be greater than 0");
    }

    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<()> {
    if config.ttl_secs == 0 {
        bail!("cache.ttl_secs must be greater than 0");
    }

    if config.max_entries == 0 {
        bail!("cache.max_entries must be greater than 0");
    }

    Ok(())
}
