// Error taxonomy for the pipeline
//
// Write-side errors (store, publish) are absorbed and diverted so offset
// commit always proceeds; read-side errors are surfaced as validation
// failures or silently degraded (cache bypass, search fallback).

use serde::Serialize;
use thiserror::Error;

/// A single field-level validation failure, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Request rejected before entering the pipeline. Maps to HTTP 400.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn new(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation::new(field, message)],
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation failed:")?;
        for (i, violation) in self.violations.iter().enumerate() {
            let sep = if i == 0 { " " } else { "; " };
            write!(f, "{}{} {}", sep, violation.field, violation.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Durable-writer failure. Both kinds route the whole batch to the DLQ;
/// only transient failures are eligible for in-band retry.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("permanent store failure: {0}")]
    Permanent(String),
    #[error("store operation canceled")]
    Canceled,
}

impl StoreError {
    /// Stable kind string carried in DLQ envelopes and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Transient(_) => "TransientStoreError",
            StoreError::Permanent(_) => "PermanentStoreError",
            StoreError::Canceled => "Canceled",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Search store unreachable or erroring; triggers the fallback read path.
#[derive(Debug, Clone, Error)]
pub enum SearchBackendError {
    #[error("search backend unavailable: {0}")]
    Unavailable(String),
    #[error("search query canceled")]
    Canceled,
}

/// Cache backend failure; logged, counted, then bypassed.
#[derive(Debug, Clone, Error)]
#[error("cache backend failure: {0}")]
pub struct CacheError(pub String);

/// Queue publish failure; logged and counted, never retracts an ingest ack.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("queue publish failed: {0}")]
    Failed(String),
    #[error("queue is closed")]
    Closed,
}
