// Canonical log record and ingest-side validation
//
// Records arrive as a loose draft (every field optional so validation can
// report per-field violations instead of a single deserialization error),
// become a LogRecord once validated, and a StoredRecord once the durable
// writer has assigned an id and receipt time. The LogRecord/StoredRecord
// split encodes the invariant that recordId exists iff the record is
// persisted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FieldViolation, ValidationError};

/// Log severity. Wire form is upper-case (`DEBUG`, `INFO`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(format!(
                "unknown level: {} (expected DEBUG, INFO, WARNING or ERROR)",
                s
            )),
        }
    }
}

/// A validated log record, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Event time set by the producer; may precede receipt.
    pub timestamp: DateTime<Utc>,
    /// Partition key and the most common filter.
    pub service_id: String,
    pub level: LogLevel,
    /// Free text; the only full-text-indexed field.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Opaque to filters; carried through persistence and indexing as-is.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// A log record persisted in the authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// Monotonic id assigned by the durable writer on persistence.
    pub record_id: i64,
    /// Wall-clock receipt time, assigned at the start of the durable write.
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: LogRecord,
}

/// Unvalidated ingest payload.
///
/// Every field is optional so that a single pass can collect all missing or
/// malformed fields and report them together.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    pub timestamp: Option<DateTime<Utc>>,
    pub service_id: Option<String>,
    pub level: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl RecordDraft {
    /// Validate required fields and ranges, producing a canonical record.
    pub fn validate(self) -> Result<LogRecord, ValidationError> {
        let mut violations = Vec::new();

        let timestamp = match self.timestamp {
            Some(ts) => Some(ts),
            None => {
                violations.push(FieldViolation::new("timestamp", "is required"));
                None
            }
        };

        let service_id = match self.service_id {
            Some(id) if !id.trim().is_empty() => Some(id),
            Some(_) => {
                violations.push(FieldViolation::new("serviceId", "must not be empty"));
                None
            }
            None => {
                violations.push(FieldViolation::new("serviceId", "is required"));
                None
            }
        };

        let level = match self.level.as_deref() {
            Some(raw) => match raw.parse::<LogLevel>() {
                Ok(level) => Some(level),
                Err(err) => {
                    violations.push(FieldViolation::new("level", err));
                    None
                }
            },
            None => {
                violations.push(FieldViolation::new("level", "is required"));
                None
            }
        };

        let message = match self.message {
            Some(msg) if !msg.is_empty() => Some(msg),
            Some(_) => {
                violations.push(FieldViolation::new("message", "must not be empty"));
                None
            }
            None => {
                violations.push(FieldViolation::new("message", "is required"));
                None
            }
        };

        if !violations.is_empty() {
            return Err(ValidationError::new(violations));
        }

        Ok(LogRecord {
            timestamp: timestamp.expect("validated"),
            service_id: service_id.expect("validated"),
            level: level.expect("validated"),
            message: message.expect("validated"),
            trace_id: self.trace_id.filter(|t| !t.is_empty()),
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}
