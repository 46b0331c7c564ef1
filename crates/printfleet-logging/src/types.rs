//! Log entry types carried by the log history hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log level, ordered by severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    /// Detailed entry/exit points.
    #[serde(alias = "trace", alias = "TRACE")]
    Trace,
    /// Intermediate values, decisions.
    #[serde(alias = "debug", alias = "DEBUG")]
    Debug,
    /// Outcomes, summaries.
    #[default]
    #[serde(alias = "info", alias = "INFO", alias = "Information")]
    Info,
    /// Non-fatal issues.
    #[serde(alias = "warn", alias = "WARN", alias = "Warning")]
    Warn,
    /// Errors.
    #[serde(alias = "error", alias = "ERROR")]
    Error,
}

impl LogLevel {
    /// Convert from tracing level.
    #[must_use]
    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::ERROR => Self::Error,
        }
    }

    /// Convert from string (case-insensitive). Unknown names map to `Info`.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One captured log event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Emitting module path.
    pub category: String,
    /// Formatted message.
    pub message: String,
    /// Event fields merged over the fields of enclosing spans.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
    /// When the event was emitted.
    pub time: DateTime<Utc>,
}

impl LogEntry {
    /// An entry stamped now with no fields.
    pub fn new(level: LogLevel, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            category: category.into(),
            message: message.into(),
            fields: serde_json::Map::new(),
            time: Utc::now(),
        }
    }
}

// ── Tests ──
