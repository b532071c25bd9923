//! Log event capture: level normalization, message truncation and
//! the forwarded event shape.

pub mod buffer;

pub use buffer::{LogEventBuffer, LogSnapshot};

use crate::constants::MAX_LOG_MESSAGE_LENGTH;
use crate::linking::LinkingMetadata;
use serde::Serialize;

/// Closed severity set for forwarded log events. Anything the
/// recording adapter hands in that does not map onto one of these
/// becomes [`LogLevel::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Unknown,
}

impl LogLevel {
    /// Normalize an adapter-supplied severity string.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Self::Trace,
            "DEBUG" => Self::Debug,
            "INFO" => Self::Info,
            "WARN" | "WARNING" => Self::Warn,
            "ERROR" => Self::Error,
            "FATAL" | "CRITICAL" => Self::Fatal,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Truncate `message` to at most `max` bytes without splitting a
/// multi-byte UTF-8 character. Messages already within the limit are
/// returned unchanged.
pub fn truncate_message(message: &str, max: usize) -> &str {
    if message.len() <= max {
        return message;
    }
    let mut end = max;
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

/// One forwarded log record, linking metadata already stamped.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogEvent {
    /// Wall-clock timestamp in milliseconds since the epoch.
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
    pub attributes: LinkingMetadata,
}

impl LogEvent {
    pub fn new(
        message: &str,
        level: LogLevel,
        timestamp: i64,
        attributes: LinkingMetadata,
    ) -> Self {
        Self {
            timestamp,
            level,
            message: truncate_message(message, MAX_LOG_MESSAGE_LENGTH).to_string(),
            attributes,
        }
    }
}
