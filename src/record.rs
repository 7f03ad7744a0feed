//! The immutable value type that flows through the engine.
//!
//! Field shape is grounded on the teacher's `format::json::JsonRecord`,
//! generalized away from its PyO3/serde-specific rendering: a `LogRecord`
//! here is a plain value, not something serialized by the core itself (§3 —
//! "the core treats a formatter as a pure function `LogRecord → bytes`").

use crate::severity::Severity;

/// One stack frame of an [`ErrorValue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Class or function name.
    pub symbol: String,
    pub file: String,
    pub line: u32,
}

/// An error captured alongside a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub message: String,
    pub frames: Vec<StackFrame>,
}

/// Where in the caller's source a record was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub symbol: String,
    pub file: String,
    pub line: u32,
}

/// A single structured log entry.
///
/// Constructed once at publish time and never mutated afterward; sinks and
/// formatters only ever see shared references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub severity: Severity,
    /// Short logger identifier, conventionally kept to ~128 chars.
    pub logger: String,
    pub message: String,
    pub error: Option<ErrorValue>,
    pub location: Option<SourceLocation>,
    /// Wall-clock timestamp, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Monotonic creation index, assigned at publish time and used for
    /// intra-producer ordering (§4.3).
    pub sequence: u64,
    pub thread: String,
}

impl LogRecord {
    pub fn new(severity: Severity, logger: impl Into<String>, message: impl Into<String>) -> Self {
        LogRecord {
            severity,
            logger: logger.into(),
            message: message.into(),
            error: None,
            location: None,
            timestamp_ms: now_ms(),
            sequence: 0,
            thread: current_thread_name(),
        }
    }

    pub fn with_error(mut self, error: ErrorValue) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .map(str::to_owned)
        .unwrap_or_else(|| format!("{:?}", std::thread::current().id()))
}
