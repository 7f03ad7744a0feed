//! Error taxonomy for the logging core (§7 of the design).
//!
//! Replaces the teacher's hand-rolled `utils::error::LoglyError` (a plain
//! `Display` impl plus a `From<LoglyError> for PyErr`) with a
//! `thiserror`-derived enum. The Python bridge is out of scope here, so there
//! is no `PyErr` conversion; everything else keeps the teacher's variant
//! shape.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LoglyError>;

/// Errors surfaced by the logging core.
///
/// Construction-time failures (`build()`, sink `open`) propagate as
/// `Result`. Once a sink is running, I/O failures during `accept` are caught
/// at the sink boundary, reported via [`crate::utils::debug`] and a
/// statistics counter, and never returned to the caller — `accept` itself is
/// infallible.
#[derive(Debug, Error)]
pub enum LoglyError {
    /// Invalid construction parameter: non-power-of-two ring capacity,
    /// unrecognised severity name, malformed size string, zero threshold.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A write, flush, rename, or force-to-disk operation failed.
    #[error("I/O error during {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A bounded resource (ring buffer, compression queue) could not accept
    /// more work under the configured policy.
    #[error("resource exhausted: {message}")]
    ResourceExhausted { message: String },

    /// Caller violated an API precondition (publishing a null record,
    /// non-positive capacity).
    #[error("invalid argument: {message}")]
    Invalid { message: String },

    /// The engine is shutting down or already shut down; the operation was
    /// ignored rather than performed.
    #[error("shutdown in progress")]
    ShutdownInProgress,
}

impl LoglyError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        LoglyError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        LoglyError::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        LoglyError::Invalid {
            message: message.into(),
        }
    }

    /// A path-naming variant for startup failures per §7: "cannot open
    /// file" failures must name the path and cause.
    pub fn cannot_open(path: &PathBuf, source: io::Error) -> Self {
        LoglyError::Io {
            context: format!("opening {}", path.display()),
            source,
        }
    }
}
