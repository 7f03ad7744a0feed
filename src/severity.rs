//! Totally ordered log severities.
//!
//! Mirrors the level handling the teacher split across `levels.rs` /
//! `utils/levels.rs`, generalized here since `tracing::Level` has no
//! `FATAL`/`OFF` and CRITICAL must alias FATAL rather than being a distinct
//! level.

use std::fmt;

use crate::error::{LoglyError, Result};

/// A totally ordered logging severity.
///
/// `CRITICAL` is not a separate variant: it parses to [`Severity::Fatal`] and
/// compares equal to it, since the two names denote the same priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Severity {
    Trace = 100,
    Debug = 200,
    Info = 300,
    Warn = 400,
    Error = 500,
    Fatal = 600,
    /// Sentinel threshold that disables every sink it is set on.
    Off = 1000,
}

impl Severity {
    /// The numeric priority used for threshold comparisons.
    pub fn priority(self) -> u16 {
        self as u16
    }

    /// True iff a record at `self` passes a sink filtering at `threshold`.
    pub fn passes(self, threshold: Severity) -> bool {
        self.priority() >= threshold.priority()
    }

    /// Case-insensitive parse. `CRITICAL` is accepted as an alias for `FATAL`.
    pub fn parse(name: &str) -> Result<Severity> {
        match name.to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Severity::Trace),
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "WARN" | "WARNING" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            "FATAL" | "CRITICAL" => Ok(Severity::Fatal),
            "OFF" => Ok(Severity::Off),
            other => Err(LoglyError::configuration(format!(
                "unrecognised severity '{other}'; expected one of TRACE, DEBUG, INFO, WARN, ERROR, FATAL, CRITICAL, OFF"
            ))),
        }
    }

    /// Canonical upper-case name. `Fatal` renders as `"FATAL"`, never `"CRITICAL"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
            Severity::Off => "OFF",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = LoglyError;

    fn from_str(s: &str) -> Result<Self> {
        Severity::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order() {
        assert!(Severity::Trace < Severity::Debug);
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
        assert!(Severity::Fatal < Severity::Off);
    }

    #[test]
    fn critical_aliases_fatal() {
        assert_eq!(Severity::parse("CRITICAL").unwrap(), Severity::Fatal);
        assert_eq!(Severity::parse("critical").unwrap(), Severity::Fatal);
        assert_eq!(Severity::parse("fatal").unwrap(), Severity::parse("CRITICAL").unwrap());
    }

    #[test]
    fn case_insensitive_parse() {
        assert_eq!(Severity::parse("info").unwrap(), Severity::Info);
        assert_eq!(Severity::parse("WARN").unwrap(), Severity::Warn);
        assert_eq!(Severity::parse("Warning").unwrap(), Severity::Warn);
    }

    #[test]
    fn unknown_name_is_configuration_error() {
        assert!(matches!(
            Severity::parse("LOUD"),
            Err(LoglyError::Configuration { .. })
        ));
    }

    #[test]
    fn threshold_boundary_passes_at_equal_severity() {
        assert!(Severity::Warn.passes(Severity::Warn));
        assert!(!Severity::Info.passes(Severity::Warn));
        assert!(Severity::Error.passes(Severity::Warn));
    }

    #[test]
    fn off_disables_everything() {
        assert!(!Severity::Fatal.passes(Severity::Off));
    }
}
