//! The sink capability set (§6) that bridges the core to external
//! formatters/sinks.
//!
//! Grounded on `config::state::LoggerMetrics` for the statistics shape and on
//! the standalone `sink.rs` reference file's `SinkConfig`/`Sink` split
//! (`other_examples/6ca6513c_...-sink.rs`), but replacing its
//! inheritance-flavoured `struct Sink` with the trait-based capability set
//! §9 explicitly asks for: "implementations are values that satisfy the
//! capability set and are injected at construction," not a fixed struct.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::record::LogRecord;
use crate::severity::Severity;
use crate::utils::scratch::with_scratch_buffer;

/// A pure function mapping a record to its wire bytes, terminator included.
///
/// Stateless or internally thread-safe; the core never assumes anything
/// about its lifetime beyond the call (§9 — scratch buffers used by a
/// formatter must not be assumed to outlive the call).
pub type Formatter = Arc<dyn Fn(&LogRecord) -> Vec<u8> + Send + Sync>;

/// The default formatter: `"<message>\n"`, UTF-8, one record per line.
///
/// Builds into the calling thread's scratch buffer (§9 — "each producer may
/// maintain a thread-local scratch area for formatting") and copies out
/// before returning, since the buffer's contents are only valid for the
/// duration of this call.
pub fn plain_text_formatter() -> Formatter {
    Arc::new(|record: &LogRecord| {
        with_scratch_buffer(|buf| {
            buf.extend_from_slice(record.message.as_bytes());
            buf.push(b'\n');
            buf.to_vec()
        })
    })
}

/// Per-sink counters, the per-sink analogue of the teacher's global
/// `LoggerMetrics` (§9b).
#[derive(Debug, Default)]
pub struct SinkStats {
    pub accepted: AtomicU64,
    pub bytes_written: AtomicU64,
    pub errors: AtomicU64,
    pub dropped: AtomicU64,
}

impl SinkStats {
    pub fn record_accept(&self, bytes: usize) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkStatsSnapshot {
    pub accepted: u64,
    pub bytes_written: u64,
    pub errors: u64,
    pub dropped: u64,
}

/// The capability set every terminal consumer of records implements (§3, §6).
///
/// `accept` is infallible by contract: internal I/O failures are caught at
/// the implementation boundary, reported out-of-band (`tracing::error!`),
/// and folded into [`SinkStats`] rather than propagated, so one failing sink
/// can never unwind into the host application (§7 "Propagation").
pub trait Sink: Send + Sync {
    fn accept(&self, record: &LogRecord);
    fn flush(&self);
    fn close(&self);
    fn threshold(&self) -> Severity;
    fn set_threshold(&self, threshold: Severity);
    fn name(&self) -> String;
    fn set_name(&self, name: String);
    fn is_closed(&self) -> bool;
    fn stats(&self) -> SinkStatsSnapshot;
}

/// Shared mutable `name`/`threshold` state common to every sink
/// implementation in this crate, so each concrete sink only needs to embed
/// one field instead of re-deriving the bookkeeping.
pub struct SinkIdentity {
    name: RwLock<String>,
    threshold: RwLock<Severity>,
}

impl SinkIdentity {
    pub fn new(name: impl Into<String>, threshold: Severity) -> Self {
        SinkIdentity {
            name: RwLock::new(name.into()),
            threshold: RwLock::new(threshold),
        }
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: String) {
        *self.name.write() = name;
    }

    pub fn threshold(&self) -> Severity {
        *self.threshold.read()
    }

    pub fn set_threshold(&self, threshold: Severity) {
        *self.threshold.write() = threshold;
    }
}
