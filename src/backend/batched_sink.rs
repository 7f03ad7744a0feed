//! Count/time dual-threshold batching sink (§4.5).
//!
//! Grounded on `leynos-femtologging`'s `FlushTracker` (write-count-driven
//! periodic flush) and the teacher's `backend::async` buffer-then-flush
//! shape, generalized from a fixed write-count interval to the
//! specification's count-OR-elapsed-time dual threshold, plus an optional
//! background timer thread so idle producers still get their time-based
//! flush.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::record::LogRecord;
use crate::severity::Severity;
use crate::sink::{Formatter, Sink, SinkIdentity, SinkStats, SinkStatsSnapshot};
use crate::utils::debug as diag;

#[derive(Debug, Default)]
pub struct BatchStats {
    pub total_records: AtomicU64,
    pub total_batches: AtomicU64,
    pub size_flushes: AtomicU64,
    pub time_flushes: AtomicU64,
}

impl BatchStats {
    pub fn average_events_per_batch(&self) -> f64 {
        let batches = self.total_batches.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        self.total_records.load(Ordering::Relaxed) as f64 / batches as f64
    }
}

struct Buffer {
    records: Vec<LogRecord>,
    last_flush: Instant,
    writer: Option<File>,
}

/// Aggregates records by count and/or elapsed time, flushing the
/// accumulated batch as a single write (§4.5, §3 "batch buffer").
pub struct BatchedSink {
    identity: SinkIdentity,
    formatter: Mutex<Formatter>,
    stats: SinkStats,
    batch_stats: BatchStats,
    path: PathBuf,
    b_max: usize,
    t_max: Duration,
    buffer: Mutex<Buffer>,
    timer_shutdown: Arc<AtomicBool>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BatchedSink {
    pub fn new(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        threshold: Severity,
        formatter: Formatter,
        b_max: usize,
        t_max: Duration,
        background_timer: bool,
    ) -> Arc<Self> {
        let sink = Arc::new(BatchedSink {
            identity: SinkIdentity::new(name, threshold),
            formatter: Mutex::new(formatter),
            stats: SinkStats::default(),
            batch_stats: BatchStats::default(),
            path: path.into(),
            b_max: b_max.max(1),
            t_max,
            buffer: Mutex::new(Buffer {
                records: Vec::new(),
                last_flush: Instant::now(),
                writer: None,
            }),
            timer_shutdown: Arc::new(AtomicBool::new(false)),
            timer_handle: Mutex::new(None),
        });

        if background_timer {
            let weak = Arc::downgrade(&sink);
            let shutdown = sink.timer_shutdown.clone();
            let interval = (t_max / 2).max(Duration::from_millis(1));
            let handle = thread::Builder::new()
                .name("logly-batch-timer".into())
                .spawn(move || loop {
                    if shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    thread::sleep(interval);
                    match weak.upgrade() {
                        Some(sink) => sink.maybe_time_flush(),
                        None => return,
                    }
                })
                .expect("failed to spawn batch timer thread");
            *sink.timer_handle.lock() = Some(handle);
        }

        sink
    }

    fn open_writer(path: &Path) -> io::Result<File> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn maybe_time_flush(&self) {
        let mut guard = self.buffer.lock();
        if guard.records.is_empty() {
            return;
        }
        if guard.last_flush.elapsed() >= self.t_max {
            self.flush_locked(&mut guard, true);
        }
    }

    fn flush_locked(&self, guard: &mut Buffer, time_triggered: bool) {
        if guard.records.is_empty() {
            guard.last_flush = Instant::now();
            return;
        }
        let batch = std::mem::take(&mut guard.records);
        let count = batch.len();

        let formatter = self.formatter.lock();
        let mut payload = Vec::new();
        for record in &batch {
            payload.extend_from_slice(&formatter(record));
        }
        drop(formatter);

        let result = (|| -> io::Result<()> {
            if guard.writer.is_none() {
                guard.writer = Some(Self::open_writer(&self.path)?);
            }
            let writer = guard.writer.as_mut().unwrap();
            writer.write_all(&payload)?;
            writer.flush()
        })();

        match result {
            Ok(()) => {
                self.stats.record_accept(payload.len());
                self.batch_stats
                    .total_records
                    .fetch_add(count as u64, Ordering::Relaxed);
                self.batch_stats.total_batches.fetch_add(1, Ordering::Relaxed);
                if time_triggered {
                    self.batch_stats.time_flushes.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.batch_stats.size_flushes.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                self.stats.record_error();
                diag::sink_io_failure(&self.identity.name(), "batch flush", &err);
            }
        }
        guard.last_flush = Instant::now();
    }

    pub fn batch_stats(&self) -> &BatchStats {
        &self.batch_stats
    }
}

impl Sink for BatchedSink {
    fn accept(&self, record: &LogRecord) {
        let mut guard = self.buffer.lock();
        guard.records.push(record.clone());
        let size_due = guard.records.len() >= self.b_max;
        let time_due = guard.last_flush.elapsed() >= self.t_max;
        if size_due {
            self.flush_locked(&mut guard, false);
        } else if time_due {
            self.flush_locked(&mut guard, true);
        }
    }

    fn flush(&self) {
        let mut guard = self.buffer.lock();
        self.flush_locked(&mut guard, false);
    }

    fn close(&self) {
        {
            let mut guard = self.buffer.lock();
            self.flush_locked(&mut guard, false);
            guard.writer = None;
        }
        self.timer_shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.timer_handle.lock().take() {
            let _ = handle.join();
        }
    }

    fn threshold(&self) -> Severity {
        self.identity.threshold()
    }

    fn set_threshold(&self, threshold: Severity) {
        self.identity.set_threshold(threshold);
    }

    fn name(&self) -> String {
        self.identity.name()
    }

    fn set_name(&self, name: String) {
        self.identity.set_name(name);
    }

    fn is_closed(&self) -> bool {
        self.buffer.lock().writer.is_none() && self.timer_shutdown.load(Ordering::Relaxed)
    }

    fn stats(&self) -> SinkStatsSnapshot {
        self.stats.snapshot()
    }
}
