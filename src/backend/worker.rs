//! The async worker thread that drains the ring buffer into sinks (§4.3),
//! and the overflow handling an async wrapper performs when `try_publish`
//! fails (§4.2).
//!
//! Grounded on the teacher's `backend::async::start_async_writer_if_needed`
//! drain-loop shape (spawn one background thread, loop until the channel is
//! disconnected, flush what's pending before exiting) — generalized from a
//! single-channel/single-file writer to a ring buffer feeding an arbitrary
//! set of [`Sink`]s, and from the teacher's own `Sender<String>` channel to
//! the lock-free [`RingBuffer`] (§4.1). The barrier-sentinel `flush()`
//! technique is grounded on `leynos-femtologging`'s channel-based
//! `spawn_worker`/`FileCommand` pattern of sending a distinguished command
//! down the same channel the data flows through.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::backend::ring_buffer::{OverflowPolicy, RingBuffer};
use crate::record::LogRecord;
use crate::sink::Sink;

const DRAIN_BATCH: usize = 256;
const PARK_INTERVAL: Duration = Duration::from_micros(1);

enum Item {
    Record(LogRecord),
    /// A barrier sentinel: once processed, the worker signals the paired
    /// condvar so `flush()` can return.
    Barrier(Arc<FlushAck>),
}

struct FlushAck {
    done: Mutex<bool>,
    condvar: Condvar,
}

impl FlushAck {
    fn new() -> Self {
        FlushAck {
            done: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn signal(&self) {
        *self.done.lock().unwrap() = true;
        self.condvar.notify_all();
    }

    /// Waits up to `timeout` for the worker to acknowledge. Returns `true`
    /// if acknowledged before the timeout elapsed.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.done.lock().unwrap();
        if *guard {
            return true;
        }
        let (guard, result) = self
            .condvar
            .wait_timeout_while(guard, timeout, |done| !*done)
            .unwrap();
        let _ = guard;
        !result.timed_out()
    }
}

/// Lifetime counters an async logger/wrapper maintains over its lifetime
/// (§8 "Drop counters + processed counters = published counter").
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub published: AtomicU64,
    pub processed: AtomicU64,
    pub dropped: AtomicU64,
}

/// Owns one dedicated consumer thread draining a [`RingBuffer`] into a fixed
/// set of sinks, applying an [`OverflowPolicy`] when publication fails.
pub struct AsyncWorker {
    ring: Arc<RingBuffer<Item>>,
    overflow: OverflowPolicy,
    sinks: Arc<Vec<Arc<dyn Sink>>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    handle: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl AsyncWorker {
    pub fn spawn(
        capacity: usize,
        overflow: OverflowPolicy,
        sinks: Vec<Arc<dyn Sink>>,
        shutdown_timeout: Duration,
    ) -> crate::error::Result<Self> {
        let ring = Arc::new(RingBuffer::new(capacity)?);
        let sinks = Arc::new(sinks);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(WorkerStats::default());

        let worker_ring = ring.clone();
        let worker_sinks = sinks.clone();
        let worker_shutdown = shutdown.clone();
        let worker_stats = stats.clone();

        let handle = thread::Builder::new()
            .name("logly-async-worker".into())
            .spawn(move || {
                drain_loop(
                    worker_ring,
                    worker_sinks,
                    worker_shutdown,
                    worker_stats,
                    shutdown_timeout,
                )
            })
            .expect("failed to spawn async worker thread");

        Ok(AsyncWorker {
            ring,
            overflow,
            sinks,
            shutdown,
            stats,
            handle: Some(handle),
            shutdown_timeout,
        })
    }

    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.published.load(Ordering::Relaxed),
            self.stats.processed.load(Ordering::Relaxed),
            self.stats.dropped.load(Ordering::Relaxed),
        )
    }

    /// Publishes a record, applying the configured overflow policy if the
    /// ring buffer is full (§4.2). Never blocks longer than the policy
    /// allows.
    pub fn publish(&self, record: LogRecord) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            // All variants degrade to "silently drop" once shutdown starts.
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        match self.ring.try_publish(Item::Record(record)) {
            Ok(()) => true,
            Err(Item::Record(record)) => self.handle_overflow(record),
            Err(Item::Barrier(_)) => unreachable!("a freshly-built Item::Record cannot round-trip as Barrier"),
        }
    }

    fn handle_overflow(&self, record: LogRecord) -> bool {
        match self.overflow {
            // §4.2 "Park until space appears or shutdown" — no timeout of
            // its own; the only bound on this loop is a shutdown signal.
            OverflowPolicy::Block => {
                let mut record = record;
                loop {
                    if self.shutdown.load(Ordering::Acquire) {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        return false;
                    }
                    match self.ring.try_publish(Item::Record(record)) {
                        Ok(()) => return true,
                        Err(Item::Record(back)) => {
                            record = back;
                            thread::sleep(PARK_INTERVAL);
                        }
                        Err(Item::Barrier(_)) => unreachable!(),
                    }
                }
            }
            OverflowPolicy::DropOldest => {
                let _ = self.ring.consume();
                match self.ring.try_publish(Item::Record(record)) {
                    Ok(()) => true,
                    Err(_) => {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        false
                    }
                }
            }
            OverflowPolicy::DropNewest => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            OverflowPolicy::SynchronousWrite => {
                for sink in self.sinks.iter() {
                    dispatch(sink.as_ref(), &record);
                }
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                true
            }
            OverflowPolicy::Discard => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Publishes a barrier sentinel and waits for the worker to acknowledge
    /// it, bounded by the shutdown timeout (§4.3).
    pub fn flush(&self) {
        let ack = Arc::new(FlushAck::new());
        if self.ring.try_publish(Item::Barrier(ack.clone())).is_err() {
            // Buffer momentarily full; the sinks still get a best-effort
            // flush directly.
            for sink in self.sinks.iter() {
                sink.flush();
            }
            return;
        }
        ack.wait(self.shutdown_timeout);
    }

    /// Signals shutdown and joins the worker thread, bounded by the
    /// configured shutdown timeout (§3 "Lifecycle", §5).
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.ring.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        for sink in self.sinks.iter() {
            sink.close();
        }
    }
}

fn dispatch(sink: &dyn Sink, record: &LogRecord) {
    if record.severity.passes(sink.threshold()) {
        sink.accept(record);
    }
}

fn drain_loop(
    ring: Arc<RingBuffer<Item>>,
    sinks: Arc<Vec<Arc<dyn Sink>>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    shutdown_timeout: Duration,
) {
    let started_shutdown_at = Mutex::new(None::<Instant>);
    loop {
        let batch = ring.consume_batch(DRAIN_BATCH);
        if batch.is_empty() {
            if shutdown.load(Ordering::Acquire) {
                let mut guard = started_shutdown_at.lock().unwrap();
                let since = *guard.get_or_insert_with(Instant::now);
                if since.elapsed() >= shutdown_timeout {
                    return;
                }
                drop(guard);
            }
            thread::sleep(PARK_INTERVAL);
            continue;
        }
        for item in batch {
            match item {
                Item::Record(record) => {
                    for sink in sinks.iter() {
                        dispatch(sink.as_ref(), &record);
                    }
                    stats.processed.fetch_add(1, Ordering::Relaxed);
                }
                Item::Barrier(ack) => {
                    for sink in sinks.iter() {
                        sink.flush();
                    }
                    ack.signal();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::Severity;
    use crate::sink::{SinkIdentity, SinkStatsSnapshot};
    use std::sync::Mutex as StdMutex;

    struct CollectingSink {
        identity: SinkIdentity,
        collected: StdMutex<Vec<String>>,
    }

    impl CollectingSink {
        fn new() -> Self {
            CollectingSink {
                identity: SinkIdentity::new("test", Severity::Trace),
                collected: StdMutex::new(Vec::new()),
            }
        }
    }

    impl Sink for CollectingSink {
        fn accept(&self, record: &LogRecord) {
            self.collected.lock().unwrap().push(record.message.clone());
        }
        fn flush(&self) {}
        fn close(&self) {}
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
            false
        }
        fn stats(&self) -> SinkStatsSnapshot {
            SinkStatsSnapshot {
                accepted: self.collected.lock().unwrap().len() as u64,
                bytes_written: 0,
                errors: 0,
                dropped: 0,
            }
        }
    }

    fn wait_until<F: Fn() -> bool>(f: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        f()
    }

    #[test]
    fn records_deliver_in_publish_order() {
        let sink = Arc::new(CollectingSink::new());
        let worker = AsyncWorker::spawn(
            16,
            OverflowPolicy::DropOldest,
            vec![sink.clone()],
            Duration::from_secs(1),
        )
        .unwrap();

        for i in 0..10u32 {
            worker.publish(LogRecord::new(Severity::Info, "t", format!("m{i}")));
        }
        worker.flush();

        let collected = sink.collected.lock().unwrap().clone();
        let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
        assert_eq!(collected, expected);

        worker.shutdown();
    }

    #[test]
    fn shutdown_drains_or_bounds_by_timeout() {
        let sink = Arc::new(CollectingSink::new());
        let worker = AsyncWorker::spawn(
            1024,
            OverflowPolicy::DropOldest,
            vec![sink.clone()],
            Duration::from_secs(5),
        )
        .unwrap();

        for i in 0..2000u32 {
            worker.publish(LogRecord::new(Severity::Info, "t", format!("m{i}")));
        }
        let (published, _, _) = worker.stats();
        assert_eq!(published, 2000);
        worker.flush();
        assert!(wait_until(
            || sink.collected.lock().unwrap().len() == 2000,
            Duration::from_secs(2)
        ));
        worker.shutdown();
    }

    #[test]
    fn drop_newest_discards_incoming_on_full_buffer() {
        let sink = Arc::new(CollectingSink::new());
        let worker = AsyncWorker::spawn(
            4,
            OverflowPolicy::DropNewest,
            vec![sink.clone()],
            Duration::from_secs(1),
        )
        .unwrap();
        // Fill the ring without giving the consumer a chance to drain by
        // publishing far more than capacity in a tight loop; DropNewest must
        // never panic and dropped+processed must equal published.
        for i in 0..50u32 {
            worker.publish(LogRecord::new(Severity::Info, "t", format!("m{i}")));
        }
        worker.flush();
        assert!(wait_until(
            || {
                let (published, processed, dropped) = worker.stats();
                published == processed + dropped
            },
            Duration::from_secs(2)
        ));
        worker.shutdown();
    }

    /// §4.2 "Park until space appears or shutdown": BLOCK must not drop a
    /// record just because backpressure outlasts `shutdown_timeout` — that
    /// duration only bounds the *shutdown* drain, not this policy's wait.
    #[test]
    fn block_never_drops_under_sustained_backpressure_without_shutdown() {
        let sink = Arc::new(CollectingSink::new());
        let worker = Arc::new(
            AsyncWorker::spawn(
                2,
                OverflowPolicy::Block,
                vec![sink.clone()],
                // Deliberately shorter than the contention window below, so a
                // regression that reuses this as a BLOCK deadline would show
                // up as dropped records.
                Duration::from_millis(20),
            )
            .unwrap(),
        );

        let mut handles = Vec::new();
        for t in 0..8u32 {
            let worker = worker.clone();
            handles.push(thread::spawn(move || {
                for i in 0..500u32 {
                    assert!(worker.publish(LogRecord::new(Severity::Info, "t", format!("{t}-{i}"))));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let (published, _, dropped) = worker.stats();
        assert_eq!(published, 4000);
        assert_eq!(dropped, 0, "BLOCK must never drop absent a shutdown signal");

        worker.flush();
        assert!(wait_until(
            || worker.stats().1 == 4000,
            Duration::from_secs(2)
        ));
        Arc::into_inner(worker).unwrap().shutdown();
    }
}
