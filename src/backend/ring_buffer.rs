//! Lock-free bounded MPSC ring buffer (§4.1) and the overflow policy invoked
//! when it is full (§4.2).
//!
//! Grounded on `bugthesystem-Flux/kaos/src/disruptor/mpmc/mpmc_ring_buffer.rs`'s
//! CAS-claim producer side, simplified from multi-consumer to the
//! single-consumer model §4.3 actually describes ("one consumer drains");
//! slot handoff uses a short-lived `parking_lot::Mutex` per slot rather than
//! the disruptor's raw `UnsafeCell`/volatile writes, since a claimed slot is
//! only ever touched by the claiming producer and then the single consumer —
//! the mutex's lock/unlock pair supplies the happens-before edge the
//! algorithm needs without unsafe code. `W`/`R` still get the independent
//! cache lines §4.1 calls for, via `crossbeam_utils::CachePadded`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

/// The decision made when [`RingBuffer::try_publish`] finds the buffer full
/// (§4.2). Interpreted by the async worker that owns the buffer, not by the
/// buffer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Park the caller until space appears or shutdown is signalled.
    Block,
    /// Consume-and-discard the oldest slot, then retry the publish once.
    /// The default policy.
    DropOldest,
    /// Discard the incoming record; the buffer's contents are untouched.
    DropNewest,
    /// Bypass the buffer and invoke sinks synchronously on the caller.
    SynchronousWrite,
    /// Increment the dropped counter and return without publishing.
    Discard,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

/// A relaxed snapshot of ring buffer counters (§4.1 "Statistics" — these are
/// monitoring signals, not synchronization, hence relaxed ordering
/// throughout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBufferStats {
    pub published: u64,
    pub consumed: u64,
    pub full_rejects: u64,
}

impl RingBufferStats {
    /// `(W - R) / C`, the fraction of the buffer currently occupied. May be
    /// a slightly inconsistent snapshot under concurrent access, as noted in
    /// §4.1.
    pub fn utilization(&self, capacity: u64) -> f64 {
        let occupied = self.published.saturating_sub(self.consumed);
        occupied as f64 / capacity as f64
    }
}

struct Slot<T> {
    cell: Mutex<Option<T>>,
}

/// A bounded, lock-free-in-the-common-case MPSC queue of record handles.
///
/// `T` is never `Option<_>`-wrapped in the public API: Rust's type system
/// makes the "programmer error: publish a null record" case of §4.1
/// structurally unreachable, so there is no invalid-argument failure path to
/// reproduce here — an owned `T` is never absent.
pub struct RingBuffer<T> {
    capacity: u64,
    mask: u64,
    slots: Box<[Slot<T>]>,
    write_seq: CachePadded<AtomicU64>,
    read_seq: CachePadded<AtomicU64>,
    published: AtomicU64,
    consumed: AtomicU64,
    full_rejects: AtomicU64,
    closed: AtomicBool,
}

impl<T> RingBuffer<T> {
    /// `capacity` must be a power of two (`C = 2^k`); rejected otherwise,
    /// per the boundary behaviour in §8.
    pub fn new(capacity: usize) -> crate::error::Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(crate::error::LoglyError::configuration(format!(
                "ring buffer capacity {capacity} must be a non-zero power of two"
            )));
        }
        let slots = (0..capacity)
            .map(|_| Slot {
                cell: Mutex::new(None),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(RingBuffer {
            capacity: capacity as u64,
            mask: capacity as u64 - 1,
            slots,
            write_seq: CachePadded::new(AtomicU64::new(0)),
            read_seq: CachePadded::new(AtomicU64::new(0)),
            published: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            full_rejects: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Publishing after shutdown is a no-op returning false (§4.1).
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Non-blocking publish. On failure (buffer full or closed) the record
    /// is handed back to the caller, so overflow policies such as
    /// `DROP_OLDEST` can evict a slot and retry with the same value.
    pub fn try_publish(&self, record: T) -> Result<(), T> {
        if self.is_closed() {
            return Err(record);
        }
        loop {
            let w = self.write_seq.load(Ordering::Acquire);
            let r = self.read_seq.load(Ordering::Acquire);
            if w.wrapping_sub(r) >= self.capacity {
                self.full_rejects.fetch_add(1, Ordering::Relaxed);
                return Err(record);
            }
            if self
                .write_seq
                .compare_exchange_weak(w, w + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let idx = (w & self.mask) as usize;
                *self.slots[idx].cell.lock() = Some(record);
                self.published.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }
    }

    /// Retries [`Self::try_publish`] with a bounded ~1µs park interval until
    /// success, timeout, or the buffer is closed mid-wait.
    pub fn publish(&self, record: T, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut record = record;
        loop {
            match self.try_publish(record) {
                Ok(()) => return true,
                Err(_) if self.is_closed() => return false,
                Err(returned) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    std::thread::sleep(Duration::from_micros(1));
                    record = returned;
                }
            }
        }
    }

    /// Drains up to one record. Returns `None` without blocking if the
    /// buffer is empty.
    pub fn consume(&self) -> Option<T> {
        let r = self.read_seq.load(Ordering::Relaxed);
        let w = self.write_seq.load(Ordering::Acquire);
        if r >= w {
            return None;
        }
        let idx = (r & self.mask) as usize;
        let value = self.slots[idx].cell.lock().take();
        self.consumed.fetch_add(1, Ordering::Relaxed);
        self.read_seq.store(r + 1, Ordering::Release);
        value
    }

    /// Drains up to `max` records in one pass, advancing `R` with a single
    /// store at the end (§4.1).
    pub fn consume_batch(&self, max: usize) -> Vec<T> {
        let r = self.read_seq.load(Ordering::Relaxed);
        let w = self.write_seq.load(Ordering::Acquire);
        let available = w.saturating_sub(r).min(max as u64);
        if available == 0 {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(available as usize);
        for i in 0..available {
            let idx = ((r + i) & self.mask) as usize;
            if let Some(value) = self.slots[idx].cell.lock().take() {
                out.push(value);
            }
        }
        self.consumed.fetch_add(out.len() as u64, Ordering::Relaxed);
        self.read_seq.store(r + available, Ordering::Release);
        out
    }

    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            published: self.published.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            full_rejects: self.full_rejects.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_capacity() {
        assert!(RingBuffer::<u32>::new(3).is_err());
        assert!(RingBuffer::<u32>::new(0).is_err());
        assert!(RingBuffer::<u32>::new(4).is_ok());
    }

    #[test]
    fn publish_at_capacity_minus_one_then_full() {
        let rb = RingBuffer::<u32>::new(4).unwrap();
        assert!(rb.try_publish(1).is_ok());
        assert!(rb.try_publish(2).is_ok());
        assert!(rb.try_publish(3).is_ok());
        // W - R = 3 = C - 1: still has room for one more.
        assert!(rb.try_publish(4).is_ok());
        // Now W - R = 4 = C: full.
        assert!(rb.try_publish(5).is_err());
        assert_eq!(rb.stats().full_rejects, 1);
    }

    #[test]
    fn consume_on_empty_returns_none_without_blocking() {
        let rb = RingBuffer::<u32>::new(4).unwrap();
        assert_eq!(rb.consume(), None);
    }

    #[test]
    fn fifo_order_preserved_single_producer() {
        let rb = RingBuffer::<u32>::new(8).unwrap();
        for i in 0..5u32 {
            assert!(rb.try_publish(i).is_ok());
        }
        let mut out = Vec::new();
        while let Some(v) = rb.consume() {
            out.push(v);
        }
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn consume_batch_respects_max_and_advances_once() {
        let rb = RingBuffer::<u32>::new(8).unwrap();
        for i in 0..6u32 {
            assert!(rb.try_publish(i).is_ok());
        }
        let batch = rb.consume_batch(4);
        assert_eq!(batch, vec![0, 1, 2, 3]);
        let rest = rb.consume_batch(256);
        assert_eq!(rest, vec![4, 5]);
    }

    #[test]
    fn closed_buffer_rejects_publish() {
        let rb = RingBuffer::<u32>::new(4).unwrap();
        rb.close();
        assert!(rb.try_publish(1).is_err());
    }

    #[test]
    fn drop_oldest_scenario_matches_spec_example() {
        // Ring capacity 4; publish 8, pause consumer, then drop-oldest by
        // consuming the head before each retried publish once full.
        let rb = RingBuffer::<char>::new(4).unwrap();
        let input = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];
        let mut dropped = 0u32;
        for c in input {
            if let Err(c) = rb.try_publish(c) {
                let _ = rb.consume(); // drop oldest
                dropped += 1;
                assert!(rb.try_publish(c).is_ok());
            }
        }
        let mut observed = Vec::new();
        while let Some(c) = rb.consume() {
            observed.push(c);
        }
        assert_eq!(observed, vec!['E', 'F', 'G', 'H']);
        assert_eq!(dropped, 4);
        assert_eq!(rb.stats().published, 8);
    }

    #[test]
    fn multi_producer_threads_all_land_exactly_once() {
        use std::sync::Arc;
        let rb = Arc::new(RingBuffer::<u32>::new(1024).unwrap());
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let rb = rb.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100u32 {
                    let mut v = t * 1000 + i;
                    while let Err(back) = rb.try_publish(v) {
                        v = back;
                        std::thread::yield_now();
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let mut count = 0;
        while rb.consume().is_some() {
            count += 1;
        }
        assert_eq!(count, 400);
    }
}
