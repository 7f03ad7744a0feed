//! Growable memory-mapped sink (§4.4).
//!
//! Grounded on `bugthesystem-Flux/kaos-archive`'s `Archive::create`/`append`
//! API shape (open a file, map a region, append formatted bytes, grow and
//! remap when the region fills) — the only concept in the retrieval pack of
//! a file-backed, append-only, memory-mapped byte store. The teacher has no
//! memory-mapped sink of its own.
//!
//! The reader/writer split the specification describes (shared lock for
//! writes, exclusive lock for remaps) collapses here into a single
//! `parking_lot::Mutex` guarding the whole write path: the specification
//! itself notes writes are additionally serialized by "an outer mutex on
//! the sink" so that the cursor advances atomically, which means the
//! reader-lock's parallelism is never actually exploited by more than one
//! writer at a time. One lock models both without unsafe, overlapping
//! writes into the mapped buffer.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::record::LogRecord;
use crate::sink::{Formatter, Sink, SinkIdentity, SinkStats, SinkStatsSnapshot};
use crate::severity::Severity;
use crate::utils::debug as diag;

pub const DEFAULT_REGION_SIZE: u64 = 64 * 1024 * 1024;
pub const MIN_REGION_SIZE: u64 = 1024 * 1024;
pub const MAX_REGION_SIZE: u64 = 512 * 1024 * 1024;
const GROWTH_SLACK: u64 = 1024;

struct MappedState {
    file: File,
    mmap: MmapMut,
    region_start: u64,
    region_size: u64,
    cursor: u64,
    last_force: Instant,
    closed: bool,
}

impl MappedState {
    fn remaining(&self) -> u64 {
        self.region_size - self.cursor
    }
}

/// A sink that appends formatted records directly into a memory-mapped file
/// region, growing that region on demand (§4.4).
pub struct MappedSink {
    identity: SinkIdentity,
    formatter: Mutex<Formatter>,
    stats: SinkStats,
    path: PathBuf,
    initial_region_size: u64,
    force_on_write: bool,
    force_interval: Duration,
    state: Mutex<Option<MappedState>>,
}

impl MappedSink {
    pub fn new(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        threshold: Severity,
        formatter: Formatter,
        initial_region_size: u64,
        force_on_write: bool,
        force_interval: Duration,
    ) -> Self {
        MappedSink {
            identity: SinkIdentity::new(name, threshold),
            formatter: Mutex::new(formatter),
            stats: SinkStats::default(),
            path: path.into(),
            initial_region_size: initial_region_size.clamp(MIN_REGION_SIZE, MAX_REGION_SIZE),
            force_on_write,
            force_interval,
            state: Mutex::new(None),
        }
    }

    pub fn set_formatter(&self, formatter: Formatter) {
        *self.formatter.lock() = formatter;
    }

    fn open_region(path: &Path, region_start: u64, size: u64) -> io::Result<(File, MmapMut)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let needed_len = region_start + size;
        if file.metadata()?.len() < needed_len {
            file.set_len(needed_len)?;
        }
        // SAFETY: the file is owned exclusively by this sink for the
        // lifetime of the mapping; no other process is expected to
        // concurrently truncate it out from under the mapping.
        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .offset(region_start)
                .len(size as usize)
                .map_mut(&file)?
        };
        Ok((file, mmap))
    }

    fn ensure_open(&self, guard: &mut Option<MappedState>) -> io::Result<()> {
        if guard.is_some() {
            return Ok(());
        }
        let existing_len = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let region_start = existing_len;
        let size = self.initial_region_size;
        let (file, mmap) = Self::open_region(&self.path, region_start, size)?;
        *guard = Some(MappedState {
            file,
            mmap,
            region_start,
            region_size: size,
            cursor: 0,
            last_force: Instant::now(),
            closed: false,
        });
        Ok(())
    }

    /// Region growth per §4.4: `S' = max(S * 3/2, used + b.len + 1 KiB)`,
    /// clamped to `[MIN_REGION_SIZE, MAX_REGION_SIZE]`.
    fn grow(&self, state: &mut MappedState, incoming: usize) -> io::Result<()> {
        state.mmap.flush()?;
        let used = state.cursor;
        let candidate = (state.region_size * 3 / 2).max(used + incoming as u64 + GROWTH_SLACK);
        let new_size = candidate.clamp(MIN_REGION_SIZE, MAX_REGION_SIZE);
        let new_region_start = state.region_start + state.cursor;

        let needed_len = new_region_start + new_size;
        if state.file.metadata()?.len() < needed_len {
            state.file.set_len(needed_len)?;
        }
        // SAFETY: see `open_region`.
        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .offset(new_region_start)
                .len(new_size as usize)
                .map_mut(&state.file)?
        };
        state.mmap = mmap;
        state.region_start = new_region_start;
        state.region_size = new_size;
        state.cursor = 0;
        Ok(())
    }

    fn write_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.state.lock();
        self.ensure_open(&mut guard)?;
        let state = guard.as_mut().expect("just opened above");

        if bytes.len() as u64 > state.remaining() {
            self.grow(state, bytes.len())?;
        }

        let cursor = state.cursor as usize;
        state.mmap[cursor..cursor + bytes.len()].copy_from_slice(bytes);
        state.cursor += bytes.len() as u64;

        if self.force_on_write {
            state.mmap.flush()?;
            state.last_force = Instant::now();
        } else if state.last_force.elapsed() >= self.force_interval {
            state.mmap.flush()?;
            state.last_force = Instant::now();
        }
        Ok(())
    }
}

impl Sink for MappedSink {
    fn accept(&self, record: &LogRecord) {
        let bytes = (self.formatter.lock())(record);
        match self.write_bytes(&bytes) {
            Ok(()) => self.stats.record_accept(bytes.len()),
            Err(err) => {
                self.stats.record_error();
                diag::sink_io_failure(&self.identity.name(), "write", &err);
            }
        }
    }

    fn flush(&self) {
        let mut guard = self.state.lock();
        if let Some(state) = guard.as_mut() {
            if let Err(err) = state.mmap.flush() {
                self.stats.record_error();
                diag::sink_io_failure(&self.identity.name(), "flush", &err);
            } else {
                state.last_force = Instant::now();
            }
        }
    }

    fn close(&self) {
        let mut guard = self.state.lock();
        if let Some(state) = guard.as_mut() {
            if state.closed {
                return;
            }
            let _ = state.mmap.flush();
            state.closed = true;
        }
        *guard = None;
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
        self.state.lock().is_none()
    }

    fn stats(&self) -> SinkStatsSnapshot {
        self.stats.snapshot()
    }
}
