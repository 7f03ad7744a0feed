//! Size-based rotating file sink coupled to the compression pipeline and its
//! adaptive back-pressure policy (§4.6).
//!
//! Rotation algorithm and retention pruning are grounded on the teacher's
//! `backend::file::SimpleRollingWriter`/`prune_old_files` (date-stamped
//! backup naming, size accounting against cumulative bytes written rather
//! than `stat()`, oldest-first pruning); the date-pattern-before-extension
//! naming idea is kept but the disambiguation-on-collision behaviour is new
//! (§9 Open Question 3). The adaptive threshold is an `arc_swap::ArcSwap`,
//! mutated only from this sink's own mutex-guarded thread, matching §5
//! "Adaptive threshold: mutated only from the rotating sink's own thread".

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use chrono::Utc;
use parking_lot::Mutex;

use crate::backend::compression::{CompressionFormat, CompressionPipeline};
use crate::record::LogRecord;
use crate::severity::Severity;
use crate::sink::{Formatter, Sink, SinkIdentity, SinkStats, SinkStatsSnapshot};
use crate::utils::debug as diag;
use crate::utils::size::format_size;

const RECOGNISED_COMPRESSED_EXTENSIONS: &[&str] =
    &["gz", "bz2", "xz", "zip", "7z", "compressed", "zst"];
const DEFAULT_DATE_PATTERN: &str = "%Y-%m-%d-%H-%M-%S";

/// How the rotating sink disposes of a freshly rotated backup (§4.6 step 4).
pub enum CompressionMode {
    Disabled,
    Synchronous(CompressionFormat),
    Asynchronous(Arc<CompressionPipeline>, CompressionFormat),
}

struct RotatingState {
    writer: Option<File>,
    bytes_since_rotation: u64,
    collision_seq: u64,
    pending_audit: Option<Vec<u8>>,
}

/// Writes records to an active file, rotates it aside once cumulative
/// bytes-written crosses an (adaptively mutable) threshold, hands the
/// backup to compression, and prunes retained history (§4.6).
pub struct RotatingSink {
    identity: SinkIdentity,
    formatter: Mutex<Formatter>,
    stats: SinkStats,
    path: PathBuf,
    date_pattern: String,
    retained_backups: usize,
    threshold: ArcSwap<u64>,
    compression: CompressionMode,
    state: Mutex<RotatingState>,
}

impl RotatingSink {
    pub fn new(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        threshold: Severity,
        formatter: Formatter,
        rotation_threshold_bytes: u64,
        retained_backups: usize,
        compression: CompressionMode,
    ) -> crate::error::Result<Self> {
        if rotation_threshold_bytes == 0 {
            return Err(crate::error::LoglyError::configuration(
                "rotation threshold must be positive; '0' is rejected",
            ));
        }
        Ok(RotatingSink {
            identity: SinkIdentity::new(name, threshold),
            formatter: Mutex::new(formatter),
            stats: SinkStats::default(),
            path: path.into(),
            date_pattern: DEFAULT_DATE_PATTERN.to_string(),
            retained_backups,
            threshold: ArcSwap::from_pointee(rotation_threshold_bytes),
            compression,
            state: Mutex::new(RotatingState {
                writer: None,
                bytes_since_rotation: 0,
                collision_seq: 0,
                pending_audit: None,
            }),
        })
    }

    pub fn current_threshold(&self) -> u64 {
        **self.threshold.load()
    }

    fn open_fresh_writer(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
    }

    fn backup_name(&self, seq: &mut u64) -> PathBuf {
        let stamp = Utc::now().format(&self.date_pattern).to_string();
        loop {
            let candidate = if *seq == 0 {
                self.path.with_file_name(format!(
                    "{}.{}",
                    self.path.file_name().unwrap().to_string_lossy(),
                    stamp
                ))
            } else {
                self.path.with_file_name(format!(
                    "{}.{}-{}",
                    self.path.file_name().unwrap().to_string_lossy(),
                    stamp,
                    seq
                ))
            };
            if !candidate.exists() {
                return candidate;
            }
            *seq += 1;
        }
    }

    fn rotate(&self, state: &mut RotatingState) -> io::Result<()> {
        if let Some(mut writer) = state.writer.take() {
            writer.flush()?;
        }

        let backup = self.backup_name(&mut state.collision_seq);
        fs::rename(&self.path, &backup)?;

        match &self.compression {
            CompressionMode::Disabled => {}
            CompressionMode::Synchronous(format) => {
                if let Err(err) = crate::backend::compression::compress_file(*format, &backup) {
                    diag::sink_io_failure(&self.identity.name(), "synchronous compression", &err);
                }
            }
            CompressionMode::Asynchronous(pipeline, _format) => {
                let current = self.current_threshold();
                let result = pipeline.submit_adaptive(backup.clone(), current, &self.identity.name());
                if result.resized {
                    self.threshold.store(Arc::new(result.new_threshold));
                    state.pending_audit = Some(self.audit_block(current, result.new_threshold));
                }
            }
        }

        self.prune_backups()?;

        let mut new_writer = self.open_fresh_writer()?;
        state.bytes_since_rotation = 0;
        if let Some(audit) = state.pending_audit.take() {
            new_writer.write_all(&audit)?;
            state.bytes_since_rotation += audit.len() as u64;
        }
        state.writer = Some(new_writer);
        Ok(())
    }

    fn audit_block(&self, old_max: u64, new_max: u64) -> Vec<u8> {
        diag::adaptive_increase(&self.identity.name(), old_max, new_max);
        format!(
            "*** ADAPTIVE FILE SIZE INCREASE ***\n\
             APPENDER: {}\n\
             OLD MAX SIZE: {}\n\
             NEW MAX SIZE: {} (DOUBLED DUE TO COMPRESSION OVERLOAD)\n\
             TIMESTAMP: {}\n\
             *** END ADAPTIVE CHANGE ***\n",
            self.identity.name(),
            format_size(old_max),
            format_size(new_max),
            Utc::now().to_rfc3339(),
        )
        .into_bytes()
    }

    fn is_recognised_backup(&self, entry_name: &str) -> bool {
        let active_name = match self.path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => return false,
        };
        let prefix = format!("{active_name}.");
        let Some(rest) = entry_name.strip_prefix(&prefix) else {
            return false;
        };
        for ext in RECOGNISED_COMPRESSED_EXTENSIONS {
            if let Some(stamp) = rest.strip_suffix(&format!(".{ext}")) {
                if looks_like_timestamp(stamp) {
                    return true;
                }
            }
        }
        looks_like_timestamp(rest)
    }

    fn prune_backups(&self) -> io::Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        if !dir.exists() {
            return Ok(());
        }

        let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if self.is_recognised_backup(&name) {
                let modified = entry.metadata()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                candidates.push((modified, entry.path()));
            }
        }
        candidates.sort_by_key(|(mtime, _)| *mtime);

        if candidates.len() > self.retained_backups {
            let excess = candidates.len() - self.retained_backups;
            for (_, path) in candidates.into_iter().take(excess) {
                let _ = fs::remove_file(path);
            }
        }
        Ok(())
    }

    fn write_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.writer.is_none() {
            let writer = self.open_fresh_writer()?;
            state.bytes_since_rotation = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
            state.writer = Some(writer);
        }

        if state.bytes_since_rotation + bytes.len() as u64 > self.current_threshold() {
            self.rotate(&mut state)?;
        }

        let writer = state.writer.as_mut().expect("just ensured open");
        writer.write_all(bytes)?;
        state.bytes_since_rotation += bytes.len() as u64;
        Ok(())
    }
}

fn looks_like_timestamp(s: &str) -> bool {
    let base = match s.rfind('-') {
        Some(pos) if s[pos + 1..].chars().all(|c| c.is_ascii_digit()) && pos + 1 < s.len() => {
            &s[..pos]
        }
        _ => s,
    };
    // yyyy-MM-dd-HH-mm-ss: 19 chars, digits and dashes in fixed positions.
    if base.len() != 19 {
        return false;
    }
    let bytes = base.as_bytes();
    let dash_positions = [4usize, 7, 10, 13, 16];
    for (i, &b) in bytes.iter().enumerate() {
        if dash_positions.contains(&i) {
            if b != b'-' {
                return false;
            }
        } else if !b.is_ascii_digit() {
            return false;
        }
    }
    true
}

impl Sink for RotatingSink {
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
        let mut state = self.state.lock();
        if let Some(writer) = state.writer.as_mut() {
            if let Err(err) = writer.flush() {
                self.stats.record_error();
                diag::sink_io_failure(&self.identity.name(), "flush", &err);
            }
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if let Some(mut writer) = state.writer.take() {
            let _ = writer.flush();
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
        self.state.lock().writer.is_none()
    }

    fn stats(&self) -> SinkStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::plain_text_formatter;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn rejects_zero_threshold() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let result = RotatingSink::new(
            &path,
            "rot",
            Severity::Trace,
            plain_text_formatter(),
            0,
            3,
            CompressionMode::Disabled,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rotation_retains_at_most_k_backups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = RotatingSink::new(
            &path,
            "rot",
            Severity::Trace,
            plain_text_formatter(),
            100,
            3,
            CompressionMode::Disabled,
        )
        .unwrap();

        for i in 0..150 {
            sink.accept(&LogRecord::new(Severity::Info, "svc", format!("line-{i:03}")));
            // Ensure each rotation gets a distinct timestamp-based name.
            if i % 10 == 9 {
                thread::sleep(Duration::from_millis(2));
            }
        }
        sink.close();

        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| sink.is_recognised_backup(&e.file_name().to_string_lossy()))
            .collect();
        assert!(backups.len() <= 3);
        assert!(path.exists());
    }

    #[test]
    fn backup_collision_gets_disambiguated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let sink = RotatingSink::new(
            &path,
            "rot",
            Severity::Trace,
            plain_text_formatter(),
            1,
            100,
            CompressionMode::Disabled,
        )
        .unwrap();
        let mut state = sink.state.lock();
        let first = sink.backup_name(&mut state.collision_seq);
        fs::write(&first, b"x").unwrap();
        let second = sink.backup_name(&mut state.collision_seq);
        assert_ne!(first, second);
    }
}
