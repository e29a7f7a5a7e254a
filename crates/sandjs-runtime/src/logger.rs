//! Bounded, overwrite-oldest log capture for a single run.
//!
//! Guest scripts and the session itself log through the [`Logger`] trait;
//! [`CachedLogger`] is the reference sink, a fixed-capacity ring buffer that
//! keeps the most recent entries and reports whether older ones were
//! overwritten.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Sink for run output. `source` identifies the origin (`"qjs"` for guest
/// script output, `"sys"` for session diagnostics).
pub trait Logger: Send + Sync {
    /// Record one message.
    fn log(&self, source: &str, message: &str);
}

/// A single captured log line. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Capture time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Origin tag.
    pub source: String,
    /// Message text.
    pub message: String,
}

impl LogEntry {
    fn new(source: &str, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {}] {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.source,
            self.message
        )
    }
}

#[derive(Debug, Default)]
struct Ring {
    entries: Vec<LogEntry>,
    head: usize,
    wrapped: bool,
}

/// Fixed-capacity log buffer. Once full, the oldest entry is overwritten.
#[derive(Debug)]
pub struct CachedLogger {
    cap: usize,
    ring: Mutex<Ring>,
}

impl CachedLogger {
    /// Create a buffer holding at most `cap` entries (minimum 1).
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            ring: Mutex::new(Ring::default()),
        }
    }

    /// Entries in chronological order. When the buffer has wrapped, this is
    /// the slice from the head to the end followed by the slice from the
    /// start to the head.
    pub fn output(&self) -> Vec<LogEntry> {
        let ring = self.ring.lock();
        if ring.entries.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(ring.entries.len());
        out.extend_from_slice(&ring.entries[ring.head..]);
        out.extend_from_slice(&ring.entries[..ring.head]);
        out
    }

    /// Whether any entry has been overwritten.
    pub fn is_wrapped(&self) -> bool {
        self.ring.lock().wrapped
    }
}

impl Logger for CachedLogger {
    fn log(&self, source: &str, message: &str) {
        let entry = LogEntry::new(source, message);
        let mut ring = self.ring.lock();
        if ring.entries.len() < self.cap {
            ring.entries.push(entry);
        } else {
            let head = ring.head;
            ring.entries[head] = entry;
            ring.head = (head + 1) % self.cap;
            ring.wrapped = true;
        }
    }
}
