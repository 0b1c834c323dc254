//! # Store Module - In-Memory Log Entry Store
//!
//! Holds every log entry the application has produced since the link was
//! created. The store is append-only: entries are never edited, removed or
//! reordered, which lets the display device address them by index.
//!
//! ## Identifiers
//!
//! Each entry receives a 16-bit id equal to its insertion index modulo 65536.
//! Ids are unique for the first 65536 entries; past that they wrap and
//! collide with older entries (the device protocol has no wider id field).
//!
//! ## Usage
//!
//! ```rust
//! use loglink::store::{LogStore, Severity};
//!
//! let mut store = LogStore::new();
//! let first = store.append("net", "up", "link established", Severity::Info);
//! let second = store.append("net", "down", "carrier lost", Severity::Warn);
//! assert_eq!((first.id, second.id), (0, 1));
//! assert_eq!(store.len(), 2);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Severity of a log entry as understood by the display device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Debug,
    Info,
    Warn,
}

impl Severity {
    /// The type character carried in a message header.
    pub fn type_char(self) -> u8 {
        match self {
            Severity::Error => b'E',
            Severity::Debug => b'D',
            Severity::Info => b'I',
            Severity::Warn => b'W',
        }
    }

    /// Parse the single-letter form used by logcat-style lines (`E`, `W`, `I`, `D`, `V`).
    /// Verbose folds into Debug since the device has no separate level for it.
    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'E' => Some(Severity::Error),
            'W' => Some(Severity::Warn),
            'I' => Some(Severity::Info),
            'D' | 'V' => Some(Severity::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_char() as char)
    }
}

/// One immutable log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub tag: String,
    /// Text shown in scroll and page views; keep it within the device line length.
    pub short_msg: String,
    /// Text shown in the expanded view.
    pub long_msg: String,
    pub severity: Severity,
    pub id: u16,
}

impl LogEntry {
    /// `"<tag>-<short>"`, the line rendered in scroll and page views (before truncation).
    pub fn short_line(&self) -> String {
        format!("{}-{}", self.tag, self.short_msg)
    }

    /// `"<tag>-<short>: <long>"`, the text rendered in the expanded view.
    pub fn expanded_text(&self) -> String {
        format!("{}-{}: {}", self.tag, self.short_msg, self.long_msg)
    }
}

/// Append-only, index-addressable collection of log entries.
///
/// Entries are handed out as `Arc<LogEntry>` so the send queue and the
/// engine can hold them without copying strings.
#[derive(Debug, Default)]
pub struct LogStore {
    entries: Vec<Arc<LogEntry>>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entry stamped with the current time and return it.
    pub fn append(
        &mut self,
        tag: &str,
        short_msg: &str,
        long_msg: &str,
        severity: Severity,
    ) -> Arc<LogEntry> {
        let entry = Arc::new(LogEntry {
            timestamp: Utc::now(),
            tag: tag.to_string(),
            short_msg: short_msg.to_string(),
            long_msg: long_msg.to_string(),
            severity,
            id: (self.entries.len() & 0xFFFF) as u16,
        });
        self.entries.push(Arc::clone(&entry));
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<LogEntry>> {
        self.entries.get(index)
    }

    pub fn first(&self) -> Option<&Arc<LogEntry>> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&Arc<LogEntry>> {
        self.entries.last()
    }

    /// Entries in `[start, min(len, start + count))`, in store order.
    pub fn page(&self, start: usize, count: usize) -> &[Arc<LogEntry>] {
        let end = self.entries.len().min(start.saturating_add(count));
        if start >= end {
            return &[];
        }
        &self.entries[start..end]
    }

    /// Resolve an expanded-view request: past-the-end ids clamp to the newest entry.
    pub fn resolve_expanded(&self, id: u16) -> Option<&Arc<LogEntry>> {
        self.get(id as usize).or_else(|| self.last())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LogEntry>> {
        self.entries.iter()
    }
}
