//! Operational log shown under the dashboard.
//!
//! Append-only, newest first, stamped with local wall-clock time at append.
//! Every entry is mirrored to the `log` facade.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogEntry {
    /// `HH:MM:SS - message`
    pub fn formatted(&self) -> String {
        format!("{} - {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

#[derive(Debug, Default)]
pub struct LogSink {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: Option<usize>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` entries, dropping the oldest.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn append(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.push(message);
    }

    /// Append a failure; mirrored at warn level.
    pub fn append_error(&self, err: &SyncError) {
        let message = err.to_string();
        log::warn!("{}", message);
        self.push(message);
    }

    fn push(&self, message: String) {
        let entry = LogEntry {
            timestamp: Local::now(),
            message,
        };
        let mut entries = self.entries.lock();
        entries.push_front(entry);
        if let Some(cap) = self.capacity {
            entries.truncate(cap);
        }
    }

    /// Snapshot, newest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Messages only, newest first.
    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
