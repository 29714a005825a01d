//! Append-only ingest log
//!
//! The reader thread is the only writer; any number of caller threads
//! poll by index. The length is published through an atomic so pollers
//! never take the entry lock just to notice nothing new arrived.

use crate::codec::Frame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// One received frame with its timestamps
#[derive(Debug, Clone)]
pub struct IngestEntry {
    /// Received frame
    pub frame: Frame,
    /// Host receive time
    pub host_time: Instant,
    /// Adapter hardware timestamp, wrapping milliseconds
    pub adapter_timestamp: u16,
}

/// Timestamped, index-addressable log of every frame read from the bus.
///
/// Entries are appended strictly in arrival order and indexes are never
/// reused; the core never trims the log, retention is the caller's
/// concern.
#[derive(Default)]
pub struct IngestLog {
    entries: Mutex<Vec<Arc<IngestEntry>>>,
    len: AtomicUsize,
}

impl IngestLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries appended so far
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// True if nothing has been received yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a frame, stamping it with the host receive time.
    /// Called only by the reader thread.
    pub fn append(&self, frame: Frame, adapter_timestamp: u16) {
        let entry = Arc::new(IngestEntry {
            frame,
            host_time: Instant::now(),
            adapter_timestamp,
        });
        let mut entries = self.entries.lock();
        entries.push(entry);
        self.len.store(entries.len(), Ordering::Release);
    }

    /// Entry at `index`, if appended yet
    pub fn get(&self, index: usize) -> Option<Arc<IngestEntry>> {
        self.entries.lock().get(index).cloned()
    }

    /// Snapshot of all entries in `[start, end)`
    pub fn range(&self, start: usize, end: usize) -> Vec<Arc<IngestEntry>> {
        let entries = self.entries.lock();
        let end = end.min(entries.len());
        if start >= end {
            return Vec::new();
        }
        entries[start..end].to_vec()
    }

    /// Snapshot of all entries from `start` on
    pub fn entries_from(&self, start: usize) -> Vec<Arc<IngestEntry>> {
        self.range(start, usize::MAX)
    }
}
