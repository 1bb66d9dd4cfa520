//! Append-only history of labeled events, bounded to a rolling window.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub seq: u64,
    pub label: String,
    pub content: String,
}

struct Inner {
    entries: VecDeque<HistoryEntry>,
    next_seq: u64,
}

/// Shared, insertion-ordered event record. Appends are the only mutation;
/// once `capacity` is reached the oldest entry is evicted.
pub struct HistoryLog {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl HistoryLog {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry and return its sequence number.
    pub fn record(&self, label: impl Into<String>, content: impl Into<String>) -> u64 {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push_back(HistoryEntry {
            seq,
            label: label.into(),
            content: content.into(),
        });
        while inner.entries.len() > self.capacity {
            inner.entries.pop_front();
        }
        seq
    }

    /// All retained entries, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// The `k` most recently appended entries, oldest first.
    pub fn tail(&self, k: usize) -> Vec<HistoryEntry> {
        let inner = self.inner.lock();
        let skip = inner.entries.len().saturating_sub(k);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
