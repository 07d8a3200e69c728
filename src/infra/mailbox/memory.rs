//! In-memory bounded result buffer.

use std::collections::VecDeque;

use crate::config::OverflowPolicy;
use crate::core::TaskResult;

/// Bounded FIFO of unexported results for one connector.
#[derive(Debug)]
pub struct ResultBuffer {
    entries: VecDeque<TaskResult>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: u64,
}

impl ResultBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            policy,
            dropped: 0,
        }
    }

    /// Append a result. When full, returns the result that was dropped to
    /// honour the overflow policy.
    pub fn push(&mut self, result: TaskResult) -> Option<TaskResult> {
        if self.entries.len() < self.capacity {
            self.entries.push_back(result);
            return None;
        }
        self.dropped += 1;
        match self.policy {
            OverflowPolicy::DropOldest => {
                let evicted = self.entries.pop_front();
                self.entries.push_back(result);
                evicted
            }
            OverflowPolicy::DropNewest => Some(result),
        }
    }

    /// Remove up to `max` results, oldest first.
    pub fn drain(&mut self, max: usize) -> Vec<TaskResult> {
        let n = max.min(self.entries.len());
        self.entries.drain(..n).collect()
    }

    /// Put back a batch that could not be exported, ahead of newer results.
    /// Returns how many results did not fit and were dropped, chosen by the
    /// overflow policy: oldest first or newest first.
    pub fn requeue(&mut self, batch: Vec<TaskResult>) -> usize {
        for result in batch.into_iter().rev() {
            self.entries.push_front(result);
        }
        let excess = self.entries.len().saturating_sub(self.capacity);
        match self.policy {
            OverflowPolicy::DropOldest => {
                self.entries.drain(..excess);
            }
            OverflowPolicy::DropNewest => self.entries.truncate(self.capacity),
        }
        self.dropped += excess as u64;
        excess
    }

    /// Results currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Results lost to overflow since creation.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}
