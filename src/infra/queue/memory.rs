//! In-memory timer queue ordered by due time and tie-break class.

use std::collections::{BTreeMap, HashMap};

use tokio::time::Instant;

use crate::core::{Task, TaskClass, TaskId, TaskKind, TaskQueue};

/// Ordering key: earliest due first, then class rank, then arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DueKey {
    due: Instant,
    class: TaskClass,
    seq: u64,
}

/// Timer queue backed by an ordered map plus an id index.
///
/// O(log n) insert and remove, O(k log n) to pop k due tasks.
#[derive(Debug, Clone, Default)]
pub struct TimerQueue {
    order: BTreeMap<DueKey, Task>,
    index: HashMap<TaskId, DueKey>,
    seq: u64,
}

impl TimerQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutable access to a queued task's kind-specific data.
    ///
    /// The due time and class are part of the ordering key and cannot be changed
    /// here; re-insert the task to move it.
    pub fn kind_mut(&mut self, id: TaskId) -> Option<&mut TaskKind> {
        let key = self.index.get(&id)?;
        self.order.get_mut(key).map(|task| &mut task.kind)
    }

    /// Remove every task, in queue order.
    pub fn drain(&mut self) -> Vec<Task> {
        self.index.clear();
        std::mem::take(&mut self.order).into_values().collect()
    }
}

impl TaskQueue for TimerQueue {
    fn insert(&mut self, task: Task) -> Option<Task> {
        let replaced = self.remove(task.id);
        let key = DueKey {
            due: task.next_due,
            class: task.class(),
            seq: self.seq,
        };
        self.seq += 1;
        self.index.insert(task.id, key);
        self.order.insert(key, task);
        replaced
    }

    fn remove(&mut self, id: TaskId) -> Option<Task> {
        let key = self.index.remove(&id)?;
        self.order.remove(&key)
    }

    fn peek_earliest(&self) -> Option<&Task> {
        self.order.first_key_value().map(|(_, task)| task)
    }

    fn pop_due(&mut self, now: Instant) -> Vec<Task> {
        let mut due = Vec::new();
        while let Some(entry) = self.order.first_entry() {
            if entry.key().due > now {
                break;
            }
            let task = entry.remove();
            self.index.remove(&task.id);
            due.push(task);
        }
        due
    }

    fn next_wake_time(&self) -> Option<Instant> {
        self.order.first_key_value().map(|(key, _)| key.due)
    }

    fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}
