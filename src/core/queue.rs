//! Queue abstraction for time-ordered pending work.

use tokio::time::Instant;

use crate::core::{Task, TaskId};

/// A time-ordered work set holding every pending task across all plugins.
///
/// Ordering is `(next_due, class, arrival)`: earliest first, direct checks ahead
/// of periodic checks ahead of exports at the same instant, FIFO among equals.
/// A task id is present at most once.
pub trait TaskQueue {
    /// Insert a task, replacing (and returning) any entry with the same id.
    fn insert(&mut self, task: Task) -> Option<Task>;
    /// Remove a task by id.
    fn remove(&mut self, id: TaskId) -> Option<Task>;
    /// The task that would be popped next.
    fn peek_earliest(&self) -> Option<&Task>;
    /// Remove and return every task due at or before `now`, in queue order.
    fn pop_due(&mut self, now: Instant) -> Vec<Task>;
    /// Due time of the earliest task.
    fn next_wake_time(&self) -> Option<Instant>;
    /// Whether a task with this id is queued.
    fn contains(&self, id: TaskId) -> bool;
    /// Current depth.
    fn len(&self) -> usize;
    /// Whether the queue is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
