//! Scheduler statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::ManagerState;

/// Snapshot of one executor's admission state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginStats {
    /// Plugin or export lane name.
    pub name: String,
    /// Configured capacity.
    pub capacity: u32,
    /// Executions currently running.
    pub in_flight: u32,
    /// Tasks waiting for capacity.
    pub waiting: usize,
}

/// Statistics about scheduler utilization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Lifecycle state.
    pub state: ManagerState,
    /// Tasks in the timer queue.
    pub queued: usize,
    /// Per-executor admission state, sorted by name.
    pub plugins: Vec<PluginStats>,
    /// Periodic registrations accepted (including updates).
    pub submitted_periodic: u64,
    /// Direct checks accepted.
    pub submitted_direct: u64,
    /// Executions finished.
    pub executions: u64,
    /// Executions that returned a plugin error.
    pub failures: u64,
    /// Executions abandoned on timeout.
    pub timeouts: u64,
    /// Executions that panicked.
    pub panics: u64,
    /// Times a task had to wait for capacity.
    pub parked: u64,
    /// Periodic tasks dropped because their lifetime ran out.
    pub expired: u64,
    /// Results lost to buffer overflow.
    pub dropped_results: u64,
    /// Direct results that arrived after their caller gave up.
    pub late_results: u64,
}

/// Internal counters (lock-free atomics).
#[derive(Debug, Default)]
pub(crate) struct SchedulerCounters {
    pub queued: AtomicUsize,
    pub submitted_periodic: AtomicU64,
    pub submitted_direct: AtomicU64,
    pub executions: AtomicU64,
    pub failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub panics: AtomicU64,
    pub parked: AtomicU64,
    pub expired: AtomicU64,
}

impl SchedulerCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters; executor and sink figures are filled by the caller.
    pub(crate) fn snapshot(&self, state: ManagerState) -> SchedulerStats {
        SchedulerStats {
            state,
            queued: self.queued.load(Ordering::Relaxed),
            plugins: Vec::new(),
            submitted_periodic: self.submitted_periodic.load(Ordering::Relaxed),
            submitted_direct: self.submitted_direct.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            parked: self.parked.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            dropped_results: 0,
            late_results: 0,
        }
    }
}
