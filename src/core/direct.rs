//! Single-use completion slot for direct checks.
//!
//! The dispatch path (a finished execution) and the timeout path (the waiting
//! caller) both race to complete the slot; only the first attempt wins. A caller
//! may wait from async code or from a plain thread: readiness is signalled through
//! a `parking_lot::Condvar` for blocking waiters and a `tokio::sync::Notify` for
//! async ones.

use std::mem;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::core::SchedulerError;

/// Outcome delivered to a direct-check caller.
pub type DirectOutcome = Result<String, SchedulerError>;

#[derive(Debug)]
enum SlotState {
    Pending,
    Ready(DirectOutcome),
    Retired,
}

/// Completion slot shared between a direct task and its caller.
#[derive(Debug)]
pub struct DirectSlot {
    item: String,
    state: Mutex<SlotState>,
    ready: Condvar,
    notify: Notify,
}

impl DirectSlot {
    /// Create a pending slot for `item`.
    pub fn new(item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Item key this slot answers.
    #[must_use]
    pub fn item(&self) -> &str {
        &self.item
    }

    /// Whether no outcome has been recorded and the caller is still waiting.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Pending)
    }

    /// Record an outcome. Returns `false` if the slot was already completed or
    /// retired, in which case `outcome` is discarded.
    pub fn complete(&self, outcome: DirectOutcome) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, SlotState::Pending) {
            return false;
        }
        *state = SlotState::Ready(outcome);
        drop(state);
        self.ready.notify_all();
        self.notify.notify_one();
        true
    }

    fn take(state: &mut SlotState) -> Option<DirectOutcome> {
        match mem::replace(state, SlotState::Retired) {
            SlotState::Ready(outcome) => Some(outcome),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Timeout path: take a ready outcome if one raced in, otherwise retire the
    /// slot and report a timeout.
    fn expire(&self, state: &mut SlotState, after: Duration) -> DirectOutcome {
        if let Some(outcome) = Self::take(state) {
            return outcome;
        }
        *state = SlotState::Retired;
        Err(SchedulerError::Timeout {
            item: self.item.clone(),
            after,
        })
    }

    /// Wait from a plain thread until an outcome arrives or `timeout` elapses.
    pub fn wait_blocking(&self, timeout: Duration) -> DirectOutcome {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = Self::take(&mut state) {
                return outcome;
            }
            if matches!(*state, SlotState::Retired) {
                return self.expire(&mut state, timeout);
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return self.expire(&mut state, timeout);
            }
        }
    }

    /// Wait asynchronously until an outcome arrives or `deadline` passes.
    pub async fn wait(&self, deadline: tokio::time::Instant, timeout: Duration) -> DirectOutcome {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(outcome) = Self::take(&mut state) {
                    return outcome;
                }
                if matches!(*state, SlotState::Retired) {
                    return self.expire(&mut state, timeout);
                }
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                let mut state = self.state.lock();
                return self.expire(&mut state, timeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_completion_wins() {
        let slot = DirectSlot::new("system.hostname");
        assert!(slot.is_pending());
        assert!(slot.complete(Ok("host01".into())));
        assert!(!slot.complete(Ok("late".into())));
        assert_eq!(slot.wait_blocking(Duration::from_secs(1)).unwrap(), "host01");
    }

    #[test]
    fn test_blocking_wait_times_out_and_retires() {
        let slot = DirectSlot::new("agent.hung");
        let err = slot.wait_blocking(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, SchedulerError::Timeout { ref item, .. } if item == "agent.hung"));
        // a result arriving after the timeout is discarded
        assert!(!slot.complete(Ok("too late".into())));
        assert!(!slot.is_pending());
    }

    #[test]
    fn test_blocking_wait_wakes_on_completion() {
        let slot = Arc::new(DirectSlot::new("system.hostname"));
        let producer = Arc::clone(&slot);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.complete(Ok("host01".into()))
        });
        assert_eq!(slot.wait_blocking(Duration::from_secs(5)).unwrap(), "host01");
        assert!(handle.join().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_wait_times_out() {
        let slot = DirectSlot::new("agent.hung");
        let start = tokio::time::Instant::now();
        let timeout = Duration::from_secs(3);
        let err = slot.wait(start + timeout, timeout).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Timeout { .. }));
        assert_eq!(start.elapsed(), timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_wait_receives_value() {
        let slot = Arc::new(DirectSlot::new("system.hostname"));
        let producer = Arc::clone(&slot);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            producer.complete(Ok("host01".into()));
        });
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        let value = slot.wait(deadline, Duration::from_secs(3)).await.unwrap();
        assert_eq!(value, "host01");
    }
}
