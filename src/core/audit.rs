//! Audit trail of task lifecycle events.
//!
//! Sinks receive one event per scheduling decision (submit, park, start,
//! complete, ...). The in-memory sink keeps a bounded history for tests and
//! diagnostics; the tracing sink forwards events to the log.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::{Task, TaskId};
use crate::util::clock::now_ms;

/// What happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Accepted by the façade.
    Submit,
    /// Existing periodic task updated in place.
    Update,
    /// Waiting for plugin capacity.
    Park,
    /// Execution started.
    Start,
    /// Execution produced a value.
    Complete,
    /// Execution produced an error.
    Fail,
    /// Periodic task lifetime ran out.
    Expire,
    /// Periodic task cancelled by its owner.
    Cancel,
    /// Direct task removed after its caller gave up.
    Retire,
    /// Result lost to buffer overflow.
    Overflow,
    /// Result arrived after its direct caller gave up.
    Late,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submit => "submit",
            Self::Update => "update",
            Self::Park => "park",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Expire => "expire",
            Self::Cancel => "cancel",
            Self::Retire => "retire",
            Self::Overflow => "overflow",
            Self::Late => "late",
        };
        f.write_str(name)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task identifier.
    pub task_id: TaskId,
    /// Owning plugin or export lane.
    pub owner: String,
    /// Item key text, or the owner for export runs.
    pub item: String,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// Shared handle to an audit sink.
pub type SharedAudit = Arc<dyn AuditSink>;

/// In-memory audit sink for testing and dev. Clones share the same history.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1024)))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Snapshot filtered by action.
    #[must_use]
    pub fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sink that writes every event to the `tracing` log at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::debug!(
            task_id = event.task_id,
            owner = %event.owner,
            item = %event.item,
            action = %event.action,
            detail = event.detail.as_deref().unwrap_or(""),
            "task audit"
        );
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    task_id: TaskId,
    owner: impl Into<String>,
    item: impl Into<String>,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        task_id,
        owner: owner.into(),
        item: item.into(),
        action,
        created_at_ms: now_ms(),
        detail,
    }
}

/// Record an event for `task` if a sink is attached.
pub(crate) fn record_task(
    audit: Option<&SharedAudit>,
    task: &Task,
    action: AuditAction,
    detail: Option<String>,
) {
    if let Some(sink) = audit {
        sink.record(build_audit_event(
            task.id,
            task.owner.as_ref(),
            task.label(),
            action,
            detail,
        ));
    }
}
