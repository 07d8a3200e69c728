//! Task model: periodic checks, direct checks and export runs sharing one queue.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core::{DirectSlot, ExecutionError, ResultExporter};
use crate::util::clock::now_ms;
use crate::util::ItemKey;

/// Unique task identifier.
pub type TaskId = u64;

/// Identifies the connector that owns periodic results and their export buffer.
pub type ClientId = u64;

/// Client id used for results not owned by any connector.
pub const LOCAL_CLIENT: ClientId = 0;

/// Tie-break class for tasks due at the same instant. Lower ranks run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    /// One-off synchronous check.
    Direct,
    /// Routine polling.
    Periodic,
    /// Buffer flush towards a connector.
    Export,
}

/// Opaque handle returned for periodic and export registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(pub(crate) TaskId);

impl TaskHandle {
    /// Underlying task id.
    #[must_use]
    pub const fn id(self) -> TaskId {
        self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Schedule of a periodic item check.
#[derive(Debug, Clone)]
pub struct PeriodicSpec {
    /// Item to collect.
    pub item: ItemKey,
    /// Polling interval.
    pub interval: Duration,
    /// Absolute expiry; the task is dropped once this passes.
    pub expires_at: Option<Instant>,
    /// Per-item execution timeout, clamped to the agent-wide ceiling.
    pub timeout: Option<Duration>,
    /// Owner of the produced results.
    pub client: ClientId,
}

/// One-off check with a deadline and a single-use completion slot.
#[derive(Debug, Clone)]
pub struct DirectSpec {
    /// Item to collect.
    pub item: ItemKey,
    /// Absolute deadline of the caller's wait.
    pub deadline: Instant,
    /// Where the outcome is delivered.
    pub slot: Arc<DirectSlot>,
}

/// Periodic flush of a connector's buffer.
#[derive(Clone)]
pub struct ExportSpec {
    /// Flush interval.
    pub interval: Duration,
    /// Connector whose buffer is flushed.
    pub client: ClientId,
    /// Downstream consumer.
    pub exporter: Arc<dyn ResultExporter>,
}

impl fmt::Debug for ExportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportSpec")
            .field("interval", &self.interval)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

/// Kind-specific task data.
#[derive(Debug, Clone)]
pub enum TaskKind {
    /// See [`PeriodicSpec`].
    Periodic(PeriodicSpec),
    /// See [`DirectSpec`].
    Direct(DirectSpec),
    /// See [`ExportSpec`].
    Export(ExportSpec),
}

/// A unit of schedulable work.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique id.
    pub id: TaskId,
    /// Name of the executor (plugin or export lane) that runs this task.
    pub owner: Arc<str>,
    /// When the task becomes due.
    pub next_due: Instant,
    /// Kind-specific data.
    pub kind: TaskKind,
}

impl Task {
    /// Tie-break class derived from the kind.
    #[must_use]
    pub const fn class(&self) -> TaskClass {
        match self.kind {
            TaskKind::Direct(_) => TaskClass::Direct,
            TaskKind::Periodic(_) => TaskClass::Periodic,
            TaskKind::Export(_) => TaskClass::Export,
        }
    }

    /// Item key for periodic and direct tasks.
    #[must_use]
    pub const fn item(&self) -> Option<&ItemKey> {
        match &self.kind {
            TaskKind::Periodic(spec) => Some(&spec.item),
            TaskKind::Direct(spec) => Some(&spec.item),
            TaskKind::Export(_) => None,
        }
    }

    /// Item key text, or the owner name for export runs.
    #[must_use]
    pub fn label(&self) -> &str {
        self.item().map_or(&*self.owner, ItemKey::as_str)
    }

    /// Repeat interval for periodic and export tasks.
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        match &self.kind {
            TaskKind::Periodic(spec) => Some(spec.interval),
            TaskKind::Export(spec) => Some(spec.interval),
            TaskKind::Direct(_) => None,
        }
    }
}

/// Smallest `due + n * interval` (n ≥ 1) strictly after `now`.
///
/// Missed windows are skipped rather than replayed.
#[must_use]
pub fn next_occurrence(due: Instant, interval: Duration, now: Instant) -> Instant {
    let step = interval.as_nanos().max(1);
    let elapsed = now.saturating_duration_since(due).as_nanos();
    let periods = elapsed / step + 1;
    let offset = u64::try_from(step.saturating_mul(periods)).unwrap_or(u64::MAX);
    due + Duration::from_nanos(offset)
}

/// Outcome of one execution of a periodic or direct task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Task that produced the result.
    pub task_id: TaskId,
    /// Plugin that computed it.
    pub plugin: String,
    /// Item key text.
    pub item: String,
    /// Owning connector.
    pub client: ClientId,
    /// Due time this execution ran for.
    pub due: Instant,
    /// When the execution finished.
    pub collected_at: Instant,
    /// Wall-clock milliseconds since epoch at completion.
    pub timestamp_ms: u128,
    /// Value or execution error.
    pub value: Result<String, ExecutionError>,
}

impl TaskResult {
    pub(crate) fn new(
        task: &Task,
        client: ClientId,
        item: &ItemKey,
        value: Result<String, ExecutionError>,
    ) -> Self {
        Self {
            task_id: task.id,
            plugin: task.owner.to_string(),
            item: item.as_str().to_string(),
            client,
            due: task.next_due,
            collected_at: Instant::now(),
            timestamp_ms: now_ms(),
            value,
        }
    }
}
