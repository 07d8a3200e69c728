//! Plugin executors: capacity admission, isolated execution and result hand-off.
//!
//! Each plugin (and each export lane) owns one [`PluginExecutor`]. The
//! scheduler loop is the only caller of the admission methods, so a task is
//! either running, parked in exactly one wait list, or in the timer queue.
//! Executions run on spawned tasks; a hung or panicking plugin call is
//! contained to its own execution and reported as an [`ExecutionError`].

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::audit::{record_task, AuditAction, SharedAudit};
use crate::core::stats::SchedulerCounters;
use crate::core::{
    ExecutionError, Plugin, PluginStats, ResultSink, Task, TaskId, TaskKind, TaskResult,
};

/// Abstraction over async runtime spawning.
pub trait Spawn {
    /// Spawn a future and return a handle to its output.
    fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;
}

/// Outcome of asking an executor to run a task.
#[derive(Debug)]
pub(crate) enum Admit {
    /// Capacity was available; the caller must launch the task.
    Run(Task),
    /// The task joined the wait list.
    Parked,
}

/// Capacity accounting with a FIFO wait list.
#[derive(Debug)]
pub(crate) struct Admission {
    capacity: u32,
    in_flight: u32,
    waiting: VecDeque<(Task, Instant)>,
}

impl Admission {
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            in_flight: 0,
            waiting: VecDeque::new(),
        }
    }

    /// Reserve a slot for `task`, or park it behind earlier waiters.
    pub(crate) fn admit(&mut self, task: Task, now: Instant) -> Admit {
        if self.in_flight < self.capacity && self.waiting.is_empty() {
            self.in_flight += 1;
            Admit::Run(task)
        } else {
            self.waiting.push_back((task, now));
            Admit::Parked
        }
    }

    /// Free the slot of a finished execution and hand it to the next waiter,
    /// returning that waiter together with the time it was parked.
    pub(crate) fn release(&mut self) -> Option<(Task, Instant)> {
        self.in_flight = self.in_flight.saturating_sub(1);
        let next = self.waiting.pop_front()?;
        self.in_flight += 1;
        Some(next)
    }

    /// Remove a parked task.
    pub(crate) fn withdraw(&mut self, id: TaskId) -> Option<Task> {
        let pos = self.waiting.iter().position(|(task, _)| task.id == id)?;
        self.waiting.remove(pos).map(|(task, _)| task)
    }

    pub(crate) fn drain_waiting(&mut self) -> Vec<Task> {
        self.waiting.drain(..).map(|(task, _)| task).collect()
    }

    pub(crate) const fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub(crate) fn waiting(&self) -> usize {
        self.waiting.len()
    }
}

/// Message sent back to the scheduler loop when an execution ends.
#[derive(Debug)]
pub(crate) struct Completion {
    pub(crate) task: Task,
    pub(crate) finished_at: Instant,
}

/// Everything an execution needs besides the task itself.
pub(crate) struct ExecContext<S> {
    pub(crate) spawner: S,
    pub(crate) sink: Arc<ResultSink>,
    pub(crate) counters: Arc<SchedulerCounters>,
    pub(crate) audit: Option<SharedAudit>,
    pub(crate) default_timeout: Duration,
    pub(crate) max_timeout: Duration,
    pub(crate) completions: UnboundedSender<Completion>,
}

/// Executor for one plugin or export lane.
pub struct PluginExecutor {
    name: Arc<str>,
    plugin: Option<Arc<dyn Plugin>>,
    admission: Mutex<Admission>,
}

impl PluginExecutor {
    /// Executor for a registered plugin.
    pub(crate) fn for_plugin(name: &str, capacity: u32, plugin: Arc<dyn Plugin>) -> Self {
        Self {
            name: Arc::from(name),
            plugin: Some(plugin),
            admission: Mutex::new(Admission::new(capacity)),
        }
    }

    /// Serial lane for the export runs of one connector.
    pub(crate) fn export_lane(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            plugin: None,
            admission: Mutex::new(Admission::new(1)),
        }
    }

    /// Executor name, shared with the tasks it runs.
    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn admit(&self, task: Task, now: Instant) -> Admit {
        self.admission.lock().admit(task, now)
    }

    pub(crate) fn release(&self) -> Option<(Task, Instant)> {
        self.admission.lock().release()
    }

    pub(crate) fn withdraw(&self, id: TaskId) -> Option<Task> {
        self.admission.lock().withdraw(id)
    }

    pub(crate) fn drain_waiting(&self) -> Vec<Task> {
        self.admission.lock().drain_waiting()
    }

    /// Current admission figures.
    #[must_use]
    pub fn stats(&self) -> PluginStats {
        let admission = self.admission.lock();
        PluginStats {
            name: self.name.to_string(),
            capacity: admission.capacity,
            in_flight: admission.in_flight(),
            waiting: admission.waiting(),
        }
    }

    /// Start an execution of `task`, which must already hold a capacity slot.
    ///
    /// The returned handle aborts the whole execution, plugin call included.
    pub(crate) fn launch<S>(&self, ctx: &Arc<ExecContext<S>>, task: Task) -> AbortHandle
    where
        S: Spawn + Send + Sync + 'static,
    {
        record_task(ctx.audit.as_ref(), &task, AuditAction::Start, None);
        let plugin = self.plugin.clone();
        let exec = Arc::clone(ctx);
        let handle = ctx.spawner.spawn(async move {
            match &task.kind {
                TaskKind::Periodic(_) | TaskKind::Direct(_) => {
                    if let Some(plugin) = plugin {
                        collect(&exec, plugin, &task).await;
                    }
                }
                TaskKind::Export(spec) => {
                    export(&exec, spec.client, Arc::clone(&spec.exporter)).await;
                }
            }
            let finished_at = Instant::now();
            // the loop is gone only after shutdown; nothing left to notify
            let _ = exec.completions.send(Completion { task, finished_at });
        });
        handle.abort_handle()
    }
}

impl std::fmt::Debug for PluginExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginExecutor")
            .field("name", &self.name)
            .field("admission", &*self.admission.lock())
            .finish_non_exhaustive()
    }
}

/// Execution limit: the item timeout (or the default) capped by the ceiling,
/// and for direct checks by whatever is left of the caller's deadline.
fn execution_limit<S>(ctx: &ExecContext<S>, task: &Task) -> Duration {
    match &task.kind {
        TaskKind::Periodic(spec) => spec
            .timeout
            .unwrap_or(ctx.default_timeout)
            .min(ctx.max_timeout),
        TaskKind::Direct(spec) => spec
            .deadline
            .saturating_duration_since(Instant::now())
            .min(ctx.max_timeout),
        TaskKind::Export(_) => ctx.max_timeout,
    }
}

async fn collect<S>(ctx: &ExecContext<S>, plugin: Arc<dyn Plugin>, task: &Task)
where
    S: Spawn,
{
    let (item, client) = match &task.kind {
        TaskKind::Periodic(spec) => (spec.item.clone(), spec.client),
        TaskKind::Direct(spec) => (spec.item.clone(), crate::core::LOCAL_CLIENT),
        TaskKind::Export(_) => return,
    };
    let limit = execution_limit(ctx, task);
    let key = item.clone();
    let value = run_isolated(
        &ctx.spawner,
        async move {
            plugin
                .collect(&key)
                .await
                .map_err(|e| ExecutionError::Plugin(e.message().to_string()))
        },
        limit,
    )
    .await;

    SchedulerCounters::bump(&ctx.counters.executions);
    match &value {
        Ok(_) => record_task(ctx.audit.as_ref(), task, AuditAction::Complete, None),
        Err(err) => {
            let counter = match err {
                ExecutionError::Timeout(_) => &ctx.counters.timeouts,
                ExecutionError::Panicked(_) => &ctx.counters.panics,
                ExecutionError::Plugin(_) | ExecutionError::Cancelled => &ctx.counters.failures,
            };
            SchedulerCounters::bump(counter);
            debug!(task_id = task.id, item = %item, error = %err, "execution failed");
            record_task(
                ctx.audit.as_ref(),
                task,
                AuditAction::Fail,
                Some(err.to_string()),
            );
        }
    }
    ctx.sink
        .deliver(task, TaskResult::new(task, client, &item, value));
}

async fn export<S>(
    ctx: &ExecContext<S>,
    client: crate::core::ClientId,
    exporter: Arc<dyn crate::core::ResultExporter>,
) where
    S: Spawn,
{
    let batch = ctx.sink.drain(client, ctx.sink.export_batch_max());
    if batch.is_empty() {
        return;
    }
    let count = batch.len();
    let copy = batch.clone();
    let outcome = run_isolated(
        &ctx.spawner,
        async move {
            exporter
                .export(client, copy)
                .await
                .map_err(|e| ExecutionError::Plugin(e.to_string()))
        },
        ctx.max_timeout,
    )
    .await;
    match outcome {
        Ok(()) => debug!(client, count, "exported results"),
        Err(err) => {
            warn!(client, count, error = %err, "export failed, results kept for retry");
            ctx.sink.requeue(client, batch);
        }
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `fut` on its own task, bounded by `limit`.
///
/// A panic inside `fut` becomes [`ExecutionError::Panicked`]; exceeding the limit
/// abandons the task and yields [`ExecutionError::Timeout`]. Dropping the
/// returned future aborts the inner task as well.
pub(crate) async fn run_isolated<S, F, T>(
    spawner: &S,
    fut: F,
    limit: Duration,
) -> Result<T, ExecutionError>
where
    S: Spawn,
    F: Future<Output = Result<T, ExecutionError>> + Send + 'static,
    T: Send + 'static,
{
    let handle = spawner.spawn(fut);
    let _guard = AbortOnDrop(handle.abort_handle());
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join)) if join.is_panic() => {
            Err(ExecutionError::Panicked(panic_message(join.into_panic())))
        }
        Ok(Err(_)) => Err(ExecutionError::Cancelled),
        Err(_) => Err(ExecutionError::Timeout(limit)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
