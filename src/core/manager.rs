//! Task manager façade and the scheduler loop behind it.
//!
//! [`Manager`] is a cheap clonable handle. Every mutation of the timer queue and
//! of executor admission happens on one loop task; the façade only validates
//! requests and sends commands. Plugin calls never run on the loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::audit::{build_audit_event, record_task, AuditAction, SharedAudit};
use crate::core::executor::{Admit, Completion, ExecContext};
use crate::core::stats::SchedulerCounters;
use crate::core::{
    next_occurrence, ClientId, DirectOutcome, DirectSlot, DirectSpec, ExportSpec, PeriodicSpec,
    PluginExecutor, PluginRegistry, ResultExporter, ResultSink, SchedulerError, SchedulerStats,
    Spawn, Task, TaskHandle, TaskId, TaskKind, TaskQueue, TaskResult, LOCAL_CLIENT,
};
use crate::infra::TimerQueue;
use crate::runtime::TokioSpawner;
use crate::util::ItemKey;

const MIN_INTERVAL: Duration = Duration::from_millis(1);
/// Longest accepted polling or export interval.
const MAX_INTERVAL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Manager lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    /// Built, loop not started.
    #[default]
    Created,
    /// Accepting submissions.
    Running,
    /// Rejecting submissions, draining in-flight work.
    Stopping,
    /// Loop finished.
    Stopped,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// State cell observable from plain threads (condvar) and async code (watch).
struct Lifecycle {
    state: Mutex<ManagerState>,
    changed: Condvar,
    watch: watch::Sender<ManagerState>,
}

impl Lifecycle {
    fn new() -> Self {
        let (watch, _) = watch::channel(ManagerState::Created);
        Self {
            state: Mutex::new(ManagerState::Created),
            changed: Condvar::new(),
            watch,
        }
    }

    fn get(&self) -> ManagerState {
        *self.state.lock()
    }

    fn update<R>(&self, f: impl FnOnce(&mut ManagerState) -> R) -> R {
        let mut state = self.state.lock();
        let before = *state;
        let out = f(&mut state);
        if *state != before {
            self.watch.send_replace(*state);
            self.changed.notify_all();
        }
        out
    }

    fn set(&self, next: ManagerState) {
        self.update(|state| *state = next);
    }

    fn wait_blocking(&self, target: ManagerState) {
        let mut state = self.state.lock();
        while *state != target {
            self.changed.wait(&mut state);
        }
    }

    async fn wait_for(&self, target: ManagerState) {
        let mut rx = self.watch.subscribe();
        // the sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|state| *state == target).await;
    }
}

/// Requests from the façade to the loop.
enum Command {
    /// Insert a periodic or export task, or update a live one in place.
    Upsert(Task),
    /// Queue a direct check.
    Direct(Task),
    /// Stop a periodic task.
    Cancel(TaskId),
    /// Drop a direct check whose caller gave up.
    Retire { id: TaskId, owner: Arc<str> },
}

type Identity = (ClientId, String);

struct Inner {
    config: SchedulerConfig,
    registry: Arc<PluginRegistry>,
    spawner: TokioSpawner,
    runtime: Mutex<Option<Runtime>>,
    sink: Arc<ResultSink>,
    counters: Arc<SchedulerCounters>,
    audit: Option<SharedAudit>,
    lifecycle: Arc<Lifecycle>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    executors: Arc<RwLock<HashMap<Arc<str>, Arc<PluginExecutor>>>>,
    periodic_ids: Arc<Mutex<HashMap<Identity, TaskId>>>,
    export_ids: Mutex<HashMap<ClientId, TaskId>>,
    next_id: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        *self.commands.get_mut() = None;
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

/// Parameters of a periodic item check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicRequest {
    /// Connector that owns the results.
    pub client: ClientId,
    /// Item key text, e.g. `vfs.fs.size[/,free]`.
    pub item_key: String,
    /// Polling interval, at least 1 ms.
    pub interval: Duration,
    /// Time after which the task is dropped.
    pub lifetime: Option<Duration>,
    /// Execution timeout for this item; defaults to the configured timeout.
    pub timeout: Option<Duration>,
}

impl PeriodicRequest {
    /// Check `item_key` every `interval` for the local client.
    pub fn new(item_key: impl Into<String>, interval: Duration) -> Self {
        Self {
            client: LOCAL_CLIENT,
            item_key: item_key.into(),
            interval,
            lifetime: None,
            timeout: None,
        }
    }

    /// Set the owning connector.
    #[must_use]
    pub const fn with_client(mut self, client: ClientId) -> Self {
        self.client = client;
        self
    }

    /// Drop the task once `lifetime` has passed.
    #[must_use]
    pub const fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Override the execution timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Pending direct check. Redeem it with [`DirectTicket::wait`] or
/// [`DirectTicket::wait_blocking`].
pub struct DirectTicket {
    id: TaskId,
    owner: Arc<str>,
    slot: Arc<DirectSlot>,
    deadline: Instant,
    timeout: Duration,
    manager: Manager,
}

impl DirectTicket {
    /// Task id of the check.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Wait for the outcome or the deadline.
    pub async fn wait(self) -> DirectOutcome {
        let outcome = self.slot.wait(self.deadline, self.timeout).await;
        self.retire_on_timeout(&outcome);
        outcome
    }

    /// Wait from a plain (non-async) thread.
    pub fn wait_blocking(self) -> DirectOutcome {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let outcome = self.slot.wait_blocking(remaining);
        self.retire_on_timeout(&outcome);
        outcome
    }

    fn retire_on_timeout(&self, outcome: &DirectOutcome) {
        if matches!(outcome, Err(SchedulerError::Timeout { .. })) {
            // after shutdown there is nothing left to retire from
            let _ = self.manager.send(Command::Retire {
                id: self.id,
                owner: Arc::clone(&self.owner),
            });
        }
    }
}

impl fmt::Debug for DirectTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectTicket")
            .field("id", &self.id)
            .field("item", &self.slot.item())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Task manager handle. Clones share the same scheduler.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("state", &self.state())
            .field("plugins", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

impl Manager {
    pub(crate) fn new(
        config: SchedulerConfig,
        registry: PluginRegistry,
        spawner: TokioSpawner,
        runtime: Option<Runtime>,
        audit: Option<SharedAudit>,
    ) -> Self {
        let sink = Arc::new(ResultSink::new(config.buffer.clone(), audit.clone()));
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Arc::new(registry),
                spawner,
                runtime: Mutex::new(runtime),
                sink,
                counters: Arc::new(SchedulerCounters::default()),
                audit,
                lifecycle: Arc::new(Lifecycle::new()),
                commands: Mutex::new(None),
                loop_handle: Mutex::new(None),
                executors: Arc::new(RwLock::new(HashMap::new())),
                periodic_ids: Arc::new(Mutex::new(HashMap::new())),
                export_ids: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Start the scheduler loop. Calling it again while running is a no-op.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShuttingDown`] once `stop` has been requested.
    pub fn start(&self) -> Result<(), SchedulerError> {
        self.inner.lifecycle.update(|state| match *state {
            ManagerState::Running => Ok(()),
            ManagerState::Stopping | ManagerState::Stopped => Err(SchedulerError::ShuttingDown),
            ManagerState::Created => {
                self.spawn_loop();
                *state = ManagerState::Running;
                Ok(())
            }
        })
    }

    fn spawn_loop(&self) {
        let inner = &self.inner;
        {
            let mut executors = inner.executors.write();
            for registration in inner.registry.iter() {
                let executor = PluginExecutor::for_plugin(
                    &registration.descriptor.name,
                    registration.descriptor.capacity,
                    Arc::clone(&registration.plugin),
                );
                executors.insert(Arc::clone(executor.name()), Arc::new(executor));
            }
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(ExecContext {
            spawner: inner.spawner.clone(),
            sink: Arc::clone(&inner.sink),
            counters: Arc::clone(&inner.counters),
            audit: inner.audit.clone(),
            default_timeout: inner.config.timeout(),
            max_timeout: inner.config.max_timeout(),
            completions: completion_tx,
        });
        let scheduler = SchedulerLoop {
            queue: TimerQueue::new(),
            commands: command_rx,
            completions: completion_rx,
            ctx,
            executors: Arc::clone(&inner.executors),
            live: HashMap::new(),
            running: HashMap::new(),
            periodic_ids: Arc::clone(&inner.periodic_ids),
            lifecycle: Arc::clone(&inner.lifecycle),
            shutdown_grace: inner.config.shutdown_grace(),
            capacity_wait_warn: inner.config.capacity_wait_warn(),
        };
        let handle = inner.spawner.spawn(scheduler.run());
        *inner.commands.lock() = Some(command_tx);
        *inner.loop_handle.lock() = Some(handle);
        info!(
            plugins = inner.registry.len(),
            capacity = inner.registry.total_capacity(),
            "task manager started"
        );
    }

    /// Move to `Stopping` and close the command channel; a manager that never
    /// started goes straight to `Stopped`.
    fn begin_stop(&self) {
        self.inner.lifecycle.update(|state| match *state {
            ManagerState::Created => *state = ManagerState::Stopped,
            ManagerState::Running => {
                *state = ManagerState::Stopping;
                *self.inner.commands.lock() = None;
                info!("task manager stopping");
            }
            ManagerState::Stopping | ManagerState::Stopped => {}
        });
    }

    /// Stop accepting work, fail pending direct checks and wait for in-flight
    /// executions (up to the shutdown grace). Safe to call repeatedly and before
    /// `start`.
    pub async fn stop(&self) {
        self.begin_stop();
        let handle = self.inner.loop_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler loop ended abnormally");
                self.inner.lifecycle.set(ManagerState::Stopped);
            }
        }
        self.inner.lifecycle.wait_for(ManagerState::Stopped).await;
    }

    /// Blocking variant of [`Manager::stop`] for plain threads. Must not be
    /// called from inside the runtime that drives the manager.
    pub fn stop_blocking(&self) {
        self.begin_stop();
        self.inner.lifecycle.wait_blocking(ManagerState::Stopped);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ManagerState {
        self.inner.lifecycle.get()
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Plugin registry.
    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.inner.registry
    }

    /// Register or update a periodic check. Identity is the client id plus the
    /// item key text: re-submitting returns the same handle and replaces
    /// interval, lifetime and timeout without creating a second task.
    ///
    /// # Errors
    ///
    /// Invalid key or interval, unknown item, or the manager not running.
    pub fn submit_periodic(&self, request: PeriodicRequest) -> Result<TaskHandle, SchedulerError> {
        if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&request.interval) {
            return Err(SchedulerError::InvalidConfig(format!(
                "interval of {} must be between 1ms and {MAX_INTERVAL:?}",
                request.item_key
            )));
        }
        let item = ItemKey::parse(&request.item_key)?;
        let owner = self.owner_of(&item)?;
        self.ensure_running()?;

        let identity: Identity = (request.client, item.as_str().to_string());
        let (id, existing) = {
            let mut ids = self.inner.periodic_ids.lock();
            match ids.get(&identity) {
                Some(&id) => (id, true),
                None => {
                    let id = self.next_id();
                    ids.insert(identity.clone(), id);
                    (id, false)
                }
            }
        };

        let now = Instant::now();
        let max_timeout = self.inner.config.max_timeout();
        let task = Task {
            id,
            owner,
            next_due: now,
            kind: TaskKind::Periodic(PeriodicSpec {
                item,
                interval: request.interval,
                // a lifetime past the clock's range never expires
                expires_at: request.lifetime.and_then(|lifetime| now.checked_add(lifetime)),
                timeout: request.timeout.map(|t| t.min(max_timeout)),
                client: request.client,
            }),
        };
        let action = if existing {
            AuditAction::Update
        } else {
            AuditAction::Submit
        };
        record_task(self.inner.audit.as_ref(), &task, action, None);

        if let Err(err) = self.send(Command::Upsert(task)) {
            if !existing {
                self.inner.periodic_ids.lock().remove(&identity);
            }
            return Err(err);
        }
        SchedulerCounters::bump(&self.inner.counters.submitted_periodic);
        debug!(
            task_id = id,
            client = request.client,
            item = %identity.1,
            interval = ?request.interval,
            updated = existing,
            "periodic task submitted"
        );
        Ok(TaskHandle(id))
    }

    /// Cancel a periodic task. A running execution finishes but is not
    /// rescheduled.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownTask`] if the handle is not a live periodic task.
    pub fn cancel(&self, handle: TaskHandle) -> Result<(), SchedulerError> {
        self.ensure_running()?;
        let removed = {
            let mut ids = self.inner.periodic_ids.lock();
            let identity = ids
                .iter()
                .find(|(_, id)| **id == handle.0)
                .map(|(identity, _)| identity.clone());
            identity.and_then(|identity| ids.remove(&identity))
        };
        if removed.is_none() {
            return Err(SchedulerError::UnknownTask(handle.0));
        }
        self.send(Command::Cancel(handle.0))
    }

    /// Queue a direct check due now. `timeout` is capped by the configured ceiling.
    ///
    /// # Errors
    ///
    /// Invalid key, unknown item, or the manager not running.
    pub fn submit_direct(
        &self,
        item_key: &str,
        timeout: Duration,
    ) -> Result<DirectTicket, SchedulerError> {
        let item = ItemKey::parse(item_key)?;
        let owner = self.owner_of(&item)?;
        self.ensure_running()?;

        let timeout = timeout.min(self.inner.config.max_timeout());
        let now = Instant::now();
        let deadline = now.checked_add(timeout).ok_or_else(|| {
            SchedulerError::InvalidConfig(format!("timeout {timeout:?} is out of range"))
        })?;
        let id = self.next_id();
        let slot = Arc::new(DirectSlot::new(item.as_str()));
        let task = Task {
            id,
            owner: Arc::clone(&owner),
            next_due: now,
            kind: TaskKind::Direct(DirectSpec {
                item,
                deadline,
                slot: Arc::clone(&slot),
            }),
        };
        record_task(self.inner.audit.as_ref(), &task, AuditAction::Submit, None);
        self.send(Command::Direct(task))?;
        SchedulerCounters::bump(&self.inner.counters.submitted_direct);
        debug!(task_id = id, item = %item_key, ?timeout, "direct check submitted");
        Ok(DirectTicket {
            id,
            owner,
            slot,
            deadline,
            timeout,
            manager: self.clone(),
        })
    }

    /// Run a one-off check and wait for its value.
    ///
    /// # Errors
    ///
    /// Submission errors, [`SchedulerError::Timeout`] naming the item, or
    /// [`SchedulerError::Execution`] when the plugin failed.
    pub async fn perform_task(
        &self,
        item_key: &str,
        timeout: Duration,
    ) -> Result<String, SchedulerError> {
        self.submit_direct(item_key, timeout)?.wait().await
    }

    /// Blocking variant of [`Manager::perform_task`] for callers outside the runtime.
    ///
    /// # Errors
    ///
    /// As [`Manager::perform_task`].
    pub fn perform_task_blocking(
        &self,
        item_key: &str,
        timeout: Duration,
    ) -> Result<String, SchedulerError> {
        self.submit_direct(item_key, timeout)?.wait_blocking()
    }

    /// Run a check with the default timeout and format it the way `-t` does:
    /// `key [s|value]` or `key [m|ZBX_NOTSUPPORTED] [reason]`.
    pub async fn check_item(&self, item_key: &str) -> String {
        let outcome = self
            .perform_task(item_key, self.inner.config.timeout())
            .await;
        crate::runtime::api::format_check(item_key, &outcome)
    }

    /// Item key names answered by registered plugins, sorted.
    #[must_use]
    pub fn known_items(&self) -> Vec<String> {
        self.inner.registry.known_items()
    }

    /// Flush the results buffered for `client` to `exporter` every `interval`.
    /// The first flush happens one interval from now. Registering again for the
    /// same client replaces exporter and interval.
    ///
    /// # Errors
    ///
    /// Interval outside 1 ms to ten years, or the manager not running.
    pub fn register_exporter(
        &self,
        client: ClientId,
        exporter: Arc<dyn ResultExporter>,
        interval: Duration,
    ) -> Result<TaskHandle, SchedulerError> {
        if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&interval) {
            return Err(SchedulerError::InvalidConfig(format!(
                "export interval for client {client} must be between 1ms and {MAX_INTERVAL:?}"
            )));
        }
        self.ensure_running()?;
        let next_due = Instant::now().checked_add(interval).ok_or_else(|| {
            SchedulerError::InvalidConfig(format!("export interval {interval:?} is out of range"))
        })?;

        let lane = format!("export:{client}");
        let owner = {
            let mut executors = self.inner.executors.write();
            let executor = executors
                .entry(Arc::from(lane.as_str()))
                .or_insert_with(|| Arc::new(PluginExecutor::export_lane(&lane)));
            Arc::clone(executor.name())
        };
        let id = *self
            .inner
            .export_ids
            .lock()
            .entry(client)
            .or_insert_with(|| self.next_id());
        let task = Task {
            id,
            owner,
            next_due,
            kind: TaskKind::Export(ExportSpec {
                interval,
                client,
                exporter,
            }),
        };
        self.send(Command::Upsert(task))?;
        info!(client, ?interval, "exporter registered");
        Ok(TaskHandle(id))
    }

    /// Take up to `max` buffered results for `client`, oldest first.
    #[must_use]
    pub fn drain_results(&self, client: ClientId, max: usize) -> Vec<TaskResult> {
        self.inner.sink.drain(client, max)
    }

    /// Results buffered for `client`.
    #[must_use]
    pub fn pending_results(&self, client: ClientId) -> usize {
        self.inner.sink.pending(client)
    }

    /// Snapshot of counters and per-plugin admission.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.inner.counters.snapshot(self.state());
        let mut plugins: Vec<_> = self
            .inner
            .executors
            .read()
            .values()
            .map(|executor| executor.stats())
            .collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        stats.plugins = plugins;
        stats.dropped_results = self.inner.sink.dropped();
        stats.late_results = self.inner.sink.late();
        stats
    }

    fn owner_of(&self, item: &ItemKey) -> Result<Arc<str>, SchedulerError> {
        self.inner
            .registry
            .resolve(item.name())
            .map(|registration| Arc::from(registration.descriptor.name.as_str()))
            .ok_or_else(|| SchedulerError::UnknownItem(item.as_str().to_string()))
    }

    fn ensure_running(&self) -> Result<(), SchedulerError> {
        match self.state() {
            ManagerState::Running => Ok(()),
            ManagerState::Created => Err(SchedulerError::NotRunning),
            ManagerState::Stopping | ManagerState::Stopped => Err(SchedulerError::ShuttingDown),
        }
    }

    fn next_id(&self) -> TaskId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, command: Command) -> Result<(), SchedulerError> {
        let sender = self.inner.commands.lock().clone();
        match sender {
            Some(tx) => tx.send(command).map_err(|_| SchedulerError::ShuttingDown),
            None => Err(match self.state() {
                ManagerState::Created => SchedulerError::NotRunning,
                _ => SchedulerError::ShuttingDown,
            }),
        }
    }
}

struct Running {
    abort: AbortHandle,
    slot: Option<Arc<DirectSlot>>,
}

/// The single decision loop. Owns the queue; executors are shared only for
/// stats and export lane registration.
struct SchedulerLoop {
    queue: TimerQueue,
    commands: mpsc::UnboundedReceiver<Command>,
    completions: mpsc::UnboundedReceiver<Completion>,
    ctx: Arc<ExecContext<TokioSpawner>>,
    executors: Arc<RwLock<HashMap<Arc<str>, Arc<PluginExecutor>>>>,
    /// Current spec of every periodic and export task, wherever it sits.
    live: HashMap<TaskId, (Arc<str>, TaskKind)>,
    running: HashMap<TaskId, Running>,
    periodic_ids: Arc<Mutex<HashMap<Identity, TaskId>>>,
    lifecycle: Arc<Lifecycle>,
    shutdown_grace: Duration,
    capacity_wait_warn: Duration,
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl SchedulerLoop {
    async fn run(mut self) {
        debug!("scheduler loop started");
        loop {
            let wake = self.queue.next_wake_time();
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => {
                        self.apply(command);
                        while let Ok(command) = self.commands.try_recv() {
                            self.apply(command);
                        }
                    }
                    None => break,
                },
                Some(done) = self.completions.recv() => {
                    self.on_completion(done);
                    while let Ok(done) = self.completions.try_recv() {
                        self.on_completion(done);
                    }
                }
                () = sleep_until(wake) => {}
            }
            self.dispatch_due(Instant::now());
            self.ctx
                .counters
                .queued
                .store(self.queue.len(), Ordering::Relaxed);
        }
        self.shutdown().await;
    }

    fn executor(&self, owner: &str) -> Option<Arc<PluginExecutor>> {
        self.executors.read().get(owner).cloned()
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Upsert(task) => self.upsert(task),
            Command::Direct(task) => {
                self.queue.insert(task);
            }
            Command::Cancel(id) => self.cancel(id),
            Command::Retire { id, owner } => self.retire(id, &owner),
        }
    }

    fn upsert(&mut self, task: Task) {
        let id = task.id;
        let previous = self
            .live
            .insert(id, (Arc::clone(&task.owner), task.kind.clone()));
        if previous.is_some() {
            // queued copies are patched now; parked or running ones pick up the
            // new spec when they are launched or rescheduled
            if let Some(kind) = self.queue.kind_mut(id) {
                *kind = task.kind;
            }
            return;
        }
        if let TaskKind::Periodic(spec) = &task.kind {
            self.periodic_ids
                .lock()
                .entry((spec.client, spec.item.as_str().to_string()))
                .or_insert(id);
        }
        self.queue.insert(task);
    }

    fn cancel(&mut self, id: TaskId) {
        let Some((owner, kind)) = self.live.remove(&id) else {
            return;
        };
        // an upsert handled after the façade dropped the identity put it back
        self.forget_identity(id, &kind);
        let removed = self
            .queue
            .remove(id)
            .or_else(|| self.executor(&owner).and_then(|e| e.withdraw(id)));
        match removed {
            Some(task) => {
                record_task(self.ctx.audit.as_ref(), &task, AuditAction::Cancel, None);
                debug!(task_id = id, item = task.label(), "periodic task cancelled");
            }
            None => debug!(task_id = id, "cancelled task is running and will not be rescheduled"),
        }
    }

    fn retire(&mut self, id: TaskId, owner: &str) {
        let removed = self
            .queue
            .remove(id)
            .or_else(|| self.executor(owner).and_then(|e| e.withdraw(id)));
        if let Some(task) = removed {
            record_task(self.ctx.audit.as_ref(), &task, AuditAction::Retire, None);
            debug!(task_id = id, item = task.label(), "timed out direct check retired");
        }
    }

    /// Refresh a popped or released task from its live spec and drop it if it
    /// must not run any more.
    fn keep(&mut self, mut task: Task, now: Instant) -> Option<Task> {
        if let TaskKind::Direct(spec) = &task.kind {
            if spec.slot.is_pending() {
                return Some(task);
            }
            debug!(task_id = task.id, item = %spec.item, "skipping direct check, caller is gone");
            return None;
        }
        task.kind = self.live.get(&task.id)?.1.clone();
        if let TaskKind::Periodic(spec) = &task.kind {
            if spec.expires_at.is_some_and(|at| at <= now) {
                self.expire(&task);
                return None;
            }
        }
        Some(task)
    }

    /// Drop the (client, item) mapping of a periodic task if it still points at `id`.
    fn forget_identity(&self, id: TaskId, kind: &TaskKind) {
        if let TaskKind::Periodic(spec) = kind {
            let identity = (spec.client, spec.item.as_str().to_string());
            let mut ids = self.periodic_ids.lock();
            if ids.get(&identity) == Some(&id) {
                ids.remove(&identity);
            }
        }
    }

    fn expire(&mut self, task: &Task) {
        self.live.remove(&task.id);
        self.forget_identity(task.id, &task.kind);
        SchedulerCounters::bump(&self.ctx.counters.expired);
        record_task(self.ctx.audit.as_ref(), task, AuditAction::Expire, None);
        debug!(task_id = task.id, item = task.label(), "periodic task lifetime ended");
    }

    fn dispatch_due(&mut self, now: Instant) {
        for task in self.queue.pop_due(now) {
            if let Some(task) = self.keep(task, now) {
                self.admit(task, now);
            }
        }
    }

    fn admit(&mut self, task: Task, now: Instant) {
        let Some(executor) = self.executor(&task.owner) else {
            warn!(task_id = task.id, owner = %task.owner, "no executor for task, dropping it");
            if let TaskKind::Direct(spec) = &task.kind {
                spec.slot
                    .complete(Err(SchedulerError::UnknownItem(spec.item.to_string())));
            }
            self.live.remove(&task.id);
            return;
        };
        let (id, label) = (task.id, task.label().to_string());
        match executor.admit(task, now) {
            Admit::Run(task) => self.launch(&executor, task, None, now),
            Admit::Parked => {
                SchedulerCounters::bump(&self.ctx.counters.parked);
                debug!(task_id = id, plugin = %executor.name(), item = %label, "plugin at capacity, task parked");
                if let Some(audit) = &self.ctx.audit {
                    audit.record(build_audit_event(
                        id,
                        executor.name().as_ref(),
                        label,
                        AuditAction::Park,
                        None,
                    ));
                }
            }
        }
    }

    fn launch(
        &mut self,
        executor: &PluginExecutor,
        task: Task,
        parked_at: Option<Instant>,
        now: Instant,
    ) {
        if let Some(parked_at) = parked_at {
            let waited = now.saturating_duration_since(parked_at);
            if waited >= self.capacity_wait_warn {
                warn!(
                    task_id = task.id,
                    plugin = %executor.name(),
                    item = task.label(),
                    ?waited,
                    "task waited long for plugin capacity"
                );
            }
        }
        let id = task.id;
        let slot = match &task.kind {
            TaskKind::Direct(spec) => Some(Arc::clone(&spec.slot)),
            _ => None,
        };
        let abort = executor.launch(&self.ctx, task);
        self.running.insert(id, Running { abort, slot });
    }

    fn on_completion(&mut self, done: Completion) {
        let Completion { task, finished_at } = done;
        self.running.remove(&task.id);
        if let Some(executor) = self.executor(&task.owner) {
            let now = Instant::now();
            while let Some((next, parked_at)) = executor.release() {
                if let Some(next) = self.keep(next, now) {
                    self.launch(&executor, next, Some(parked_at), now);
                    break;
                }
            }
        }
        self.reschedule(task, finished_at);
    }

    fn reschedule(&mut self, mut task: Task, finished_at: Instant) {
        if matches!(task.kind, TaskKind::Direct(_)) {
            return;
        }
        let Some((_, kind)) = self.live.get(&task.id) else {
            return;
        };
        task.kind = kind.clone();
        let Some(interval) = task.interval() else {
            return;
        };
        let next = next_occurrence(task.next_due, interval, finished_at);
        if let TaskKind::Periodic(spec) = &task.kind {
            if spec.expires_at.is_some_and(|at| at <= next) {
                self.expire(&task);
                return;
            }
        }
        task.next_due = next;
        self.queue.insert(task);
    }

    async fn shutdown(mut self) {
        info!(
            queued = self.queue.len(),
            running = self.running.len(),
            "scheduler loop draining"
        );
        let mut pending = self.queue.drain();
        for executor in self.executors.read().values() {
            pending.extend(executor.drain_waiting());
        }
        for task in pending {
            if let TaskKind::Direct(spec) = &task.kind {
                spec.slot.complete(Err(SchedulerError::ShuttingDown));
            }
        }
        self.live.clear();

        // a grace past the clock's range waits for every execution
        let deadline = Instant::now().checked_add(self.shutdown_grace);
        while !self.running.is_empty() {
            let next = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.completions.recv()).await,
                None => Ok(self.completions.recv().await),
            };
            match next {
                Ok(Some(done)) => {
                    self.running.remove(&done.task.id);
                    if let Some(executor) = self.executor(&done.task.owner) {
                        executor.release();
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        for (id, running) in self.running.drain() {
            running.abort.abort();
            if let Some(slot) = running.slot {
                slot.complete(Err(SchedulerError::ShuttingDown));
            }
            warn!(task_id = id, "execution still running after shutdown grace, aborted");
        }
        self.ctx.counters.queued.store(0, Ordering::Relaxed);
        self.lifecycle.set(ManagerState::Stopped);
        info!("task manager stopped");
    }
}
