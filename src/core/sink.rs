//! Result sink: routes finished executions to direct callers or connector buffers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BufferConfig;
use crate::core::audit::{record_task, AuditAction, SharedAudit};
use crate::core::{ClientId, ExecutionError, SchedulerError, Task, TaskKind, TaskResult};
use crate::infra::ResultBuffer;

/// Failure reported by a downstream exporter. The batch is put back and retried
/// on the next export run.
#[derive(Debug, Clone, Error)]
#[error("export failed: {0}")]
pub struct ExportError(pub String);

/// Downstream consumer of buffered periodic results (a server connection, a
/// file writer, a test collector).
#[async_trait]
pub trait ResultExporter: Send + Sync + 'static {
    /// Deliver a batch of results for `client`, oldest first.
    async fn export(&self, client: ClientId, batch: Vec<TaskResult>) -> Result<(), ExportError>;
}

/// Per-connector buffers plus direct-slot delivery.
pub struct ResultSink {
    buffers: Mutex<HashMap<ClientId, ResultBuffer>>,
    config: BufferConfig,
    dropped: AtomicU64,
    late: AtomicU64,
    audit: Option<SharedAudit>,
}

impl ResultSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new(config: BufferConfig, audit: Option<SharedAudit>) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            config,
            dropped: AtomicU64::new(0),
            late: AtomicU64::new(0),
            audit,
        }
    }

    /// Route the result of `task`.
    ///
    /// Direct outcomes go to the caller's slot (discarded if the caller gave
    /// up); periodic outcomes are appended to the owning connector's buffer.
    pub fn deliver(&self, task: &Task, result: TaskResult) {
        match &task.kind {
            TaskKind::Direct(spec) => {
                let outcome = result.value.map_err(|source| match source {
                    ExecutionError::Timeout(after) => SchedulerError::Timeout {
                        item: result.item.clone(),
                        after,
                    },
                    source => SchedulerError::Execution {
                        item: result.item.clone(),
                        source,
                    },
                });
                if !spec.slot.complete(outcome) {
                    self.late.fetch_add(1, Ordering::Relaxed);
                    debug!(task_id = task.id, item = %result.item, "discarding late direct result");
                    record_task(self.audit.as_ref(), task, AuditAction::Late, None);
                }
            }
            TaskKind::Periodic(spec) => {
                let evicted = {
                    let mut buffers = self.buffers.lock();
                    buffers
                        .entry(spec.client)
                        .or_insert_with(|| self.new_buffer())
                        .push(result)
                };
                if let Some(evicted) = evicted {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        client = spec.client,
                        dropped_item = %evicted.item,
                        capacity = self.config.capacity,
                        "result buffer full, dropping result"
                    );
                    record_task(
                        self.audit.as_ref(),
                        task,
                        AuditAction::Overflow,
                        Some(evicted.item),
                    );
                }
            }
            TaskKind::Export(_) => {}
        }
    }

    /// Remove up to `max` buffered results for `client`, oldest first.
    pub fn drain(&self, client: ClientId, max: usize) -> Vec<TaskResult> {
        self.buffers
            .lock()
            .get_mut(&client)
            .map(|buffer| buffer.drain(max))
            .unwrap_or_default()
    }

    /// Return an unexported batch to the front of its connector's buffer.
    pub fn requeue(&self, client: ClientId, batch: Vec<TaskResult>) {
        if batch.is_empty() {
            return;
        }
        let lost = {
            let mut buffers = self.buffers.lock();
            buffers
                .entry(client)
                .or_insert_with(|| self.new_buffer())
                .requeue(batch)
        };
        if lost > 0 {
            self.dropped.fetch_add(lost as u64, Ordering::Relaxed);
            warn!(client, lost, policy = ?self.config.overflow, "result buffer full after requeue, results dropped");
        }
    }

    /// Buffered results awaiting export for `client`.
    #[must_use]
    pub fn pending(&self, client: ClientId) -> usize {
        self.buffers.lock().get(&client).map_or(0, ResultBuffer::len)
    }

    /// Results lost to overflow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Direct results discarded because their caller had already timed out.
    #[must_use]
    pub fn late(&self) -> u64 {
        self.late.load(Ordering::Relaxed)
    }

    /// Largest batch handed to an exporter.
    #[must_use]
    pub const fn export_batch_max(&self) -> usize {
        self.config.export_batch_max
    }

    fn new_buffer(&self) -> ResultBuffer {
        ResultBuffer::new(self.config.capacity, self.config.overflow)
    }
}
