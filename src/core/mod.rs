//! Core scheduling abstractions: tasks, plugins, executors and the manager.

pub mod audit;
pub mod direct;
pub mod error;
pub mod executor;
pub mod manager;
pub mod plugin;
pub mod queue;
pub mod sink;
pub mod stats;
pub mod task;

pub use audit::{
    build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, SharedAudit,
    TracingAuditSink,
};
pub use direct::{DirectOutcome, DirectSlot};
pub use error::{AppResult, ExecutionError, SchedulerError};
pub use executor::{PluginExecutor, Spawn};
pub use manager::{DirectTicket, Manager, ManagerState, PeriodicRequest};
pub use plugin::{Plugin, PluginDescriptor, PluginError, PluginRegistration, PluginRegistry};
pub use queue::TaskQueue;
pub use sink::{ExportError, ResultExporter, ResultSink};
pub use stats::{PluginStats, SchedulerStats};
pub use task::{
    next_occurrence, ClientId, DirectSpec, ExportSpec, PeriodicSpec, Task, TaskClass, TaskHandle,
    TaskId, TaskKind, TaskResult, LOCAL_CLIENT,
};
