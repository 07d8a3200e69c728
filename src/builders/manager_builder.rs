//! Builders to construct a task manager from configuration.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::{
    AuditSink, Manager, Plugin, PluginDescriptor, PluginRegistry, SchedulerError, SharedAudit,
};
use crate::runtime::{build_runtime, TokioSpawner};

/// Build a plugin registry from descriptors, applying per-plugin capacity
/// overrides from `cfg`.
///
/// # Errors
///
/// Invalid configuration, a rejected registration, or an override naming an
/// unknown plugin.
pub fn build_registry<I>(cfg: &SchedulerConfig, plugins: I) -> Result<PluginRegistry, SchedulerError>
where
    I: IntoIterator<Item = (PluginDescriptor, Arc<dyn Plugin>)>,
{
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut registry = PluginRegistry::new();
    for (descriptor, plugin) in plugins {
        registry.register(descriptor, plugin)?;
    }
    for (name, plugin_cfg) in &cfg.plugins {
        if let Some(capacity) = plugin_cfg.capacity {
            registry.set_capacity(name, capacity)?;
        }
    }
    Ok(registry)
}

/// Fluent construction of a [`Manager`].
///
/// Without an explicit spawner the manager runs on the current tokio runtime;
/// outside any runtime (or when `worker_threads` is set) it owns a
/// multi-threaded runtime of its own.
#[derive(Default)]
pub struct ManagerBuilder {
    config: SchedulerConfig,
    plugins: Vec<(PluginDescriptor, Arc<dyn Plugin>)>,
    spawner: Option<TokioSpawner>,
    worker_threads: Option<usize>,
    audit: Option<SharedAudit>,
}

impl ManagerBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`.
    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a plugin.
    #[must_use]
    pub fn plugin(mut self, descriptor: PluginDescriptor, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push((descriptor, plugin));
        self
    }

    /// Run on the runtime behind `spawner`.
    #[must_use]
    pub fn spawner(mut self, spawner: TokioSpawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Own a dedicated runtime with this many worker threads.
    #[must_use]
    pub const fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Record task lifecycle events to `sink`.
    #[must_use]
    pub fn audit<A>(mut self, sink: A) -> Self
    where
        A: AuditSink + 'static,
    {
        self.audit = Some(Arc::new(sink));
        self
    }

    /// Validate the configuration and build the manager in the `Created` state.
    ///
    /// # Errors
    ///
    /// See [`build_registry`]; also fails if a dedicated runtime cannot be built.
    pub fn build(self) -> Result<Manager, SchedulerError> {
        let registry = build_registry(&self.config, self.plugins)?;
        let (spawner, runtime) = match (self.spawner, self.worker_threads) {
            (Some(spawner), _) => (spawner, None),
            (None, None) if tokio::runtime::Handle::try_current().is_ok() => {
                (TokioSpawner::current()?, None)
            }
            (None, threads) => {
                let runtime = build_runtime(threads)?;
                (TokioSpawner::new(runtime.handle().clone()), Some(runtime))
            }
        };
        tracing::debug!(
            plugins = registry.len(),
            owned_runtime = runtime.is_some(),
            "task manager built"
        );
        Ok(Manager::new(self.config, registry, spawner, runtime, self.audit))
    }
}
