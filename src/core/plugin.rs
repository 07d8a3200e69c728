//! Plugin abstraction and the static plugin registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::SchedulerError;
use crate::util::ItemKey;

/// Value-level failure reported by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PluginError(String);

impl PluginError {
    /// Build an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

/// A capability provider that computes values for one or more item keys.
///
/// The scheduler treats plugins as opaque: it only bounds how many calls run at
/// once (see [`PluginDescriptor::capacity`]) and how long each may take.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use agent_taskmgr::core::{Plugin, PluginError};
/// use agent_taskmgr::util::ItemKey;
///
/// struct Hostname;
///
/// #[async_trait]
/// impl Plugin for Hostname {
///     async fn collect(&self, _item: &ItemKey) -> Result<String, PluginError> {
///         Ok("host01".into())
///     }
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Compute the value of `item`.
    ///
    /// The future may be dropped before completion when the execution timeout
    /// elapses or the scheduler stops.
    async fn collect(&self, item: &ItemKey) -> Result<String, PluginError>;
}

/// Static description of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Capability name, e.g. `"system.hostname"`.
    pub name: String,
    /// Maximum concurrent executions; 1 means strictly serial.
    pub capacity: u32,
    /// Item key names answered by this plugin.
    pub keys: Vec<String>,
}

impl PluginDescriptor {
    /// Create a descriptor answering no keys yet.
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            name: name.into(),
            capacity,
            keys: Vec::new(),
        }
    }

    /// Add item keys answered by the plugin.
    #[must_use]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
        self
    }
}

/// A descriptor paired with its implementation.
#[derive(Clone)]
pub struct PluginRegistration {
    /// Static description.
    pub descriptor: PluginDescriptor,
    /// Implementation.
    pub plugin: Arc<dyn Plugin>,
}

impl fmt::Debug for PluginRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistration")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Mapping from capability name and item key to plugin.
#[derive(Debug, Default, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, PluginRegistration>,
    by_key: HashMap<String, String>,
}

impl PluginRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin.
    ///
    /// # Errors
    ///
    /// Rejects zero capacity, a plugin without keys, a duplicate plugin name and a
    /// key already owned by another plugin. A rejected registration leaves the
    /// registry unchanged.
    pub fn register(
        &mut self,
        descriptor: PluginDescriptor,
        plugin: Arc<dyn Plugin>,
    ) -> Result<(), SchedulerError> {
        if descriptor.capacity == 0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "plugin `{}` capacity must be greater than 0",
                descriptor.name
            )));
        }
        if descriptor.keys.is_empty() {
            return Err(SchedulerError::InvalidConfig(format!(
                "plugin `{}` does not declare any item keys",
                descriptor.name
            )));
        }
        if self.plugins.contains_key(&descriptor.name) {
            return Err(SchedulerError::InvalidConfig(format!(
                "plugin `{}` is already registered",
                descriptor.name
            )));
        }
        for key in &descriptor.keys {
            if let Some(owner) = self.by_key.get(key) {
                return Err(SchedulerError::InvalidConfig(format!(
                    "item key `{key}` of plugin `{}` is already provided by `{owner}`",
                    descriptor.name
                )));
            }
        }

        for key in &descriptor.keys {
            self.by_key.insert(key.clone(), descriptor.name.clone());
        }
        tracing::debug!(plugin = %descriptor.name, capacity = descriptor.capacity, "plugin registered");
        self.plugins.insert(
            descriptor.name.clone(),
            PluginRegistration { descriptor, plugin },
        );
        Ok(())
    }

    /// Override the capacity of a registered plugin.
    ///
    /// # Errors
    ///
    /// Fails for an unknown plugin or zero capacity.
    pub fn set_capacity(&mut self, name: &str, capacity: u32) -> Result<(), SchedulerError> {
        if capacity == 0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "plugin `{name}` capacity must be greater than 0"
            )));
        }
        let registration = self
            .plugins
            .get_mut(name)
            .ok_or_else(|| SchedulerError::InvalidConfig(format!("unknown plugin `{name}`")))?;
        registration.descriptor.capacity = capacity;
        Ok(())
    }

    /// Find the plugin answering an item key name (without parameters).
    #[must_use]
    pub fn resolve(&self, key_name: &str) -> Option<&PluginRegistration> {
        self.by_key.get(key_name).and_then(|name| self.plugins.get(name))
    }

    /// Look up a plugin by capability name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PluginRegistration> {
        self.plugins.get(name)
    }

    /// Iterate over all registrations.
    pub fn iter(&self) -> impl Iterator<Item = &PluginRegistration> {
        self.plugins.values()
    }

    /// All item key names, sorted.
    #[must_use]
    pub fn known_items(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.by_key.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Sum of all plugin capacities: the agent-wide concurrency ceiling.
    #[must_use]
    pub fn total_capacity(&self) -> u64 {
        self.plugins
            .values()
            .map(|r| u64::from(r.descriptor.capacity))
            .sum()
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugin is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
