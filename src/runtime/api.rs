//! API-facing request/response models for passive checks and status listings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Manager, ManagerState, PluginRegistry, SchedulerError};

/// Passive check request, as received from a listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Item key text.
    pub key: String,
    /// Timeout override in seconds; the configured timeout applies otherwise.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Passive check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckResponse {
    /// The item was collected.
    Ok {
        /// Item key text.
        key: String,
        /// Collected value.
        value: String,
    },
    /// The item could not be collected.
    NotSupported {
        /// Item key text.
        key: String,
        /// Reason.
        error: String,
    },
}

/// Plugin snapshot data for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSnapshot {
    /// Plugin name.
    pub name: String,
    /// Maximum concurrent executions.
    pub capacity: u32,
    /// Item keys answered, sorted.
    pub keys: Vec<String>,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Manager lifecycle state.
    pub state: ManagerState,
}

/// Answer a passive check through the manager's direct path.
pub async fn handle_check(manager: &Manager, req: CheckRequest) -> CheckResponse {
    let timeout = req
        .timeout_secs
        .map_or_else(|| manager.config().timeout(), Duration::from_secs);
    match manager.perform_task(&req.key, timeout).await {
        Ok(value) => CheckResponse::Ok { key: req.key, value },
        Err(err) => CheckResponse::NotSupported {
            key: req.key,
            error: err.to_string(),
        },
    }
}

/// Render a check outcome as a single `-t` style line.
#[must_use]
pub fn format_check(key: &str, outcome: &Result<String, SchedulerError>) -> String {
    match outcome {
        Ok(value) => format!("{key:<46}[s|{value}]"),
        Err(err) => format!("{key:<46}[m|ZBX_NOTSUPPORTED] [{err}]"),
    }
}

/// Build plugin listings from the registry, sorted by name.
#[must_use]
pub fn list_plugins(registry: &PluginRegistry) -> Vec<PluginSnapshot> {
    let mut plugins: Vec<PluginSnapshot> = registry
        .iter()
        .map(|registration| {
            let mut keys = registration.descriptor.keys.clone();
            keys.sort();
            PluginSnapshot {
                name: registration.descriptor.name.clone(),
                capacity: registration.descriptor.capacity,
                keys,
            }
        })
        .collect();
    plugins.sort_by(|a, b| a.name.cmp(&b.name));
    plugins
}

/// Return a health payload.
#[must_use]
pub fn health(manager: &Manager) -> Health {
    let state = manager.state();
    Health {
        ok: state == ManagerState::Running,
        state,
    }
}
