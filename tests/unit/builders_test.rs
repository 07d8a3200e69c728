//! Tests for builder modules

use std::collections::HashMap;
use std::sync::Arc;

use agent_taskmgr::builders::{build_registry, ManagerBuilder};
use agent_taskmgr::config::{PluginConfig, SchedulerConfig};
use agent_taskmgr::core::{
    ManagerState, Plugin, PluginDescriptor, PluginError, SchedulerError,
};
use agent_taskmgr::util::ItemKey;

struct Echo;

#[async_trait::async_trait]
impl Plugin for Echo {
    async fn collect(&self, item: &ItemKey) -> Result<String, PluginError> {
        Ok(item.to_string())
    }
}

fn plugins() -> Vec<(PluginDescriptor, Arc<dyn Plugin>)> {
    vec![(
        PluginDescriptor::new("vfs", 4).with_keys(["vfs.fs.size"]),
        Arc::new(Echo) as Arc<dyn Plugin>,
    )]
}

#[test]
fn test_build_registry_applies_capacity_override() {
    let mut overrides = HashMap::new();
    overrides.insert("vfs".to_string(), PluginConfig { capacity: Some(1) });
    let cfg = SchedulerConfig {
        plugins: overrides,
        ..SchedulerConfig::default()
    };

    let registry = build_registry(&cfg, plugins()).unwrap();
    assert_eq!(registry.get("vfs").unwrap().descriptor.capacity, 1);
    assert_eq!(registry.total_capacity(), 1);
}

#[test]
fn test_build_registry_rejects_unknown_override() {
    let mut overrides = HashMap::new();
    overrides.insert("net".to_string(), PluginConfig { capacity: Some(2) });
    let cfg = SchedulerConfig {
        plugins: overrides,
        ..SchedulerConfig::default()
    };

    let err = build_registry(&cfg, plugins()).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_builder_defaults() {
    let manager = ManagerBuilder::new()
        .plugin(
            PluginDescriptor::new("vfs", 2).with_keys(["vfs.fs.size"]),
            Arc::new(Echo),
        )
        .build()
        .unwrap();

    assert_eq!(manager.state(), ManagerState::Created);
    assert_eq!(manager.config().timeout_secs, 3);
    assert_eq!(manager.known_items(), ["vfs.fs.size"]);
}

#[test]
fn test_builder_rejects_invalid_config() {
    let cfg = SchedulerConfig {
        timeout_secs: 0,
        ..SchedulerConfig::default()
    };
    let err = ManagerBuilder::new().config(cfg).worker_threads(1).build().unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
}
