//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use agent_taskmgr::config::{BufferConfig, OverflowPolicy, PluginConfig, SchedulerConfig};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.timeout(), Duration::from_secs(3));
    assert_eq!(cfg.max_timeout(), Duration::from_secs(30));
    assert_eq!(cfg.buffer.overflow, OverflowPolicy::DropOldest);
}

#[test]
fn test_timeout_above_ceiling_is_rejected() {
    let cfg = SchedulerConfig {
        timeout_secs: 31,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_buffer_config_invalid_capacity() {
    let buffer = BufferConfig {
        capacity: 0,
        ..BufferConfig::default()
    };
    assert!(buffer.validate().is_err());
}

#[test]
fn test_plugin_override_zero_capacity() {
    let mut plugins = HashMap::new();
    plugins.insert("vfs".to_string(), PluginConfig { capacity: Some(0) });
    let cfg = SchedulerConfig {
        plugins,
        ..SchedulerConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("vfs"));
}

#[test]
fn test_from_json_str() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{
            "timeout_secs": 5,
            "buffer": { "capacity": 10, "overflow": "drop_newest" },
            "plugins": { "vfs": { "capacity": 2 } }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.timeout_secs, 5);
    assert_eq!(cfg.max_timeout_secs, 30);
    assert_eq!(cfg.buffer.capacity, 10);
    assert_eq!(cfg.buffer.overflow, OverflowPolicy::DropNewest);
    assert_eq!(cfg.buffer.export_batch_max, 100);
    assert_eq!(cfg.plugins["vfs"].capacity, Some(2));
}

#[test]
fn test_from_json_str_rejects_invalid() {
    let err = SchedulerConfig::from_json_str("{ not json").unwrap_err();
    assert_eq!(err.to_string(), "failed to parse scheduler configuration");

    let err = SchedulerConfig::from_json_str(r#"{ "max_timeout_secs": 0 }"#).unwrap_err();
    let chain = format!("{err:#}");
    assert!(chain.starts_with("invalid scheduler configuration: "));
    assert!(chain.contains("max_timeout_secs"));
}

#[test]
fn test_from_json_file() {
    let path = std::env::temp_dir().join(format!("agent-taskmgr-{}.json", std::process::id()));
    std::fs::write(&path, r#"{ "shutdown_grace_secs": 2 }"#).unwrap();
    let cfg = SchedulerConfig::from_json_file(&path).unwrap();
    assert_eq!(cfg.shutdown_grace_secs, 2);
    std::fs::remove_file(&path).unwrap();

    let err = SchedulerConfig::from_json_file(&path).unwrap_err();
    assert!(err.to_string().starts_with("failed to read "));
}

#[test]
fn test_env_overrides() {
    let mut cfg = SchedulerConfig::default();
    cfg.apply_overrides(lookup(&[
        ("AGENT_TIMEOUT", "10"),
        ("AGENT_BUFFER_SIZE", "64"),
        ("AGENT_BUFFER_OVERFLOW", "drop_newest"),
        ("AGENT_EXPORT_BATCH", "8"),
    ]))
    .unwrap();
    assert_eq!(cfg.timeout_secs, 10);
    assert_eq!(cfg.buffer.capacity, 64);
    assert_eq!(cfg.buffer.overflow, OverflowPolicy::DropNewest);
    assert_eq!(cfg.buffer.export_batch_max, 8);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_env_overrides_reject_garbage() {
    let mut cfg = SchedulerConfig::default();
    assert!(cfg.apply_overrides(lookup(&[("AGENT_TIMEOUT", "soon")])).is_err());
    assert!(cfg
        .apply_overrides(lookup(&[("AGENT_BUFFER_OVERFLOW", "block")]))
        .is_err());
}

#[test]
fn test_from_env_without_overrides() {
    if std::env::vars().any(|(name, _)| name.starts_with("AGENT_")) {
        return;
    }
    let cfg = SchedulerConfig::from_env().unwrap();
    assert_eq!(cfg.timeout_secs, 3);
    assert_eq!(cfg.buffer.overflow, OverflowPolicy::DropOldest);
}
