//! Tests for tokio spawner utilities and API models

use agent_taskmgr::core::{PluginDescriptor, PluginRegistry, Spawn};
use agent_taskmgr::runtime::tokio_spawner::TokioSpawner;
use agent_taskmgr::runtime::{check_hostname, list_plugins, CheckResponse};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[tokio::test]
async fn test_spawner_returns_output() {
    let spawner = TokioSpawner::current().unwrap();
    let value = spawner.spawn(async { "host01".to_string() }).await.unwrap();
    assert_eq!(value, "host01");
}

#[test]
fn test_list_plugins_sorted() {
    struct Noop;

    #[async_trait::async_trait]
    impl agent_taskmgr::core::Plugin for Noop {
        async fn collect(
            &self,
            _item: &agent_taskmgr::util::ItemKey,
        ) -> Result<String, agent_taskmgr::core::PluginError> {
            Ok(String::new())
        }
    }

    let mut registry = PluginRegistry::new();
    registry
        .register(
            PluginDescriptor::new("vfs", 2).with_keys(["vfs.fs.size", "vfs.file.exists"]),
            std::sync::Arc::new(Noop),
        )
        .unwrap();
    registry
        .register(
            PluginDescriptor::new("agent", 1).with_keys(["agent.ping"]),
            std::sync::Arc::new(Noop),
        )
        .unwrap();

    let plugins = list_plugins(&registry);
    assert_eq!(plugins[0].name, "agent");
    assert_eq!(plugins[1].keys, ["vfs.file.exists", "vfs.fs.size"]);
}

#[test]
fn test_check_response_roundtrip() {
    let response = CheckResponse::NotSupported {
        key: "agent.missing".into(),
        error: "unknown metric agent.missing".into(),
    };
    let json = serde_json::to_string(&response).unwrap();
    assert!(json.contains(r#""status":"not_supported""#));
    let back: CheckResponse = serde_json::from_str(&json).unwrap();
    assert_eq!(back, response);
}

#[test]
fn test_hostname_characters() {
    assert!(check_hostname("Zabbix server").is_ok());
    assert!(check_hostname("host#1").is_err());
}
