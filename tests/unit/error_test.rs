//! Tests for error types

use std::time::Duration;

use agent_taskmgr::core::{ExecutionError, SchedulerError};
use agent_taskmgr::util::ItemKey;

#[test]
fn test_unknown_item_error() {
    let err = SchedulerError::UnknownItem("agent.missing".to_string());
    assert_eq!(format!("{}", err), "unknown metric agent.missing");
}

#[test]
fn test_timeout_error_names_item() {
    let err = SchedulerError::Timeout {
        item: "system.hostname".to_string(),
        after: Duration::from_secs(3),
    };
    assert_eq!(
        format!("{}", err),
        "timeout while checking system.hostname after 3s"
    );
}

#[test]
fn test_execution_error_wraps_cause() {
    let err = SchedulerError::Execution {
        item: "vfs.fs.size[/]".to_string(),
        source: ExecutionError::Plugin("no such mount".to_string()),
    };
    assert_eq!(format!("{}", err), "cannot check vfs.fs.size[/]: no such mount");
}

#[test]
fn test_invalid_item_key_from_parse_error() {
    let parse_err = ItemKey::parse("vfs.fs.size[/").unwrap_err();
    let err: SchedulerError = parse_err.into();
    assert!(matches!(err, SchedulerError::InvalidItemKey(_)));
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("no tokio runtime".to_string());
    assert_eq!(format!("{}", err), "backend error: no tokio runtime");
}
