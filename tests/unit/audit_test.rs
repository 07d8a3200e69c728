//! Tests for audit sink

use agent_taskmgr::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        1,
        "system",
        "system.hostname",
        AuditAction::Submit,
        Some("direct".to_string()),
    );

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].task_id, 1);
    assert_eq!(events[0].action, AuditAction::Submit);
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event(1, "vfs", "vfs.fs.size[/]", AuditAction::Submit, None));
    sink.record(build_audit_event(2, "vfs", "vfs.fs.size[/]", AuditAction::Start, None));
    sink.record(build_audit_event(3, "vfs", "vfs.fs.size[/]", AuditAction::Complete, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, 2); // First one popped
    assert_eq!(events[1].task_id, 3);
}

#[test]
fn test_clones_share_history() {
    let sink = InMemoryAuditSink::new(8);
    let view = sink.clone();
    sink.record(build_audit_event(5, "agent", "agent.ping", AuditAction::Fail, None));
    assert_eq!(view.events_for(AuditAction::Fail).len(), 1);
    assert!(view.events_for(AuditAction::Complete).is_empty());
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(
        7,
        "vfs",
        "vfs.fs.size[/,free]",
        AuditAction::Overflow,
        Some("vfs.fs.size[/,free]".to_string()),
    );

    assert_eq!(event.task_id, 7);
    assert_eq!(event.owner, "vfs");
    assert_eq!(event.item, "vfs.fs.size[/,free]");
    assert_eq!(event.action.to_string(), "overflow");
    assert_eq!(event.detail, Some("vfs.fs.size[/,free]".to_string()));
    assert!(event.created_at_ms > 0);
    assert_eq!(event.event_id.len(), 36);
}
