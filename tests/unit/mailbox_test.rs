//! Tests for result buffer implementations

use agent_taskmgr::config::OverflowPolicy;
use agent_taskmgr::core::{TaskResult, LOCAL_CLIENT};
use agent_taskmgr::infra::mailbox::memory::ResultBuffer;
use tokio::time::Instant;

fn make_result(task_id: u64, value: &str) -> TaskResult {
    TaskResult {
        task_id,
        plugin: "vfs".to_string(),
        item: "vfs.fs.size[/]".to_string(),
        client: LOCAL_CLIENT,
        due: Instant::now(),
        collected_at: Instant::now(),
        timestamp_ms: 0,
        value: Ok(value.to_string()),
    }
}

#[tokio::test]
async fn test_buffer_push_and_drain() {
    let mut buffer = ResultBuffer::new(10, OverflowPolicy::DropOldest);

    buffer.push(make_result(1, "100"));
    buffer.push(make_result(2, "200"));

    let results = buffer.drain(1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value, Ok("100".to_string()));
    assert_eq!(buffer.len(), 1);
}

#[tokio::test]
async fn test_buffer_drop_oldest_keeps_newest() {
    let mut buffer = ResultBuffer::new(3, OverflowPolicy::DropOldest);
    for id in 1..=5 {
        buffer.push(make_result(id, &id.to_string()));
    }
    let ids: Vec<u64> = buffer.drain(10).iter().map(|r| r.task_id).collect();
    assert_eq!(ids, [3, 4, 5]);
    assert_eq!(buffer.dropped(), 2);
}
