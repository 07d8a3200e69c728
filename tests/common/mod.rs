//! Test plugins and exporters shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_taskmgr::builders::ManagerBuilder;
use agent_taskmgr::core::{
    ClientId, ExportError, Plugin, PluginDescriptor, PluginError, ResultExporter, TaskResult,
};
use agent_taskmgr::util::ItemKey;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

// ============================================================================
// PLUGINS
// ============================================================================

/// Answers `system.hostname` after a short delay.
pub struct Hostname {
    pub delay: Duration,
}

#[async_trait]
impl Plugin for Hostname {
    async fn collect(&self, _item: &ItemKey) -> Result<String, PluginError> {
        tokio::time::sleep(self.delay).await;
        Ok("host01".to_string())
    }
}

/// Never returns.
pub struct Hung;

#[async_trait]
impl Plugin for Hung {
    async fn collect(&self, _item: &ItemKey) -> Result<String, PluginError> {
        std::future::pending::<()>().await;
        Ok(String::new())
    }
}

/// `agent.ping` answers, `agent.fail` errors, `agent.panic` panics.
pub struct Faulty;

#[async_trait]
impl Plugin for Faulty {
    async fn collect(&self, item: &ItemKey) -> Result<String, PluginError> {
        match item.name() {
            "agent.fail" => Err(PluginError::new("collector unavailable")),
            "agent.panic" => panic!("collector crashed"),
            _ => Ok("pong".to_string()),
        }
    }
}

/// Records every call with its start time and tracks peak concurrency.
#[derive(Default)]
pub struct Recorder {
    pub delay: Duration,
    pub calls: Mutex<Vec<(String, Instant)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Recorder {
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn items(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(item, _)| item.clone()).collect()
    }

    /// Call start times as whole seconds after `t0`.
    pub fn start_offsets(&self, t0: Instant) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .map(|(_, at)| at.duration_since(t0).as_secs())
            .collect()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for Recorder {
    async fn collect(&self, item: &ItemKey) -> Result<String, PluginError> {
        let count = {
            let mut calls = self.calls.lock();
            calls.push((item.to_string(), Instant::now()));
            calls.len()
        };
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(count.to_string())
    }
}

// ============================================================================
// EXPORTERS
// ============================================================================

/// Collects exported batches; optionally fails the first attempt.
#[derive(Default)]
pub struct CollectingExporter {
    pub fail_first: AtomicBool,
    pub attempts: AtomicUsize,
    pub batches: Mutex<Vec<Vec<TaskResult>>>,
}

#[async_trait]
impl ResultExporter for CollectingExporter {
    async fn export(&self, _client: ClientId, batch: Vec<TaskResult>) -> Result<(), ExportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_first.swap(false, Ordering::SeqCst) {
            return Err(ExportError("server unreachable".to_string()));
        }
        self.batches.lock().push(batch);
        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

pub fn descriptor(name: &str, capacity: u32, keys: &[&str]) -> PluginDescriptor {
    PluginDescriptor::new(name, capacity).with_keys(keys.iter().copied())
}

/// Builder with the hostname, hung and faulty plugins registered.
pub fn standard_builder() -> ManagerBuilder {
    ManagerBuilder::new()
        .plugin(
            descriptor("system", 1, &["system.hostname"]),
            Arc::new(Hostname {
                delay: Duration::from_millis(50),
            }),
        )
        .plugin(descriptor("hung", 1, &["agent.hung"]), Arc::new(Hung))
        .plugin(
            descriptor("agent", 1, &["agent.ping", "agent.fail", "agent.panic"]),
            Arc::new(Faulty),
        )
}

/// Due times of `results` as whole seconds after `t0`.
pub fn due_offsets(results: &[TaskResult], t0: Instant) -> Vec<u64> {
    results
        .iter()
        .map(|r| r.due.duration_since(t0).as_secs())
        .collect()
}
