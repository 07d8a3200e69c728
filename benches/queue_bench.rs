//! Benchmarks for the task manager.
//!
//! Benchmarks cover:
//! - Timer queue insert, pop and removal
//! - Rescheduling arithmetic
//! - Result buffer delivery under overflow
//! - End-to-end direct checks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use agent_taskmgr::builders::ManagerBuilder;
use agent_taskmgr::config::OverflowPolicy;
use agent_taskmgr::core::{
    next_occurrence, PeriodicSpec, Plugin, PluginDescriptor, PluginError, Task, TaskKind,
    TaskQueue, TaskResult, LOCAL_CLIENT,
};
use agent_taskmgr::infra::mailbox::memory::ResultBuffer;
use agent_taskmgr::infra::queue::memory::TimerQueue;
use agent_taskmgr::util::ItemKey;

use async_trait::async_trait;
use tokio::runtime::Runtime;
use tokio::time::Instant;

// ============================================================================
// Bench Plugin
// ============================================================================

struct Echo;

#[async_trait]
impl Plugin for Echo {
    async fn collect(&self, item: &ItemKey) -> Result<String, PluginError> {
        Ok(item.to_string())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn build_task(id: u64, base: Instant) -> Task {
    let item = ItemKey::parse(&format!("vfs.fs.size[/mnt/{}]", id % 50)).unwrap();
    Task {
        id,
        owner: Arc::from("vfs"),
        // spread due times so the queue holds many distinct instants
        next_due: base + Duration::from_millis(id % 997),
        kind: TaskKind::Periodic(PeriodicSpec {
            item,
            interval: Duration::from_secs(60),
            expires_at: None,
            timeout: None,
            client: LOCAL_CLIENT,
        }),
    }
}

fn build_result(id: u64) -> TaskResult {
    let now = Instant::now();
    TaskResult {
        task_id: id,
        plugin: "vfs".to_string(),
        item: "vfs.fs.size[/]".to_string(),
        client: LOCAL_CLIENT,
        due: now,
        collected_at: now,
        timestamp_ms: 0,
        value: Ok(id.to_string()),
    }
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_queue_insert_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_insert_pop");

    for size in [100_u64, 1_000, 10_000] {
        let base = Instant::now();
        let tasks: Vec<Task> = (0..size).map(|id| build_task(id, base)).collect();
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &tasks, |b, tasks| {
            b.iter(|| {
                let mut q = TimerQueue::new();
                for task in tasks {
                    q.insert(task.clone());
                }
                black_box(q.pop_due(base + Duration::from_secs(1)));
            });
        });
    }
    group.finish();
}

fn bench_queue_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_remove");

    for size in [100_u64, 1_000, 10_000] {
        let base = Instant::now();
        let mut seeded = TimerQueue::new();
        for id in 0..size {
            seeded.insert(build_task(id, base));
        }
        group.throughput(Throughput::Elements(size / 2));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || seeded.clone(),
                |mut q| {
                    for id in (0..size).step_by(2) {
                        black_box(q.remove(id));
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_next_occurrence(c: &mut Criterion) {
    let base = Instant::now();
    let interval = Duration::from_secs(10);
    c.bench_function("next_occurrence_after_overrun", |b| {
        b.iter(|| {
            black_box(next_occurrence(
                black_box(base),
                interval,
                base + Duration::from_secs(3_605),
            ))
        });
    });
}

// ============================================================================
// Result Buffer Benchmarks
// ============================================================================

fn bench_buffer_overflow(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_overflow");

    for policy in [OverflowPolicy::DropOldest, OverflowPolicy::DropNewest] {
        group.throughput(Throughput::Elements(10_000));
        group.bench_function(format!("{policy:?}"), |b| {
            b.iter(|| {
                let mut buffer = ResultBuffer::new(1_000, policy);
                for id in 0..10_000 {
                    buffer.push(build_result(id));
                }
                black_box(buffer.drain(100));
            });
        });
    }
    group.finish();
}

// ============================================================================
// End-to-End Benchmarks
// ============================================================================

fn bench_direct_checks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let manager = rt.block_on(async {
        let manager = ManagerBuilder::new()
            .plugin(
                PluginDescriptor::new("vfs", 8).with_keys(["vfs.fs.size"]),
                Arc::new(Echo),
            )
            .build()
            .unwrap();
        manager.start().unwrap();
        manager
    });

    let mut group = c.benchmark_group("direct_checks");
    for batch in [1_u64, 16, 128] {
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.to_async(&rt).iter(|| {
                let manager = manager.clone();
                async move {
                    let checks = (0..batch).map(|i| {
                        let manager = manager.clone();
                        async move {
                            manager
                                .perform_task(&format!("vfs.fs.size[/{i}]"), Duration::from_secs(3))
                                .await
                        }
                    });
                    black_box(futures::future::join_all(checks).await);
                }
            });
        });
    }
    group.finish();

    rt.block_on(manager.stop());
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(
    queue_benches,
    bench_queue_insert_pop,
    bench_queue_remove,
    bench_next_occurrence
);

criterion_group!(buffer_benches, bench_buffer_overflow);

criterion_group!(scenario_benches, bench_direct_checks);

criterion_main!(queue_benches, buffer_benches, scenario_benches);
