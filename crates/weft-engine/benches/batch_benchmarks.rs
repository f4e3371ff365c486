//! Benchmarks for batch dispatch, journal splicing and pool reuse.
#![cfg_attr(
    test,
    allow(
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        reason = "Allow for tests"
    )
)]

use std::hint::black_box;
use std::result::Result as StdResult;
use std::sync::Arc;

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use weft_engine::{
    PoolConfig, Task, TaskBase, TaskContext, TaskFailure, TaskQueue, WorkerHooks, WorkerPool,
    run_batch,
};
use weft_journal::{Journal, Model, NodeId};

/// Rewrites one node and creates a derived one, so each task journals two changes.
struct Scale {
    base: TaskBase,
    node: NodeId,
    factor: u64,
}

impl Task for Scale {
    type Node = Vec<u64>;

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn process(&mut self, ctx: &mut TaskContext<'_, Vec<u64>>) -> StdResult<(), TaskFailure> {
        let mut copy = ctx.working_copy(self.node)?;
        for value in copy.iter_mut() {
            *value = value.wrapping_mul(self.factor);
        }
        let derived = copy.iter().rev().copied().collect();
        ctx.store(copy)?;
        ctx.create(derived)?;
        Ok(())
    }
}

/// Model seeded with `count` nodes of 64 values each.
fn seeded(count: usize) -> (Arc<Model<Vec<u64>>>, Journal<Vec<u64>>, Vec<NodeId>) {
    let model = Model::new();
    let mut main = Journal::new();
    let nodes = (0..count)
        .map(|index| {
            model
                .create(&mut main, (0..64).map(|value| value + index as u64).collect())
                .unwrap_or_else(|err| panic!("Failed to seed model: {err}"))
        })
        .collect();
    (model, main, nodes)
}

fn tasks_for(nodes: &[NodeId]) -> Vec<Scale> {
    nodes
        .iter()
        .map(|node| Scale {
            base: TaskBase::new(),
            node: *node,
            factor: 3,
        })
        .collect()
}

/// Benchmark a full batch: pool start-up, dispatch, barrier and shutdown
fn bench_run_batch(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("run_batch");

    for workers in [1, 2, 4, 8] {
        group.throughput(Throughput::Elements(256));
        group.bench_with_input(
            BenchmarkId::from_parameter(workers),
            &workers,
            |bencher, &workers| {
                bencher.iter_batched(
                    || {
                        let (model, main, nodes) = seeded(256);
                        (model, main, tasks_for(&nodes))
                    },
                    |(model, mut main, mut tasks)| {
                        run_batch(&model, &mut tasks, workers, WorkerHooks::new(), &mut main)
                            .unwrap_or_else(|err| panic!("Batch failed: {err}"));
                        black_box(main.len())
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

/// Benchmark repeated waves on one long-lived pool
fn bench_pool_reuse(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("pool_reuse");
    let workers = 4;
    let (model, mut main, nodes) = seeded(64);

    let mut pool = WorkerPool::new(Arc::clone(&model), PoolConfig::default());
    pool.initialize(workers, WorkerHooks::new())
        .unwrap_or_else(|err| panic!("Failed to start pool: {err}"));
    let mut queue = TaskQueue::new(pool);

    group.throughput(Throughput::Elements(nodes.len() as u64));
    group.bench_function("wave_of_64", |bencher| {
        bencher.iter(|| {
            for task in tasks_for(&nodes) {
                queue
                    .add_and_dispatch(task)
                    .unwrap_or_else(|err| panic!("Dispatch failed: {err}"));
            }
            queue
                .wait_for_completion(&mut main)
                .unwrap_or_else(|err| panic!("Wave failed: {err}"));
            black_box(queue.take_tasks().map(|tasks| tasks.len()))
        });
    });

    group.finish();
    drop(queue.into_pool().terminate());
}

/// Benchmark splicing many small journals into one
fn bench_splice(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("journal_splice");

    for journals in [16, 128] {
        group.throughput(Throughput::Elements(journals));
        group.bench_with_input(
            BenchmarkId::from_parameter(journals),
            &journals,
            |bencher, &journals| {
                bencher.iter_batched(
                    || {
                        let model = Model::new();
                        (0..journals)
                            .map(|index| {
                                let mut journal = Journal::new();
                                for value in 0..8 {
                                    model
                                        .create(&mut journal, vec![index, value])
                                        .unwrap_or_else(|err| panic!("Failed to seed: {err}"));
                                }
                                journal
                            })
                            .collect::<Vec<Journal<Vec<u64>>>>()
                    },
                    |mut sources| {
                        let mut target = Journal::new();
                        for source in &mut sources {
                            target
                                .splice_from(source)
                                .unwrap_or_else(|err| panic!("Splice failed: {err}"));
                        }
                        black_box(target.len())
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_run_batch, bench_pool_reuse, bench_splice);
criterion_main!(benches);
