use std::mem;
use std::sync::Arc;

use tracing::{debug, warn};
use weft_journal::{Journal, Model};

use super::pool::{WorkerHooks, WorkerPool};
use super::queue::TaskQueue;
use crate::config::EngineConfig;
use crate::task::Task;
use crate::Result;

/// Run `tasks` on a fresh pool of `workers` threads and splice their journals
/// into `target`.
///
/// On return every task in `tasks` is back in input order with a terminal
/// status, whether or not the batch failed. The only exception is a task whose
/// worker thread died while running it.
///
/// # Errors
/// Returns the first error encountered: a pool error, or
/// [`crate::EngineError::TasksFailed`] if any task failed.
pub fn run_batch<T: Task>(
    model: &Arc<Model<T::Node>>,
    tasks: &mut Vec<T>,
    workers: usize,
    hooks: WorkerHooks,
    target: &mut Journal<T::Node>,
) -> Result<()> {
    run_batch_with_config(model, tasks, &EngineConfig::with_workers(workers), hooks, target)
}

/// [`run_batch`] with full engine configuration.
///
/// # Errors
/// See [`run_batch`]; also fails if `config` is invalid.
pub fn run_batch_with_config<T: Task>(
    model: &Arc<Model<T::Node>>,
    tasks: &mut Vec<T>,
    config: &EngineConfig,
    hooks: WorkerHooks,
    target: &mut Journal<T::Node>,
) -> Result<()> {
    config.validate()?;

    let mut pool = WorkerPool::new(Arc::clone(model), config.pool.clone());
    pool.initialize(config.pool.workers, hooks)?;
    let mut queue = TaskQueue::new(pool);
    queue.reserve(tasks.len());
    debug!(tasks = tasks.len(), workers = config.pool.workers, "running batch");

    let mut pending = mem::take(tasks).into_iter();
    let mut dispatch_error = None;
    for task in pending.by_ref() {
        if let Err(error) = queue.add_and_dispatch(task) {
            warn!("batch dispatch stopped early: {error}");
            dispatch_error = Some(error);
            break;
        }
    }

    let waited = queue.wait_for_completion(target);
    let collected = queue.take_tasks();
    let terminated = queue.into_pool().terminate();

    let mut finished = collected?;
    finished.extend(pending);
    *tasks = finished;

    if let Some(error) = dispatch_error {
        return Err(error);
    }
    waited?;
    terminated
}
