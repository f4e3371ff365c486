use std::mem;

use tracing::warn;
use weft_journal::Journal;

use super::pool::WorkerPool;
use crate::config::QueueConfig;
use crate::task::{Task, TaskStatus};
use crate::{EngineError, Result};

enum Entry<T> {
    InFlight,
    Done(T),
    Lost,
}

/// Streaming submission façade over a [`WorkerPool`]
///
/// Tasks may be added while earlier ones are still running. After
/// [`TaskQueue::wait_for_completion`] every task added so far is back in the
/// tracking list in its terminal state, and the queue accepts the next wave.
pub struct TaskQueue<T: Task> {
    pool: WorkerPool<T>,
    entries: Vec<Entry<T>>,
    wave: Vec<usize>,
}

impl<T: Task> TaskQueue<T> {
    /// Wrap an initialized pool.
    pub fn new(pool: WorkerPool<T>) -> Self {
        Self {
            pool,
            entries: Vec::new(),
            wave: Vec::new(),
        }
    }

    /// Wrap a pool, reserving the configured initial capacity.
    pub fn with_config(pool: WorkerPool<T>, config: &QueueConfig) -> Self {
        let mut queue = Self::new(pool);
        queue.reserve(config.initial_capacity);
        queue
    }

    /// Pre-allocate tracking storage for `expected` more tasks.
    pub fn reserve(&mut self, expected: usize) {
        self.entries.reserve(expected);
        self.wave.reserve(expected);
    }

    /// Assign the next id to `task`, track it, and hand it to a worker.
    ///
    /// Blocks until a worker accepts the task. Returns the task id. A task that
    /// no worker could accept stays tracked and comes back failed from the next
    /// [`TaskQueue::wait_for_completion`].
    ///
    /// # Errors
    /// Returns an error if the pool is not ready on this thread or its workers
    /// have exited.
    pub fn add_and_dispatch(&mut self, mut task: T) -> Result<usize> {
        self.pool.ensure_ready()?;

        let id = self.entries.len();
        let base = task.base_mut();
        base.assign_id(id);
        base.set_status(TaskStatus::Pending);

        let dispatched = self.pool.dispatch(task);
        self.entries.push(Entry::InFlight);
        self.wave.push(id);
        dispatched.map(|()| id)
    }

    /// Wait for every task added since the last wait and splice successful
    /// journals into `target` in submission order.
    ///
    /// A task that was running on a worker thread when that thread died cannot
    /// be recovered and is dropped from the tracking list.
    ///
    /// # Errors
    /// Returns [`EngineError::TasksFailed`] if any task of the wave failed (all
    /// tasks are still collected), [`EngineError::WorkerLost`] if tasks died
    /// with their worker, or a pool error if waiting was impossible.
    pub fn wait_for_completion(&mut self, target: &mut Journal<T::Node>) -> Result<()> {
        let wave = self.pool.barrier(target)?;
        let outcome = wave.outcome();

        for task in wave.into_tasks() {
            if let Some(id) = task.id()
                && let Some(entry) = self.entries.get_mut(id)
            {
                *entry = Entry::Done(task);
            }
        }
        let lost: Vec<usize> = mem::take(&mut self.wave)
            .into_iter()
            .filter(|id| matches!(self.entries.get(*id), Some(Entry::InFlight)))
            .collect();
        if !lost.is_empty() {
            warn!(?lost, "tasks lost with their worker");
            for id in lost {
                if let Some(entry) = self.entries.get_mut(id) {
                    *entry = Entry::Lost;
                }
            }
        }
        outcome
    }

    /// Collected tasks in submission order.
    pub fn tasks(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Done(task) => Some(task),
            Entry::InFlight | Entry::Lost => None,
        })
    }

    /// Task with the given id, once collected.
    pub fn task(&self, id: usize) -> Option<&T> {
        match self.entries.get(id) {
            Some(Entry::Done(task)) => Some(task),
            _ => None,
        }
    }

    /// Tasks added but not yet collected.
    pub fn outstanding(&self) -> usize {
        self.wave.len()
    }

    /// Tasks tracked, collected or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no task is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return all collected tasks; ids restart at zero afterwards.
    ///
    /// # Errors
    /// Returns an error while tasks are still in flight.
    pub fn take_tasks(&mut self) -> Result<Vec<T>> {
        if !self.wave.is_empty() {
            return Err(EngineError::TasksOutstanding(self.wave.len()));
        }
        Ok(self
            .entries
            .drain(..)
            .filter_map(|entry| match entry {
                Entry::Done(task) => Some(task),
                Entry::InFlight | Entry::Lost => None,
            })
            .collect())
    }

    /// Underlying pool.
    pub fn pool(&self) -> &WorkerPool<T> {
        &self.pool
    }

    /// Underlying pool, mutably.
    pub fn pool_mut(&mut self) -> &mut WorkerPool<T> {
        &mut self.pool
    }

    /// Give the pool back, dropping the tracking list.
    pub fn into_pool(self) -> WorkerPool<T> {
        self.pool
    }
}
