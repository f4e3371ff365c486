use std::fmt;
use std::mem;
use std::sync::mpsc::{self, Receiver, SendError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use weft_journal::{IgnoreLock as _, Journal, Model};

use super::journals::JournalPool;
use super::worker::{self, Completion, Message, WorkerShared};
use crate::config::PoolConfig;
use crate::task::{JOURNAL_FAILURE_CODE, Task, TaskStatus, UNEXPECTED_FAILURE_CODE};
use crate::{EngineError, Result};

/// Per-thread start-up or shutdown hook; receives the worker index and returns
/// an advisory status code.
pub type HookFn = Arc<dyn Fn(usize) -> i32 + Send + Sync>;

/// Optional hooks run once on each worker thread at start and at stop.
#[derive(Clone, Default)]
pub struct WorkerHooks {
    init: Option<HookFn>,
    term: Option<HookFn>,
}

impl WorkerHooks {
    /// Hooks that do nothing and report 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` on each worker before it accepts tasks. A panic counts as
    /// [`UNEXPECTED_FAILURE_CODE`].
    #[must_use]
    pub fn with_init(mut self, hook: impl Fn(usize) -> i32 + Send + Sync + 'static) -> Self {
        self.init = Some(Arc::new(hook));
        self
    }

    /// Run `hook` on each worker as it stops. A panic counts as
    /// [`UNEXPECTED_FAILURE_CODE`].
    #[must_use]
    pub fn with_term(mut self, hook: impl Fn(usize) -> i32 + Send + Sync + 'static) -> Self {
        self.term = Some(Arc::new(hook));
        self
    }

    pub(crate) fn run_init(&self, index: usize) -> i32 {
        self.init.as_ref().map_or(0, |hook| hook(index))
    }

    pub(crate) fn run_term(&self, index: usize) -> i32 {
        self.term.as_ref().map_or(0, |hook| hook(index))
    }
}

impl fmt::Debug for WorkerHooks {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("WorkerHooks")
            .field("init", &self.init.is_some())
            .field("term", &self.term.is_some())
            .finish()
    }
}

/// Counters shared by all workers of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Tasks accepted by a worker.
    pub dispatched: u64,
    /// Tasks that finished and were spliced.
    pub succeeded: u64,
    /// Tasks that failed, panicked, or never reached a worker.
    pub failed: u64,
    /// Subset of `failed` that panicked.
    pub panicked: u64,
}

/// Tasks collected by one [`WorkerPool::barrier`] call, in submission order.
#[derive(Debug)]
pub struct Wave<T> {
    tasks: Vec<T>,
    failed: usize,
    first_failure: Option<i32>,
    lost: usize,
}

impl<T> Wave<T> {
    /// Collected tasks.
    pub fn tasks(&self) -> &[T] {
        &self.tasks
    }

    /// Take the collected tasks.
    pub fn into_tasks(self) -> Vec<T> {
        self.tasks
    }

    /// Number of failed tasks in the wave.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Failure code of the earliest-submitted failed task.
    pub fn first_failure(&self) -> Option<i32> {
        self.first_failure
    }

    /// Tasks that went down with a dead worker and could not be collected.
    pub fn lost(&self) -> usize {
        self.lost
    }

    /// Aggregate result of the wave.
    ///
    /// # Errors
    /// Returns [`EngineError::WorkerLost`] if tasks were lost with their worker,
    /// otherwise [`EngineError::TasksFailed`] if any task failed.
    pub fn outcome(&self) -> Result<()> {
        if self.lost > 0 {
            return Err(EngineError::WorkerLost);
        }
        match self.first_failure {
            Some(first_code) => Err(EngineError::TasksFailed {
                failed: self.failed,
                first_code,
            }),
            None => Ok(()),
        }
    }
}

struct WorkerSlot {
    index: usize,
    handle: JoinHandle<i32>,
}

struct Runtime<T: Task> {
    owner: ThreadId,
    workers: Vec<WorkerSlot>,
    hand_off: SyncSender<Message<T>>,
    completions: Receiver<Completion<T>>,
    next_seq: usize,
    outstanding: usize,
    undelivered: Vec<Completion<T>>,
}

/// Fixed-size pool of long-lived worker threads
///
/// The pool is driven from a single submitter thread (the one that called
/// [`WorkerPool::initialize`]): it hands tasks to idle workers and collects
/// them again at [`WorkerPool::barrier`], splicing the journals of successful
/// tasks into the submitter's journal in submission order.
pub struct WorkerPool<T: Task> {
    model: Arc<Model<T::Node>>,
    config: PoolConfig,
    journals: Arc<JournalPool<T::Node>>,
    stats: Arc<Mutex<PoolStats>>,
    runtime: Option<Runtime<T>>,
    init_codes: Vec<i32>,
    term_codes: Vec<i32>,
}

impl<T: Task> WorkerPool<T> {
    /// Create an uninitialized pool over `model`.
    pub fn new(model: Arc<Model<T::Node>>, config: PoolConfig) -> Self {
        Self {
            model,
            config,
            journals: Arc::new(JournalPool::new()),
            stats: Arc::new(Mutex::new(PoolStats::default())),
            runtime: None,
            init_codes: Vec::new(),
            term_codes: Vec::new(),
        }
    }

    /// Spawn `workers` threads and wait until each has run its init hook and is idle.
    ///
    /// Nonzero init hook codes are recorded, not fatal.
    ///
    /// # Errors
    /// Returns an error if the pool is already initialized, `workers` is zero, or
    /// a thread cannot be spawned (already-started workers are shut down again).
    pub fn initialize(&mut self, workers: usize, hooks: WorkerHooks) -> Result<()> {
        if self.runtime.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }
        if workers == 0 {
            return Err(EngineError::InvalidWorkerCount);
        }

        let (hand_off, inbox) = mpsc::sync_channel::<Message<T>>(0);
        let inbox = Arc::new(Mutex::new(inbox));
        let (completion_tx, completions) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        if self.config.preallocate_journals {
            self.journals.preallocate(workers);
        }

        let mut slots = Vec::with_capacity(workers);
        for index in 0..workers {
            let shared = WorkerShared {
                model: Arc::clone(&self.model),
                journals: Arc::clone(&self.journals),
                stats: Arc::clone(&self.stats),
                inbox: Arc::clone(&inbox),
                completions: completion_tx.clone(),
                hooks: hooks.clone(),
            };
            let ready = ready_tx.clone();

            let mut builder =
                thread::Builder::new().name(format!("{}-{index}", self.config.thread_name_prefix));
            if let Some(stack_size) = self.config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            match builder.spawn(move || worker::run(index, shared, ready)) {
                Ok(handle) => slots.push(WorkerSlot { index, handle }),
                Err(spawn_error) => {
                    error!(worker = index, "failed to spawn worker: {spawn_error}");
                    Self::shutdown(&hand_off, slots);
                    return Err(EngineError::Spawn(spawn_error.to_string()));
                }
            }
        }
        drop(inbox);
        drop(ready_tx);
        drop(completion_tx);

        let mut init_codes = vec![0; workers];
        for _ in 0..workers {
            let Ok((index, code)) = ready_rx.recv() else {
                Self::shutdown(&hand_off, slots);
                return Err(EngineError::WorkerLost);
            };
            if code != 0 {
                warn!(worker = index, code, "worker init hook returned nonzero code");
            }
            if let Some(slot) = init_codes.get_mut(index) {
                *slot = code;
            }
        }

        info!(
            workers,
            prefix = %self.config.thread_name_prefix,
            "worker pool initialized"
        );
        self.init_codes = init_codes;
        self.term_codes.clear();
        self.runtime = Some(Runtime {
            owner: thread::current().id(),
            workers: slots,
            hand_off,
            completions,
            next_seq: 0,
            outstanding: 0,
            undelivered: Vec::new(),
        });
        Ok(())
    }

    /// Stop every worker (after its term hook) and join it.
    ///
    /// # Errors
    /// Returns an error if the pool is not initialized, tasks are still
    /// outstanding, or this is not the initializing thread.
    pub fn terminate(&mut self) -> Result<()> {
        let active = self.runtime_mut()?;
        let pending = active.outstanding + active.undelivered.len();
        if pending > 0 {
            return Err(EngineError::TasksOutstanding(pending));
        }

        let Some(runtime) = self.runtime.take() else {
            return Err(EngineError::NotInitialized);
        };
        self.term_codes = Self::shutdown(&runtime.hand_off, runtime.workers);
        info!(workers = self.term_codes.len(), "worker pool terminated");
        Ok(())
    }

    /// Number of live workers.
    ///
    /// # Errors
    /// Returns an error if the pool is not initialized or this is not the
    /// initializing thread.
    pub fn thread_count(&self) -> Result<usize> {
        let runtime = self.runtime.as_ref().ok_or(EngineError::NotInitialized)?;
        if runtime.owner != thread::current().id() {
            return Err(EngineError::WrongThread);
        }
        Ok(runtime.workers.len())
    }

    /// Hand a task to an idle worker, blocking until one accepts it.
    ///
    /// Returns as soon as the task is accepted, not when it completes. A task no
    /// worker is left to accept is marked failed with
    /// [`UNEXPECTED_FAILURE_CODE`] and handed back by the next barrier.
    ///
    /// # Errors
    /// Returns an error if the pool is not ready on this thread or every worker
    /// has exited.
    pub fn dispatch(&mut self, task: T) -> Result<()> {
        let runtime = self.runtime_mut()?;
        let seq = runtime.next_seq;
        runtime.next_seq += 1;

        if let Err(SendError(message)) = runtime.hand_off.send(Message::Run { seq, task }) {
            error!(seq, "no worker left to accept task");
            if let Message::Run { mut task, .. } = message {
                task.base_mut().set_status(TaskStatus::Failed(UNEXPECTED_FAILURE_CODE));
                runtime.undelivered.push(Completion {
                    seq,
                    task,
                    journal: None,
                });
            }
            self.stats.lock_ignore_poison().failed += 1;
            return Err(EngineError::WorkerLost);
        }
        runtime.outstanding += 1;

        self.stats.lock_ignore_poison().dispatched += 1;
        Ok(())
    }

    /// Wait for every task dispatched since the last barrier and splice the
    /// journals of successful tasks into `target`, in submission order.
    ///
    /// Failed tasks do not stop collection; inspect [`Wave::outcome`]. If every
    /// worker has exited, the tasks that already came back are still collected
    /// and the rest are counted in [`Wave::lost`].
    ///
    /// # Errors
    /// Returns an error if the pool is not ready on this thread or `target` does
    /// not accept records.
    pub fn barrier(&mut self, target: &mut Journal<T::Node>) -> Result<Wave<T>> {
        target.ensure_writable()?;
        let runtime = self.runtime_mut()?;

        let mut arrived = mem::take(&mut runtime.undelivered);
        let mut lost = 0;
        while runtime.outstanding > 0 {
            match runtime.completions.recv() {
                Ok(completion) => {
                    runtime.outstanding -= 1;
                    arrived.push(completion);
                }
                Err(_) => {
                    error!(lost = runtime.outstanding, "workers exited with tasks in flight");
                    lost = mem::take(&mut runtime.outstanding);
                }
            }
        }
        runtime.next_seq = 0;
        arrived.sort_by_key(|completion| completion.seq);

        let mut wave = Wave {
            tasks: Vec::with_capacity(arrived.len()),
            failed: 0,
            first_failure: None,
            lost,
        };
        for completion in arrived {
            let task = self.settle(target, completion);
            if let TaskStatus::Failed(code) = task.status() {
                wave.failed += 1;
                wave.first_failure.get_or_insert(code);
            }
            wave.tasks.push(task);
        }
        Ok(wave)
    }

    /// Whether [`WorkerPool::initialize`] has run and the pool is not yet terminated.
    pub fn is_initialized(&self) -> bool {
        self.runtime.is_some()
    }

    /// Tasks dispatched but not yet collected by a barrier.
    pub fn outstanding(&self) -> usize {
        self.runtime
            .as_ref()
            .map_or(0, |runtime| runtime.outstanding + runtime.undelivered.len())
    }

    /// Idle journals available for reuse.
    pub fn journal_pool_size(&self) -> usize {
        self.journals.available()
    }

    /// Journals created over the pool's lifetime.
    pub fn journals_created(&self) -> usize {
        self.journals.created()
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        *self.stats.lock_ignore_poison()
    }

    /// Init hook codes from the last initialization, indexed by worker.
    pub fn init_codes(&self) -> &[i32] {
        &self.init_codes
    }

    /// Term hook codes from the last termination, in join order.
    pub fn term_codes(&self) -> &[i32] {
        &self.term_codes
    }

    /// Model the workers mutate.
    pub fn model(&self) -> &Arc<Model<T::Node>> {
        &self.model
    }

    /// Settings the pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Pool state checked for the submitter thread.
    pub(crate) fn ensure_ready(&self) -> Result<()> {
        self.thread_count().map(|_| ())
    }

    /// Splice a successful task's journal into `target`. If the splice is
    /// refused, the task's changes are unwound here and it is marked failed.
    fn settle(&self, target: &mut Journal<T::Node>, completion: Completion<T>) -> T {
        let Completion {
            seq,
            mut task,
            journal,
        } = completion;
        let Some(mut journal) = journal else {
            return task;
        };

        if let Err(splice_error) = target.splice_from(&mut journal) {
            error!(seq, "failed to splice task journal, unwinding it: {splice_error}");
            journal.bind_to_current_thread();
            if let Err(unwind_error) = journal.unwind(&self.model) {
                error!(seq, "failed to unwind unspliced journal: {unwind_error}");
            }
            task.base_mut().set_status(TaskStatus::Failed(JOURNAL_FAILURE_CODE));
            let mut stats = self.stats.lock_ignore_poison();
            stats.succeeded = stats.succeeded.saturating_sub(1);
            stats.failed += 1;
        }
        self.journals.restore(journal);
        task
    }

    fn runtime_mut(&mut self) -> Result<&mut Runtime<T>> {
        let runtime = self.runtime.as_mut().ok_or(EngineError::NotInitialized)?;
        if runtime.owner != thread::current().id() {
            return Err(EngineError::WrongThread);
        }
        Ok(runtime)
    }

    /// Send one stop message per worker and join them all. Returns term hook codes.
    fn shutdown(hand_off: &SyncSender<Message<T>>, workers: Vec<WorkerSlot>) -> Vec<i32> {
        for _ in &workers {
            if hand_off.send(Message::Terminate).is_err() {
                break;
            }
        }

        workers
            .into_iter()
            .map(|slot| match slot.handle.join() {
                Ok(code) => {
                    if code != 0 {
                        warn!(worker = slot.index, code, "worker term hook returned nonzero code");
                    }
                    code
                }
                Err(_) => {
                    error!(worker = slot.index, "worker thread panicked outside a task");
                    UNEXPECTED_FAILURE_CODE
                }
            })
            .collect()
    }
}

impl<T: Task> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            if runtime.outstanding > 0 {
                warn!(
                    outstanding = runtime.outstanding,
                    "worker pool dropped with uncollected tasks"
                );
            }
            Self::shutdown(&runtime.hand_off, runtime.workers);
        }
    }
}
