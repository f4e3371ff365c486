//! Worker thread loop: idle → assigned → executing → idle, until told to stop.

use super::journals::JournalPool;
use super::pool::{PoolStats, WorkerHooks};
use crate::task::{Task, TaskContext, TaskStatus, UNEXPECTED_FAILURE_CODE};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};
use weft_journal::{IgnoreLock as _, Journal, Model};

pub(crate) enum Message<T> {
    Run { seq: usize, task: T },
    Terminate,
}

/// A finished task on its way back to the submitter.
///
/// `journal` is present only for successful tasks; failed tasks were already
/// unwound on the worker.
pub(crate) struct Completion<T: Task> {
    pub(crate) seq: usize,
    pub(crate) task: T,
    pub(crate) journal: Option<Journal<T::Node>>,
}

/// Handles a worker shares with the pool.
pub(crate) struct WorkerShared<T: Task> {
    pub(crate) model: Arc<Model<T::Node>>,
    pub(crate) journals: Arc<JournalPool<T::Node>>,
    pub(crate) stats: Arc<Mutex<PoolStats>>,
    pub(crate) inbox: Arc<Mutex<Receiver<Message<T>>>>,
    pub(crate) completions: Sender<Completion<T>>,
    pub(crate) hooks: WorkerHooks,
}

/// Body of a worker thread. Returns the `term_hook` code.
pub(crate) fn run<T: Task>(index: usize, shared: WorkerShared<T>, ready: Sender<(usize, i32)>) -> i32 {
    let init_code = guarded_hook(index, "init", || shared.hooks.run_init(index));
    debug!(worker = index, init_code, "worker idle");
    if ready.send((index, init_code)).is_err() {
        warn!(worker = index, "pool stopped waiting for worker start-up");
    }
    drop(ready);

    loop {
        // Only one idle worker waits on the hand-off at a time; the others queue on the inbox lock.
        let message = {
            let inbox = shared.inbox.lock_ignore_poison();
            inbox.recv()
        };

        match message {
            Ok(Message::Run { seq, task }) => execute(index, &shared, seq, task),
            Ok(Message::Terminate) | Err(_) => break,
        }
    }

    let term_code = guarded_hook(index, "term", || shared.hooks.run_term(index));
    debug!(worker = index, term_code, "worker stopped");
    term_code
}

fn execute<T: Task>(index: usize, shared: &WorkerShared<T>, seq: usize, mut task: T) {
    task.base_mut().set_status(TaskStatus::Running);
    debug!(worker = index, seq, task = ?task.id(), "task accepted");

    let mut journal = shared.journals.checkout();
    let outcome = {
        let mut ctx = TaskContext::new(&shared.model, &mut journal, index);
        panic::catch_unwind(AssertUnwindSafe(|| task.process(&mut ctx)))
    };

    let (status, panicked) = match outcome {
        Ok(Ok(())) => (TaskStatus::Succeeded, false),
        Ok(Err(failure)) => {
            warn!(worker = index, task = ?task.id(), code = failure.code(), "task failed: {}", failure.message());
            (TaskStatus::Failed(failure.code()), false)
        }
        Err(payload) => {
            error!(worker = index, task = ?task.id(), "task panicked: {}", panic_message(payload.as_ref()));
            (TaskStatus::Failed(UNEXPECTED_FAILURE_CODE), true)
        }
    };
    task.base_mut().set_status(status);

    {
        let mut stats = shared.stats.lock_ignore_poison();
        match status {
            TaskStatus::Succeeded => stats.succeeded += 1,
            _ => stats.failed += 1,
        }
        if panicked {
            stats.panicked += 1;
        }
    }

    let journal = if status.is_success() {
        Some(journal)
    } else {
        match journal.unwind(&shared.model) {
            Ok(undone) => debug!(worker = index, undone, "unwound failed task"),
            Err(error) => error!(worker = index, "failed to unwind task journal: {error}"),
        }
        shared.journals.restore(journal);
        None
    };

    if shared
        .completions
        .send(Completion { seq, task, journal })
        .is_err()
    {
        warn!(worker = index, seq, "submitter dropped before collecting task");
    }
}

/// Run a lifecycle hook, turning a panic into `UNEXPECTED_FAILURE_CODE` so the
/// worker still reports in and keeps serving.
fn guarded_hook(index: usize, stage: &str, hook: impl FnOnce() -> i32) -> i32 {
    panic::catch_unwind(AssertUnwindSafe(hook)).unwrap_or_else(|payload| {
        error!(worker = index, stage, "worker hook panicked: {}", panic_message(payload.as_ref()));
        UNEXPECTED_FAILURE_CODE
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
