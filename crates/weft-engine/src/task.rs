//! The task contract implemented by callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use weft_journal::{Journal, JournalError, JournalId, Model, NodeData, NodeId, Owned, Shared};

/// Failure code recorded when a task panics.
pub const UNEXPECTED_FAILURE_CODE: i32 = -1;

/// Failure code used when a journal or model operation fails inside a task.
pub const JOURNAL_FAILURE_CODE: i32 = -2;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Created or queued, not yet picked up.
    #[default]
    Pending,
    /// Executing on a worker.
    Running,
    /// Finished without error.
    Succeeded,
    /// Finished with a nonzero failure code. Its changes were unwound.
    Failed(i32),
}

impl TaskStatus {
    /// Whether the task has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }

    /// Whether the task succeeded.
    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }

    /// Failure code, if the task failed.
    pub fn failure_code(self) -> Option<i32> {
        match self {
            Self::Failed(code) => Some(code),
            _ => None,
        }
    }
}

/// Bookkeeping every task carries: its submission position and status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBase {
    id: Option<usize>,
    status: TaskStatus,
}

impl TaskBase {
    /// Fresh bookkeeping: no id, [`TaskStatus::Pending`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Position in submission order, once submitted through a queue.
    pub fn id(&self) -> Option<usize> {
        self.id
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub(crate) fn assign_id(&mut self, id: usize) {
        self.id = Some(id);
    }

    pub(crate) fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }
}

/// Domain failure reported by [`Task::process`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task failed with code {code}: {message}")]
pub struct TaskFailure {
    code: i32,
    message: String,
}

impl TaskFailure {
    /// Build a failure. A zero code is not a failure code and is replaced by
    /// [`UNEXPECTED_FAILURE_CODE`].
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: if code == 0 {
                UNEXPECTED_FAILURE_CODE
            } else {
                code
            },
            message: message.into(),
        }
    }

    /// Nonzero failure code.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Human-readable reason.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<JournalError> for TaskFailure {
    fn from(error: JournalError) -> Self {
        Self::new(JOURNAL_FAILURE_CODE, error.to_string())
    }
}

/// A unit of work executed on exactly one worker thread.
///
/// Implementors keep their outputs as ordinary fields; they are meaningful only
/// when [`Task::status`] is [`TaskStatus::Succeeded`]. Returning an error (or
/// panicking) marks the task failed, and every change it recorded is unwound.
pub trait Task: Send + 'static {
    /// Value type of the model this task mutates.
    type Node: NodeData;

    /// Bookkeeping carried by the task.
    fn base(&self) -> &TaskBase;

    /// Mutable bookkeeping, written by the queue and the worker.
    fn base_mut(&mut self) -> &mut TaskBase;

    /// Do the work. All model mutation must go through `ctx`.
    ///
    /// # Errors
    /// Returns a [`TaskFailure`] carrying a nonzero code when the work fails.
    fn process(&mut self, ctx: &mut TaskContext<'_, Self::Node>) -> Result<(), TaskFailure>;

    /// Submission position, once queued.
    fn id(&self) -> Option<usize> {
        self.base().id()
    }

    /// Current lifecycle state.
    fn status(&self) -> TaskStatus {
        self.base().status()
    }
}

/// Worker-side view handed to [`Task::process`]: the shared model plus the
/// journal owned by the executing worker.
pub struct TaskContext<'run, V> {
    model: &'run Model<V>,
    journal: &'run mut Journal<V>,
    worker: usize,
}

impl<'run, V: NodeData> TaskContext<'run, V> {
    pub(crate) fn new(model: &'run Model<V>, journal: &'run mut Journal<V>, worker: usize) -> Self {
        Self {
            model,
            journal,
            worker,
        }
    }

    /// Exclusive deep copy of a node, claimed by this task's journal.
    ///
    /// # Errors
    /// Returns an error if the node is missing or claimed by another task.
    pub fn working_copy(&self, node: NodeId) -> Result<Owned<V>, JournalError> {
        self.model.working_copy(node, self.journal.id())
    }

    /// Write a working copy back through this task's journal.
    ///
    /// # Errors
    /// Returns an error if the node was removed or changed since the copy.
    pub fn store(&mut self, copy: Owned<V>) -> Result<(), JournalError> {
        self.model.store(self.journal, copy)
    }

    /// Insert a new node through this task's journal.
    ///
    /// # Errors
    /// Returns an error if the journal rejects the record.
    pub fn create(&mut self, value: V) -> Result<NodeId, JournalError> {
        self.model.create(self.journal, value)
    }

    /// Replace a node's value through this task's journal.
    ///
    /// # Errors
    /// Returns an error if the node is missing or claimed by another task.
    pub fn modify(&mut self, node: NodeId, value: V) -> Result<(), JournalError> {
        self.model.modify(self.journal, node, value)
    }

    /// Remove a node through this task's journal.
    ///
    /// # Errors
    /// Returns an error if the node is missing or claimed by another task.
    pub fn delete(&mut self, node: NodeId) -> Result<(), JournalError> {
        self.model.delete(self.journal, node)
    }

    /// Read the committed value of a node.
    pub fn get(&self, node: NodeId) -> Option<Shared<V>> {
        self.model.get(node)
    }

    /// Shared model, for reads the helpers above do not cover.
    pub fn model(&self) -> &Model<V> {
        self.model
    }

    /// Records this task has made so far.
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Identity of this task's journal, used as its claim holder.
    pub fn journal_id(&self) -> JournalId {
        self.journal.id()
    }

    /// Index of the worker thread running the task.
    pub fn worker_index(&self) -> usize {
        self.worker
    }
}
