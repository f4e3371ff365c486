use std::io;
use std::result::Result as StdResult;
use thiserror::Error;
use weft_journal::JournalError;

/// Result type for engine operations.
pub type Result<T> = StdResult<T, EngineError>;

/// Errors raised by the worker pool, task queue and configuration.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A model or journal operation failed.
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// Reading or writing the configuration file failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// [`crate::WorkerPool::initialize`] called twice.
    #[error("Worker pool is already initialized")]
    AlreadyInitialized,

    /// The pool has not been initialized, or was terminated.
    #[error("Worker pool is not initialized")]
    NotInitialized,

    /// Zero workers requested.
    #[error("Worker count must be at least 1")]
    InvalidWorkerCount,

    /// Dispatched tasks have not been collected by a barrier yet.
    #[error("{0} tasks are still outstanding")]
    TasksOutstanding(usize),

    /// The pool was driven from a thread other than its submitter.
    #[error("Worker pool used from a thread other than the one that initialized it")]
    WrongThread,

    /// The OS refused to start a worker thread.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),

    /// Workers exited while tasks were still handed to them or waiting.
    #[error("A worker thread exited unexpectedly")]
    WorkerLost,

    /// At least one task of a wave failed.
    #[error("{failed} tasks failed (first failure code {first_code})")]
    TasksFailed {
        /// Number of failed tasks.
        failed: usize,
        /// Code of the earliest-submitted failed task.
        first_code: i32,
    },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Errors caused by misuse of the pool lifecycle or bad settings.
    ///
    /// These are reported synchronously and leave the pool usable.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInitialized
                | Self::NotInitialized
                | Self::InvalidWorkerCount
                | Self::TasksOutstanding(_)
                | Self::WrongThread
                | Self::Spawn(_)
                | Self::Config(_)
        )
    }

    /// First task failure code carried by an aggregate failure.
    #[must_use]
    pub fn failure_code(&self) -> Option<i32> {
        match self {
            Self::TasksFailed { first_code, .. } => Some(*first_code),
            _ => None,
        }
    }
}
