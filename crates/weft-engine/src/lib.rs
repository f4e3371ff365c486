//! Fixed-size worker pool that runs tasks against a shared model, giving each
//! task its own journal and splicing successful journals back in submission
//! order.

#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::assertions_on_result_states,
        clippy::missing_panics_doc,
        reason = "Allow for tests"
    )
)]

/// Engine configuration and its file/environment sources.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Worker pool, task queue and batch runner.
pub mod executor;
/// The task contract.
pub mod task;

pub use config::{EngineConfig, PoolConfig, QueueConfig};
pub use error::{EngineError, Result};
pub use executor::{
    HookFn, JournalPool, PoolStats, TaskQueue, Wave, WorkerHooks, WorkerPool, run_batch,
    run_batch_with_config,
};
pub use task::{
    JOURNAL_FAILURE_CODE, Task, TaskBase, TaskContext, TaskFailure, TaskStatus,
    UNEXPECTED_FAILURE_CODE,
};
