/// One-call batch runner.
pub mod batch;
/// Reusable worker journals.
pub mod journals;
/// The worker pool and its barrier.
pub mod pool;
/// Streaming submission over a pool.
pub mod queue;
mod worker;

pub use batch::{run_batch, run_batch_with_config};
pub use journals::JournalPool;
pub use pool::{HookFn, PoolStats, Wave, WorkerHooks, WorkerPool};
pub use queue::TaskQueue;
