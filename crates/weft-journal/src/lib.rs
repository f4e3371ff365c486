//! Versioned shared model and per-context mutation journals.
//!
//! Every mutation of a [`Model`] is recorded in a [`Journal`]. Journals can be
//! spliced into one another in order, unwound to restore the model, or replayed
//! against a fresh model.

#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::assertions_on_result_states,
        clippy::missing_panics_doc,
        reason = "Allow for tests"
    )
)]

/// Node claims backing exclusive working copies.
pub mod claims;
/// Error types and result definitions.
pub mod error;
/// Journals, change records and the splice/unwind/replay protocol.
pub mod journal;
/// The shared node store.
pub mod model;
/// Shared values and exclusive working copies.
pub mod ownership;
/// Lock helpers, the re-entrant engine mutex and the shared buffer.
pub mod sync;

pub use claims::{ClaimGuard, ClaimTable};
pub use error::{JournalError, Result};
pub use journal::{Change, ChangeKind, Journal, JournalId, JournalState};
pub use model::{Model, ModelSnapshot, NodeData, NodeId};
pub use ownership::{Owned, Shared};
pub use sync::{EngineMutex, IgnoreLock, IgnoreRwLock, MutexScope, SharedBuffer};
