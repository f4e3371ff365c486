use crate::journal::JournalId;
use crate::model::NodeId;
use std::result::Result as StdResult;
use thiserror::Error;

/// Result type for model and journal operations.
pub type Result<T> = StdResult<T, JournalError>;

/// Errors raised by the model, its journals and the lock primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JournalError {
    /// The journal was committed and no longer accepts records.
    #[error("Journal {0} is committed and only accepts replay")]
    Sealed(JournalId),

    /// The journal is bound to a different thread.
    #[error("Journal {0} is owned by another thread")]
    ForeignThread(JournalId),

    /// No node with this id exists.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Another journal holds a claim on the node.
    #[error("Node {node} is claimed by journal {holder}")]
    NodeClaimed {
        /// Node that was requested.
        node: NodeId,
        /// Journal currently holding it.
        holder: JournalId,
    },

    /// The node changed after the working copy was taken.
    #[error("Working copy of node {node} is stale (copied at version {expected}, now {found})")]
    StaleCopy {
        /// Node the copy was taken from.
        node: NodeId,
        /// Version when the copy was taken.
        expected: u64,
        /// Version found at store time.
        found: u64,
    },

    /// [`crate::EngineMutex::release`] without a matching acquire.
    #[error("Mutex released without a matching acquire on this thread")]
    UnbalancedRelease,

    /// A source journal was already committed.
    #[error("Journal {0} is not open")]
    NotOpen(JournalId),
}
