//! Append-only, reversible mutation logs.
//!
//! A [`Journal`] belongs to one execution context at a time. Worker journals are
//! either spliced into the submitter's journal (success) or unwound against the
//! model (failure), then reset for reuse.
//!
//! An isolated journal also holds a claim on every node it touches, so no other
//! journal can mutate those nodes until its records are spliced or unwound.

use crate::claims::ClaimGuard;
use crate::error::{JournalError, Result};
use crate::model::{Model, NodeData, NodeId};
use crate::ownership::Shared;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::thread::{self, ThreadId};
use tracing::trace;
use uuid::Uuid;

/// Unique identifier of a journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JournalId(Uuid);

impl JournalId {
    /// Fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JournalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JournalId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// One recorded mutation.
#[derive(Debug, Clone)]
pub enum Change<V> {
    /// A node was inserted.
    Create {
        /// New node.
        node: NodeId,
        /// Its initial value.
        value: Shared<V>,
    },
    /// A node's value was replaced.
    Modify {
        /// Changed node.
        node: NodeId,
        /// Value before the change.
        before: Shared<V>,
        /// Value after the change.
        after: Shared<V>,
    },
    /// A node was removed.
    Delete {
        /// Removed node.
        node: NodeId,
        /// Value it held when removed.
        value: Shared<V>,
    },
}

/// Kind of a [`Change`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// See [`Change::Create`].
    Create,
    /// See [`Change::Modify`].
    Modify,
    /// See [`Change::Delete`].
    Delete,
}

impl<V> Change<V> {
    /// Node affected by this change.
    pub fn node(&self) -> NodeId {
        match self {
            Self::Create { node, .. } | Self::Modify { node, .. } | Self::Delete { node, .. } => {
                *node
            }
        }
    }

    /// Kind of this change.
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Create { .. } => ChangeKind::Create,
            Self::Modify { .. } => ChangeKind::Modify,
            Self::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// Value of the node after this change, if it still exists.
    pub fn resulting_value(&self) -> Option<&V> {
        match self {
            Self::Create { value, .. } => Some(&**value),
            Self::Modify { after, .. } => Some(&**after),
            Self::Delete { .. } => None,
        }
    }
}

/// Whether a journal still accepts records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalState {
    /// Accepts records and splices.
    Open,
    /// Sealed. Only replay is allowed.
    Committed,
}

/// Ordered log of changes made by one execution context
pub struct Journal<V> {
    id: JournalId,
    owner: Option<ThreadId>,
    parent: Option<JournalId>,
    state: JournalState,
    records: Vec<Change<V>>,
    isolated: bool,
    claims: HashMap<NodeId, ClaimGuard>,
}

impl<V: NodeData> Journal<V> {
    /// Create an open journal owned by the calling thread.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: JournalId::new(),
            owner: Some(thread::current().id()),
            parent: None,
            state: JournalState::Open,
            records: Vec::new(),
            isolated: false,
            claims: HashMap::new(),
        }
    }

    /// Create an isolated journal owned by the calling thread.
    ///
    /// Every node it creates, modifies, stores or deletes stays claimed by it
    /// until the journal is spliced, unwound or reset.
    #[must_use]
    pub fn isolated() -> Self {
        Self {
            isolated: true,
            ..Self::new()
        }
    }

    /// Whether this journal keeps the nodes it touches claimed.
    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    /// Number of claims currently held by this journal.
    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    /// Identity of this journal.
    pub fn id(&self) -> JournalId {
        self.id
    }

    /// Thread allowed to record into this journal (`None` = unbound).
    pub fn owner_thread(&self) -> Option<ThreadId> {
        self.owner
    }

    /// Journal this one was last spliced into.
    pub fn parent(&self) -> Option<JournalId> {
        self.parent
    }

    /// Whether the journal is open or committed.
    pub fn state(&self) -> JournalState {
        self.state
    }

    /// Whether the journal still accepts records.
    pub fn is_open(&self) -> bool {
        self.state == JournalState::Open
    }

    /// Number of recorded changes.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Recorded changes in the order they were made.
    pub fn records(&self) -> &[Change<V>] {
        &self.records
    }

    /// Make the calling thread the only one allowed to record.
    pub fn bind_to_current_thread(&mut self) {
        self.owner = Some(thread::current().id());
    }

    /// Append a change that has already been applied to the model.
    ///
    /// # Errors
    /// Returns an error if the journal is committed or owned by another thread.
    pub fn record(&mut self, change: Change<V>) -> Result<()> {
        self.ensure_writable()?;
        self.push(change);
        Ok(())
    }

    /// Seal the journal; it becomes replay-only history.
    pub fn commit(&mut self) {
        self.state = JournalState::Committed;
    }

    /// Move every record of `source` to the end of this journal, preserving order.
    ///
    /// `source` is left empty with its parent set to this journal and its claims
    /// released. Returns the number of records moved.
    ///
    /// # Errors
    /// Returns an error if this journal does not accept records or `source` is
    /// already committed.
    pub fn splice_from(&mut self, source: &mut Self) -> Result<usize> {
        self.ensure_writable()?;
        if !source.is_open() {
            return Err(JournalError::NotOpen(source.id));
        }

        let moved = source.records.len();
        self.records.append(&mut source.records);
        source.claims.clear();
        source.parent = Some(self.id);
        trace!(into = %self.id, source = %source.id, moved, "spliced journal");
        Ok(moved)
    }

    /// Reverse every record against `model`, newest first, and clear the journal.
    ///
    /// Claims are released once the model is restored. Returns the number of
    /// records undone.
    ///
    /// # Errors
    /// Returns an error if the journal is committed or owned by another thread.
    pub fn unwind(&mut self, model: &Model<V>) -> Result<usize> {
        self.ensure_writable()?;
        let undone = self.records.len();
        model.revert(self.records.iter().rev());
        self.records.clear();
        self.claims.clear();
        trace!(journal = %self.id, undone, "unwound journal");
        Ok(undone)
    }

    /// Apply every record to `model` in order. Returns the number applied.
    pub fn replay(&self, model: &Model<V>) -> usize {
        model.reapply(self.records.iter());
        self.records.len()
    }

    /// Clear records and claims, reopen and unbind, ready for reuse.
    pub fn reset(&mut self) {
        self.records.clear();
        self.claims.clear();
        self.owner = None;
        self.parent = None;
        self.state = JournalState::Open;
    }

    /// Check that the calling thread may record into this journal.
    ///
    /// # Errors
    /// Returns an error if the journal is committed or owned by another thread.
    pub fn ensure_writable(&self) -> Result<()> {
        if self.state == JournalState::Committed {
            return Err(JournalError::Sealed(self.id));
        }
        match self.owner {
            Some(owner) if owner != thread::current().id() => {
                Err(JournalError::ForeignThread(self.id))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn push(&mut self, change: Change<V>) {
        self.records.push(change);
    }

    /// Keep `claim` until this journal is spliced, unwound or reset. A second
    /// guard for a node already held is released immediately.
    pub(crate) fn hold(&mut self, node: NodeId, claim: ClaimGuard) {
        self.claims.entry(node).or_insert(claim);
    }

    pub(crate) fn holds(&self, node: NodeId) -> bool {
        self.claims.contains_key(&node)
    }
}

impl<V: NodeData> Default for Journal<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for Journal<V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Journal")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("parent", &self.parent)
            .field("state", &self.state)
            .field("records", &self.records.len())
            .field("isolated", &self.isolated)
            .field("claims", &self.claims.len())
            .finish()
    }
}
