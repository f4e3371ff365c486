use crate::claims::ClaimTable;
use crate::error::{JournalError, Result};
use crate::journal::{Change, Journal, JournalId};
use crate::ownership::{Owned, Shared};
use crate::sync::IgnoreRwLock as _;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::mem;
use std::slice::from_ref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Bound for values stored in a [`Model`].
pub trait NodeData: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> NodeData for T {}

/// Identifier of a node in a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Build an id from its raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value of this id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

struct NodeSlot<V> {
    value: Shared<V>,
    version: u64,
}

/// Shared, versioned node store (synchronized).
///
/// Every mutation is recorded in the caller's [`Journal`] so it can later be
/// spliced into another journal, unwound, or replayed on a fresh model.
pub struct Model<V> {
    nodes: RwLock<HashMap<NodeId, NodeSlot<V>>>,
    next_id: AtomicU64,
    claims: Arc<ClaimTable>,
}

impl<V: NodeData> Model<V> {
    /// Create an empty model.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            claims: ClaimTable::new(),
        })
    }

    /// Insert a new node.
    ///
    /// # Errors
    /// Returns an error if the journal does not accept records.
    pub fn create(&self, journal: &mut Journal<V>, value: V) -> Result<NodeId> {
        journal.ensure_writable()?;

        let node = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.retain(journal, node)?;
        let value = Shared::new(value);
        self.nodes.write_ignore_poison().insert(
            node,
            NodeSlot {
                value: value.clone(),
                version: 1,
            },
        );

        journal.push(Change::Create { node, value });
        Ok(node)
    }

    /// Replace the value of an existing node.
    ///
    /// # Errors
    /// Returns an error if the journal does not accept records, the node does not
    /// exist, or another journal holds a working copy of it.
    pub fn modify(&self, journal: &mut Journal<V>, node: NodeId, value: V) -> Result<()> {
        journal.ensure_writable()?;
        self.retain(journal, node)?;
        self.replace(journal, node, Shared::new(value))
    }

    /// Remove a node.
    ///
    /// # Errors
    /// Returns an error if the journal does not accept records, the node does not
    /// exist, or another journal holds a working copy of it.
    pub fn delete(&self, journal: &mut Journal<V>, node: NodeId) -> Result<()> {
        journal.ensure_writable()?;
        self.retain(journal, node)?;

        let removed = self
            .nodes
            .write_ignore_poison()
            .remove(&node)
            .ok_or(JournalError::NodeNotFound(node))?;

        journal.push(Change::Delete {
            node,
            value: removed.value,
        });
        Ok(())
    }

    /// Take an exclusive deep copy of a node for mutation.
    ///
    /// The node stays claimed by `holder` until the copy is stored or dropped.
    /// Storing into an isolated journal hands the claim over to that journal.
    ///
    /// # Errors
    /// Returns an error if the node does not exist or is claimed by another holder.
    pub fn working_copy(&self, node: NodeId, holder: JournalId) -> Result<Owned<V>> {
        let claim = self.claims.claim(holder, from_ref(&node))?;

        let (value, version) = {
            let nodes = self.nodes.read_ignore_poison();
            let slot = nodes.get(&node).ok_or(JournalError::NodeNotFound(node))?;
            ((*slot.value).clone(), slot.version)
        };

        Ok(Owned::new(node, version, value, claim))
    }

    /// Write a working copy back, recording the change in `journal`.
    ///
    /// # Errors
    /// Returns an error if the journal does not accept records, the node was
    /// removed, or its version moved since the copy was taken.
    pub fn store(&self, journal: &mut Journal<V>, copy: Owned<V>) -> Result<()> {
        journal.ensure_writable()?;

        let (node, base_version, value, claim) = copy.into_parts();
        let found = self.version(node).ok_or(JournalError::NodeNotFound(node))?;
        if found != base_version {
            return Err(JournalError::StaleCopy {
                node,
                expected: base_version,
                found,
            });
        }

        if journal.is_isolated() && claim.holder() == journal.id() {
            journal.hold(node, claim);
        } else {
            drop(claim);
            self.retain(journal, node)?;
        }
        self.replace(journal, node, Shared::new(value))
    }

    /// Read a node (shared handle, no copy).
    pub fn get(&self, node: NodeId) -> Option<Shared<V>> {
        self.nodes
            .read_ignore_poison()
            .get(&node)
            .map(|slot| slot.value.clone())
    }

    /// Current version of a node.
    pub fn version(&self, node: NodeId) -> Option<u64> {
        self.nodes
            .read_ignore_poison()
            .get(&node)
            .map(|slot| slot.version)
    }

    /// Whether the node exists.
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.read_ignore_poison().contains_key(&node)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.read_ignore_poison().len()
    }

    /// Whether the model has no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Journal currently holding a claim on `node`.
    pub fn claim_holder(&self, node: NodeId) -> Option<JournalId> {
        self.claims.holder(node)
    }

    /// Create snapshot of all node values
    pub fn snapshot(&self) -> ModelSnapshot<V> {
        let nodes = self.nodes.read_ignore_poison();
        ModelSnapshot {
            nodes: nodes
                .iter()
                .map(|(node, slot)| (*node, (*slot.value).clone()))
                .collect(),
        }
    }

    /// Reverse-apply changes under a single write lock.
    pub(crate) fn revert<'change>(&self, changes: impl Iterator<Item = &'change Change<V>>) {
        let mut nodes = self.nodes.write_ignore_poison();
        for change in changes {
            match change {
                Change::Create { node, .. } => {
                    nodes.remove(node);
                }
                Change::Modify { node, before, .. } => {
                    Self::put(&mut nodes, *node, before.clone());
                }
                Change::Delete { node, value } => {
                    Self::put(&mut nodes, *node, value.clone());
                }
            }
        }
    }

    /// Forward-apply changes under a single write lock.
    pub(crate) fn reapply<'change>(&self, changes: impl Iterator<Item = &'change Change<V>>) {
        let mut nodes = self.nodes.write_ignore_poison();
        for change in changes {
            match change {
                Change::Create { node, value } => {
                    self.next_id.fetch_max(node.0 + 1, Ordering::Relaxed);
                    Self::put(&mut nodes, *node, value.clone());
                }
                Change::Modify { node, after, .. } => {
                    Self::put(&mut nodes, *node, after.clone());
                }
                Change::Delete { node, .. } => {
                    nodes.remove(node);
                }
            }
        }
    }

    fn put(nodes: &mut HashMap<NodeId, NodeSlot<V>>, node: NodeId, value: Shared<V>) {
        match nodes.entry(node) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.value = value;
                slot.version += 1;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(NodeSlot { value, version: 1 });
            }
        }
    }

    fn replace(&self, journal: &mut Journal<V>, node: NodeId, after: Shared<V>) -> Result<()> {
        let before = {
            let mut nodes = self.nodes.write_ignore_poison();
            let slot = nodes
                .get_mut(&node)
                .ok_or(JournalError::NodeNotFound(node))?;
            slot.version += 1;
            mem::replace(&mut slot.value, after.clone())
        };

        journal.push(Change::Modify {
            node,
            before,
            after,
        });
        Ok(())
    }

    /// Make sure no other journal holds `node`. An isolated journal keeps a
    /// claim on it from here until it is spliced or unwound.
    fn retain(&self, journal: &mut Journal<V>, node: NodeId) -> Result<()> {
        if !journal.is_isolated() {
            return self.ensure_unclaimed(node, journal.id());
        }
        if journal.holds(node) {
            return Ok(());
        }

        let claim = self.claims.claim(journal.id(), from_ref(&node))?;
        journal.hold(node, claim);
        Ok(())
    }

    fn ensure_unclaimed(&self, node: NodeId, journal: JournalId) -> Result<()> {
        match self.claims.holder(node) {
            Some(holder) if holder != journal => Err(JournalError::NodeClaimed { node, holder }),
            _ => Ok(()),
        }
    }
}

/// Immutable snapshot of model state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSnapshot<V> {
    nodes: BTreeMap<NodeId, V>,
}

impl<V> ModelSnapshot<V> {
    /// Value of `node` at snapshot time.
    #[must_use]
    pub fn get(&self, node: NodeId) -> Option<&V> {
        self.nodes.get(&node)
    }

    /// Number of nodes captured.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the snapshot holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &V)> {
        self.nodes.iter().map(|(node, value)| (*node, value))
    }
}
