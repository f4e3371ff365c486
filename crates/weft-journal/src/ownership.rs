//! Ownership types for model data: shared read-mostly values and exclusive working copies.

use crate::claims::ClaimGuard;
use crate::model::NodeId;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Reference-counted node value shared between the model, journals and readers.
///
/// Mutation goes through [`Shared::make_mut`], which clones the value when other
/// handles still point at it.
pub struct Shared<T>(Arc<T>);

impl<T> Shared<T> {
    /// Wrap a value.
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Whether both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles to this value.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Mutable access, cloning first if the value is shared.
    pub fn make_mut(&mut self) -> &mut T
    where
        T: Clone,
    {
        Arc::make_mut(&mut self.0)
    }

    /// Take the value, cloning it if other handles remain.
    pub fn into_owned(self) -> T
    where
        T: Clone,
    {
        Arc::unwrap_or_clone(self.0)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl<T: PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Exclusive working copy of one model node.
///
/// Holds a claim on the node until dropped, so no other journal can take a
/// working copy of the same node in the meantime. Storing the copy into an
/// isolated journal moves the claim to that journal.
pub struct Owned<T> {
    node: NodeId,
    base_version: u64,
    value: T,
    claim: ClaimGuard,
}

impl<T> Owned<T> {
    pub(crate) fn new(node: NodeId, base_version: u64, value: T, claim: ClaimGuard) -> Self {
        Self {
            node,
            base_version,
            value,
            claim,
        }
    }

    /// Node this copy was taken from.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Node version at the time the copy was taken.
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    pub(crate) fn into_parts(self) -> (NodeId, u64, T, ClaimGuard) {
        (self.node, self.base_version, self.value, self.claim)
    }
}

impl<T> Deref for Owned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Owned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Owned<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Owned")
            .field("node", &self.node)
            .field("base_version", &self.base_version)
            .field("holder", &self.claim.holder())
            .field("value", &self.value)
            .finish()
    }
}
