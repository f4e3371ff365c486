use crate::error::{JournalError, Result};
use crate::journal::JournalId;
use crate::model::NodeId;
use crate::sync::IgnoreLock as _;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
struct Claim {
    holder: JournalId,
    count: usize,
}

/// Tracks which nodes are checked out as working copies, and by whom
#[derive(Debug, Default)]
pub struct ClaimTable {
    claims: Mutex<HashMap<NodeId, Claim>>,
}

impl ClaimTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim nodes for exclusive mutation by `holder`.
    ///
    /// A holder may claim a node it already holds; the node is freed once every
    /// guard for it has been dropped.
    ///
    /// # Errors
    /// Returns an error if any node is claimed by a different holder. No node is
    /// claimed in that case.
    pub fn claim(self: &Arc<Self>, holder: JournalId, nodes: &[NodeId]) -> Result<ClaimGuard> {
        {
            let mut claims = self.claims.lock_ignore_poison();
            for node in nodes {
                if let Some(claim) = claims.get(node)
                    && claim.holder != holder
                {
                    return Err(JournalError::NodeClaimed {
                        node: *node,
                        holder: claim.holder,
                    });
                }
            }

            for node in nodes {
                claims
                    .entry(*node)
                    .and_modify(|claim| claim.count += 1)
                    .or_insert(Claim { holder, count: 1 });
            }
        }

        Ok(ClaimGuard {
            table: Arc::clone(self),
            holder,
            nodes: nodes.to_vec(),
        })
    }

    /// Current holder of `node`, if any.
    pub fn holder(&self, node: NodeId) -> Option<JournalId> {
        self.claims
            .lock_ignore_poison()
            .get(&node)
            .map(|claim| claim.holder)
    }

    /// Number of nodes currently claimed.
    pub fn claimed_count(&self) -> usize {
        self.claims.lock_ignore_poison().len()
    }

    fn release(&self, holder: JournalId, nodes: &[NodeId]) {
        let mut claims = self.claims.lock_ignore_poison();
        for node in nodes {
            let drained = match claims.get_mut(node) {
                Some(claim) if claim.holder == holder => {
                    claim.count = claim.count.saturating_sub(1);
                    claim.count == 0
                }
                _ => false,
            };
            if drained {
                claims.remove(node);
            }
        }
    }
}

/// RAII guard for node claims - released on drop
#[derive(Debug)]
pub struct ClaimGuard {
    table: Arc<ClaimTable>,
    holder: JournalId,
    nodes: Vec<NodeId>,
}

impl ClaimGuard {
    /// Holder that owns this claim.
    pub fn holder(&self) -> JournalId {
        self.holder
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.table.release(self.holder, &self.nodes);
    }
}
