// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! Reconstruction of a map from untrusted peers.
//!
//! A syncing map grows top-down: the root arrives first, then any node whose
//! digest some loaded inner node references. Every foreign record is
//! verified against its expected digest before it touches the tree, so a
//! completed sync is authenticated by construction. Accepted nodes are
//! attached dirty so the first flush after [`SHAMap::finish_sync`] persists
//! the reconstructed tree.

use crate::error::{Result, ShamapError};
use crate::hash::Hash256;
use crate::map::{MapState, SHAMap};
use crate::node::{Node, BRANCH_FACTOR, MAX_DEPTH};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Wire address of a tree position used by the sync protocol: the first
/// `depth` nibbles of the path, zero-padded to 32 bytes, plus the depth.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NodeID {
    path: Hash256,
    depth: u8,
}

impl NodeID {
    pub const WIRE_LEN: usize = Hash256::LEN + 1;

    pub fn root() -> Self {
        NodeID { path: Hash256::ZERO, depth: 0 }
    }

    pub fn path(&self) -> &Hash256 {
        &self.path
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// The address one level down, through slot `branch`.
    pub fn child(&self, branch: u8) -> Self {
        debug_assert!(branch < BRANCH_FACTOR as u8);
        debug_assert!((self.depth as usize) < MAX_DEPTH);
        let mut raw = *self.path.as_bytes();
        let index = self.depth as usize;
        if index % 2 == 0 {
            raw[index / 2] = (raw[index / 2] & 0x0F) | (branch << 4);
        } else {
            raw[index / 2] = (raw[index / 2] & 0xF0) | branch;
        }
        NodeID { path: Hash256::new(raw), depth: self.depth + 1 }
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[..Hash256::LEN].copy_from_slice(self.path.as_bytes());
        out[Hash256::LEN] = self.depth;
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != Self::WIRE_LEN {
            return Err(ShamapError::Deserialize(format!(
                "node id must be {} bytes, got {}",
                Self::WIRE_LEN,
                data.len()
            )));
        }
        let depth = data[Hash256::LEN];
        if depth as usize > MAX_DEPTH {
            return Err(ShamapError::Deserialize(format!("node id depth {depth} out of range")));
        }
        Ok(NodeID { path: Hash256::from_slice(&data[..Hash256::LEN])?, depth })
    }
}

impl SHAMap {
    /// Enters the `Syncing` state and clears the fully-loaded flag.
    pub fn start_sync(&mut self) -> Result<()> {
        match self.state() {
            MapState::Modifying => {
                self.set_state(MapState::Syncing);
                self.set_full(false);
                Ok(())
            }
            MapState::Immutable => Err(ShamapError::Immutable),
            state => Err(ShamapError::InvalidState(state)),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.state() == MapState::Syncing
    }

    /// Whether the map has been fully assembled.
    pub fn is_complete(&self) -> bool {
        self.is_full()
    }

    /// Installs the root of the tree being synced. Rejects a record whose
    /// recomputed digest differs from `expected`, and refuses to replace a
    /// non-empty root.
    pub fn add_root_node(&mut self, expected: Hash256, bytes: &[u8]) -> Result<()> {
        if !self.is_syncing() {
            return Err(ShamapError::SyncNotInProgress);
        }
        if self.root().as_inner()?.branch_count() > 0 {
            return Err(ShamapError::RootAlreadySet);
        }
        let mut node = Node::deserialize(bytes)?;
        node.as_inner()?;
        if node.digest() != expected {
            return Err(ShamapError::HashMismatch { expected, actual: node.digest() });
        }
        node.mark_dirty();
        self.set_root(Arc::new(node));
        debug!(digest = %expected, "installed sync root");
        Ok(())
    }

    /// Accepts a node some loaded inner node is waiting for: verifies the
    /// digest, finds the inner slot whose stored digest equals `expected`
    /// and has no subtree yet, and attaches it there. Fails with
    /// [`ShamapError::ItemNotFound`] when nothing references the digest.
    pub fn add_known_node(&mut self, expected: Hash256, bytes: &[u8]) -> Result<()> {
        if !self.is_syncing() {
            return Err(ShamapError::SyncNotInProgress);
        }
        let mut node = Node::deserialize(bytes)?;
        if node.digest() != expected {
            return Err(ShamapError::HashMismatch { expected, actual: node.digest() });
        }
        let Some(path) = self.find_vacant_slot(&expected) else {
            return Err(ShamapError::ItemNotFound);
        };
        node.mark_dirty();
        Self::attach_at(self.root_mut(), &path, Arc::new(node))?;
        debug!(digest = %expected, depth = path.len(), "attached sync node");
        Ok(())
    }

    /// Reports up to `max` positions whose stored digest is set but whose
    /// subtree cannot be resolved from memory or the store (`0` means
    /// unlimited). `have` lets the caller skip digests it already possesses.
    pub fn missing_nodes<F>(&self, max: usize, mut have: F) -> Result<Vec<(NodeID, Hash256)>>
    where
        F: FnMut(&Hash256) -> bool,
    {
        let mut missing = Vec::new();
        let mut queue: VecDeque<(Arc<Node>, NodeID)> = VecDeque::new();
        queue.push_back((Arc::clone(self.root()), NodeID::root()));
        while let Some((node, id)) = queue.pop_front() {
            let Node::Inner(inner) = node.as_ref() else {
                continue;
            };
            for branch in 0..BRANCH_FACTOR {
                let Some(child) = inner.child(branch) else {
                    continue;
                };
                let child_id = id.child(branch as u8);
                match child.node() {
                    Some(loaded) => queue.push_back((Arc::clone(loaded), child_id)),
                    None => match self.try_fetch(&child.digest())? {
                        Some(fetched) => queue.push_back((fetched, child_id)),
                        None => {
                            if !have(&child.digest()) {
                                missing.push((child_id, child.digest()));
                                if max > 0 && missing.len() >= max {
                                    return Ok(missing);
                                }
                            }
                        }
                    },
                }
            }
        }
        Ok(missing)
    }

    /// Leaves the `Syncing` state. Fails with the first still-missing digest
    /// if the tree is incomplete.
    pub fn finish_sync(&mut self) -> Result<()> {
        if !self.is_syncing() {
            return Err(ShamapError::SyncNotInProgress);
        }
        let missing = self.missing_nodes(1, |_| false)?;
        if let Some((_, digest)) = missing.first() {
            return Err(ShamapError::NodeNotFound(*digest));
        }
        self.set_state(MapState::Modifying);
        self.set_full(true);
        Ok(())
    }

    /// Counts loaded versus referenced subtrees, the root included on both
    /// sides. Only in-memory attachment is considered.
    pub fn progress(&self) -> (usize, usize) {
        let mut present = 1;
        let mut total = 1;
        let mut queue: VecDeque<Arc<Node>> = VecDeque::new();
        queue.push_back(Arc::clone(self.root()));
        while let Some(node) = queue.pop_front() {
            let Node::Inner(inner) = node.as_ref() else {
                continue;
            };
            for branch in 0..BRANCH_FACTOR {
                if let Some(child) = inner.child(branch) {
                    total += 1;
                    if let Some(loaded) = child.node() {
                        present += 1;
                        queue.push_back(Arc::clone(loaded));
                    }
                }
            }
        }
        (present, total)
    }

    /// Breadth-first search over loaded nodes for an occupied slot holding
    /// `digest` with no subtree attached. Returns the branch path to it.
    fn find_vacant_slot(&self, digest: &Hash256) -> Option<Vec<usize>> {
        let mut queue: VecDeque<(Arc<Node>, Vec<usize>)> = VecDeque::new();
        queue.push_back((Arc::clone(self.root()), Vec::new()));
        while let Some((node, path)) = queue.pop_front() {
            let Node::Inner(inner) = node.as_ref() else {
                continue;
            };
            for branch in 0..BRANCH_FACTOR {
                let Some(child) = inner.child(branch) else {
                    continue;
                };
                match child.node() {
                    None => {
                        if child.digest() == *digest {
                            let mut found = path.clone();
                            found.push(branch);
                            return Some(found);
                        }
                    }
                    Some(loaded) => {
                        let mut next = path.clone();
                        next.push(branch);
                        queue.push_back((Arc::clone(loaded), next));
                    }
                }
            }
        }
        None
    }

    /// Descends `path` from the root and attaches `node` at its last
    /// branch. Digests stay untouched (the slot already stores the right
    /// one), but every node on the path is re-marked dirty: a flush may
    /// already have cleared it, and the post-order flush walk only descends
    /// through dirty nodes, so a clean ancestor would hide the new subtree
    /// from the next flush.
    fn attach_at(root: &mut Arc<Node>, path: &[usize], node: Arc<Node>) -> Result<()> {
        let Some((&last, prefix)) = path.split_last() else {
            return Err(ShamapError::ItemNotFound);
        };
        let mut cur = root;
        for &branch in prefix {
            let ancestor = Arc::make_mut(cur);
            ancestor.mark_dirty();
            let inner = match ancestor {
                Node::Inner(inner) => inner,
                Node::Leaf(_) => return Err(ShamapError::InvalidNodeType),
            };
            cur = inner
                .child_node_mut(branch)
                .ok_or(ShamapError::ItemNotFound)?;
        }
        let parent = Arc::make_mut(cur);
        parent.mark_dirty();
        match parent {
            Node::Inner(inner) => inner.attach_child(last, node),
            Node::Leaf(_) => Err(ShamapError::InvalidNodeType),
        }
    }
}
