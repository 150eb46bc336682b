// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! The state map engine.
//!
//! A [`SHAMap`] is a radix-16 Merkle-Patricia trie binding 256-bit keys to
//! opaque payloads. Keys are consumed one 4-bit nibble per level, most
//! significant nibble first, so every root-to-leaf path is at most 64 inner
//! nodes deep. The root digest deterministically summarizes the whole
//! key/value multiset: two maps with equal roots hold identical contents,
//! and any divergence can be localized by descending where child digests
//! differ.
//!
//! Mutation is copy-on-write. An insert or delete walks to the affected
//! position and rebuilds the spine bottom-up: each inner node on the path is
//! shallow-cloned, the target slot is overwritten, and the digest is
//! recomputed. Untouched subtrees stay shared through [`Arc`], which is what
//! makes [`SHAMap::snapshot`] O(1) and keeps every snapshot isolated from
//! later mutation.
//!
//! A backed map holds a [`Family`] reference; inner nodes may carry children
//! by digest alone and materialize them from the store on first descent.
//! Reads never mutate the tree: a lazily fetched node is used ephemerally
//! and only mutation or sync paths attach subtrees.

pub(crate) mod compare;
pub(crate) mod iterator;
pub(crate) mod sync;

#[cfg(test)]
mod sync_test;
#[cfg(test)]
pub(crate) mod test_helper;

use crate::error::{Result, ShamapError};
use crate::hash::Hash256;
use crate::item::Item;
use crate::node::{InnerNode, LeafNode, LeafType, Node, BRANCH_FACTOR, MAX_DEPTH};
use crate::store::Family;
use crate::update_set::UpdateSet;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace};

/// What kind of leaves insertion produces by default.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MapType {
    State,
    Transaction,
}

/// Lifecycle state of a map.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MapState {
    /// Accepting mutations.
    Modifying,
    /// Frozen; every mutating call fails.
    Immutable,
    /// Being reconstructed from foreign nodes.
    Syncing,
    Invalid,
}

/// A persistent, authenticated radix-16 Merkle-Patricia map.
///
/// One instance is a single-writer, multi-reader resource: pure inspectors
/// take `&self`, mutations take `&mut self`. Separate instances (including
/// snapshots) are fully independent.
pub struct SHAMap {
    root: Arc<Node>,
    kind: MapType,
    state: MapState,
    ledger_seq: u32,
    full: bool,
    family: Option<Arc<dyn Family>>,
}

impl SHAMap {
    /// Creates an empty in-memory map.
    pub fn new(kind: MapType) -> Self {
        SHAMap {
            root: Arc::new(Node::Inner(InnerNode::new_empty())),
            kind,
            state: MapState::Modifying,
            ledger_seq: 0,
            full: true,
            family: None,
        }
    }

    /// Creates an empty map whose nodes persist in `family`.
    pub fn new_backed(kind: MapType, family: Arc<dyn Family>) -> Self {
        let mut map = Self::new(kind);
        map.family = Some(family);
        map
    }

    /// Reconstructs a map from a root digest alone. Only the root node is
    /// materialized; children load lazily on first descent.
    pub fn new_from_root(
        kind: MapType,
        digest: Hash256,
        family: Arc<dyn Family>,
    ) -> Result<Self> {
        if digest.is_zero() {
            return Ok(Self::new_backed(kind, family));
        }
        let mut map = Self::new_backed(kind, family);
        let root = map.fetch_node(&digest)?;
        root.as_inner()?;
        map.root = root;
        map.full = false;
        Ok(map)
    }

    pub fn set_family(&mut self, family: Arc<dyn Family>) {
        self.family = Some(family);
    }

    pub fn is_backed(&self) -> bool {
        self.family.is_some()
    }

    pub fn map_type(&self) -> MapType {
        self.kind
    }

    pub fn state(&self) -> MapState {
        self.state
    }

    /// Transitions `Modifying → Immutable`; mutating calls fail afterwards.
    pub fn set_immutable(&mut self) {
        self.state = MapState::Immutable;
    }

    pub fn ledger_seq(&self) -> u32 {
        self.ledger_seq
    }

    pub fn set_ledger_seq(&mut self, seq: u32) {
        self.ledger_seq = seq;
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn set_full(&mut self, full: bool) {
        self.full = full;
    }

    /// The root digest. The empty map has the zero digest.
    pub fn digest(&self) -> Hash256 {
        self.root.digest()
    }

    pub fn has(&self, key: &Hash256) -> Result<bool> {
        Ok(self.walk_to_key(key)?.is_some())
    }

    pub fn get(&self, key: &Hash256) -> Result<Option<Item>> {
        match self.walk_to_key(key)? {
            Some(leaf) => Ok(Some(leaf.as_leaf()?.item().clone())),
            None => Ok(None),
        }
    }

    /// Inserts or updates `key`, producing the leaf kind implied by the map
    /// type.
    pub fn put(&mut self, key: Hash256, data: impl Into<Bytes>) -> Result<()> {
        let kind = match self.kind {
            MapType::State => LeafType::AccountState,
            MapType::Transaction => LeafType::Transaction,
        };
        self.put_with_kind(key, data, kind)
    }

    /// Inserts or updates `key` with an explicitly selected leaf kind.
    pub fn put_with_kind(
        &mut self,
        key: Hash256,
        data: impl Into<Bytes>,
        kind: LeafType,
    ) -> Result<()> {
        self.ensure_modifiable()?;
        let item = Item::new(key, data)?;
        let root = Arc::clone(&self.root);
        self.root = self.insert_at(&root, 0, item, kind)?;
        Ok(())
    }

    /// Removes `key`. Deleting an absent key fails with
    /// [`ShamapError::ItemNotFound`].
    pub fn delete(&mut self, key: &Hash256) -> Result<()> {
        self.ensure_modifiable()?;
        let root = Arc::clone(&self.root);
        let new_root = self
            .remove_at(&root, 0, key)?
            .unwrap_or_else(|| Arc::new(Node::Inner(InnerNode::new_empty())));
        self.root = new_root;
        Ok(())
    }

    /// Applies a batch of put/remove operations in key order.
    pub fn apply(&mut self, updates: UpdateSet) -> Result<()> {
        for (key, value) in updates {
            match value {
                Some(data) => self.put(key, data)?,
                None => self.delete(&key)?,
            }
        }
        Ok(())
    }

    /// Produces an independent map sharing all unmodified subtrees with this
    /// one. Mutating either side never affects the other.
    pub fn snapshot(&self, mutable: bool) -> SHAMap {
        SHAMap {
            root: Arc::clone(&self.root),
            kind: self.kind,
            state: if mutable { MapState::Modifying } else { MapState::Immutable },
            ledger_seq: self.ledger_seq,
            full: self.full,
            family: self.family.clone(),
        }
    }

    /// Collects every dirty node in post-order as `(digest, record)` pairs,
    /// clearing dirty flags. On a backed map the batch is also written
    /// through the family; with `release_children` the loaded subtrees of
    /// flushed inner nodes are dropped, bounding resident memory.
    ///
    /// A second flush with no intervening mutation produces an empty batch.
    pub fn flush_dirty(&mut self, release_children: bool) -> Result<Vec<(Hash256, Vec<u8>)>> {
        if self.state == MapState::Invalid {
            return Err(ShamapError::InvalidState(self.state));
        }
        let release = release_children && self.family.is_some();
        let mut batch = Vec::new();
        Self::flush_node(&mut self.root, release, &mut batch);
        if let Some(family) = &self.family {
            if !batch.is_empty() {
                family.store_batch(&batch).map_err(ShamapError::store)?;
            }
        }
        debug!(nodes = batch.len(), "flushed dirty nodes");
        Ok(batch)
    }

    /// Validates the structural invariants of every loaded node.
    pub fn invariants(&self) -> Result<()> {
        self.root.as_inner()?;
        self.check_node(&self.root, 0)
    }

    // ---- internal engine ----------------------------------------------

    pub(crate) fn root(&self) -> &Arc<Node> {
        &self.root
    }

    pub(crate) fn root_mut(&mut self) -> &mut Arc<Node> {
        &mut self.root
    }

    pub(crate) fn set_root(&mut self, root: Arc<Node>) {
        self.root = root;
    }

    pub(crate) fn set_state(&mut self, state: MapState) {
        self.state = state;
    }

    fn ensure_modifiable(&self) -> Result<()> {
        match self.state {
            MapState::Modifying => Ok(()),
            MapState::Immutable => Err(ShamapError::Immutable),
            MapState::Syncing | MapState::Invalid => Err(ShamapError::InvalidState(self.state)),
        }
    }

    /// Resolves the child at `branch`, materializing a lazy child from the
    /// store when necessary. Returns `None` for a vacant slot. The fetched
    /// node is not attached; reads stay free of mutation.
    pub(crate) fn descend(&self, inner: &InnerNode, branch: usize) -> Result<Option<Arc<Node>>> {
        let Some(child) = inner.child(branch) else {
            return Ok(None);
        };
        if let Some(node) = child.node() {
            return Ok(Some(Arc::clone(node)));
        }
        Ok(Some(self.fetch_node(&child.digest())?))
    }

    /// Like [`descend`](Self::descend) for slots known to be occupied.
    pub(crate) fn descend_into(&self, inner: &InnerNode, branch: usize) -> Result<Arc<Node>> {
        self.descend(inner, branch)?
            .ok_or_else(|| ShamapError::NodeNotFound(inner.child_digest(branch)))
    }

    /// Fetches and verifies a node record from the family. A digest mismatch
    /// is fatal to the operation and leaves the in-memory tree untouched.
    fn fetch_node(&self, digest: &Hash256) -> Result<Arc<Node>> {
        match self.try_fetch(digest)? {
            Some(node) => Ok(node),
            None => {
                debug!(
                    "missing node {}: {:#?}",
                    digest,
                    backtrace::Backtrace::new()
                );
                Err(ShamapError::NodeNotFound(*digest))
            }
        }
    }

    /// Fetches a node record, treating absence as `None`.
    pub(crate) fn try_fetch(&self, digest: &Hash256) -> Result<Option<Arc<Node>>> {
        let Some(family) = &self.family else {
            return Ok(None);
        };
        let Some(bytes) = family.fetch(digest).map_err(ShamapError::store)? else {
            return Ok(None);
        };
        let node = Node::deserialize(&bytes)?;
        if node.digest() != *digest {
            return Err(ShamapError::HashMismatch {
                expected: *digest,
                actual: node.digest(),
            });
        }
        trace!(%digest, "materialized node from store");
        Ok(Some(Arc::new(node)))
    }

    /// Walks from the root toward `key`; returns the leaf when one with a
    /// matching key is reached, `None` on an empty slot or foreign leaf.
    fn walk_to_key(&self, key: &Hash256) -> Result<Option<Arc<Node>>> {
        let mut node = Arc::clone(&self.root);
        let mut depth = 0;
        loop {
            let next = match node.as_ref() {
                Node::Leaf(_) => return Err(ShamapError::InvalidNodeType),
                Node::Inner(inner) => self.descend(inner, key.nibble(depth) as usize)?,
            };
            match next {
                None => return Ok(None),
                Some(child) => match child.as_ref() {
                    Node::Leaf(leaf) => {
                        return Ok(if leaf.item().key() == key { Some(Arc::clone(&child)) } else { None });
                    }
                    Node::Inner(_) => {
                        depth += 1;
                        if depth >= MAX_DEPTH {
                            return Err(ShamapError::MaxDepthReached);
                        }
                        node = child;
                    }
                },
            }
        }
    }

    /// Recursive insertion below the inner node `node` at `depth`. Returns
    /// the replacement subtree; untouched nodes are returned as-is so
    /// ancestors can short-circuit when nothing changed.
    fn insert_at(
        &self,
        node: &Arc<Node>,
        depth: usize,
        item: Item,
        kind: LeafType,
    ) -> Result<Arc<Node>> {
        let inner = node.as_inner()?;
        let branch = item.key().nibble(depth) as usize;
        let new_child = match self.descend(inner, branch)? {
            None => Arc::new(Node::Leaf(LeafNode::new(item, kind))),
            Some(child) => match child.as_ref() {
                Node::Inner(_) => {
                    if depth + 1 >= MAX_DEPTH {
                        return Err(ShamapError::MaxDepthReached);
                    }
                    self.insert_at(&child, depth + 1, item, kind)?
                }
                Node::Leaf(existing) => {
                    if existing.item().key() == item.key() {
                        let leaf = LeafNode::new(item, kind);
                        if leaf.digest() == existing.digest() {
                            // same content, nothing to rebuild
                            return Ok(Arc::clone(node));
                        }
                        Arc::new(Node::Leaf(leaf))
                    } else {
                        let existing_key = *existing.item().key();
                        self.split_leaf(Arc::clone(&child), existing_key, depth + 1, item, kind)?
                    }
                }
            },
        };
        if inner.child_digest(branch) == new_child.digest() {
            return Ok(Arc::clone(node));
        }
        let mut updated = inner.clone();
        updated.set_child(branch, Some(new_child));
        Ok(Arc::new(Node::Inner(updated)))
    }

    /// Two keys landed on the same slot: build singleton inner nodes from
    /// `depth` down to the first divergent nibble and place both leaves
    /// there.
    fn split_leaf(
        &self,
        existing: Arc<Node>,
        existing_key: Hash256,
        depth: usize,
        item: Item,
        kind: LeafType,
    ) -> Result<Arc<Node>> {
        let key = *item.key();
        let mut fork = depth;
        while fork < MAX_DEPTH && key.nibble(fork) == existing_key.nibble(fork) {
            fork += 1;
        }
        if fork >= MAX_DEPTH {
            return Err(ShamapError::MaxDepthReached);
        }
        let mut bottom = InnerNode::new_empty();
        bottom.set_child(
            key.nibble(fork) as usize,
            Some(Arc::new(Node::Leaf(LeafNode::new(item, kind)))),
        );
        bottom.set_child(existing_key.nibble(fork) as usize, Some(existing));
        let mut node = Arc::new(Node::Inner(bottom));
        let mut level = fork;
        while level > depth {
            level -= 1;
            let mut wrap = InnerNode::new_empty();
            wrap.set_child(key.nibble(level) as usize, Some(node));
            node = Arc::new(Node::Inner(wrap));
        }
        Ok(node)
    }

    /// Recursive removal below `node` at `depth`. `None` means the subtree
    /// became empty. Non-root inner nodes left with a single descendant leaf
    /// collapse to that leaf.
    fn remove_at(
        &self,
        node: &Arc<Node>,
        depth: usize,
        key: &Hash256,
    ) -> Result<Option<Arc<Node>>> {
        let inner = node.as_inner()?;
        let branch = key.nibble(depth) as usize;
        let child = self
            .descend(inner, branch)?
            .ok_or(ShamapError::ItemNotFound)?;
        let new_child = match child.as_ref() {
            Node::Leaf(leaf) => {
                if leaf.item().key() != key {
                    return Err(ShamapError::ItemNotFound);
                }
                None
            }
            Node::Inner(_) => {
                if depth + 1 >= MAX_DEPTH {
                    return Err(ShamapError::MaxDepthReached);
                }
                self.remove_at(&child, depth + 1, key)?
            }
        };
        let mut updated = inner.clone();
        updated.set_child(branch, new_child);
        if depth == 0 {
            // the root is always retained as an inner node
            return Ok(Some(Arc::new(Node::Inner(updated))));
        }
        match updated.branch_count() {
            0 => Ok(None),
            1 => match self.only_below(&updated)? {
                Some(leaf) => Ok(Some(leaf)),
                None => Ok(Some(Arc::new(Node::Inner(updated)))),
            },
            _ => Ok(Some(Arc::new(Node::Inner(updated)))),
        }
    }

    /// If exactly one leaf lives below `inner`, returns it.
    fn only_below(&self, inner: &InnerNode) -> Result<Option<Arc<Node>>> {
        let Some(branch) = (0..BRANCH_FACTOR).find(|&b| inner.child(b).is_some()) else {
            return Ok(None);
        };
        let mut cur = match self.descend(inner, branch)? {
            Some(node) => node,
            None => return Ok(None),
        };
        loop {
            let next = match cur.as_ref() {
                Node::Leaf(_) => break,
                Node::Inner(below) => {
                    if below.branch_count() != 1 {
                        return Ok(None);
                    }
                    let Some(only) = (0..BRANCH_FACTOR).find(|&b| below.child(b).is_some())
                    else {
                        return Ok(None);
                    };
                    match self.descend(below, only)? {
                        Some(node) => node,
                        None => return Ok(None),
                    }
                }
            };
            cur = next;
        }
        Ok(Some(cur))
    }

    /// Post-order walk over the dirty region. Children are emitted before
    /// their parent, so a store replaying the batch in order always has
    /// every referenced child.
    fn flush_node(node: &mut Arc<Node>, release: bool, batch: &mut Vec<(Hash256, Vec<u8>)>) {
        if !node.is_dirty() {
            return;
        }
        match Arc::make_mut(node) {
            Node::Inner(inner) => {
                for branch in 0..BRANCH_FACTOR {
                    if let Some(child) = inner.child_mut(branch) {
                        if let Some(child_node) = child.node_mut() {
                            Self::flush_node(child_node, release, batch);
                        }
                        if release {
                            child.release();
                        }
                    }
                }
                if !inner.is_empty() {
                    batch.push((inner.digest(), inner.serialize()));
                }
            }
            Node::Leaf(leaf) => {
                batch.push((leaf.digest(), leaf.serialize()));
            }
        }
        Arc::make_mut(node).clear_dirty();
    }

    fn check_node(&self, node: &Arc<Node>, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(ShamapError::MaxDepthReached);
        }
        match node.as_ref() {
            Node::Inner(inner) => {
                if depth > 0 && inner.branch_count() == 0 {
                    return Err(ShamapError::InvalidNodeType);
                }
                let recomputed = inner.computed_digest();
                if recomputed != inner.digest() {
                    return Err(ShamapError::HashMismatch {
                        expected: inner.digest(),
                        actual: recomputed,
                    });
                }
                for branch in 0..BRANCH_FACTOR {
                    if let Some(child) = inner.child(branch) {
                        if child.digest().is_zero() {
                            return Err(ShamapError::InvalidNodeType);
                        }
                        if let Some(loaded) = child.node() {
                            if loaded.digest() != child.digest() {
                                return Err(ShamapError::HashMismatch {
                                    expected: child.digest(),
                                    actual: loaded.digest(),
                                });
                            }
                            self.check_node(loaded, depth + 1)?;
                        }
                    }
                }
                Ok(())
            }
            Node::Leaf(leaf) => {
                if leaf.item().key().is_zero() || leaf.item().data().is_empty() {
                    return Err(ShamapError::NilItem);
                }
                let recomputed = LeafNode::compute_digest(leaf.item(), leaf.kind());
                if recomputed != leaf.digest() {
                    return Err(ShamapError::HashMismatch {
                        expected: leaf.digest(),
                        actual: recomputed,
                    });
                }
                Ok(())
            }
        }
    }
}
