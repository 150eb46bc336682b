// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! Node model of the state map.
//!
//! The tree is built from two node kinds: [`InnerNode`], a fixed 16-slot
//! hexary branch, and [`LeafNode`], which owns exactly one [`Item`]. Each
//! slot of an inner node independently holds either nothing or a reference
//! consisting of the child's digest and, optionally, the loaded child
//! subtree. A slot whose digest is set but whose subtree is absent is a lazy
//! child: backed maps materialize it from the store on first descent, and
//! syncing maps fill it as foreign nodes arrive.
//!
//! Digest recomputation is the only place where the domain-prefix discipline
//! is applied; every other part of the crate consumes digests as opaque
//! 32-byte values. An inner node hashes the *stored* slot digests, so it can
//! be rehashed without materializing any children.
//!
//! The prefix format produced by [`Node::serialize`] is byte-identical to
//! the digest preimage, which gives every stored record the property
//! `digest == sha512_half(record)`.

#[cfg(test)]
mod node_test;

use crate::error::{Result, ShamapError};
use crate::hash::{sha512_half, Hash256, HashPrefix};
use crate::item::Item;
use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use num_traits::FromPrimitive;
use std::io::Cursor;
use std::sync::Arc;

/// Number of child slots of an inner node.
pub(crate) const BRANCH_FACTOR: usize = 16;

/// Maximum number of inner nodes on any root-to-leaf path; one per key
/// nibble.
pub(crate) const MAX_DEPTH: usize = 64;

/// Size of an inner node's stored record: 4-byte prefix plus 16 slot
/// digests.
pub(crate) const INNER_RECORD_LEN: usize = 4 + BRANCH_FACTOR * Hash256::LEN;

/// The leaf kind selected at insertion time. State maps produce
/// [`LeafType::AccountState`] leaves, transaction maps
/// [`LeafType::Transaction`]; [`LeafType::TransactionMeta`] is selected
/// explicitly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LeafType {
    AccountState,
    Transaction,
    TransactionMeta,
}

impl LeafType {
    pub(crate) fn prefix(self) -> HashPrefix {
        match self {
            LeafType::AccountState => HashPrefix::LeafNode,
            LeafType::Transaction => HashPrefix::TxNode,
            LeafType::TransactionMeta => HashPrefix::TxMetaNode,
        }
    }

    /// Whether the stored record carries the 32-byte key suffix.
    /// Transaction records do not: their key is the record digest.
    fn wire_carries_key(self) -> bool {
        !matches!(self, LeafType::Transaction)
    }
}

/// A leaf node binding one item. Leaves are logically immutable in normal
/// use; updates produce fresh leaves via copy-on-write.
#[derive(Clone, Debug)]
pub struct LeafNode {
    item: Item,
    kind: LeafType,
    digest: Hash256,
    dirty: bool,
}

impl LeafNode {
    pub fn new(item: Item, kind: LeafType) -> Self {
        let digest = Self::compute_digest(&item, kind);
        LeafNode { item, kind, digest, dirty: true }
    }

    fn from_wire(item: Item, kind: LeafType) -> Self {
        let digest = Self::compute_digest(&item, kind);
        LeafNode { item, kind, digest, dirty: false }
    }

    pub(crate) fn compute_digest(item: &Item, kind: LeafType) -> Hash256 {
        let prefix = kind.prefix().to_bytes();
        if kind.wire_carries_key() {
            sha512_half(&[&prefix, item.data(), item.key().as_bytes()])
        } else {
            sha512_half(&[&prefix, item.data()])
        }
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn kind(&self) -> LeafType {
        self.kind
    }

    pub fn digest(&self) -> Hash256 {
        self.digest
    }

    /// Replaces the item and recomputes the digest. Returns whether the
    /// digest changed.
    pub fn set_item(&mut self, item: Item) -> bool {
        let digest = Self::compute_digest(&item, self.kind);
        self.item = item;
        let changed = digest != self.digest;
        if changed {
            self.digest = digest;
            self.dirty = true;
        }
        changed
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.item.data().len() + Hash256::LEN);
        out.extend_from_slice(&self.kind.prefix().to_bytes());
        out.extend_from_slice(self.item.data());
        if self.kind.wire_carries_key() {
            out.extend_from_slice(self.item.key().as_bytes());
        }
        out
    }
}

/// One occupied slot of an inner node: the child digest plus the loaded
/// subtree when present.
#[derive(Clone, Debug)]
pub struct Child {
    digest: Hash256,
    node: Option<Arc<Node>>,
}

impl Child {
    pub fn digest(&self) -> Hash256 {
        self.digest
    }

    pub fn node(&self) -> Option<&Arc<Node>> {
        self.node.as_ref()
    }

    pub(crate) fn node_mut(&mut self) -> Option<&mut Arc<Node>> {
        self.node.as_mut()
    }

    /// Drops the loaded subtree, keeping the digest. Subsequent access
    /// re-materializes through the store.
    pub(crate) fn release(&mut self) {
        self.node = None;
    }
}

/// A 16-slot hexary branch node.
///
/// Invariants: slot `i` occupied iff its stored digest is non-zero; the
/// branch bitmap mirrors slot occupancy; the node digest is kept current by
/// every slot mutation. Cloning is shallow: the digest array is copied while
/// loaded children are shared, which is exactly what the copy-on-write spine
/// rebuild needs.
#[derive(Clone, Debug)]
pub struct InnerNode {
    children: [Option<Child>; BRANCH_FACTOR],
    digest: Hash256,
    dirty: bool,
}

impl InnerNode {
    pub fn new_empty() -> Self {
        InnerNode {
            children: std::array::from_fn(|_| None),
            digest: Hash256::ZERO,
            dirty: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.iter().all(|slot| slot.is_none())
    }

    pub fn is_empty_slot(&self, branch: usize) -> bool {
        self.children[branch].is_none()
    }

    pub fn branch_count(&self) -> usize {
        self.children.iter().filter(|slot| slot.is_some()).count()
    }

    /// Bit `i` set iff slot `i` is occupied.
    pub fn branch_bitmap(&self) -> u16 {
        let mut bitmap = 0u16;
        for (branch, slot) in self.children.iter().enumerate() {
            if slot.is_some() {
                bitmap |= 1 << branch;
            }
        }
        bitmap
    }

    pub fn child(&self, branch: usize) -> Option<&Child> {
        self.children[branch].as_ref()
    }

    pub(crate) fn child_mut(&mut self, branch: usize) -> Option<&mut Child> {
        self.children[branch].as_mut()
    }

    pub(crate) fn child_node_mut(&mut self, branch: usize) -> Option<&mut Arc<Node>> {
        self.children[branch].as_mut().and_then(|child| child.node.as_mut())
    }

    /// The slot's stored digest, or the empty digest for a vacant slot.
    pub fn child_digest(&self, branch: usize) -> Hash256 {
        self.children[branch]
            .as_ref()
            .map(|child| child.digest)
            .unwrap_or(Hash256::ZERO)
    }

    pub fn get_child(&self, branch: usize) -> Option<&Arc<Node>> {
        self.children[branch].as_ref().and_then(|child| child.node.as_ref())
    }

    /// Updates slot `branch`, the stored digest, the bitmap and the dirty
    /// flag, and recomputes the node digest.
    pub fn set_child(&mut self, branch: usize, node: Option<Arc<Node>>) {
        self.children[branch] = node.map(|node| Child { digest: node.digest(), node: Some(node) });
        self.dirty = true;
        self.recompute_digest();
    }

    /// Marks slot `branch` occupied by digest alone; the subtree stays
    /// unloaded. Used when reconstructing a node from its stored record.
    pub(crate) fn set_child_digest(&mut self, branch: usize, digest: Hash256) {
        self.children[branch] = Some(Child { digest, node: None });
    }

    /// Attaches a loaded subtree to an occupied slot without altering
    /// digests or dirtiness. The subtree digest must equal the stored slot
    /// digest.
    pub(crate) fn attach_child(&mut self, branch: usize, node: Arc<Node>) -> Result<()> {
        let Some(child) = self.children[branch].as_mut() else {
            return Err(ShamapError::ItemNotFound);
        };
        if child.digest != node.digest() {
            return Err(ShamapError::HashMismatch {
                expected: child.digest,
                actual: node.digest(),
            });
        }
        child.node = Some(node);
        Ok(())
    }

    pub fn digest(&self) -> Hash256 {
        self.digest
    }

    pub fn recompute_digest(&mut self) {
        self.digest = self.computed_digest();
    }

    /// The digest implied by the current slot contents. An inner node with
    /// no occupied slots has the empty digest.
    pub(crate) fn computed_digest(&self) -> Hash256 {
        if self.is_empty() {
            return Hash256::ZERO;
        }
        let prefix = HashPrefix::InnerNode.to_bytes();
        let zero = [0u8; Hash256::LEN];
        let mut parts: Vec<&[u8]> = Vec::with_capacity(1 + BRANCH_FACTOR);
        parts.push(&prefix);
        for slot in &self.children {
            match slot {
                Some(child) => parts.push(child.digest.as_bytes()),
                None => parts.push(&zero),
            }
        }
        sha512_half(&parts)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INNER_RECORD_LEN);
        out.extend_from_slice(&HashPrefix::InnerNode.to_bytes());
        for branch in 0..BRANCH_FACTOR {
            out.extend_from_slice(self.child_digest(branch).as_bytes());
        }
        out
    }
}

/// The concrete node type of the state map.
#[derive(Clone, Debug)]
pub enum Node {
    Inner(InnerNode),
    Leaf(LeafNode),
}

impl From<InnerNode> for Node {
    fn from(node: InnerNode) -> Self {
        Node::Inner(node)
    }
}

impl From<LeafNode> for Node {
    fn from(node: LeafNode) -> Self {
        Node::Leaf(node)
    }
}

impl Node {
    pub fn digest(&self) -> Hash256 {
        match self {
            Node::Inner(inner) => inner.digest(),
            Node::Leaf(leaf) => leaf.digest(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Node::Inner(_))
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Node::Inner(inner) => inner.dirty,
            Node::Leaf(leaf) => leaf.dirty,
        }
    }

    pub(crate) fn mark_dirty(&mut self) {
        match self {
            Node::Inner(inner) => inner.dirty = true,
            Node::Leaf(leaf) => leaf.dirty = true,
        }
    }

    pub(crate) fn clear_dirty(&mut self) {
        match self {
            Node::Inner(inner) => inner.dirty = false,
            Node::Leaf(leaf) => leaf.dirty = false,
        }
    }

    pub(crate) fn as_inner(&self) -> Result<&InnerNode> {
        match self {
            Node::Inner(inner) => Ok(inner),
            Node::Leaf(_) => Err(ShamapError::InvalidNodeType),
        }
    }

    pub(crate) fn as_leaf(&self) -> Result<&LeafNode> {
        match self {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Inner(_) => Err(ShamapError::InvalidNodeType),
        }
    }

    /// Serializes to the prefix format used both for storage and as the
    /// digest preimage.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Node::Inner(inner) => inner.serialize(),
            Node::Leaf(leaf) => leaf.serialize(),
        }
    }

    /// Recovers a node from its prefix-format record. The result is marked
    /// clean; an inner node comes back with all slot digests set but no
    /// children loaded.
    pub fn deserialize(data: &[u8]) -> Result<Node> {
        let mut reader = Cursor::new(data);
        let tag = reader
            .read_u32::<BigEndian>()
            .map_err(|_| ShamapError::Deserialize("record shorter than its prefix".into()))?;
        match HashPrefix::from_u32(tag) {
            Some(HashPrefix::InnerNode) => {
                if data.len() != INNER_RECORD_LEN {
                    return Err(ShamapError::Deserialize(format!(
                        "inner record must be {INNER_RECORD_LEN} bytes, got {}",
                        data.len()
                    )));
                }
                let mut inner = InnerNode::new_empty();
                for branch in 0..BRANCH_FACTOR {
                    let start = 4 + branch * Hash256::LEN;
                    let digest = Hash256::from_slice(&data[start..start + Hash256::LEN])?;
                    if !digest.is_zero() {
                        inner.set_child_digest(branch, digest);
                    }
                }
                inner.recompute_digest();
                inner.dirty = false;
                Ok(Node::Inner(inner))
            }
            Some(HashPrefix::LeafNode) => Self::deserialize_keyed_leaf(data, LeafType::AccountState),
            Some(HashPrefix::TxMetaNode) => {
                Self::deserialize_keyed_leaf(data, LeafType::TransactionMeta)
            }
            Some(HashPrefix::TxNode) => {
                let payload = &data[4..];
                if payload.is_empty() {
                    return Err(ShamapError::Deserialize(
                        "transaction record has no payload".into(),
                    ));
                }
                // A transaction's key is the digest of its record.
                let digest = sha512_half(&[data]);
                let item = Item::new(digest, Bytes::copy_from_slice(payload))
                    .map_err(|_| ShamapError::Deserialize("transaction record is nil".into()))?;
                Ok(Node::Leaf(LeafNode::from_wire(item, LeafType::Transaction)))
            }
            None => Err(ShamapError::Deserialize(format!(
                "unknown domain prefix 0x{tag:08X}"
            ))),
        }
    }

    fn deserialize_keyed_leaf(data: &[u8], kind: LeafType) -> Result<Node> {
        // prefix + at least one payload byte + 32-byte key suffix
        if data.len() < 4 + 1 + Hash256::LEN {
            return Err(ShamapError::Deserialize(format!(
                "leaf record too short: {} bytes",
                data.len()
            )));
        }
        let key_start = data.len() - Hash256::LEN;
        let key = Hash256::from_slice(&data[key_start..])?;
        let payload = Bytes::copy_from_slice(&data[4..key_start]);
        let item = Item::new(key, payload)
            .map_err(|_| ShamapError::Deserialize("leaf record with nil item".into()))?;
        Ok(Node::Leaf(LeafNode::from_wire(item, kind)))
    }
}
