// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! Merkle inclusion and non-inclusion proofs.
//!
//! A proof is the sequence of prefix-format node records on the path from
//! the root toward a key, emitted leaf-to-root. Verification replays the
//! path root-to-leaf: each record must hash to the digest its parent stored
//! for it, anchoring the whole chain in the trusted root digest.

use crate::error::{Result, ShamapError};
use crate::hash::Hash256;
use crate::map::SHAMap;
use crate::node::{Node, MAX_DEPTH};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// A proof produced by [`SHAMap::get_proof`]. `path` holds one serialized
/// record per visited node, deepest first. `found` distinguishes inclusion
/// proofs from non-inclusion ones (a path ending at an empty branch or at a
/// leaf with a different key).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    key: Hash256,
    found: bool,
    path: Vec<Vec<u8>>,
}

impl Proof {
    pub fn key(&self) -> &Hash256 {
        &self.key
    }

    pub fn found(&self) -> bool {
        self.found
    }

    /// Node records, leaf-to-root.
    pub fn path(&self) -> &[Vec<u8>] {
        &self.path
    }

    pub fn into_path(self) -> Vec<Vec<u8>> {
        self.path
    }
}

/// Where and why a proof failed verification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ProofFailure {
    #[error("path length out of range")]
    BadLength,
    #[error("record does not deserialize")]
    Decode,
    #[error("record digest does not match its parent's slot")]
    DigestMismatch,
    #[error("path descends through an empty branch")]
    EmptyBranch,
    #[error("leaf record before the end of the path")]
    UnexpectedLeaf,
    #[error("path ends without reaching a leaf")]
    Truncated,
    #[error("leaf key does not match the proven key")]
    KeyMismatch,
}

/// A failed verification, locating the offending record. `position` indexes
/// the path in verification order (root first); `depth` counts inner nodes
/// consumed so far.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("proof invalid at position {position} (depth {depth}): {reason}")]
pub struct ProofError {
    pub position: usize,
    pub depth: usize,
    pub reason: ProofFailure,
}

impl SHAMap {
    /// Builds a proof for `key`. When the key is absent the path still
    /// reaches the position where it would live, which verifies as a
    /// non-inclusion proof.
    pub fn get_proof(&self, key: &Hash256) -> Result<Proof> {
        let mut path: Vec<Vec<u8>> = Vec::new();
        let mut node = Arc::clone(self.root());
        let mut depth = 0;
        let mut found = false;
        loop {
            path.push(node.serialize());
            let next = match node.as_ref() {
                Node::Leaf(leaf) => {
                    found = leaf.item().key() == key;
                    None
                }
                Node::Inner(inner) => {
                    if depth >= MAX_DEPTH {
                        return Err(ShamapError::MaxDepthReached);
                    }
                    self.descend(inner, key.nibble(depth) as usize)?
                }
            };
            match next {
                None => break,
                Some(child) => {
                    depth += 1;
                    node = child;
                }
            }
        }
        path.reverse();
        Ok(Proof { key: *key, found, path })
    }
}

/// Verifies an inclusion proof against a trusted root digest.
pub fn verify_proof(root: Hash256, key: &Hash256, path: &[Vec<u8>]) -> bool {
    verify_proof_value(root, key, path).is_ok()
}

/// Verifies an inclusion proof and extracts the proven payload, reporting
/// the failing position otherwise.
pub fn verify_proof_value(
    root: Hash256,
    key: &Hash256,
    path: &[Vec<u8>],
) -> Result<Bytes, ProofError> {
    if path.is_empty() || path.len() > MAX_DEPTH + 1 {
        return Err(ProofError { position: 0, depth: 0, reason: ProofFailure::BadLength });
    }
    let last = path.len() - 1;
    let mut expected = root;
    let mut depth = 0usize;
    for (position, bytes) in path.iter().rev().enumerate() {
        let fail = |reason| ProofError { position, depth, reason };
        let node = Node::deserialize(bytes).map_err(|_| fail(ProofFailure::Decode))?;
        if node.digest() != expected {
            return Err(fail(ProofFailure::DigestMismatch));
        }
        match node {
            Node::Inner(inner) => {
                if position == last {
                    return Err(fail(ProofFailure::Truncated));
                }
                if depth >= MAX_DEPTH {
                    return Err(fail(ProofFailure::BadLength));
                }
                let next = inner.child_digest(key.nibble(depth) as usize);
                if next.is_zero() {
                    return Err(fail(ProofFailure::EmptyBranch));
                }
                expected = next;
                depth += 1;
            }
            Node::Leaf(leaf) => {
                if position != last {
                    return Err(fail(ProofFailure::UnexpectedLeaf));
                }
                if leaf.item().key() != key {
                    return Err(fail(ProofFailure::KeyMismatch));
                }
                return Ok(leaf.item().data().clone());
            }
        }
    }
    Err(ProofError { position: last, depth, reason: ProofFailure::Truncated })
}

/// Verifies a non-inclusion proof: a digest-chained path from the root that
/// ends either at an inner node whose slot for the key is empty, or at a
/// leaf carrying a different key.
pub fn verify_non_inclusion(root: Hash256, key: &Hash256, path: &[Vec<u8>]) -> bool {
    if path.is_empty() || path.len() > MAX_DEPTH + 1 {
        return false;
    }
    let last = path.len() - 1;
    let mut expected = root;
    let mut depth = 0usize;
    for (position, bytes) in path.iter().rev().enumerate() {
        let Ok(node) = Node::deserialize(bytes) else {
            return false;
        };
        if node.digest() != expected {
            return false;
        }
        match node {
            Node::Inner(inner) => {
                if depth >= MAX_DEPTH {
                    return false;
                }
                let next = inner.child_digest(key.nibble(depth) as usize);
                if position == last {
                    return next.is_zero();
                }
                if next.is_zero() {
                    return false;
                }
                expected = next;
                depth += 1;
            }
            Node::Leaf(leaf) => {
                return position == last && leaf.item().key() != key;
            }
        }
    }
    false
}
