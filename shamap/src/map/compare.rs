// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! Differencing of two state maps.
//!
//! Comparison descends both trees in lockstep and discards any pair of
//! subtrees with equal digests, so the cost is proportional to the differing
//! region rather than to the tree size.

use crate::error::Result;
use crate::hash::Hash256;
use crate::item::Item;
use crate::map::SHAMap;
use crate::node::{LeafNode, Node, BRANCH_FACTOR};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One difference between two maps, oriented from `self` (before) to the
/// compared map (after).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Delta {
    /// The key exists only in the compared map.
    Added(Item),
    /// The key exists only in `self`.
    Removed(Item),
    /// The key exists in both with different payloads.
    Modified { before: Item, after: Item },
}

impl Delta {
    pub fn key(&self) -> &Hash256 {
        match self {
            Delta::Added(item) | Delta::Removed(item) => item.key(),
            Delta::Modified { before, .. } => before.key(),
        }
    }
}

/// The accumulated result of [`SHAMap::compare`], keyed by item key.
/// `complete` is false when an early-stop limit truncated the walk.
#[derive(Clone, Debug)]
pub struct DeltaSet {
    deltas: BTreeMap<Hash256, Delta>,
    complete: bool,
}

impl DeltaSet {
    fn new() -> Self {
        DeltaSet { deltas: BTreeMap::new(), complete: true }
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn get(&self, key: &Hash256) -> Option<&Delta> {
        self.deltas.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Hash256> {
        self.deltas.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hash256, &Delta)> {
        self.deltas.iter()
    }
}

impl IntoIterator for DeltaSet {
    type Item = (Hash256, Delta);
    type IntoIter = std::collections::btree_map::IntoIter<Hash256, Delta>;

    fn into_iter(self) -> Self::IntoIter {
        self.deltas.into_iter()
    }
}

impl SHAMap {
    /// O(1) content equality: two maps are equal iff their root digests are.
    pub fn equal(&self, other: &SHAMap) -> bool {
        self.digest() == other.digest()
    }

    /// Collects the differences against `other`. With `max_differences > 0`
    /// the walk stops once the limit is reached and the returned set is
    /// marked incomplete; `0` means unlimited.
    pub fn compare(&self, other: &SHAMap, max_differences: usize) -> Result<DeltaSet> {
        let mut set = DeltaSet::new();
        let complete = self.differences(other, |delta| {
            if max_differences > 0 && set.deltas.len() >= max_differences {
                return false;
            }
            set.deltas.insert(*delta.key(), delta);
            true
        })?;
        set.complete = complete;
        Ok(set)
    }

    /// Streams differences into `sink` without accumulating them. The sink
    /// returns `false` to stop early; the return value reports whether the
    /// walk ran to completion.
    pub fn differences<F>(&self, other: &SHAMap, mut sink: F) -> Result<bool>
    where
        F: FnMut(Delta) -> bool,
    {
        if self.digest() == other.digest() {
            return Ok(true);
        }
        let mut worklist: Vec<(Option<Arc<Node>>, Option<Arc<Node>>)> =
            vec![(Some(Arc::clone(self.root())), Some(Arc::clone(other.root())))];
        while let Some(pair) = worklist.pop() {
            match pair {
                (Some(ours), Some(theirs)) => {
                    if ours.digest() == theirs.digest() {
                        continue;
                    }
                    match (ours.as_ref(), theirs.as_ref()) {
                        (Node::Leaf(before), Node::Leaf(after)) => {
                            if before.item().key() == after.item().key() {
                                if before.item().data() != after.item().data()
                                    && !sink(Delta::Modified {
                                        before: before.item().clone(),
                                        after: after.item().clone(),
                                    })
                                {
                                    return Ok(false);
                                }
                            } else {
                                if !sink(Delta::Removed(before.item().clone())) {
                                    return Ok(false);
                                }
                                if !sink(Delta::Added(after.item().clone())) {
                                    return Ok(false);
                                }
                            }
                        }
                        (Node::Leaf(lone), Node::Inner(_)) => {
                            let lone = lone.item().clone();
                            if !classify_lone_leaf(other, &theirs, &lone, true, &mut sink)? {
                                return Ok(false);
                            }
                        }
                        (Node::Inner(_), Node::Leaf(lone)) => {
                            let lone = lone.item().clone();
                            if !classify_lone_leaf(self, &ours, &lone, false, &mut sink)? {
                                return Ok(false);
                            }
                        }
                        (Node::Inner(our_inner), Node::Inner(their_inner)) => {
                            for branch in 0..BRANCH_FACTOR {
                                let our_digest = our_inner.child_digest(branch);
                                let their_digest = their_inner.child_digest(branch);
                                if our_digest == their_digest {
                                    continue;
                                }
                                let our_child = if our_digest.is_zero() {
                                    None
                                } else {
                                    Some(self.descend_into(our_inner, branch)?)
                                };
                                let their_child = if their_digest.is_zero() {
                                    None
                                } else {
                                    Some(other.descend_into(their_inner, branch)?)
                                };
                                worklist.push((our_child, their_child));
                            }
                        }
                    }
                }
                (Some(ours), None) => {
                    if !emit_all(self, &ours, true, &mut sink)? {
                        return Ok(false);
                    }
                }
                (None, Some(theirs)) => {
                    if !emit_all(other, &theirs, false, &mut sink)? {
                        return Ok(false);
                    }
                }
                (None, None) => {}
            }
        }
        Ok(true)
    }

    /// The keys on which the two maps disagree.
    pub fn find_difference(&self, other: &SHAMap) -> Result<Vec<Hash256>> {
        let set = self.compare(other, 0)?;
        Ok(set.keys().copied().collect())
    }
}

/// Visits every leaf below `node` (owned by `map`); the visitor returns
/// `false` to stop. Returns whether the walk ran to completion.
fn for_each_leaf<F>(map: &SHAMap, node: &Arc<Node>, visit: &mut F) -> Result<bool>
where
    F: FnMut(&LeafNode) -> Result<bool>,
{
    match node.as_ref() {
        Node::Leaf(leaf) => visit(leaf),
        Node::Inner(inner) => {
            for branch in 0..BRANCH_FACTOR {
                if inner.child(branch).is_some() {
                    let child = map.descend_into(inner, branch)?;
                    if !for_each_leaf(map, &child, visit)? {
                        return Ok(false);
                    }
                }
            }
            Ok(true)
        }
    }
}

/// One side reached a lone leaf while the other still has a subtree:
/// classify every leaf of the subtree against the lone one.
/// `lone_is_before` is true when the lone leaf came from the `self` side.
fn classify_lone_leaf<F>(
    subtree_map: &SHAMap,
    subtree: &Arc<Node>,
    lone: &Item,
    lone_is_before: bool,
    sink: &mut F,
) -> Result<bool>
where
    F: FnMut(Delta) -> bool,
{
    let mut matched = false;
    let finished = for_each_leaf(subtree_map, subtree, &mut |leaf: &LeafNode| {
        let item = leaf.item();
        if item.key() == lone.key() {
            matched = true;
            if item.data() != lone.data() {
                let delta = if lone_is_before {
                    Delta::Modified { before: lone.clone(), after: item.clone() }
                } else {
                    Delta::Modified { before: item.clone(), after: lone.clone() }
                };
                return Ok(sink(delta));
            }
            Ok(true)
        } else {
            let delta = if lone_is_before {
                Delta::Added(item.clone())
            } else {
                Delta::Removed(item.clone())
            };
            Ok(sink(delta))
        }
    })?;
    if !finished {
        return Ok(false);
    }
    if !matched {
        let delta = if lone_is_before {
            Delta::Removed(lone.clone())
        } else {
            Delta::Added(lone.clone())
        };
        if !sink(delta) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Emits every leaf below `node` as removed (`true`) or added (`false`).
fn emit_all<F>(map: &SHAMap, node: &Arc<Node>, removed: bool, sink: &mut F) -> Result<bool>
where
    F: FnMut(Delta) -> bool,
{
    for_each_leaf(map, node, &mut |leaf: &LeafNode| {
        let delta = if removed {
            Delta::Removed(leaf.item().clone())
        } else {
            Delta::Added(leaf.item().clone())
        };
        Ok(sink(delta))
    })
}
