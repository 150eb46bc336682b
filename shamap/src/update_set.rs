// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

use crate::hash::Hash256;
use bytes::Bytes;
use std::collections::BTreeMap;

/// One queued write.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Op {
    Put(Bytes),
    Remove,
}

/// A batch of writes against a map, applied in key order by
/// [`SHAMap::apply`](crate::SHAMap::apply).
///
/// The batch is keyed: queueing a second operation for a key discards the
/// first, so the batch describes at most one outcome per key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UpdateSet {
    ops: BTreeMap<Hash256, Op>,
}

impl UpdateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an insert-or-update of `key` with `data`.
    pub fn put(&mut self, key: Hash256, data: impl Into<Bytes>) {
        self.ops.insert(key, Op::Put(data.into()));
    }

    /// Queues a removal of `key`.
    pub fn remove(&mut self, key: Hash256) {
        self.ops.insert(key, Op::Remove);
    }

    /// The payload queued for `key`, if the pending operation is a put.
    pub fn pending_put(&self, key: &Hash256) -> Option<&Bytes> {
        match self.ops.get(key) {
            Some(Op::Put(data)) => Some(data),
            _ => None,
        }
    }

    /// Whether `key` is queued for removal.
    pub fn removes(&self, key: &Hash256) -> bool {
        matches!(self.ops.get(key), Some(Op::Remove))
    }

    /// Folds `other` into this batch. Where both touch a key, `other` wins.
    pub fn merge(&mut self, other: UpdateSet) {
        self.ops.extend(other.ops);
    }

    pub fn keys(&self) -> impl Iterator<Item = &Hash256> {
        self.ops.keys()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Key-ordered drain of a batch; `None` payloads are removals.
pub struct IntoIter(std::collections::btree_map::IntoIter<Hash256, Op>);

impl Iterator for IntoIter {
    type Item = (Hash256, Option<Bytes>);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(key, op)| match op {
            Op::Put(data) => (key, Some(data)),
            Op::Remove => (key, None),
        })
    }
}

impl IntoIterator for UpdateSet {
    type Item = (Hash256, Option<Bytes>);
    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter(self.ops.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_per_key_wins() {
        let key = Hash256::new([0x21; 32]);
        let mut batch = UpdateSet::new();
        batch.put(key, vec![1u8]);
        batch.remove(key);
        assert_eq!(batch.len(), 1);
        assert!(batch.removes(&key));
        assert_eq!(batch.pending_put(&key), None);

        batch.put(key, vec![2u8]);
        assert!(!batch.removes(&key));
        assert_eq!(batch.pending_put(&key).unwrap().as_ref(), &[2u8]);
        assert_eq!(
            batch.into_iter().collect::<Vec<_>>(),
            vec![(key, Some(Bytes::from(vec![2u8])))]
        );
    }

    #[test]
    fn test_merge_prefers_newer_batch() {
        let shared = Hash256::new([0x31; 32]);
        let only_old = Hash256::new([0x32; 32]);
        let mut old = UpdateSet::new();
        old.put(shared, vec![1u8]);
        old.put(only_old, vec![2u8]);
        let mut new = UpdateSet::new();
        new.remove(shared);

        old.merge(new);
        assert_eq!(old.len(), 2);
        assert!(old.removes(&shared));
        assert_eq!(old.pending_put(&only_old).unwrap().as_ref(), &[2u8]);
        assert_eq!(old.keys().count(), 2);
        assert!(!old.is_empty());
    }
}
