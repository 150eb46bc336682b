// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! Storage interface between the state map and whatever holds node records.
//!
//! A [`Family`] is an abstract byte store keyed by 32-byte digests. The map
//! never interprets the bytes it hands over; records are idempotent by
//! digest, so re-storing an entry is a no-op for any correct backend.

use crate::hash::Hash256;
use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Backing store for node records.
///
/// Implementations must be internally thread-safe: one family is typically
/// shared by many maps. `fetch` must return byte copies with no shared
/// mutable backing, otherwise snapshot isolation between maps is violated.
pub trait Family: Send + Sync {
    /// Byte-for-byte retrieval of a previously stored record. Absence is a
    /// first-class value, not an error.
    fn fetch(&self, digest: &Hash256) -> Result<Option<Vec<u8>>>;

    /// Writes a batch of records. Entries are idempotent by digest.
    fn store_batch(&self, batch: &[(Hash256, Vec<u8>)]) -> Result<()>;
}

/// In-memory [`Family`] used by tests and tooling.
///
/// Counts fetches so callers can observe lazy-loading behavior.
#[derive(Default)]
pub struct MemoryFamily {
    nodes: RwLock<HashMap<Hash256, Vec<u8>>>,
    fetches: AtomicU64,
}

impl MemoryFamily {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn contains(&self, digest: &Hash256) -> bool {
        self.nodes.read().contains_key(digest)
    }

    /// Total number of `fetch` calls served, hits and misses alike.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl Family for MemoryFamily {
    fn fetch(&self, digest: &Hash256) -> Result<Option<Vec<u8>>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.nodes.read().get(digest).cloned())
    }

    fn store_batch(&self, batch: &[(Hash256, Vec<u8>)]) -> Result<()> {
        let mut nodes = self.nodes.write();
        for (digest, bytes) in batch {
            nodes.insert(*digest, bytes.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_family_roundtrip() {
        let family = MemoryFamily::new();
        let digest = Hash256::random();
        assert_eq!(family.fetch(&digest).unwrap(), None);
        family
            .store_batch(&[(digest, vec![1, 2, 3])])
            .unwrap();
        assert_eq!(family.fetch(&digest).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(family.num_nodes(), 1);
        assert_eq!(family.fetch_count(), 2);
        // idempotent by digest
        family
            .store_batch(&[(digest, vec![1, 2, 3])])
            .unwrap();
        assert_eq!(family.num_nodes(), 1);
    }
}
