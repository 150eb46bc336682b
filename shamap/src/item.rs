// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Result, ShamapError};
use crate::hash::Hash256;
use bytes::Bytes;
use std::fmt;

/// One keyed entry of a state map: a 256-bit key bound to an opaque payload.
///
/// Items are validated at construction: the key must be non-zero and the
/// payload non-empty.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Item {
    key: Hash256,
    data: Bytes,
}

impl Item {
    pub fn new(key: Hash256, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if key.is_zero() || data.is_empty() {
            return Err(ShamapError::NilItem);
        }
        Ok(Item { key, data })
    }

    pub fn key(&self) -> &Hash256 {
        &self.key
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Item {{ key: {}, data: 0x{} }}", self.key, hex::encode(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_items_rejected() {
        assert_eq!(
            Item::new(Hash256::ZERO, vec![1u8]).unwrap_err(),
            ShamapError::NilItem
        );
        assert_eq!(
            Item::new(Hash256::random(), Vec::new()).unwrap_err(),
            ShamapError::NilItem
        );
    }

    #[test]
    fn test_ordering_follows_keys() {
        let low = Item::new(Hash256::new([1u8; 32]), vec![9u8]).unwrap();
        let high = Item::new(Hash256::new([2u8; 32]), vec![1u8]).unwrap();
        assert!(low < high);
    }
}
