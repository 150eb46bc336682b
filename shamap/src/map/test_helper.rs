// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

use crate::hash::Hash256;
use crate::map::{MapType, SHAMap};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub(crate) fn key(hex: &str) -> Hash256 {
    hex.parse().unwrap()
}

/// A 32-byte big-endian encoding of a small integer.
pub(crate) fn key_u64(value: u64) -> Hash256 {
    let mut bytes = [0u8; Hash256::LEN];
    bytes[Hash256::LEN - 8..].copy_from_slice(&value.to_be_bytes());
    Hash256::new(bytes)
}

/// Returns `base` with nibble `index` replaced.
pub(crate) fn key_with_nibble(base: &Hash256, index: usize, nibble: u8) -> Hash256 {
    assert!(nibble < 16);
    let mut raw = *base.as_bytes();
    if index % 2 == 0 {
        raw[index / 2] = (raw[index / 2] & 0x0F) | (nibble << 4);
    } else {
        raw[index / 2] = (raw[index / 2] & 0xF0) | nibble;
    }
    Hash256::new(raw)
}

/// Computes the key immediately after `key`.
pub(crate) fn plus_one(key: Hash256) -> Hash256 {
    assert_ne!(key, Hash256::new([0xFF; Hash256::LEN]));
    let mut raw = *key.as_bytes();
    for i in (0..Hash256::LEN).rev() {
        if raw[i] == 0xFF {
            raw[i] = 0;
        } else {
            raw[i] += 1;
            break;
        }
    }
    Hash256::new(raw)
}

/// Seeded random key/value pairs with distinct keys.
pub(crate) fn random_kvs(seed: u8, count: usize) -> Vec<(Hash256, Bytes)> {
    let mut rng = StdRng::from_seed([seed; 32]);
    (0..count)
        .map(|_| {
            let key = Hash256::random_with_rng(&mut rng);
            let value = Bytes::copy_from_slice(Hash256::random_with_rng(&mut rng).as_bytes());
            (key, value)
        })
        .collect()
}

pub(crate) fn build_state_map(kvs: &[(Hash256, Bytes)]) -> SHAMap {
    let mut map = SHAMap::new(MapType::State);
    for (key, value) in kvs {
        map.put(*key, value.clone()).unwrap();
    }
    map
}
