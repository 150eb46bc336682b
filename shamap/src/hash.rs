// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

//! Digest domain of the state map.
//!
//! Every node is identified by a 32-byte digest computed as `sha512_half`
//! over a domain-tagged preimage. The four [`HashPrefix`] constants keep the
//! preimages of the different node kinds in disjoint input domains; their
//! bit patterns are part of the wire compatibility surface and must not
//! change.

use crate::error::{Result, ShamapError};
use num_derive::FromPrimitive;
use primitive_types::H256;
#[cfg(any(test, feature = "fuzzing"))]
use proptest_derive::Arbitrary;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;
use std::str::FromStr;

/// A 32-byte node digest or item key.
///
/// The all-zero value is the distinguished empty digest: it is the digest of
/// an inner node with no occupied slots and stands in for empty slots inside
/// inner-node preimages.
#[derive(
    Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[cfg_attr(any(test, feature = "fuzzing"), derive(Arbitrary))]
pub struct Hash256([u8; Hash256::LEN]);

impl Hash256 {
    pub const LEN: usize = 32;

    /// The empty digest.
    pub const ZERO: Hash256 = Hash256([0u8; Hash256::LEN]);

    pub const fn new(bytes: [u8; Hash256::LEN]) -> Self {
        Hash256(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::LEN {
            return Err(ShamapError::Deserialize(format!(
                "digest must be {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        let mut out = [0u8; Self::LEN];
        out.copy_from_slice(bytes);
        Ok(Hash256(out))
    }

    pub fn as_bytes(&self) -> &[u8; Hash256::LEN] {
        &self.0
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; Self::LEN]
    }

    /// Returns the 4-bit branch selector at `depth`, counting from the
    /// most-significant nibble of byte 0. `depth` must be below 64.
    pub fn nibble(&self, depth: usize) -> u8 {
        let byte = self.0[depth / 2];
        if depth % 2 == 0 { (byte >> 4) & 0x0F } else { byte & 0x0F }
    }

    pub fn random() -> Self {
        Self::random_with_rng(&mut rand::thread_rng())
    }

    pub fn random_with_rng<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; Self::LEN];
        rng.fill_bytes(&mut bytes);
        Hash256(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; Hash256::LEN]> for Hash256 {
    fn from(bytes: [u8; Hash256::LEN]) -> Self {
        Hash256(bytes)
    }
}

impl From<H256> for Hash256 {
    fn from(hash: H256) -> Self {
        Hash256(hash.0)
    }
}

impl From<Hash256> for H256 {
    fn from(hash: Hash256) -> Self {
        H256(hash.0)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::LowerHex for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = ShamapError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| ShamapError::Deserialize(format!("invalid digest hex: {e}")))?;
        Self::from_slice(&bytes)
    }
}

/// 4-byte domain prefixes tagging digest preimages and stored records.
///
/// The discriminants are the big-endian byte patterns on the wire.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, FromPrimitive)]
pub enum HashPrefix {
    /// `MIN\0`, inner nodes.
    InnerNode = 0x4D49_4E00,
    /// `MLN\0`, state leaves.
    LeafNode = 0x4D4C_4E00,
    /// `TXN\0`, transaction leaves.
    TxNode = 0x5458_4E00,
    /// `SND\0`, transaction-with-metadata leaves.
    TxMetaNode = 0x534E_4400,
}

impl HashPrefix {
    pub const fn to_bytes(self) -> [u8; 4] {
        (self as u32).to_be_bytes()
    }
}

/// SHA-512 truncated to its first 32 bytes, over the concatenation of
/// `parts`.
pub fn sha512_half(parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; Hash256::LEN];
    out.copy_from_slice(&digest[..Hash256::LEN]);
    Hash256(out)
}
