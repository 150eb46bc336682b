// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

use crate::hash::Hash256;
use crate::map::MapState;
use thiserror::Error;

pub type Result<T, E = ShamapError> = std::result::Result<T, E>;

/// Errors surfaced by the state map. No operation retries internally;
/// partial-failure handling is the caller's concern.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ShamapError {
    /// Mutating call on an immutable map.
    #[error("map is immutable")]
    Immutable,

    /// Operation requires a state the map is not in.
    #[error("operation not permitted while map is {0:?}")]
    InvalidState(MapState),

    /// Delete of an absent key, or no tree position matched a lookup.
    #[error("item not found")]
    ItemNotFound,

    /// A node had the wrong kind for its tree position (corruption).
    #[error("invalid node type")]
    InvalidNodeType,

    /// The store returned absence for a digest the map expected to possess.
    #[error("node {0} not found in store")]
    NodeNotFound(Hash256),

    /// Descent past the last nibble of a key.
    #[error("maximum tree depth reached")]
    MaxDepthReached,

    #[error("serialize: {0}")]
    Serialize(String),

    #[error("deserialize: {0}")]
    Deserialize(String),

    /// A recomputed digest did not match the expected one. Fatal during lazy
    /// loading: it indicates store corruption.
    #[error("hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: Hash256, actual: Hash256 },

    #[error("sync not in progress")]
    SyncNotInProgress,

    #[error("sync root already set")]
    RootAlreadySet,

    /// Item with a zero key or empty payload.
    #[error("nil item")]
    NilItem,

    /// Failure reported by the backing store.
    #[error("store: {0}")]
    Store(String),
}

impl ShamapError {
    pub(crate) fn store(err: anyhow::Error) -> Self {
        ShamapError::Store(err.to_string())
    }
}
