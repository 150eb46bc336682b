// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
//! A persistent, authenticated, radix-16 Merkle-Patricia state map.
//!
//! [`SHAMap`] binds 256-bit keys to opaque payloads and produces a
//! deterministic 256-bit root digest summarizing its entire contents: two
//! maps with equal roots are guaranteed to hold identical key/value sets,
//! and any divergence can be localized by descending where child digests
//! differ. The same data model serves three operating modes:
//!
//! - fully-resident mutable maps, rebuilt copy-on-write along the mutated
//!   spine;
//! - backed maps, whose canonical node records live in a [`Family`] keyed by
//!   node digest and whose children materialize lazily on descent;
//! - syncing maps, reconstructed from untrusted peers one digest-verified
//!   node at a time.
//!
//! On top of the engine sit O(1) snapshots with structural sharing,
//! digest-short-circuited differencing, Merkle inclusion and non-inclusion
//! proofs, ordered iteration with bound queries, and incremental post-order
//! flushing of dirty nodes.

mod error;
mod hash;
mod item;
mod map;
mod node;
pub mod proof;
mod store;
mod update_set;

pub use error::{Result, ShamapError};
pub use hash::{sha512_half, Hash256, HashPrefix};
pub use item::Item;
pub use map::compare::{Delta, DeltaSet};
pub use map::iterator::MapIterator;
pub use map::sync::NodeID;
pub use map::{MapState, MapType, SHAMap};
pub use node::{Child, InnerNode, LeafNode, LeafType, Node};
pub use proof::{
    verify_non_inclusion, verify_proof, verify_proof_value, Proof, ProofError, ProofFailure,
};
pub use store::{Family, MemoryFamily};
pub use update_set::UpdateSet;
