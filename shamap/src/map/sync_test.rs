// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

use super::sync::NodeID;
use super::test_helper::{build_state_map, random_kvs};
use crate::error::ShamapError;
use crate::hash::Hash256;
use crate::map::{MapState, MapType, SHAMap};
use std::collections::HashMap;

/// Flushes `source` and plays the sync protocol against `target` using the
/// flushed records as the peer.
fn sync_from(source: &mut SHAMap, target: &mut SHAMap) -> usize {
    let records: HashMap<Hash256, Vec<u8>> =
        source.flush_dirty(false).unwrap().into_iter().collect();
    let root = source.digest();

    target.start_sync().unwrap();
    target
        .add_root_node(root, records.get(&root).unwrap())
        .unwrap();

    let mut rounds = 0;
    loop {
        let missing = target.missing_nodes(16, |_| false).unwrap();
        if missing.is_empty() {
            break;
        }
        rounds += 1;
        for (_, digest) in missing {
            target
                .add_known_node(digest, records.get(&digest).unwrap())
                .unwrap();
        }
    }
    target.finish_sync().unwrap();
    rounds
}

#[test]
fn test_sync_roundtrip() {
    let kvs = random_kvs(67, 50);
    let mut source = build_state_map(&kvs);
    let mut target = SHAMap::new(MapType::State);
    sync_from(&mut source, &mut target);

    assert_eq!(target.state(), MapState::Modifying);
    assert!(target.is_complete());
    assert_eq!(target.digest(), source.digest());
    for (k, v) in &kvs {
        assert_eq!(target.get(k).unwrap().unwrap().data(), v);
    }
    target.invariants().unwrap();

    // every synced node is dirty, so one flush persists the whole tree
    let batch = target.flush_dirty(false).unwrap();
    let (present, total) = target.progress();
    assert_eq!(present, total);
    assert_eq!(batch.len(), total);
    assert!(target.flush_dirty(false).unwrap().is_empty());
}

#[test]
fn test_flush_interleaved_with_sync() {
    let kvs = random_kvs(89, 40);
    let mut source = build_state_map(&kvs);
    let records: HashMap<Hash256, Vec<u8>> =
        source.flush_dirty(false).unwrap().into_iter().collect();
    let root = source.digest();

    let mut target = SHAMap::new(MapType::State);
    target.start_sync().unwrap();
    target.add_root_node(root, records.get(&root).unwrap()).unwrap();

    // flush between every round of arrivals; attaching must re-dirty the
    // spine so no round's nodes are lost from the flushed stream
    let mut flushed: HashMap<Hash256, Vec<u8>> = HashMap::new();
    flushed.extend(target.flush_dirty(false).unwrap());
    loop {
        let missing = target.missing_nodes(8, |_| false).unwrap();
        if missing.is_empty() {
            break;
        }
        for (_, digest) in missing {
            target
                .add_known_node(digest, records.get(&digest).unwrap())
                .unwrap();
        }
        flushed.extend(target.flush_dirty(false).unwrap());
    }
    target.finish_sync().unwrap();

    assert_eq!(target.digest(), root);
    assert!(target.flush_dirty(false).unwrap().is_empty());
    assert_eq!(flushed, records);
    for (k, v) in &kvs {
        assert_eq!(target.get(k).unwrap().unwrap().data(), v);
    }
}

#[test]
fn test_sync_progress_is_monotonic() {
    let kvs = random_kvs(71, 40);
    let mut source = build_state_map(&kvs);
    let records: HashMap<Hash256, Vec<u8>> =
        source.flush_dirty(false).unwrap().into_iter().collect();
    let root = source.digest();

    let mut target = SHAMap::new(MapType::State);
    target.start_sync().unwrap();
    assert!(target.is_syncing());
    assert!(!target.is_complete());
    target.add_root_node(root, records.get(&root).unwrap()).unwrap();

    let mut last_present = 0;
    loop {
        let (present, total) = target.progress();
        assert!(present >= last_present);
        assert!(present <= total);
        last_present = present;

        let missing = target.missing_nodes(4, |_| false).unwrap();
        if missing.is_empty() {
            break;
        }
        assert!(missing.len() <= 4);
        for (id, digest) in missing {
            assert!(id.depth() >= 1);
            target.add_known_node(digest, records.get(&digest).unwrap()).unwrap();
        }
    }
    target.finish_sync().unwrap();
    let (present, total) = target.progress();
    assert_eq!(present, total);
}

#[test]
fn test_sync_filter_skips_known_digests() {
    let kvs = random_kvs(73, 20);
    let mut source = build_state_map(&kvs);
    source.flush_dirty(false).unwrap();
    let root = source.digest();

    let records: HashMap<Hash256, Vec<u8>> = {
        let mut resend = build_state_map(&kvs);
        resend.flush_dirty(false).unwrap().into_iter().collect()
    };

    let mut target = SHAMap::new(MapType::State);
    target.start_sync().unwrap();
    target.add_root_node(root, records.get(&root).unwrap()).unwrap();

    let all = target.missing_nodes(0, |_| false).unwrap();
    let none = target.missing_nodes(0, |_| true).unwrap();
    assert!(!all.is_empty());
    assert!(none.is_empty());
}

#[test]
fn test_sync_protocol_misuse() {
    let kvs = random_kvs(79, 10);
    let mut source = build_state_map(&kvs);
    let records: HashMap<Hash256, Vec<u8>> =
        source.flush_dirty(false).unwrap().into_iter().collect();
    let root = source.digest();
    let root_bytes = records.get(&root).unwrap();

    // protocol calls outside Syncing
    let mut target = SHAMap::new(MapType::State);
    assert_eq!(
        target.add_root_node(root, root_bytes).unwrap_err(),
        ShamapError::SyncNotInProgress
    );
    assert_eq!(
        target.add_known_node(root, root_bytes).unwrap_err(),
        ShamapError::SyncNotInProgress
    );
    assert_eq!(target.finish_sync().unwrap_err(), ShamapError::SyncNotInProgress);

    target.start_sync().unwrap();

    // mutation requires Modifying
    assert_eq!(
        target.put(Hash256::random(), vec![1u8]).unwrap_err(),
        ShamapError::InvalidState(MapState::Syncing)
    );

    // digest mismatch on the root record
    assert!(matches!(
        target.add_root_node(Hash256::random(), root_bytes).unwrap_err(),
        ShamapError::HashMismatch { .. }
    ));

    // finishing with missing nodes reports the first absent digest
    target.add_root_node(root, root_bytes).unwrap();
    assert!(matches!(
        target.finish_sync().unwrap_err(),
        ShamapError::NodeNotFound(_)
    ));

    // the root slot is taken now
    assert_eq!(
        target.add_root_node(root, root_bytes).unwrap_err(),
        ShamapError::RootAlreadySet
    );

    // a node nothing references is rejected
    let unrelated = {
        let mut other = build_state_map(&random_kvs(83, 5));
        other.flush_dirty(false).unwrap()
    };
    let foreign = unrelated
        .iter()
        .find(|(digest, _)| !records.contains_key(digest))
        .unwrap();
    assert_eq!(
        target.add_known_node(foreign.0, &foreign.1).unwrap_err(),
        ShamapError::ItemNotFound
    );

    // start_sync is refused outside Modifying
    assert_eq!(target.start_sync().unwrap_err(), ShamapError::InvalidState(MapState::Syncing));
    let mut frozen = SHAMap::new(MapType::State);
    frozen.set_immutable();
    assert_eq!(frozen.start_sync().unwrap_err(), ShamapError::Immutable);
}

#[test]
fn test_node_id_wire_form() {
    let root = NodeID::root();
    assert_eq!(root.depth(), 0);
    assert!(root.path().is_zero());

    let id = root.child(0xB).child(0x9).child(0x2);
    assert_eq!(id.depth(), 3);
    assert_eq!(id.path().nibble(0), 0xB);
    assert_eq!(id.path().nibble(1), 0x9);
    assert_eq!(id.path().nibble(2), 0x2);
    assert_eq!(id.path().nibble(3), 0x0);

    let bytes = id.to_bytes();
    assert_eq!(bytes.len(), NodeID::WIRE_LEN);
    assert_eq!(bytes[32], 3);
    assert_eq!(NodeID::from_bytes(&bytes).unwrap(), id);

    assert!(NodeID::from_bytes(&bytes[..32]).is_err());
    let mut deep = bytes;
    deep[32] = 65;
    assert!(NodeID::from_bytes(&deep).is_err());
}
