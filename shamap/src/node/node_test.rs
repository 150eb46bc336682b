// Copyright (c) Kanari Network
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::error::ShamapError;

fn test_item(key_byte: u8, data: &[u8]) -> Item {
    Item::new(Hash256::new([key_byte; 32]), data.to_vec()).unwrap()
}

#[test]
fn test_leaf_digest_preimages() {
    let item = test_item(0xAB, &[1, 2, 3]);

    let state = LeafNode::new(item.clone(), LeafType::AccountState);
    assert_eq!(
        state.digest(),
        sha512_half(&[b"MLN\0", &[1, 2, 3], &[0xAB; 32]])
    );

    let tx = LeafNode::new(item.clone(), LeafType::Transaction);
    assert_eq!(tx.digest(), sha512_half(&[b"TXN\0", &[1, 2, 3]]));

    let meta = LeafNode::new(item, LeafType::TransactionMeta);
    assert_eq!(
        meta.digest(),
        sha512_half(&[b"SND\0", &[1, 2, 3], &[0xAB; 32]])
    );
}

#[test]
fn test_leaf_records() {
    let item = test_item(0xCD, &[9, 8, 7]);

    let state = LeafNode::new(item.clone(), LeafType::AccountState);
    let record = state.serialize();
    assert_eq!(&record[..4], b"MLN\0");
    assert_eq!(&record[4..7], &[9, 8, 7]);
    assert_eq!(&record[7..], &[0xCD; 32]);
    // the record is its own digest preimage
    assert_eq!(sha512_half(&[&record]), state.digest());

    let tx = LeafNode::new(item, LeafType::Transaction);
    let record = tx.serialize();
    assert_eq!(&record[..4], b"TXN\0");
    assert_eq!(record.len(), 7);
    assert_eq!(sha512_half(&[&record]), tx.digest());
}

#[test]
fn test_keyed_leaf_roundtrip() {
    for kind in [LeafType::AccountState, LeafType::TransactionMeta] {
        let leaf = LeafNode::new(test_item(0x42, &[5, 5, 5, 5]), kind);
        let node = Node::deserialize(&leaf.serialize()).unwrap();
        assert!(!node.is_dirty());
        let decoded = node.as_leaf().unwrap();
        assert_eq!(decoded.kind(), kind);
        assert_eq!(decoded.item(), leaf.item());
        assert_eq!(decoded.digest(), leaf.digest());
    }
}

#[test]
fn test_transaction_leaf_key_is_record_digest() {
    // TXN records carry no key; decoding derives it from the record itself
    let leaf = LeafNode::new(test_item(0x42, &[1, 2, 3, 4]), LeafType::Transaction);
    let node = Node::deserialize(&leaf.serialize()).unwrap();
    let decoded = node.as_leaf().unwrap();
    assert_eq!(decoded.digest(), leaf.digest());
    assert_eq!(*decoded.item().key(), leaf.digest());
    assert_eq!(decoded.item().data(), leaf.item().data());
}

#[test]
fn test_set_item_reports_digest_change() {
    let mut leaf = LeafNode::new(test_item(0x01, &[1]), LeafType::AccountState);
    let digest = leaf.digest();
    assert!(!leaf.set_item(test_item(0x01, &[1])));
    assert_eq!(leaf.digest(), digest);
    assert!(leaf.set_item(test_item(0x01, &[2])));
    assert_ne!(leaf.digest(), digest);
}

#[test]
fn test_inner_record_layout() {
    let leaf = Arc::new(Node::Leaf(LeafNode::new(
        test_item(0x33, &[1]),
        LeafType::AccountState,
    )));
    let leaf_digest = leaf.digest();
    let mut inner = InnerNode::new_empty();
    inner.set_child(0x3, Some(leaf));

    let record = inner.serialize();
    assert_eq!(record.len(), INNER_RECORD_LEN);
    assert_eq!(&record[..4], b"MIN\0");
    for branch in 0..BRANCH_FACTOR {
        let slot = &record[4 + branch * Hash256::LEN..4 + (branch + 1) * Hash256::LEN];
        if branch == 0x3 {
            assert_eq!(slot, leaf_digest.as_bytes());
        } else {
            assert_eq!(slot, &[0u8; 32]);
        }
    }
    // preimage and record coincide
    assert_eq!(sha512_half(&[&record]), inner.digest());
}

#[test]
fn test_inner_digest_and_bitmap() {
    let mut inner = InnerNode::new_empty();
    assert!(inner.is_empty());
    assert_eq!(inner.digest(), Hash256::ZERO);
    assert_eq!(inner.branch_bitmap(), 0);

    let leaf_a = Arc::new(Node::Leaf(LeafNode::new(
        test_item(0x05, &[1]),
        LeafType::AccountState,
    )));
    let leaf_b = Arc::new(Node::Leaf(LeafNode::new(
        test_item(0xF0, &[2]),
        LeafType::AccountState,
    )));
    inner.set_child(0, Some(leaf_a));
    inner.set_child(15, Some(leaf_b));
    assert_eq!(inner.branch_count(), 2);
    assert_eq!(inner.branch_bitmap(), 0b1000_0000_0000_0001);
    assert!(!inner.is_empty_slot(0));
    assert!(inner.is_empty_slot(7));
    assert_eq!(inner.computed_digest(), inner.digest());

    // clearing a slot updates digest and bitmap
    let digest_two = inner.digest();
    inner.set_child(15, None);
    assert_ne!(inner.digest(), digest_two);
    assert_eq!(inner.branch_bitmap(), 0b0000_0000_0000_0001);

    // emptying the node returns it to the zero digest
    inner.set_child(0, None);
    assert_eq!(inner.digest(), Hash256::ZERO);
}

#[test]
fn test_inner_roundtrip_is_lazy_and_clean() {
    let leaf = Arc::new(Node::Leaf(LeafNode::new(
        test_item(0x11, &[3]),
        LeafType::AccountState,
    )));
    let mut inner = InnerNode::new_empty();
    inner.set_child(0x1, Some(leaf));

    let node = Node::deserialize(&inner.serialize()).unwrap();
    assert!(!node.is_dirty());
    let decoded = node.as_inner().unwrap();
    assert_eq!(decoded.digest(), inner.digest());
    assert_eq!(decoded.branch_bitmap(), inner.branch_bitmap());
    assert_eq!(decoded.child_digest(0x1), inner.child_digest(0x1));
    // digests are present, subtrees are not
    assert!(decoded.get_child(0x1).is_none());
}

#[test]
fn test_attach_child_checks_digest() {
    let leaf = Arc::new(Node::Leaf(LeafNode::new(
        test_item(0x22, &[4]),
        LeafType::AccountState,
    )));
    let other = Arc::new(Node::Leaf(LeafNode::new(
        test_item(0x22, &[5]),
        LeafType::AccountState,
    )));
    let mut inner = InnerNode::new_empty();
    inner.set_child(0x2, Some(leaf.clone()));

    let mut lazy = Node::deserialize(&inner.serialize()).unwrap();
    let Node::Inner(lazy_inner) = &mut lazy else {
        panic!("expected inner");
    };
    assert!(matches!(
        lazy_inner.attach_child(0x2, other).unwrap_err(),
        ShamapError::HashMismatch { .. }
    ));
    assert!(matches!(
        lazy_inner.attach_child(0x5, leaf.clone()).unwrap_err(),
        ShamapError::ItemNotFound
    ));
    lazy_inner.attach_child(0x2, leaf.clone()).unwrap();
    assert!(lazy_inner.get_child(0x2).is_some());
    assert!(!lazy.is_dirty());
}

#[test]
fn test_clone_is_shallow() {
    let leaf = Arc::new(Node::Leaf(LeafNode::new(
        test_item(0x77, &[6]),
        LeafType::AccountState,
    )));
    let mut inner = InnerNode::new_empty();
    inner.set_child(0x7, Some(leaf.clone()));

    let copy = inner.clone();
    assert_eq!(copy.digest(), inner.digest());
    assert!(Arc::ptr_eq(copy.get_child(0x7).unwrap(), &leaf));
}

#[test]
fn test_decode_rejects_malformed_records() {
    // empty and short inputs
    assert!(Node::deserialize(&[]).is_err());
    assert!(Node::deserialize(b"MI").is_err());

    // unknown prefix
    assert!(Node::deserialize(b"XYZ\0payload").is_err());

    // wrong-size inner record
    let mut inner_record = b"MIN\0".to_vec();
    inner_record.extend_from_slice(&[0u8; 5 * 32]);
    assert!(Node::deserialize(&inner_record).is_err());

    // keyed leaf without payload
    let mut short_leaf = b"MLN\0".to_vec();
    short_leaf.extend_from_slice(&[0xAA; 32]);
    assert!(Node::deserialize(&short_leaf).is_err());

    // keyed leaf with a zero key
    let mut nil_leaf = b"MLN\0".to_vec();
    nil_leaf.push(0x01);
    nil_leaf.extend_from_slice(&[0u8; 32]);
    assert!(Node::deserialize(&nil_leaf).is_err());

    // transaction record with no payload at all
    assert!(Node::deserialize(b"TXN\0").is_err());
}
