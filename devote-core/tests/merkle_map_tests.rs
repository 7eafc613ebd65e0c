//! Integration tests for committed authenticated maps

use devote_core::{AuthenticatedMap, Database, Hash, MemoryDatabase, MerkleMap, Table, TrieError};
use proptest::prelude::*;
use devote_core::Result;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn shared_db() -> Arc<dyn Database> {
    MemoryDatabase::shared()
}

/// Database that counts the value bytes written through it
#[derive(Debug, Default)]
struct CountingDatabase {
    inner: MemoryDatabase,
    written: AtomicUsize,
}

impl CountingDatabase {
    fn take_written(&self) -> usize {
        self.written.swap(0, Ordering::SeqCst)
    }
}

impl Database for CountingDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.written.fetch_add(value.len(), Ordering::SeqCst);
        self.inner.put(key, value)
    }
}

/// Rotation-style key: big-endian cycle followed by a witness address
fn rotation_key(cycle: u64, witness: u8) -> Vec<u8> {
    let mut key = cycle.to_be_bytes().to_vec();
    key.extend_from_slice(&[witness; 20]);
    key
}

#[test]
fn test_commit_and_reopen() {
    let db = shared_db();
    let mut map = MerkleMap::empty(Table::new(db.clone(), "vote-"));
    map.put(b"delegator-1", b"node-a").unwrap();
    map.put(b"delegator-2", b"node-b").unwrap();
    let root = map.commit().unwrap();
    assert!(!root.is_zero());

    let reopened = MerkleMap::open(root, Table::new(db, "vote-")).unwrap();
    assert_eq!(reopened.root(), root);
    assert_eq!(reopened.get(b"delegator-2").unwrap(), Some(b"node-b".to_vec()));
    assert_eq!(reopened.len(), 2);
}

#[test]
fn test_historical_roots_stay_readable() {
    let db = shared_db();
    let mut map = MerkleMap::empty(Table::new(db.clone(), "cycle-"));
    map.put(b"witness", b"v1").unwrap();
    let first = map.commit().unwrap();
    map.put(b"witness", b"v2").unwrap();
    let second = map.commit().unwrap();

    let old = MerkleMap::open(first, Table::new(db.clone(), "cycle-")).unwrap();
    let new = MerkleMap::open(second, Table::new(db, "cycle-")).unwrap();
    assert_eq!(old.get(b"witness").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(new.get(b"witness").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn test_open_unknown_root_fails() {
    let result = MerkleMap::open(Hash([9u8; 32]), Table::new(shared_db(), "cache-"));
    assert!(matches!(result, Err(TrieError::MissingRoot(_))));
}

#[test]
fn test_open_in_wrong_namespace_fails() {
    let db = shared_db();
    let mut map = MerkleMap::empty(Table::new(db.clone(), "vote-"));
    map.put(b"k", b"v").unwrap();
    let root = map.commit().unwrap();

    let result = MerkleMap::open(root, Table::new(db, "cache-"));
    assert!(matches!(result, Err(TrieError::MissingRoot(_))));
}

#[test]
fn test_open_detects_corruption() {
    let db = shared_db();
    let mut map = MerkleMap::empty(Table::new(db.clone(), "mintCnt-"));
    map.put(b"k", b"v").unwrap();
    let root = map.commit().unwrap();

    let mut other = MerkleMap::empty(Table::new(db.clone(), "voteCnt-"));
    other.put(b"k", b"forged").unwrap();
    let other_root = other.commit().unwrap();

    let forged = db
        .get(&[b"voteCnt-".as_slice(), other_root.as_bytes()].concat())
        .unwrap()
        .unwrap();
    db.put(&[b"mintCnt-".as_slice(), root.as_bytes()].concat(), &forged)
        .unwrap();

    let result = MerkleMap::open(root, Table::new(db, "mintCnt-"));
    assert!(matches!(
        result,
        Err(TrieError::Corrupted { expected, actual }) if expected == root && actual == other_root
    ));
}

#[test]
fn test_commit_writes_only_changed_nodes() {
    let counting = Arc::new(CountingDatabase::default());
    let db: Arc<dyn Database> = counting.clone();
    let mut map = MerkleMap::empty(Table::new(db, "mintCnt-"));

    for cycle in 0..50u64 {
        for witness in 0..20u8 {
            map.put(&rotation_key(cycle, witness), &cycle.to_be_bytes())
                .unwrap();
        }
        map.commit().unwrap();
    }
    let bulk = counting.take_written();

    map.put(&rotation_key(50, 0), &50u64.to_be_bytes()).unwrap();
    map.commit().unwrap();
    let single = counting.take_written();

    assert!(single > 0);
    assert!(single < 4096, "one key wrote {single} bytes");
    assert!(single * 50 < bulk, "one key wrote {single} of {bulk} bytes");

    map.commit().unwrap();
    assert_eq!(counting.take_written(), 0);
}

#[test]
fn test_root_after_many_small_commits_reopens() {
    let db = shared_db();
    let mut map = MerkleMap::empty(Table::new(db.clone(), "mintCnt-"));
    let mut roots = Vec::new();

    for cycle in 0..30u64 {
        map.put(&rotation_key(cycle, (cycle % 5) as u8), b"1").unwrap();
        if cycle % 3 == 0 && cycle > 0 {
            map.delete(&rotation_key(cycle - 3, ((cycle - 3) % 5) as u8))
                .unwrap();
        }
        roots.push((map.commit().unwrap(), map.len()));
    }

    for (root, len) in roots {
        let reopened = MerkleMap::open(root, Table::new(db.clone(), "mintCnt-")).unwrap();
        assert_eq!(reopened.root(), root);
        assert_eq!(reopened.len(), len);
    }
}

#[test]
fn test_commit_without_changes_is_stable() {
    let mut map = MerkleMap::empty(Table::new(shared_db(), "vote-"));
    assert_eq!(map.commit().unwrap(), Hash::ZERO);
    map.put(b"a", b"1").unwrap();
    let root = map.commit().unwrap();
    assert_eq!(map.commit().unwrap(), root);
    assert_eq!(map.committed_root(), root);
}

proptest! {
    #[test]
    fn prop_root_ignores_insertion_order(
        entries in proptest::collection::btree_map(
            proptest::collection::vec(any::<u8>(), 1..8),
            proptest::collection::vec(any::<u8>(), 0..8),
            0..24,
        )
    ) {
        let mut forward = MerkleMap::empty(Table::new(shared_db(), "f-"));
        for (k, v) in entries.iter() {
            forward.put(k, v).unwrap();
        }
        let mut backward = MerkleMap::empty(Table::new(shared_db(), "b-"));
        for (k, v) in entries.iter().rev() {
            backward.put(k, v).unwrap();
        }
        prop_assert_eq!(forward.root(), backward.root());
    }

    #[test]
    fn prop_overlay_matches_model(
        ops in proptest::collection::vec(
            (proptest::collection::vec(0u8..4, 1..3), proptest::option::of(any::<u8>())),
            0..40,
        )
    ) {
        let mut map = MerkleMap::empty(Table::new(shared_db(), "m-"));
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for (i, (key, value)) in ops.iter().enumerate() {
            match value {
                Some(v) => {
                    map.put(key, &[*v]).unwrap();
                    model.insert(key.clone(), vec![*v]);
                }
                None => {
                    let removed = map.delete(key);
                    prop_assert_eq!(removed.is_ok(), model.remove(key).is_some());
                }
            }
            if i % 7 == 0 {
                map.commit().unwrap();
            }
        }

        let actual: Vec<(Vec<u8>, Vec<u8>)> = map
            .iter_prefix(&[])
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        let expected: Vec<(Vec<u8>, Vec<u8>)> = model.into_iter().collect();
        prop_assert_eq!(actual, expected);
    }
}
