//! In-memory index over record positions (spec.md §4.4) — C4 Index.
//!
//! One backend is implemented: an ordered B-tree map. `IndexType::Art` is
//! reserved in [`crate::options`] but rejected at [`crate::engine::Engine::open`];
//! there is no ART implementation behind it.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::record::RecordPosition;

/// Indexer capability: map a key to the position of its most recent record.
/// Implementations serialize their own internal state — callers may hold
/// only the engine's read guard and still call `put`/`delete` safely, per
/// spec.md §4.4's "Concurrency" clause.
pub trait Index: Send + Sync {
    /// Insert or overwrite the position for `key`. Returns the previous
    /// position, if any.
    fn put(&self, key: Vec<u8>, position: RecordPosition) -> Option<RecordPosition>;
    /// Look up the current position for `key`.
    fn get(&self, key: &[u8]) -> Option<RecordPosition>;
    /// Remove `key`. Returns the removed position, if any.
    fn delete(&self, key: &[u8]) -> Option<RecordPosition>;
    /// Number of live keys.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `BTreeMap`-backed index, guarded by its own lock so it may be shared
/// under either the engine's read or write guard.
#[derive(Default)]
pub struct BTreeIndex {
    inner: RwLock<BTreeMap<Vec<u8>, RecordPosition>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Index for BTreeIndex {
    fn put(&self, key: Vec<u8>, position: RecordPosition) -> Option<RecordPosition> {
        self.inner.write().insert(key, position)
    }

    fn get(&self, key: &[u8]) -> Option<RecordPosition> {
        self.inner.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Option<RecordPosition> {
        self.inner.write().remove(key)
    }

    fn len(&self) -> usize {
        self.inner.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(file_id: u32, offset: i64) -> RecordPosition {
        RecordPosition { file_id, offset }
    }

    #[test]
    fn put_then_get_returns_latest_position() {
        let index = BTreeIndex::new();
        assert!(index.put(b"k".to_vec(), pos(0, 0)).is_none());
        let prev = index.put(b"k".to_vec(), pos(0, 42));
        assert_eq!(prev, Some(pos(0, 0)));
        assert_eq!(index.get(b"k"), Some(pos(0, 42)));
    }

    #[test]
    fn delete_removes_key() {
        let index = BTreeIndex::new();
        index.put(b"k".to_vec(), pos(0, 0));
        assert_eq!(index.delete(b"k"), Some(pos(0, 0)));
        assert_eq!(index.get(b"k"), None);
        assert!(index.delete(b"k").is_none());
    }

    #[test]
    fn len_tracks_live_keys() {
        let index = BTreeIndex::new();
        assert!(index.is_empty());
        index.put(b"a".to_vec(), pos(0, 0));
        index.put(b"b".to_vec(), pos(0, 1));
        assert_eq!(index.len(), 2);
        index.delete(b"a");
        assert_eq!(index.len(), 1);
    }
}
