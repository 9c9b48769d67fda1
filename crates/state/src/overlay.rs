//! Write overlays over the persistent store.
//!
//! The block layer accumulates the writes of every applied transaction; each
//! transaction additionally runs against its own scratch layer that merges
//! into the block layer only on success. This replaces in-place pointer
//! mutation with explicit begin/commit semantics.

use std::collections::BTreeMap;

use nhb_api::storage::{KvStore, StateAccess};
use nhb_types::codec::to_bytes_canonical;
use nhb_types::error::StateError;
use nhb_types::hashing::keccak256;
use nhb_types::Hash;

/// Namespaces excluded from the state root: block bodies and the head
/// pointer are chain metadata, not state.
const NON_STATE_PREFIXES: [&[u8]; 2] = [b"block/", b"chain/"];

fn is_state_key(key: &[u8]) -> bool {
    !NON_STATE_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// A buffered set of writes over a base store. `None` marks a deletion.
#[derive(Clone, Debug, Default)]
pub struct Overlay {
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Overlay {
    /// An empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads through the overlay into the base store.
    pub fn get(&self, base: &dyn KvStore, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => base.get(key),
        }
    }

    /// Buffers a write.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    /// Buffers a deletion.
    pub fn remove(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// Folds another overlay's writes on top of this one.
    pub fn merge(&mut self, newer: Overlay) {
        self.writes.extend(newer.writes);
    }

    /// Number of buffered writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether no writes are buffered.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// The buffered writes as a store batch.
    pub fn into_batch(self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        self.writes.into_iter().collect()
    }

    /// Iterates the buffered writes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Option<Vec<u8>>)> {
        self.writes.iter()
    }
}

/// The per-transaction scratch layer: reads fall through scratch, then the
/// block layer, then the base store; writes stay in scratch until the
/// processor merges them.
pub struct ScratchView<'a> {
    base: &'a dyn KvStore,
    block: &'a Overlay,
    scratch: Overlay,
}

impl<'a> ScratchView<'a> {
    /// A fresh scratch over the block layer.
    pub fn new(base: &'a dyn KvStore, block: &'a Overlay) -> Self {
        ScratchView {
            base,
            block,
            scratch: Overlay::new(),
        }
    }

    /// Consumes the view, yielding the scratch writes for merging.
    pub fn into_scratch(self) -> Overlay {
        self.scratch
    }
}

impl StateAccess for ScratchView<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        match self.scratch.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => self.block.get(self.base, key),
        }
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        self.scratch.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<(), StateError> {
        self.scratch.remove(key.to_vec());
        Ok(())
    }
}

/// Computes the deterministic root of the state resulting from applying
/// `overlay` to `base`.
///
/// The root is keccak over the canonical encoding of the sorted
/// `(key, keccak(value))` pairs of every state-namespace entry. Replaying
/// the same transactions over the same base always yields the same root.
pub fn compute_state_root(base: &dyn KvStore, overlay: &Overlay) -> Result<Hash, StateError> {
    let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    for (key, value) in base.scan_prefix(b"")? {
        if is_state_key(&key) {
            merged.insert(key, value);
        }
    }
    for (key, pending) in overlay.iter() {
        if !is_state_key(key) {
            continue;
        }
        match pending {
            Some(value) => {
                merged.insert(key.clone(), value.clone());
            }
            None => {
                merged.remove(key);
            }
        }
    }
    let digests: Vec<(Vec<u8>, Hash)> = merged
        .into_iter()
        .map(|(k, v)| (k, keccak256(&v)))
        .collect();
    Ok(keccak256(&to_bytes_canonical(&digests)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nhb_storage::MemStore;

    #[test]
    fn scratch_reads_through_layers() {
        let store = MemStore::new();
        store
            .apply_batch(&[(b"acct/x".to_vec(), Some(b"base".to_vec()))])
            .unwrap();

        let mut block = Overlay::new();
        block.insert(b"acct/y".to_vec(), b"block".to_vec());

        let mut scratch = ScratchView::new(&store, &block);
        assert_eq!(scratch.get(b"acct/x").unwrap(), Some(b"base".to_vec()));
        assert_eq!(scratch.get(b"acct/y").unwrap(), Some(b"block".to_vec()));

        scratch.insert(b"acct/x", b"scratch").unwrap();
        assert_eq!(scratch.get(b"acct/x").unwrap(), Some(b"scratch".to_vec()));

        // Discarding the view leaves the block layer untouched.
        drop(scratch);
        assert_eq!(block.get(&store, b"acct/x").unwrap(), Some(b"base".to_vec()));
    }

    #[test]
    fn root_ignores_chain_metadata() {
        let store = MemStore::new();
        let mut overlay = Overlay::new();
        overlay.insert(b"acct/x".to_vec(), b"1".to_vec());
        let root_before = compute_state_root(&store, &overlay).unwrap();

        overlay.insert(b"block/0001".to_vec(), b"body".to_vec());
        overlay.insert(b"chain/head".to_vec(), b"ptr".to_vec());
        let root_after = compute_state_root(&store, &overlay).unwrap();
        assert_eq!(root_before, root_after);

        overlay.insert(b"acct/y".to_vec(), b"2".to_vec());
        assert_ne!(root_after, compute_state_root(&store, &overlay).unwrap());
    }

    #[test]
    fn overlay_deletion_wins_over_base() {
        let store = MemStore::new();
        store
            .apply_batch(&[(b"acct/x".to_vec(), Some(b"1".to_vec()))])
            .unwrap();
        let mut overlay = Overlay::new();
        overlay.remove(b"acct/x".to_vec());
        assert_eq!(overlay.get(&store, b"acct/x").unwrap(), None);
    }
}
