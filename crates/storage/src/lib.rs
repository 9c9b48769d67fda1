#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
//! Persistent key-value storage for the NHB validator core.
//!
//! One `redb` database file, one byte-map table. The key layout lives in
//! `nhb_types::keys`; this crate only moves bytes. [`MemStore`] is the
//! in-memory double used across the workspace's tests.

use std::path::Path;

use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use nhb_api::storage::KvStore;
use nhb_types::error::StateError;

const STATE_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("nhb_state");

/// The process-exclusive on-disk store.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Opens (or creates) the database at `path` and ensures the state
    /// table exists.
    pub fn open(path: &Path) -> Result<Self, StateError> {
        let db = Database::create(path).map_err(|e| StateError::Backend(e.to_string()))?;
        let txn = db
            .begin_write()
            .map_err(|e| StateError::Backend(e.to_string()))?;
        txn.open_table(STATE_TABLE)
            .map_err(|e| StateError::Backend(e.to_string()))?;
        txn.commit().map_err(|e| StateError::Backend(e.to_string()))?;
        debug!(target: "storage", path = %path.display(), "opened state database");
        Ok(RedbStore { db })
    }
}

impl KvStore for RedbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| StateError::Backend(e.to_string()))?;
        let table = txn
            .open_table(STATE_TABLE)
            .map_err(|e| StateError::Backend(e.to_string()))?;
        let value = table
            .get(key)
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StateError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| StateError::Backend(e.to_string()))?;
        let table = txn
            .open_table(STATE_TABLE)
            .map_err(|e| StateError::Backend(e.to_string()))?;
        let mut out = Vec::new();
        let iter = table
            .range(prefix..)
            .map_err(|e| StateError::Backend(e.to_string()))?;
        for entry in iter {
            let (key, value) = entry.map_err(|e| StateError::Backend(e.to_string()))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            out.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(out)
    }

    fn apply_batch(&self, writes: &[(Vec<u8>, Option<Vec<u8>>)]) -> Result<(), StateError> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| StateError::WriteError(e.to_string()))?;
        {
            let mut table = txn
                .open_table(STATE_TABLE)
                .map_err(|e| StateError::WriteError(e.to_string()))?;
            for (key, value) in writes {
                match value {
                    Some(v) => {
                        table
                            .insert(key.as_slice(), v.as_slice())
                            .map_err(|e| StateError::WriteError(e.to_string()))?;
                    }
                    None => {
                        table
                            .remove(key.as_slice())
                            .map_err(|e| StateError::WriteError(e.to_string()))?;
                    }
                }
            }
        }
        txn.commit().map_err(|e| StateError::WriteError(e.to_string()))
    }
}

/// In-memory store used in tests across the workspace.
#[derive(Default)]
pub struct MemStore {
    map: Mutex<std::collections::BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StateError> {
        Ok(self
            .map
            .lock()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply_batch(&self, writes: &[(Vec<u8>, Option<Vec<u8>>)]) -> Result<(), StateError> {
        let mut map = self.map.lock();
        for (key, value) in writes {
            match value {
                Some(v) => {
                    map.insert(key.clone(), v.clone());
                }
                None => {
                    map.remove(key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KvStore) {
        store
            .apply_batch(&[
                (b"acct/aa".to_vec(), Some(b"1".to_vec())),
                (b"acct/ab".to_vec(), Some(b"2".to_vec())),
                (b"block/00".to_vec(), Some(b"3".to_vec())),
            ])
            .unwrap();

        assert_eq!(store.get(b"acct/aa").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"missing").unwrap(), None);

        let accts = store.scan_prefix(b"acct/").unwrap();
        assert_eq!(accts.len(), 2);
        assert_eq!(accts[0].0, b"acct/aa".to_vec());

        store
            .apply_batch(&[(b"acct/aa".to_vec(), None)])
            .unwrap();
        assert_eq!(store.get(b"acct/aa").unwrap(), None);
    }

    #[test]
    fn mem_store_basics() {
        exercise(&MemStore::new());
    }

    #[test]
    fn redb_store_basics_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            exercise(&store);
        }
        // Values survive a reopen.
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.get(b"acct/ab").unwrap(), Some(b"2".to_vec()));
    }
}
