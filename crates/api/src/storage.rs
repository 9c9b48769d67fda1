//! Storage access traits.

use nhb_types::error::StateError;

/// The persistent byte-map store.
///
/// One process-exclusive instance is opened at startup; the node façade
/// serialises all access behind its lock, so implementations only need
/// interior consistency per call.
pub trait KvStore: Send + Sync {
    /// Reads a single key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError>;

    /// Returns all pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StateError>;

    /// Applies a batch atomically. `None` deletes the key.
    fn apply_batch(&self, writes: &[(Vec<u8>, Option<Vec<u8>>)]) -> Result<(), StateError>;
}

/// Mutable view over state used by the transaction modules.
///
/// The state processor hands modules a scratch overlay implementing this
/// trait; nothing a module writes is visible outside the transaction until
/// the processor merges the scratch on success.
pub trait StateAccess {
    /// Reads a key through the overlay.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError>;

    /// Writes a key into the overlay.
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), StateError>;

    /// Deletes a key in the overlay.
    fn remove(&mut self, key: &[u8]) -> Result<(), StateError>;
}
