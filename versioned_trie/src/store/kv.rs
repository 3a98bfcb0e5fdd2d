//! The seam to the underlying key-value byte store.

use std::{collections::HashMap, fmt::Debug};

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;

use super::flags::{ReadHints, WriteHints};

/// An I/O failure in the backing store. Propagated unchanged; retry policy
/// belongs to the store implementation, not this crate.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("backing store failure: {0}")]
pub struct StoreError(pub String);

/// The underlying key-value byte store. Implementations must preserve hint
/// flags verbatim down to whatever telemetry or backing medium they drive.
pub trait KeyValueStore: Debug + Send + Sync {
    /// Reads the value stored at `key`, or `None` if absent.
    fn get(&self, key: &[u8], hints: ReadHints) -> Result<Option<Bytes>, StoreError>;

    /// Stores `value` at `key`.
    fn set(&self, key: &[u8], value: Bytes, hints: WriteHints) -> Result<(), StoreError>;
}

/// An in-memory [`KeyValueStore`], the default backing for tests and light
/// usage.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<Vec<u8>, Bytes>>,
}

impl MemoryKeyValueStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &[u8], _hints: ReadHints) -> Result<Option<Bytes>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: Bytes, _hints: WriteHints) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_vec(), value);
        Ok(())
    }
}
