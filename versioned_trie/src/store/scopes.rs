//! Scoped views over the [`TrieStore`].
//!
//! A scope pins down which logical trie a `(path, hash)` pair refers to.
//! They are plain composed structs, not a hierarchy: the read-only view
//! wraps the full store (plus an optional override byte-store for
//! historical point-in-time reads), and the storage scope wraps the store
//! with the owning account's hashed key.

use std::sync::Arc;

use bytes::Bytes;
use ethereum_types::H256;
use log::trace;

use super::{
    flags::ReadHints,
    kv::KeyValueStore,
    trie_store::TrieStore,
    NodeKey, NodeSink, NodeSource, TrieStoreError,
};
use crate::nibbles::Nibbles;

/// The global account-trie scope.
#[derive(Clone, Debug)]
pub struct StateScope {
    store: Arc<TrieStore>,
}

impl StateScope {
    /// Creates a scope over the global state trie.
    pub fn new(store: Arc<TrieStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<TrieStore> {
        &self.store
    }
}

impl NodeSource for StateScope {
    fn load_rlp(
        &self,
        path: &Nibbles,
        hash: H256,
        hints: ReadHints,
    ) -> Result<Bytes, TrieStoreError> {
        self.store.load_rlp(&NodeKey::state(*path, hash), hints)
    }
}

impl NodeSink for StateScope {
    fn commit_node(
        &self,
        block: u64,
        path: &Nibbles,
        hash: H256,
        rlp: Bytes,
    ) -> Result<(), TrieStoreError> {
        self.store.commit_node(block, NodeKey::state(*path, hash), rlp)
    }
}

/// The scope of one account's storage subtree.
#[derive(Clone, Debug)]
pub struct StorageScope {
    store: Arc<TrieStore>,
    account: H256,
}

impl StorageScope {
    /// Creates a scope over the storage trie owned by `account` (the hashed
    /// account key).
    pub fn new(store: Arc<TrieStore>, account: H256) -> Self {
        Self { store, account }
    }

    /// The owning account's hashed key.
    pub fn account(&self) -> H256 {
        self.account
    }
}

impl NodeSource for StorageScope {
    fn load_rlp(
        &self,
        path: &Nibbles,
        hash: H256,
        hints: ReadHints,
    ) -> Result<Bytes, TrieStoreError> {
        self.store
            .load_rlp(&NodeKey::storage(self.account, *path, hash), hints)
    }
}

impl NodeSink for StorageScope {
    fn commit_node(
        &self,
        block: u64,
        path: &Nibbles,
        hash: H256,
        rlp: Bytes,
    ) -> Result<(), TrieStoreError> {
        self.store
            .commit_node(block, NodeKey::storage(self.account, *path, hash), rlp)
    }
}

/// A read-only view over the store for a given scope.
///
/// Writes are intercepted as no-ops, so any number of `commit_node` calls
/// leave both the cache and the backing store untouched. Reads consult the
/// wrapped store's cache first, then the override byte-store when one is
/// configured, then the wrapped store's own backing store.
#[derive(Clone, Debug)]
pub struct ReadOnlyScope {
    store: Arc<TrieStore>,
    scope: Option<H256>,
    override_db: Option<Arc<dyn KeyValueStore>>,
}

impl ReadOnlyScope {
    /// A read-only view of the global state trie.
    pub fn state(store: Arc<TrieStore>) -> Self {
        Self {
            store,
            scope: None,
            override_db: None,
        }
    }

    /// A read-only view of `account`'s storage trie.
    pub fn storage(store: Arc<TrieStore>, account: H256) -> Self {
        Self {
            store,
            scope: Some(account),
            override_db: None,
        }
    }

    /// Answers backing-store reads from `db` instead of the wrapped store's
    /// own database, for historical point-in-time views.
    pub fn with_override_db(mut self, db: Arc<dyn KeyValueStore>) -> Self {
        self.override_db = Some(db);
        self
    }
}

impl NodeSource for ReadOnlyScope {
    fn load_rlp(
        &self,
        path: &Nibbles,
        hash: H256,
        hints: ReadHints,
    ) -> Result<Bytes, TrieStoreError> {
        let key = NodeKey {
            scope: self.scope,
            path: *path,
            hash,
        };

        if let Some(rlp) = self.store.cached_rlp(&key) {
            return Ok(rlp);
        }

        let persisted = match &self.override_db {
            Some(db) => db.get(&key.db_key(), hints)?,
            None => self.store.db_get(&key, hints)?,
        };

        persisted.ok_or(TrieStoreError::NodeNotFound {
            scope: key.scope,
            path: key.path,
            hash: key.hash,
        })
    }
}

impl NodeSink for ReadOnlyScope {
    fn commit_node(
        &self,
        block: u64,
        _path: &Nibbles,
        hash: H256,
        _rlp: Bytes,
    ) -> Result<(), TrieStoreError> {
        trace!("read-only store dropped commit of node {:x} for block {}", hash, block);
        Ok(())
    }
}
