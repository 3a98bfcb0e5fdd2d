//! The block-windowed node store.
//!
//! The store is a single global state machine over block numbers. Nodes
//! committed for a block stay cache-resident until the block falls out of
//! the pruning window; at that point they are persisted to the backing
//! key-value store, evicted, and the reorg boundary advances. Blocks at or
//! below the boundary can no longer be rolled back.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use bytes::Bytes;
use ethereum_types::H256;
use log::{debug, trace};
use parking_lot::RwLock;

use super::{
    flags::{ReadHints, WriteHints},
    kv::KeyValueStore,
    NodeKey, TrieKind, TrieStoreError,
};
use crate::node::Node;

/// The default number of most-recent blocks whose nodes stay cache-resident.
///
/// Chosen to comfortably cover plausible reorganization depth: a rollback to
/// any block above the boundary only needs in-memory state, and anything
/// deeper is refused rather than served incorrectly.
pub const DEFAULT_PRUNING_DEPTH: u64 = 64;

#[derive(Default)]
struct StoreInner {
    /// Encoded nodes not yet persisted, keyed by identity. Shared by every
    /// scope; the scope is part of the key.
    cache: HashMap<NodeKey, Bytes>,
    /// Epoch tags: which identities each block committed. Eviction is a bulk
    /// removal of every epoch at or below the new lower bound.
    epochs: BTreeMap<u64, Vec<NodeKey>>,
    /// State roots per committed block, for opening historical views.
    state_roots: BTreeMap<u64, H256>,
    last_committed: Option<u64>,
    reorg_boundary: Option<u64>,
}

/// Owns the node cache across the pruning window and is the sole writer of
/// persisted node bytes.
///
/// Eviction takes the cache write lock, so it is mutually exclusive with any
/// in-flight resolution of the nodes being evicted; ordinary reads share the
/// read lock and never block each other.
#[derive(Debug)]
pub struct TrieStore {
    db: Arc<dyn KeyValueStore>,
    pruning_depth: u64,
    inner: RwLock<StoreInner>,
}

impl std::fmt::Debug for StoreInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreInner")
            .field("cached_nodes", &self.cache.len())
            .field("last_committed", &self.last_committed)
            .field("reorg_boundary", &self.reorg_boundary)
            .finish()
    }
}

impl TrieStore {
    /// Creates a store over `db` with the given pruning window depth.
    pub fn new(db: Arc<dyn KeyValueStore>, pruning_depth: u64) -> Self {
        Self {
            db,
            pruning_depth,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Creates a store with [`DEFAULT_PRUNING_DEPTH`].
    pub fn with_default_depth(db: Arc<dyn KeyValueStore>) -> Self {
        Self::new(db, DEFAULT_PRUNING_DEPTH)
    }

    /// Records a newly constructed node as belonging to `block`. The node is
    /// cached but not persisted.
    pub fn commit_node(
        &self,
        block: u64,
        key: NodeKey,
        rlp: Bytes,
    ) -> Result<(), TrieStoreError> {
        let mut inner = self.inner.write();

        if let Some(boundary) = inner.reorg_boundary {
            if block <= boundary {
                return Err(TrieStoreError::OutOfOrderCommit {
                    last: boundary,
                    got: block,
                });
            }
        }

        trace!("committing node {:x} at path {} for block {}", key.hash, key.path, block);

        if !inner.cache.contains_key(&key) {
            inner.cache.insert(key.clone(), rlp);
        }
        inner.epochs.entry(block).or_default().push(key);

        Ok(())
    }

    /// Marks a block's root as committed.
    ///
    /// State-trie commits must arrive in strictly increasing block order and
    /// drive the pruning check: when the new block pushes the oldest
    /// retained block out of the window, every node tagged at or below the
    /// new lower bound is persisted and evicted, and the advanced reorg
    /// boundary is returned. Storage-trie commits only record the subtree
    /// root and never prune.
    pub fn finish_block_commit(
        &self,
        kind: TrieKind,
        block: u64,
        root: H256,
    ) -> Result<Option<u64>, TrieStoreError> {
        if kind != TrieKind::State {
            return Ok(None);
        }

        let mut inner = self.inner.write();

        if let Some(last) = inner.last_committed {
            if block <= last {
                return Err(TrieStoreError::OutOfOrderCommit { last, got: block });
            }
        }

        inner.last_committed = Some(block);
        inner.state_roots.insert(block, root);
        debug!("finished state commit of block {} with root {:x}", block, root);

        self.prune_locked(&mut inner, block)
    }

    fn prune_locked(
        &self,
        inner: &mut StoreInner,
        block: u64,
    ) -> Result<Option<u64>, TrieStoreError> {
        let oldest_retained = match inner.epochs.keys().next() {
            Some(&b) => b,
            None => return Ok(None),
        };

        if block.saturating_sub(oldest_retained) <= self.pruning_depth {
            return Ok(None);
        }

        let bound = block - self.pruning_depth;
        let stale: Vec<u64> = inner.epochs.range(..=bound).map(|(&b, _)| b).collect();

        let mut persisted = 0usize;
        for b in stale {
            let keys = inner.epochs.remove(&b).unwrap_or_default();
            for key in keys {
                // A node recorded again by a newer block keeps the same
                // identity, so removal here persists it exactly once.
                if let Some(rlp) = inner.cache.remove(&key) {
                    self.db.set(&key.db_key(), rlp, WriteHints::default())?;
                    persisted += 1;
                }
            }
        }

        inner.state_roots = inner.state_roots.split_off(&bound);
        inner.reorg_boundary = Some(bound);
        debug!(
            "pruning window advanced: boundary now block {}, {} nodes persisted",
            bound, persisted
        );

        Ok(Some(bound))
    }

    /// Resolves a node's encoded bytes, consulting the cache before the
    /// backing store. A miss in both is fatal: it signals corruption or a
    /// logic bug, never a legitimate absence.
    pub fn load_rlp(&self, key: &NodeKey, hints: ReadHints) -> Result<Bytes, TrieStoreError> {
        if let Some(rlp) = self.inner.read().cache.get(key) {
            trace!("node cache hit for {:x} at path {}", key.hash, key.path);
            return Ok(rlp.clone());
        }

        match self.db.get(&key.db_key(), hints)? {
            Some(rlp) => Ok(rlp),
            None => Err(TrieStoreError::NodeNotFound {
                scope: key.scope,
                path: key.path,
                hash: key.hash,
            }),
        }
    }

    /// Returns the decoded node if it is cache-resident, or a
    /// [`Node::Hash`] placeholder to be resolved later.
    pub fn find_cached_or_unknown(&self, key: &NodeKey) -> Result<Node, TrieStoreError> {
        match self.inner.read().cache.get(key) {
            Some(rlp) => Ok(crate::hashing::decode_node(rlp)?),
            None => Ok(Node::Hash(key.hash)),
        }
    }

    /// True once the node's bytes are durably stored in the backing store.
    pub fn is_persisted(&self, key: &NodeKey) -> Result<bool, TrieStoreError> {
        Ok(self.db.get(&key.db_key(), ReadHints::CACHE_MISS)?.is_some())
    }

    /// Whether the node is currently cache-resident.
    pub fn is_cached(&self, key: &NodeKey) -> bool {
        self.inner.read().cache.contains_key(key)
    }

    /// The oldest block that can no longer be rolled back to, if pruning has
    /// ever advanced the window.
    pub fn reorg_boundary(&self) -> Option<u64> {
        self.inner.read().reorg_boundary
    }

    /// The most recently committed state block.
    pub fn last_committed_block(&self) -> Option<u64> {
        self.inner.read().last_committed
    }

    /// The committed state root of `block`, while still retained.
    pub fn state_root(&self, block: u64) -> Option<H256> {
        self.inner.read().state_roots.get(&block).copied()
    }

    pub(crate) fn cached_rlp(&self, key: &NodeKey) -> Option<Bytes> {
        self.inner.read().cache.get(key).cloned()
    }

    pub(crate) fn db_get(
        &self,
        key: &NodeKey,
        hints: ReadHints,
    ) -> Result<Option<Bytes>, TrieStoreError> {
        Ok(self.db.get(&key.db_key(), hints)?)
    }
}
