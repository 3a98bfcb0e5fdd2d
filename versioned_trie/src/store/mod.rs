//! The versioned node store and its collaborators.
//!
//! The [`TrieStore`](trie_store::TrieStore) owns the in-memory cache of
//! not-yet-persisted node graphs across a sliding window of block numbers.
//! Tries never talk to it directly; they go through a scope (global state,
//! per-account storage, or a read-only view) implementing [`NodeSource`] and
//! [`NodeSink`], optionally decorated with read hints.

use bytes::Bytes;
use ethereum_types::H256;
use thiserror::Error;

use crate::nibbles::Nibbles;

pub mod flags;
pub mod kv;
pub mod resolver;
pub mod scopes;
pub mod trie_store;

use flags::ReadHints;
use kv::StoreError;

/// Which logical trie a commit belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TrieKind {
    /// The global account trie. Finishing a state commit drives the pruning
    /// window.
    State,
    /// One account's storage trie.
    Storage,
}

/// The storage address of a node: which trie it belongs to, where in that
/// trie it sits and what its content hash is. Two nodes with equal identity
/// are content-identical.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NodeKey {
    /// `None` for the global state trie, or the hashed account key owning
    /// the storage subtree.
    pub scope: Option<H256>,
    /// The nibble path from the root of the scoped trie.
    pub path: Nibbles,
    /// The keccak digest of the node's RLP encoding.
    pub hash: H256,
}

impl NodeKey {
    /// A key in the global state trie.
    pub fn state(path: Nibbles, hash: H256) -> Self {
        Self {
            scope: None,
            path,
            hash,
        }
    }

    /// A key in one account's storage trie.
    pub fn storage(account: H256, path: Nibbles, hash: H256) -> Self {
        Self {
            scope: Some(account),
            path,
            hash,
        }
    }

    /// The deterministic backing-store key for this node. Scopes are
    /// tag-prefixed so the global trie and storage subtrees never collide.
    pub fn db_key(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(66 + self.path.min_bytes());

        match &self.scope {
            None => out.push(0),
            Some(account) => {
                out.push(1);
                out.extend_from_slice(account.as_bytes());
            }
        }

        out.push(self.path.count as u8);
        out.extend_from_slice(&self.path.bytes_be());
        out.extend_from_slice(self.hash.as_bytes());

        out
    }
}

/// Errors raised by the node store. Every one of these is fatal for the
/// caller: they signal misuse or state corruption, never a condition to
/// retry or mask.
#[derive(Debug, Error)]
pub enum TrieStoreError {
    /// A node was requested by hash but is neither cached nor persisted.
    /// This is never treated as absence; absence is only meaningful for
    /// value lookups, not for node resolution.
    #[error("node {hash:x} not found at path {path} (scope: {scope:?}); trie state is corrupt")]
    NodeNotFound {
        /// The scope the lookup ran under.
        scope: Option<H256>,
        /// The path of the missing node.
        path: Nibbles,
        /// The content hash that failed to resolve.
        hash: H256,
    },

    /// Blocks must finish committing in strictly increasing order.
    #[error("block {got} finished committing out of order (last committed: {last})")]
    OutOfOrderCommit {
        /// The most recently committed block.
        last: u64,
        /// The offending block number.
        got: u64,
    },

    /// Cached or persisted node bytes failed to decode.
    #[error("stored node bytes failed to decode: {0}")]
    Corrupt(#[from] rlp::DecoderError),

    /// The backing key-value store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read access to encoded nodes for one scoped trie.
pub trait NodeSource {
    /// Resolves a node's encoded bytes by `(path, hash)`, consulting the
    /// cache before the backing store. Hints are advisory and forwarded
    /// verbatim.
    fn load_rlp(&self, path: &Nibbles, hash: H256, hints: ReadHints)
        -> Result<Bytes, TrieStoreError>;
}

/// Write access for newly constructed nodes of one scoped trie.
pub trait NodeSink {
    /// Records a freshly built node as belonging to `block`. Does not
    /// persist; persistence happens when the block leaves the pruning
    /// window.
    fn commit_node(
        &self,
        block: u64,
        path: &Nibbles,
        hash: H256,
        rlp: Bytes,
    ) -> Result<(), TrieStoreError>;
}
