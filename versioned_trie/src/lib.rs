//! A versioned Merkle-Patricia trie over a block-windowed node store.
//!
//! The in-memory trie is a copy-on-write node graph: mutations rebuild only
//! the path to the touched key, subtrees that did not change stay shared
//! between versions, and anything not touched since the last commit is a
//! [`Node::Hash`][node::Node::Hash] placeholder resolved from the store on
//! demand. Committing a block hands the block's new nodes to the
//! [`TrieStore`][store::trie_store::TrieStore], which keeps them
//! cache-resident across a
//! pruning window of recent blocks and persists them to a backing key-value
//! store once they fall out of the window.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

mod hashing;
pub mod nibbles;
pub mod node;
pub mod ops;
pub mod store;
pub mod trie;

pub use trie::Trie;

#[cfg(test)]
pub(crate) mod testing_utils;
