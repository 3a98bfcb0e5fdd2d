//! Journaled world-state providers over the versioned trie.
//!
//! The state of the world is split across three providers: the account
//! provider over the global state trie, the persistent storage provider over
//! per-account storage tries, and the transient storage provider that never
//! touches a trie at all. Every mutation is journaled, so any prefix of the
//! work since a snapshot can be undone exactly; [`WorldState`] composes the
//! three behind a single snapshot/restore/commit contract.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod account;
pub mod error;
pub mod journal;
pub mod state;
pub mod storage;
pub mod world;

pub use account::Account;
pub use error::{StateError, StateResult};
pub use world::{CommitOutcome, Snapshot, WorldState};

/// A 20-byte account address.
pub type Address = ethereum_types::H160;
