//! The state-layer error model. Everything here is fatal for the enclosing
//! transaction; recovery is the caller's snapshot/restore, never a retry.

use ethereum_types::U256;
use thiserror::Error;
use versioned_trie::ops::TrieOpError;

use crate::Address;

/// The result of a state operation.
pub type StateResult<T> = Result<T, StateError>;

/// An error during a state operation.
#[derive(Debug, Error)]
pub enum StateError {
    /// The underlying trie or node store failed.
    #[error(transparent)]
    Trie(#[from] TrieOpError),

    /// Committed account or storage bytes failed to decode.
    #[error("stored state bytes failed to decode: {0}")]
    Corrupt(#[from] rlp::DecoderError),

    /// A snapshot pointing past the live journal cannot be restored.
    #[error("snapshot at {requested} is ahead of the live journal (length {current})")]
    InvalidSnapshot {
        /// The journal cursor the snapshot asked for.
        requested: usize,
        /// The current journal length.
        current: usize,
    },

    /// A mutation targeted an account that does not exist.
    #[error("account {0:x} does not exist")]
    MissingAccount(Address),

    /// A balance subtraction would underflow.
    #[error("account {address:x} holds {have} but {need} was subtracted")]
    InsufficientBalance {
        /// The debited account.
        address: Address,
        /// Its current balance.
        have: U256,
        /// The amount asked for.
        need: U256,
    },
}
