//! The account model and its canonical RLP form.

use ethereum_types::{H256, U256};
use keccak_hash::{KECCAK_EMPTY, KECCAK_NULL_RLP};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

/// One account of the global state trie.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Account {
    /// The number of transactions sent from this account (or contracts
    /// created by it).
    pub nonce: u64,
    /// The account's balance in wei.
    pub balance: U256,
    /// The root of the account's storage trie.
    pub storage_root: H256,
    /// The keccak digest of the account's code.
    pub code_hash: H256,
}

impl Account {
    /// The account every address implicitly starts from: zero nonce and
    /// balance, no code, empty storage.
    pub const EMPTY: Account = Account {
        nonce: 0,
        balance: U256::zero(),
        storage_root: KECCAK_NULL_RLP,
        code_hash: KECCAK_EMPTY,
    };

    /// A fresh account holding `balance` at `nonce`.
    pub fn with_balance_and_nonce(balance: U256, nonce: u64) -> Self {
        Self {
            nonce,
            balance,
            ..Self::EMPTY
        }
    }

    /// Whether this account is indistinguishable from one that was never
    /// created: zero nonce and balance, no code, empty storage.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0
            && self.balance.is_zero()
            && self.code_hash == KECCAK_EMPTY
            && self.storage_root == KECCAK_NULL_RLP
    }

    /// Whether the account carries contract code.
    pub fn has_code(&self) -> bool {
        self.code_hash != KECCAK_EMPTY
    }

    /// Whether the account owns any storage.
    pub fn has_storage(&self) -> bool {
        self.storage_root != KECCAK_NULL_RLP
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Encodable for Account {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4)
            .append(&self.nonce)
            .append(&self.balance)
            .append(&self.storage_root)
            .append(&self.code_hash);
    }
}

impl Decodable for Account {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        Ok(Self {
            nonce: rlp.val_at(0)?,
            balance: rlp.val_at(1)?,
            storage_root: rlp.val_at(2)?,
            code_hash: rlp.val_at(3)?,
        })
    }
}
