//! The account state provider: a journaled overlay over the global state
//! trie.
//!
//! Reads fall through the overlay to the trie by `keccak(address)`; every
//! mutation loads the account into the overlay first and records its inverse
//! in the journal. Nothing reaches the trie until [`StateProvider::commit`].

use std::collections::HashMap;

use ethereum_types::{H256, U256};
use keccak_hash::keccak;
use log::{debug, trace};
use versioned_trie::{nibbles::Nibbles, store::scopes::StateScope, Trie};

use crate::{
    account::Account,
    error::{StateError, StateResult},
    journal::Journal,
    Address,
};

/// One account mutation, carrying what is needed to undo it.
#[derive(Clone, Debug)]
pub enum AccountEntry {
    /// The account was created.
    Created {
        /// The created address.
        address: Address,
        /// Whether the overlay already held an explicit deletion for this
        /// address; undoing the creation must reinstate it.
        prev_deleted: bool,
    },
    /// The balance changed.
    BalanceChanged {
        /// The mutated address.
        address: Address,
        /// The balance before the change.
        prev: U256,
    },
    /// The nonce changed.
    NonceChanged {
        /// The mutated address.
        address: Address,
        /// The nonce before the change.
        prev: u64,
    },
    /// The code hash changed.
    CodeHashChanged {
        /// The mutated address.
        address: Address,
        /// The code hash before the change.
        prev: H256,
    },
    /// The storage root changed.
    StorageRootChanged {
        /// The mutated address.
        address: Address,
        /// The storage root before the change.
        prev: H256,
    },
    /// The account was deleted.
    Deleted {
        /// The deleted address.
        address: Address,
        /// The full account before deletion.
        prev: Account,
    },
}

/// The journaled account provider over the global state trie.
#[derive(Debug)]
pub struct StateProvider {
    trie: Trie<StateScope>,
    overlay: HashMap<Address, Option<Account>>,
    journal: Journal<AccountEntry>,
}

/// The trie key of an account.
pub(crate) fn hashed_address(address: &Address) -> Nibbles {
    keccak(address.as_bytes()).into()
}

impl StateProvider {
    /// A provider over an empty state trie.
    pub fn new(scope: StateScope) -> Self {
        Self::from_trie(Trie::new(scope))
    }

    /// A provider positioned at a previously committed state `root`.
    pub fn from_root(scope: StateScope, root: H256) -> Self {
        Self::from_trie(Trie::from_root(scope, root))
    }

    fn from_trie(trie: Trie<StateScope>) -> Self {
        Self {
            trie,
            overlay: HashMap::new(),
            journal: Journal::new(),
        }
    }

    /// The current journal cursor.
    pub fn checkpoint(&self) -> usize {
        self.journal.checkpoint()
    }

    /// Undoes every mutation made after `mark`, newest first.
    pub fn restore(&mut self, mark: usize) -> StateResult<()> {
        let tail = self.journal.truncate_to(mark)?;
        for entry in tail.into_iter().rev() {
            self.undo(entry);
        }

        Ok(())
    }

    fn undo(&mut self, entry: AccountEntry) {
        match entry {
            // Undoing creation either reinstates the explicit deletion the
            // creation overwrote or drops the slot so reads fall back to the
            // trie; if an older record owned the slot, its own undo runs
            // later and reinstates it.
            AccountEntry::Created {
                address,
                prev_deleted,
            } => match prev_deleted {
                true => {
                    self.overlay.insert(address, None);
                }
                false => {
                    self.overlay.remove(&address);
                }
            },
            AccountEntry::BalanceChanged { address, prev } => {
                self.overlay_account_mut(&address).balance = prev;
            }
            AccountEntry::NonceChanged { address, prev } => {
                self.overlay_account_mut(&address).nonce = prev;
            }
            AccountEntry::CodeHashChanged { address, prev } => {
                self.overlay_account_mut(&address).code_hash = prev;
            }
            AccountEntry::StorageRootChanged { address, prev } => {
                self.overlay_account_mut(&address).storage_root = prev;
            }
            AccountEntry::Deleted { address, prev } => {
                self.overlay.insert(address, Some(prev));
            }
        }
    }

    fn overlay_account_mut(&mut self, address: &Address) -> &mut Account {
        self.overlay
            .get_mut(address)
            .and_then(|slot| slot.as_mut())
            .expect("journaled account vanished from the overlay")
    }

    /// Loads the account into the overlay if it is not there yet and
    /// returns its current state.
    fn load(&mut self, address: &Address) -> StateResult<Option<Account>> {
        if let Some(slot) = self.overlay.get(address) {
            return Ok(*slot);
        }

        let loaded = match self.trie.get(hashed_address(address))? {
            Some(bytes) => Some(rlp::decode::<Account>(&bytes)?),
            None => None,
        };
        trace!("cold account read of {:x}: present={}", address, loaded.is_some());

        self.overlay.insert(*address, loaded);
        Ok(loaded)
    }

    fn load_existing(&mut self, address: &Address) -> StateResult<Account> {
        self.load(address)?
            .ok_or(StateError::MissingAccount(*address))
    }

    /// Reads an account. Absent and empty accounts both read as `None`.
    pub fn get_account(&mut self, address: &Address) -> StateResult<Option<Account>> {
        Ok(self.load(address)?.filter(|a| !a.is_empty()))
    }

    /// Whether the account exists and is non-empty.
    pub fn account_exists(&mut self, address: &Address) -> StateResult<bool> {
        Ok(self.get_account(address)?.is_some())
    }

    /// The account's storage root, or the empty root if the account does not
    /// exist.
    pub fn storage_root(&mut self, address: &Address) -> StateResult<H256> {
        Ok(self
            .load(address)?
            .map(|a| a.storage_root)
            .unwrap_or(keccak_hash::KECCAK_NULL_RLP))
    }

    /// Creates an account holding `balance` at `nonce`, replacing whatever
    /// the address held before.
    pub fn create_account(
        &mut self,
        address: &Address,
        balance: U256,
        nonce: u64,
    ) -> StateResult<()> {
        // Load first so a pre-existing account lands in the journal before
        // the overwrite.
        if let Some(prev) = self.load(address)? {
            self.journal.record(AccountEntry::Deleted {
                address: *address,
                prev,
            });
        }

        let prev_deleted = matches!(self.overlay.get(address), Some(None));
        self.journal.record(AccountEntry::Created {
            address: *address,
            prev_deleted,
        });
        self.overlay.insert(
            *address,
            Some(Account::with_balance_and_nonce(balance, nonce)),
        );

        Ok(())
    }

    /// Adds `amount` to the account's balance, creating the account if it
    /// does not exist yet.
    pub fn add_balance(&mut self, address: &Address, amount: U256) -> StateResult<()> {
        let account = match self.load(address)? {
            Some(account) => account,
            None => {
                self.journal.record(AccountEntry::Created {
                    address: *address,
                    prev_deleted: true,
                });
                self.overlay.insert(*address, Some(Account::EMPTY));
                Account::EMPTY
            }
        };

        self.journal.record(AccountEntry::BalanceChanged {
            address: *address,
            prev: account.balance,
        });
        self.overlay_account_mut(address).balance = account.balance + amount;

        Ok(())
    }

    /// Subtracts `amount` from the account's balance.
    pub fn sub_balance(&mut self, address: &Address, amount: U256) -> StateResult<()> {
        let account = self.load_existing(address)?;
        if account.balance < amount {
            return Err(StateError::InsufficientBalance {
                address: *address,
                have: account.balance,
                need: amount,
            });
        }

        self.journal.record(AccountEntry::BalanceChanged {
            address: *address,
            prev: account.balance,
        });
        self.overlay_account_mut(address).balance = account.balance - amount;

        Ok(())
    }

    /// Increments the account's nonce.
    pub fn increment_nonce(&mut self, address: &Address) -> StateResult<()> {
        let account = self.load_existing(address)?;
        self.set_nonce_inner(address, account.nonce, account.nonce + 1);

        Ok(())
    }

    /// Sets the account's nonce outright.
    pub fn set_nonce(&mut self, address: &Address, nonce: u64) -> StateResult<()> {
        let account = self.load_existing(address)?;
        self.set_nonce_inner(address, account.nonce, nonce);

        Ok(())
    }

    fn set_nonce_inner(&mut self, address: &Address, prev: u64, nonce: u64) {
        self.journal.record(AccountEntry::NonceChanged {
            address: *address,
            prev,
        });
        self.overlay_account_mut(address).nonce = nonce;
    }

    /// Sets the account's code hash.
    pub fn set_code_hash(&mut self, address: &Address, code_hash: H256) -> StateResult<()> {
        let account = self.load_existing(address)?;

        self.journal.record(AccountEntry::CodeHashChanged {
            address: *address,
            prev: account.code_hash,
        });
        self.overlay_account_mut(address).code_hash = code_hash;

        Ok(())
    }

    /// Points the account at a new storage root.
    pub fn set_storage_root(&mut self, address: &Address, root: H256) -> StateResult<()> {
        let account = self.load_existing(address)?;

        self.journal.record(AccountEntry::StorageRootChanged {
            address: *address,
            prev: account.storage_root,
        });
        self.overlay_account_mut(address).storage_root = root;

        Ok(())
    }

    /// Deletes the account. A no-op if it does not exist.
    pub fn delete_account(&mut self, address: &Address) -> StateResult<()> {
        if let Some(prev) = self.load(address)? {
            self.journal.record(AccountEntry::Deleted {
                address: *address,
                prev,
            });
            self.overlay.insert(*address, None);
        }

        Ok(())
    }

    /// Flushes the net per-account effect into the state trie, commits the
    /// trie's node graph under `block` and returns the new state root.
    ///
    /// Empty accounts are removed rather than written, except at genesis
    /// where chain specs may demand their presence.
    pub fn commit(&mut self, block: u64, is_genesis: bool) -> StateResult<H256> {
        let flushed = self.overlay.len();

        for (address, slot) in std::mem::take(&mut self.overlay) {
            let key = hashed_address(&address);

            match slot {
                Some(account) if !account.is_empty() || is_genesis => {
                    self.trie.set(key, rlp::encode(&account).to_vec())?;
                }
                // Deleted, or touched down to empty.
                Some(_) | None => {
                    self.trie.delete(key)?;
                }
            }
        }

        self.journal.clear();
        let root = self.trie.commit(block)?;
        debug!(
            "account commit for block {}: {} accounts flushed, root {:x}",
            block, flushed, root
        );

        Ok(root)
    }
}
