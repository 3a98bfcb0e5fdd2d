//! Persistent and transient storage providers.
//!
//! Both providers share the journal mechanics: an overlay of dirty slots per
//! account plus a journal of inverses. The persistent provider flushes net
//! slot effects into per-account storage tries at commit; the transient one
//! never touches a trie and is discarded wholesale at transaction
//! boundaries.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use ethereum_types::{H256, U256};
use keccak_hash::{keccak, KECCAK_NULL_RLP};
use log::{debug, trace};
use rlp::Rlp;
use versioned_trie::{
    nibbles::Nibbles,
    store::{scopes::StorageScope, trie_store::TrieStore},
    Trie,
};

use crate::{error::StateResult, journal::Journal, Address};

/// One storage slot of one account.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct StorageCell {
    /// The owning account.
    pub address: Address,
    /// The slot index.
    pub index: U256,
}

impl StorageCell {
    /// The cell at `index` under `address`.
    pub fn new(address: Address, index: U256) -> Self {
        Self { address, index }
    }
}

/// One storage mutation, carrying what is needed to undo it.
#[derive(Clone, Debug)]
pub enum StorageEntry {
    /// A slot took a new value.
    SlotChanged {
        /// The mutated cell.
        cell: StorageCell,
        /// The previous overlay value, or `None` if the slot was clean.
        prev: Option<Vec<u8>>,
    },
    /// An account's whole storage was cleared.
    StorageCleared {
        /// The cleared account.
        address: Address,
        /// The dirty slots dropped by the clear.
        prev_cells: HashMap<U256, Vec<u8>>,
        /// Whether the account was already marked destroyed beforehand.
        was_destroyed: bool,
    },
}

type SlotOverlay = HashMap<Address, HashMap<U256, Vec<u8>>>;

/// The trie key of a storage slot.
pub(crate) fn hashed_index(index: &U256) -> Nibbles {
    let mut buf = [0u8; 32];
    index.to_big_endian(&mut buf);

    keccak(buf).into()
}

/// The hashed account key scoping a storage subtree.
pub(crate) fn account_scope(address: &Address) -> H256 {
    keccak(address.as_bytes())
}

fn is_zero_value(value: &[u8]) -> bool {
    value.iter().all(|b| *b == 0)
}

/// Slot values are stored with leading zeros stripped, wrapped in RLP.
fn encode_value(value: &[u8]) -> Vec<u8> {
    let stripped: &[u8] = match value.iter().position(|b| *b != 0) {
        Some(idx) => &value[idx..],
        None => &[],
    };

    rlp::encode(&stripped).to_vec()
}

fn decode_value(bytes: &[u8]) -> StateResult<Vec<u8>> {
    Ok(Rlp::new(bytes).data()?.to_vec())
}

fn undo_slot_change(overlay: &mut SlotOverlay, cell: StorageCell, prev: Option<Vec<u8>>) {
    let cells = overlay.entry(cell.address).or_default();
    match prev {
        Some(value) => {
            cells.insert(cell.index, value);
        }
        None => {
            cells.remove(&cell.index);
        }
    }
}

/// The journaled provider over per-account storage tries.
#[derive(Debug)]
pub struct PersistentStorageProvider {
    store: Arc<TrieStore>,
    /// Per-account tries opened on first touch and kept across commits; a
    /// committed trie collapses to its new root placeholder, so the cache
    /// stays consistent with the roots this provider reported.
    tries: HashMap<Address, Trie<StorageScope>>,
    overlay: SlotOverlay,
    destroyed: HashSet<Address>,
    journal: Journal<StorageEntry>,
}

impl PersistentStorageProvider {
    /// A provider over `store`.
    pub fn new(store: Arc<TrieStore>) -> Self {
        Self {
            store,
            tries: HashMap::new(),
            overlay: SlotOverlay::new(),
            destroyed: HashSet::new(),
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
            match entry {
                StorageEntry::SlotChanged { cell, prev } => {
                    undo_slot_change(&mut self.overlay, cell, prev);
                }
                StorageEntry::StorageCleared {
                    address,
                    prev_cells,
                    was_destroyed,
                } => {
                    if !was_destroyed {
                        self.destroyed.remove(&address);
                    }
                    // An empty map would read as a touched account at commit.
                    match prev_cells.is_empty() {
                        true => {
                            self.overlay.remove(&address);
                        }
                        false => {
                            self.overlay.insert(address, prev_cells);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Reads a slot, falling through the overlay to the account's storage
    /// trie at `storage_root`. Unset slots read as empty.
    pub fn get(&mut self, cell: &StorageCell, storage_root: H256) -> StateResult<Vec<u8>> {
        if let Some(value) = self
            .overlay
            .get(&cell.address)
            .and_then(|cells| cells.get(&cell.index))
        {
            return Ok(value.clone());
        }

        // A destroyed subtree reads as empty until the clear commits.
        if self.destroyed.contains(&cell.address) {
            return Ok(Vec::new());
        }

        let trie = Self::trie_for(&self.store, &mut self.tries, &cell.address, storage_root);
        match trie.get(hashed_index(&cell.index))? {
            Some(bytes) => decode_value(&bytes),
            None => Ok(Vec::new()),
        }
    }

    /// Writes a slot. `storage_root` pins the account's trie on first touch.
    pub fn set(&mut self, cell: &StorageCell, value: Vec<u8>, storage_root: H256) {
        debug_assert!(value.len() <= 32);
        trace!("storage set {:x}[{}]", cell.address, cell.index);

        if !self.destroyed.contains(&cell.address) {
            Self::trie_for(&self.store, &mut self.tries, &cell.address, storage_root);
        }

        let prev = self
            .overlay
            .entry(cell.address)
            .or_default()
            .insert(cell.index, value);
        self.journal
            .record(StorageEntry::SlotChanged { cell: *cell, prev });
    }

    /// Drops the account's entire storage subtree as of the next commit.
    /// Distinct from deleting the known cells: the subtree is reset no
    /// matter what it holds.
    pub fn clear_storage(&mut self, address: &Address) {
        debug!("clearing storage of {:x}", address);

        let prev_cells = self.overlay.remove(address).unwrap_or_default();
        let was_destroyed = !self.destroyed.insert(*address);
        self.journal.record(StorageEntry::StorageCleared {
            address: *address,
            prev_cells,
            was_destroyed,
        });
    }

    /// Flushes net slot effects into the per-account tries, commits each
    /// touched trie under `block` and returns the new storage roots.
    pub fn commit(&mut self, block: u64) -> StateResult<HashMap<Address, H256>> {
        let mut roots = HashMap::new();

        // Destroyed subtrees restart from the empty trie; post-clear writes
        // (a redeploy) then apply on top of it below.
        for address in std::mem::take(&mut self.destroyed) {
            let scope = StorageScope::new(self.store.clone(), account_scope(&address));
            self.tries.insert(address, Trie::new(scope));
            roots.insert(address, KECCAK_NULL_RLP);
        }

        for (address, cells) in std::mem::take(&mut self.overlay) {
            let trie = Self::trie_for(
                &self.store,
                &mut self.tries,
                &address,
                KECCAK_NULL_RLP,
            );

            for (index, value) in cells {
                let key = hashed_index(&index);
                match is_zero_value(&value) {
                    true => {
                        trie.delete(key)?;
                    }
                    false => {
                        trie.set(key, encode_value(&value))?;
                    }
                }
            }

            roots.insert(address, trie.commit(block)?);
        }

        self.journal.clear();
        debug!("storage commit for block {}: {} roots changed", block, roots.len());

        Ok(roots)
    }

    /// The cached trie for `address`, opened at `storage_root` on first
    /// touch. Reads and writes pin the trie before the overlay can diverge,
    /// so a commit never has to re-resolve the root.
    fn trie_for<'t>(
        store: &Arc<TrieStore>,
        tries: &'t mut HashMap<Address, Trie<StorageScope>>,
        address: &Address,
        storage_root: H256,
    ) -> &'t mut Trie<StorageScope> {
        tries.entry(*address).or_insert_with(|| {
            let scope = StorageScope::new(store.clone(), account_scope(address));
            match storage_root == KECCAK_NULL_RLP {
                true => Trie::new(scope),
                false => Trie::from_root(scope, storage_root),
            }
        })
    }
}

/// The transaction-scoped storage provider. Same journal mechanics as the
/// persistent provider, but no trie ever sees these values.
#[derive(Debug, Default)]
pub struct TransientStorageProvider {
    overlay: SlotOverlay,
    journal: Journal<StorageEntry>,
}

impl TransientStorageProvider {
    /// An empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current journal cursor.
    pub fn checkpoint(&self) -> usize {
        self.journal.checkpoint()
    }

    /// Undoes every mutation made after `mark`, newest first.
    pub fn restore(&mut self, mark: usize) -> StateResult<()> {
        let tail = self.journal.truncate_to(mark)?;
        for entry in tail.into_iter().rev() {
            if let StorageEntry::SlotChanged { cell, prev } = entry {
                undo_slot_change(&mut self.overlay, cell, prev);
            }
        }

        Ok(())
    }

    /// Reads a slot. Unset slots read as empty.
    pub fn get(&self, cell: &StorageCell) -> Vec<u8> {
        self.overlay
            .get(&cell.address)
            .and_then(|cells| cells.get(&cell.index))
            .cloned()
            .unwrap_or_default()
    }

    /// Writes a slot.
    pub fn set(&mut self, cell: &StorageCell, value: Vec<u8>) {
        debug_assert!(value.len() <= 32);

        let prev = self
            .overlay
            .entry(cell.address)
            .or_default()
            .insert(cell.index, value);
        self.journal
            .record(StorageEntry::SlotChanged { cell: *cell, prev });
    }

    /// Discards everything at the end of a transaction.
    pub fn finish_transaction(&mut self) {
        self.overlay.clear();
        self.journal.clear();
    }
}
