//! The world-state facade composing the three providers.

use std::sync::Arc;

use ethereum_types::{H256, U256};
use log::debug;
use versioned_trie::{
    ops::TrieOpError,
    store::{scopes::StateScope, trie_store::TrieStore, TrieKind},
};

use crate::{
    account::Account,
    error::StateResult,
    state::StateProvider,
    storage::{PersistentStorageProvider, StorageCell, TransientStorageProvider},
    Address,
};

/// A composite cursor over the three journals, taken and restored as one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Snapshot {
    state: usize,
    persistent: usize,
    transient: usize,
}

/// What a block commit produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommitOutcome {
    /// The new state root.
    pub state_root: H256,
    /// The advanced reorg boundary, when this commit pushed the pruning
    /// window forward.
    pub reorg_boundary: Option<u64>,
}

/// The full world state: accounts, persistent storage and transient storage
/// behind one snapshot/restore/commit contract.
#[derive(Debug)]
pub struct WorldState {
    store: Arc<TrieStore>,
    accounts: StateProvider,
    persistent: PersistentStorageProvider,
    transient: TransientStorageProvider,
}

impl WorldState {
    /// An empty world over `store`.
    pub fn new(store: Arc<TrieStore>) -> Self {
        let accounts = StateProvider::new(StateScope::new(store.clone()));
        Self::compose(store, accounts)
    }

    /// A world positioned at a previously committed state `root`.
    pub fn from_root(store: Arc<TrieStore>, root: H256) -> Self {
        let accounts = StateProvider::from_root(StateScope::new(store.clone()), root);
        Self::compose(store, accounts)
    }

    fn compose(store: Arc<TrieStore>, accounts: StateProvider) -> Self {
        let persistent = PersistentStorageProvider::new(store.clone());

        Self {
            store,
            accounts,
            persistent,
            transient: TransientStorageProvider::new(),
        }
    }

    /// The underlying node store.
    pub fn store(&self) -> &Arc<TrieStore> {
        &self.store
    }

    /// Captures the current position of all three journals.
    pub fn take_snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.accounts.checkpoint(),
            persistent: self.persistent.checkpoint(),
            transient: self.transient.checkpoint(),
        }
    }

    /// Rolls all three providers back to `snapshot`. Either every journal
    /// is undone or, when the snapshot is invalid, none of them is touched.
    pub fn restore(&mut self, snapshot: Snapshot) -> StateResult<()> {
        self.validate(snapshot)?;

        self.transient.restore(snapshot.transient)?;
        self.persistent.restore(snapshot.persistent)?;
        self.accounts.restore(snapshot.state)?;

        Ok(())
    }

    fn validate(&self, snapshot: Snapshot) -> StateResult<()> {
        // Probing with the cursor alone cannot mutate, so a failure here
        // leaves all three journals intact.
        if snapshot.state > self.accounts.checkpoint()
            || snapshot.persistent > self.persistent.checkpoint()
            || snapshot.transient > self.transient.checkpoint()
        {
            return Err(crate::StateError::InvalidSnapshot {
                requested: snapshot.state.max(snapshot.persistent).max(snapshot.transient),
                current: self
                    .accounts
                    .checkpoint()
                    .max(self.persistent.checkpoint())
                    .max(self.transient.checkpoint()),
            });
        }

        Ok(())
    }

    /// Reads an account. Absent and empty accounts both read as `None`.
    pub fn get_account(&mut self, address: &Address) -> StateResult<Option<Account>> {
        self.accounts.get_account(address)
    }

    /// Whether the account exists and is non-empty.
    pub fn account_exists(&mut self, address: &Address) -> StateResult<bool> {
        self.accounts.account_exists(address)
    }

    /// Creates an account holding `balance` at `nonce`.
    pub fn create_account(
        &mut self,
        address: &Address,
        balance: U256,
        nonce: u64,
    ) -> StateResult<()> {
        self.accounts.create_account(address, balance, nonce)
    }

    /// Adds to an account's balance, creating the account if needed.
    pub fn add_balance(&mut self, address: &Address, amount: U256) -> StateResult<()> {
        self.accounts.add_balance(address, amount)
    }

    /// Subtracts from an account's balance.
    pub fn sub_balance(&mut self, address: &Address, amount: U256) -> StateResult<()> {
        self.accounts.sub_balance(address, amount)
    }

    /// Increments an account's nonce.
    pub fn increment_nonce(&mut self, address: &Address) -> StateResult<()> {
        self.accounts.increment_nonce(address)
    }

    /// Sets an account's nonce outright.
    pub fn set_nonce(&mut self, address: &Address, nonce: u64) -> StateResult<()> {
        self.accounts.set_nonce(address, nonce)
    }

    /// Sets an account's code hash.
    pub fn set_code_hash(&mut self, address: &Address, code_hash: H256) -> StateResult<()> {
        self.accounts.set_code_hash(address, code_hash)
    }

    /// Deletes an account and drops its storage subtree.
    pub fn delete_account(&mut self, address: &Address) -> StateResult<()> {
        if self.accounts.account_exists(address)? {
            self.persistent.clear_storage(address);
        }

        self.accounts.delete_account(address)
    }

    /// Reads a persistent storage slot, resolving the owning account's
    /// storage root for the fallthrough.
    pub fn get_storage(&mut self, address: &Address, index: U256) -> StateResult<Vec<u8>> {
        let root = self.accounts.storage_root(address)?;
        self.persistent.get(&StorageCell::new(*address, index), root)
    }

    /// Writes a persistent storage slot.
    pub fn set_storage(
        &mut self,
        address: &Address,
        index: U256,
        value: Vec<u8>,
    ) -> StateResult<()> {
        let root = self.accounts.storage_root(address)?;
        self.persistent
            .set(&StorageCell::new(*address, index), value, root);

        Ok(())
    }

    /// Resets an account's entire storage subtree.
    pub fn clear_storage(&mut self, address: &Address) {
        self.persistent.clear_storage(address);
    }

    /// Reads a transient storage slot.
    pub fn get_transient_storage(&self, address: &Address, index: U256) -> Vec<u8> {
        self.transient.get(&StorageCell::new(*address, index))
    }

    /// Writes a transient storage slot.
    pub fn set_transient_storage(&mut self, address: &Address, index: U256, value: Vec<u8>) {
        self.transient.set(&StorageCell::new(*address, index), value);
    }

    /// Discards transient storage at the end of a transaction.
    pub fn finish_transaction(&mut self) {
        self.transient.finish_transaction();
    }

    /// Commits the block: flushes storage tries, points accounts at their
    /// new storage roots, flushes accounts, and finishes the block in the
    /// node store.
    ///
    /// Returns the new state root together with the reorg boundary when the
    /// commit advanced the pruning window.
    pub fn commit(&mut self, block: u64, is_genesis: bool) -> StateResult<CommitOutcome> {
        let storage_roots = self.persistent.commit(block)?;

        for (address, root) in storage_roots {
            // A destroyed contract has no account left to point anywhere.
            if self.accounts.account_exists(&address)? {
                self.accounts.set_storage_root(&address, root)?;
            }
        }

        let state_root = self.accounts.commit(block, is_genesis)?;
        let reorg_boundary = self
            .store
            .finish_block_commit(TrieKind::State, block, state_root)
            .map_err(TrieOpError::from)?;

        debug!(
            "world commit for block {}: root {:x}, boundary {:?}",
            block, state_root, reorg_boundary
        );

        Ok(CommitOutcome {
            state_root,
            reorg_boundary,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ethereum_types::U256;
    use keccak_hash::KECCAK_NULL_RLP;
    use versioned_trie::store::{kv::MemoryKeyValueStore, trie_store::TrieStore};

    use super::WorldState;
    use crate::{error::StateError, Address};

    fn common_setup() {
        let _ = pretty_env_logger::try_init();
    }

    fn test_world() -> WorldState {
        WorldState::new(Arc::new(TrieStore::with_default_depth(Arc::new(
            MemoryKeyValueStore::new(),
        ))))
    }

    fn addr(tag: u8) -> Address {
        Address::repeat_byte(tag)
    }

    #[test]
    fn nested_snapshots_restore_in_any_ancestor_order() {
        common_setup();

        let mut world = test_world();
        let a = addr(1);

        world.create_account(&a, U256::from(10), 0).unwrap();
        let outer = world.take_snapshot();

        world.add_balance(&a, U256::from(5)).unwrap();
        world.set_storage(&a, U256::one(), vec![0x11]).unwrap();
        let inner = world.take_snapshot();

        world.add_balance(&a, U256::from(7)).unwrap();
        world.set_storage(&a, U256::one(), vec![0x22]).unwrap();
        world.set_transient_storage(&a, U256::one(), vec![0x33]);

        // Restoring to the inner snapshot drops exactly the third batch.
        world.restore(inner).unwrap();
        assert_eq!(
            world.get_account(&a).unwrap().unwrap().balance,
            U256::from(15)
        );
        assert_eq!(world.get_storage(&a, U256::one()).unwrap(), vec![0x11]);
        assert!(world.get_transient_storage(&a, U256::one()).is_empty());

        // And the outer snapshot drops the second batch too.
        world.restore(outer).unwrap();
        assert_eq!(
            world.get_account(&a).unwrap().unwrap().balance,
            U256::from(10)
        );
        assert!(world.get_storage(&a, U256::one()).unwrap().is_empty());
    }

    #[test]
    fn restoring_the_fresh_snapshot_is_a_noop() {
        common_setup();

        let mut world = test_world();
        world.create_account(&addr(1), U256::from(3), 0).unwrap();

        let snapshot = world.take_snapshot();
        world.restore(snapshot).unwrap();

        assert_eq!(
            world.get_account(&addr(1)).unwrap().unwrap().balance,
            U256::from(3)
        );
    }

    #[test]
    fn stale_snapshots_fail_without_touching_state() {
        common_setup();

        let mut world = test_world();
        world.create_account(&addr(1), U256::from(3), 0).unwrap();
        let snapshot = world.take_snapshot();
        world.restore(snapshot).unwrap();

        // A snapshot from a later point than the live journals.
        world.add_balance(&addr(1), U256::one()).unwrap();
        let late = world.take_snapshot();
        world.restore(snapshot).unwrap();

        let err = world.restore(late).unwrap_err();
        assert!(matches!(err, StateError::InvalidSnapshot { .. }));
        assert_eq!(
            world.get_account(&addr(1)).unwrap().unwrap().balance,
            U256::from(3)
        );
    }

    #[test]
    fn commit_surfaces_root_and_reads_back_from_a_reopened_world() {
        common_setup();

        let store = Arc::new(TrieStore::with_default_depth(Arc::new(
            MemoryKeyValueStore::new(),
        )));
        let mut world = WorldState::new(store.clone());
        let a = addr(1);

        world.create_account(&a, U256::from(100), 1).unwrap();
        world.set_storage(&a, U256::from(5), vec![0xaa]).unwrap();

        let outcome = world.commit(1, false).unwrap();
        assert_ne!(outcome.state_root, KECCAK_NULL_RLP);
        assert_eq!(outcome.reorg_boundary, None);

        let mut reopened = WorldState::from_root(store, outcome.state_root);
        let account = reopened.get_account(&a).unwrap().unwrap();
        assert_eq!(account.balance, U256::from(100));
        assert_ne!(account.storage_root, KECCAK_NULL_RLP);
        assert_eq!(
            reopened.get_storage(&a, U256::from(5)).unwrap(),
            vec![0xaa]
        );
    }

    #[test]
    fn transient_storage_never_contributes_to_the_root() {
        common_setup();

        let mut with_transient = test_world();
        let mut without = test_world();
        let a = addr(1);

        for world in [&mut with_transient, &mut without] {
            world.create_account(&a, U256::from(1), 0).unwrap();
        }
        with_transient.set_transient_storage(&a, U256::one(), vec![0xff]);

        let h1 = with_transient.commit(1, false).unwrap().state_root;
        let h2 = without.commit(1, false).unwrap().state_root;
        assert_eq!(h1, h2);

        // And the transient value is still gone after the transaction.
        with_transient.finish_transaction();
        assert!(with_transient
            .get_transient_storage(&a, U256::one())
            .is_empty());
    }

    #[test]
    fn deleting_a_contract_drops_its_storage() {
        common_setup();

        let mut world = test_world();
        let a = addr(1);

        world.create_account(&a, U256::from(1), 1).unwrap();
        world.set_storage(&a, U256::one(), vec![0x11]).unwrap();
        world.commit(1, false).unwrap();

        world.delete_account(&a).unwrap();
        let outcome = world.commit(2, false).unwrap();

        assert_eq!(outcome.state_root, KECCAK_NULL_RLP);
        assert_eq!(world.get_account(&a).unwrap(), None);
    }

    #[test]
    fn commits_across_blocks_advance_the_reorg_boundary() {
        common_setup();

        let store = Arc::new(TrieStore::new(Arc::new(MemoryKeyValueStore::new()), 2));
        let mut world = WorldState::new(store);
        let a = addr(1);

        world.create_account(&a, U256::one(), 0).unwrap();

        let mut boundary = None;
        for block in 1..=5 {
            world.add_balance(&a, U256::one()).unwrap();
            if let Some(b) = world.commit(block, false).unwrap().reorg_boundary {
                boundary = Some(b);
            }
        }

        // Five blocks against a window of two: block 4 pushed block 1 out
        // of the window and advanced the boundary to 2.
        assert_eq!(boundary, Some(2));
        assert_eq!(
            world.get_account(&a).unwrap().unwrap().balance,
            U256::from(6)
        );
    }

    #[test]
    fn storage_of_one_account_does_not_leak_into_another() {
        common_setup();

        let mut world = test_world();
        let a = addr(1);
        let b = addr(2);

        world.create_account(&a, U256::one(), 0).unwrap();
        world.create_account(&b, U256::one(), 0).unwrap();
        world.set_storage(&a, U256::from(5), vec![0xaa]).unwrap();
        world.commit(1, false).unwrap();

        assert!(world.get_storage(&b, U256::from(5)).unwrap().is_empty());
        assert_eq!(world.get_storage(&a, U256::from(5)).unwrap(), vec![0xaa]);
    }

    #[test]
    fn hash_of_world_with_empty_account_matches_world_without_it() {
        common_setup();

        let mut with_empty = test_world();
        let mut without = test_world();
        let a = addr(1);
        let b = addr(2);

        for world in [&mut with_empty, &mut without] {
            world.create_account(&a, U256::from(9), 1).unwrap();
        }
        // Touched but left empty.
        with_empty.add_balance(&b, U256::zero()).unwrap();

        let h1 = with_empty.commit(1, false).unwrap().state_root;
        let h2 = without.commit(1, false).unwrap().state_root;
        assert_eq!(h1, h2);
    }
}
