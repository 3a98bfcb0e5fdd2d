use std::sync::Arc;

use ethereum_types::U256;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

use crate::{
    nibbles::Nibbles,
    store::{kv::MemoryKeyValueStore, scopes::StateScope, trie_store::TrieStore},
    trie::Trie,
};

pub(crate) type TestInsertValEntry = (Nibbles, Vec<u8>);

pub(crate) fn common_setup() {
    // Try init since multiple tests calling `init` will cause an error.
    let _ = pretty_env_logger::try_init();
}

pub(crate) fn entry<K>(k: K) -> TestInsertValEntry
where
    K: Into<Nibbles>,
{
    (k.into(), vec![2])
}

pub(crate) fn entry_with_value<K>(k: K, v: u8) -> TestInsertValEntry
where
    K: Into<Nibbles>,
{
    (k.into(), vec![v])
}

/// A state-scoped trie over a fresh in-memory store, with the store handle
/// for inspection.
pub(crate) fn state_trie_with_store(pruning_depth: u64) -> (Trie<StateScope>, Arc<TrieStore>) {
    let store = Arc::new(TrieStore::new(
        Arc::new(MemoryKeyValueStore::new()),
        pruning_depth,
    ));

    (Trie::new(StateScope::new(store.clone())), store)
}

pub(crate) fn generate_n_random_fixed_trie_value_entries(
    n: usize,
    seed: u64,
) -> impl Iterator<Item = TestInsertValEntry> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(move |_| (gen_fixed_nibbles(&mut rng), gen_rand_value_bytes(&mut rng)))
}

fn gen_fixed_nibbles(rng: &mut StdRng) -> Nibbles {
    let mut k_bytes = [0; 4];
    k_bytes[0..3].copy_from_slice(rng.gen::<[u64; 3]>().as_slice());
    k_bytes[3] = rng.gen_range(0x1000_0000_0000_0000..0xffff_ffff_ffff_ffff);

    U256(k_bytes).into()
}

fn gen_rand_value_bytes(rng: &mut StdRng) -> Vec<u8> {
    let mut buf = vec![0; 32];
    rng.fill_bytes(&mut buf);

    buf
}
