//! The versioned trie handle tying the node graph to a node store.

use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::{keccak, KECCAK_NULL_RLP};
use log::{debug, trace};
use rlp::RlpStream;

use crate::{
    hashing::{self, EncodedNode},
    nibbles::Nibbles,
    node::{Node, NodeRef},
    ops::{self, TrieOpResult},
    store::{flags::ReadHints, NodeSink, NodeSource},
};

/// A Merkle-Patricia trie whose unresolved subtrees live in a node source.
///
/// The in-memory part of the trie is a copy-on-write graph: `clone` is cheap
/// and clones diverge as they are mutated. [`Trie::commit`] hands every new
/// node of a block to the source's sink side and collapses the in-memory
/// graph back to a single placeholder, so memory stays bounded by the work
/// done since the last commit.
#[derive(Clone, Debug)]
pub struct Trie<S> {
    root: NodeRef,
    source: S,
}

impl<S> Trie<S> {
    /// An empty trie over `source`.
    pub fn new(source: S) -> Self {
        Self {
            root: Node::Empty.into(),
            source,
        }
    }

    /// A trie positioned at a previously committed `root` hash. The root
    /// node is not loaded until first use.
    pub fn from_root(source: S, root: H256) -> Self {
        let root_node = match root == KECCAK_NULL_RLP {
            true => Node::Empty,
            false => Node::Hash(root),
        };

        Self {
            root: root_node.into(),
            source,
        }
    }

    /// The root hash of the current (possibly uncommitted) contents.
    pub fn root_hash(&self) -> H256 {
        hashing::hash_node(&self.root)
    }

    /// Whether the trie is known-empty without resolving anything.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// The node source backing this trie.
    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: NodeSource> Trie<S> {
    /// Looks up the value stored at `key`.
    pub fn get<K>(&self, key: K) -> TrieOpResult<Option<Vec<u8>>>
    where
        K: Into<Nibbles>,
    {
        self.get_with_hints(key, ReadHints::default())
    }

    /// Looks up `key`, passing `hints` to every node resolution the lookup
    /// performs.
    pub fn get_with_hints<K>(&self, key: K, hints: ReadHints) -> TrieOpResult<Option<Vec<u8>>>
    where
        K: Into<Nibbles>,
    {
        let mut key = key.into();
        trace!("getting key {}", key);

        ops::get_in(&self.root, Nibbles::default(), &mut key, &self.source, hints)
    }

    /// Sets `key` to `value`, rebuilding only the path to the key.
    pub fn set<K, V>(&mut self, key: K, value: V) -> TrieOpResult<()>
    where
        K: Into<Nibbles>,
        V: Into<Vec<u8>>,
    {
        let key = key.into();
        trace!("setting key {}", key);

        self.root = ops::insert_in(
            &self.root,
            Nibbles::default(),
            key,
            value.into(),
            &self.source,
        )?;

        Ok(())
    }

    /// Deletes `key`, returning the removed value if it was present.
    pub fn delete<K>(&mut self, key: K) -> TrieOpResult<Option<Vec<u8>>>
    where
        K: Into<Nibbles>,
    {
        let key = key.into();
        trace!("deleting key {} if it exists", key);

        match ops::delete_in(&self.root, Nibbles::default(), key, &self.source)? {
            None => Ok(None),
            Some((updated_root, deleted)) => {
                self.root = updated_root;
                Ok(Some(deleted))
            }
        }
    }
}

impl<S: NodeSource + NodeSink> Trie<S> {
    /// Hands every node built since the last commit to the sink under
    /// `block` and returns the resulting root hash.
    ///
    /// The root's encoding is always recorded under its own hash, even when
    /// it is small enough that a parent would inline it; every other node is
    /// recorded only when it is referenced by hash. Afterwards the in-memory
    /// root collapses to a placeholder, releasing the block's node graph.
    pub fn commit(&mut self, block: u64) -> TrieOpResult<H256> {
        let encoded = commit_walk(&self.root, Nibbles::default(), block, &self.source)?;

        let root_hash = match encoded {
            EncodedNode::Hashed(h) => h,
            EncodedNode::Raw(bytes) => {
                let h = keccak(&bytes);
                if h != KECCAK_NULL_RLP {
                    self.source
                        .commit_node(block, &Nibbles::default(), h, bytes)?;
                }
                h
            }
        };

        if !self.root.is_empty() {
            self.root = Node::Hash(root_hash).into();
        }
        debug!("committed trie for block {} with root {:x}", block, root_hash);

        Ok(root_hash)
    }
}

/// Re-encodes the in-memory subtree under `node`, recording every node that
/// is referenced by hash. Placeholders were recorded when they were built
/// and are passed over.
fn commit_walk<S: NodeSink>(
    node: &NodeRef,
    path: Nibbles,
    block: u64,
    sink: &S,
) -> TrieOpResult<EncodedNode> {
    let body = match &**node {
        Node::Empty => return Ok(EncodedNode::Raw(Bytes::from_static(&rlp::NULL_RLP))),
        Node::Hash(h) => return Ok(EncodedNode::Hashed(*h)),
        Node::Branch { children, value } => {
            let mut stream = RlpStream::new_list(17);

            for (i, child) in children.iter().enumerate() {
                let encoded = commit_walk(child, path.merge_nibble(i as u8), block, sink)?;
                append_encoded(&mut stream, encoded);
            }

            match value.is_empty() {
                false => stream.append(value),
                true => stream.append_empty_data(),
            };

            stream.out()
        }
        Node::Extension { key, child } => {
            let encoded = commit_walk(child, path.merge_nibbles(key), block, sink)?;

            let mut stream = RlpStream::new_list(2);
            stream.append(&key.to_hex_prefix_encoding(false));
            append_encoded(&mut stream, encoded);

            stream.out()
        }
        Node::Leaf { key, value } => {
            let mut stream = RlpStream::new_list(2);
            stream.append(&key.to_hex_prefix_encoding(true));
            stream.append(value);

            stream.out()
        }
    };

    let bytes: Bytes = body.into();
    if bytes.len() < 32 {
        return Ok(EncodedNode::Raw(bytes));
    }

    let h = keccak(&bytes);
    sink.commit_node(block, &path, h, bytes)?;
    node.set_cached_hash(h);

    Ok(EncodedNode::Hashed(h))
}

fn append_encoded(s: &mut RlpStream, node: EncodedNode) {
    match node {
        EncodedNode::Raw(b) => s.append_raw(&b, 1),
        EncodedNode::Hashed(h) => s.append(&h),
    };
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use eth_trie::{EthTrie, MemoryDB, Trie as _};
    use ethereum_types::H256;
    use keccak_hash::KECCAK_NULL_RLP;

    use crate::{
        ops::TrieOpResult,
        store::{scopes::StateScope, TrieKind},
        testing_utils::{
            common_setup, entry, entry_with_value, generate_n_random_fixed_trie_value_entries,
            state_trie_with_store, TestInsertValEntry,
        },
        trie::Trie,
    };

    const MASSIVE_TRIE_SIZE: usize = 1000;

    fn create_truth_trie() -> EthTrie<MemoryDB> {
        let db = Arc::new(MemoryDB::new(true));
        EthTrie::new(db)
    }

    /// Gets the root hash for each insert by using an established eth trie
    /// library as a ground truth.
    fn get_lib_trie_root_hashes_after_each_insert(
        entries: impl Iterator<Item = TestInsertValEntry>,
    ) -> impl Iterator<Item = H256> {
        let mut truth_trie = create_truth_trie();

        entries.map(move |(k, v)| {
            truth_trie.insert(&k.bytes_be(), &v).unwrap();
            let h = truth_trie.root_hash().unwrap();

            // Kind of silly... Both of these types are identical except that
            // one is re-exported. Cargo is generating crate version mismatch
            // errors. Not sure how else to solve...
            ethereum_types::H256(h.0)
        })
    }

    fn get_root_hashes_for_our_trie_after_each_insert(
        entries: impl Iterator<Item = TestInsertValEntry>,
    ) -> impl Iterator<Item = H256> {
        let (mut trie, _store) = state_trie_with_store(64);

        entries.map(move |(k, v)| {
            trie.set(k, v).unwrap();
            trie.root_hash()
        })
    }

    fn insert_entries_into_our_and_lib_tries_and_assert_equal_hashes(
        entries: &[TestInsertValEntry],
    ) {
        let truth_hashes = get_lib_trie_root_hashes_after_each_insert(entries.iter().cloned());
        let our_hashes = get_root_hashes_for_our_trie_after_each_insert(entries.iter().cloned());

        for (our_h, lib_h) in our_hashes.zip(truth_hashes) {
            assert_eq!(our_h, lib_h)
        }
    }

    #[test]
    fn empty_trie_has_the_canonical_empty_root() {
        common_setup();

        let (trie, _store) = state_trie_with_store(64);
        assert_eq!(trie.root_hash(), KECCAK_NULL_RLP);
        assert!(trie.is_empty());
    }

    #[test]
    fn single_insert_hash_matches_lib() {
        common_setup();
        insert_entries_into_our_and_lib_tries_and_assert_equal_hashes(&[entry(0x1234_u64)]);
    }

    #[test]
    fn massive_trie_hashes_match_lib_after_each_insert() {
        common_setup();

        let entries: Vec<_> =
            generate_n_random_fixed_trie_value_entries(MASSIVE_TRIE_SIZE, 0).collect();
        insert_entries_into_our_and_lib_tries_and_assert_equal_hashes(&entries);
    }

    #[test]
    fn trie_hashes_match_lib_through_deletes() -> TrieOpResult<()> {
        common_setup();

        let entries: Vec<_> =
            generate_n_random_fixed_trie_value_entries(MASSIVE_TRIE_SIZE, 1).collect();

        let (mut trie, _store) = state_trie_with_store(64);
        let mut truth_trie = create_truth_trie();

        for (k, v) in entries.iter() {
            trie.set(*k, v.clone())?;
            truth_trie.insert(&k.bytes_be(), v).unwrap();
        }

        // Delete every other entry from both tries and compare the roots.
        for (k, _) in entries.iter().step_by(2) {
            trie.delete(*k)?;
            truth_trie.remove(&k.bytes_be()).unwrap();
        }

        let lib_h = truth_trie.root_hash().unwrap();
        assert_eq!(trie.root_hash(), ethereum_types::H256(lib_h.0));

        Ok(())
    }

    #[test]
    fn get_returns_the_inserted_values() -> TrieOpResult<()> {
        common_setup();

        let entries: HashMap<_, _> =
            generate_n_random_fixed_trie_value_entries(MASSIVE_TRIE_SIZE, 2).collect();

        let (mut trie, _store) = state_trie_with_store(64);
        for (k, v) in entries.iter() {
            trie.set(*k, v.clone())?;
        }

        for (k, v) in entries.iter() {
            assert_eq!(trie.get(*k)?.as_ref(), Some(v));
        }
        assert_eq!(trie.get(0xdead_u64)?, None);

        Ok(())
    }

    #[test]
    fn overwriting_a_key_replaces_its_value() -> TrieOpResult<()> {
        common_setup();

        let (mut trie, _store) = state_trie_with_store(64);

        let (k, v) = entry_with_value(0x1234_u64, 1);
        trie.set(k, v)?;
        let (_, v2) = entry_with_value(0x1234_u64, 2);
        trie.set(k, v2.clone())?;

        assert_eq!(trie.get(k)?, Some(v2));

        Ok(())
    }

    #[test]
    fn deleting_all_entries_restores_the_empty_root() -> TrieOpResult<()> {
        common_setup();

        let entries: Vec<_> = generate_n_random_fixed_trie_value_entries(100, 3).collect();
        let (mut trie, _store) = state_trie_with_store(64);

        for (k, v) in entries.iter() {
            trie.set(*k, v.clone())?;
        }
        for (k, v) in entries.iter() {
            assert_eq!(trie.delete(*k)?.as_ref(), Some(v));
        }

        assert_eq!(trie.root_hash(), KECCAK_NULL_RLP);

        Ok(())
    }

    #[test]
    fn deleting_an_absent_key_is_a_noop() -> TrieOpResult<()> {
        common_setup();

        let (mut trie, _store) = state_trie_with_store(64);
        trie.set(0x1234_u64, vec![7])?;
        let h_before = trie.root_hash();

        assert_eq!(trie.delete(0x5678_u64)?, None);
        assert_eq!(trie.root_hash(), h_before);

        Ok(())
    }

    #[test]
    fn insert_order_does_not_change_the_root() -> TrieOpResult<()> {
        common_setup();

        let entries: Vec<_> = generate_n_random_fixed_trie_value_entries(100, 4).collect();
        let mut reversed = entries.clone();
        reversed.reverse();

        let (mut t1, _s1) = state_trie_with_store(64);
        let (mut t2, _s2) = state_trie_with_store(64);

        for (k, v) in entries {
            t1.set(k, v)?;
        }
        for (k, v) in reversed {
            t2.set(k, v)?;
        }

        assert_eq!(t1.root_hash(), t2.root_hash());

        Ok(())
    }

    #[test]
    fn committed_trie_reads_back_through_the_store() -> TrieOpResult<()> {
        common_setup();

        let entries: Vec<_> =
            generate_n_random_fixed_trie_value_entries(MASSIVE_TRIE_SIZE, 5).collect();
        let (mut trie, store) = state_trie_with_store(64);

        let uncommitted_root = {
            for (k, v) in entries.iter() {
                trie.set(*k, v.clone())?;
            }
            trie.root_hash()
        };

        let root = trie.commit(1)?;
        assert_eq!(root, uncommitted_root);
        store.finish_block_commit(TrieKind::State, 1, root)?;

        let reopened = Trie::from_root(StateScope::new(store), root);
        for (k, v) in entries.iter() {
            assert_eq!(reopened.get(*k)?.as_ref(), Some(v));
        }
        assert_eq!(reopened.root_hash(), root);

        Ok(())
    }

    #[test]
    fn mutations_on_top_of_a_committed_root_read_latest() -> TrieOpResult<()> {
        common_setup();

        let (mut trie, store) = state_trie_with_store(64);

        trie.set(0x1234_u64, vec![1])?;
        trie.set(0x5678_u64, vec![2])?;
        let root_1 = trie.commit(1)?;
        store.finish_block_commit(TrieKind::State, 1, root_1)?;

        trie.set(0x1234_u64, vec![3])?;
        trie.delete(0x5678_u64)?;
        let root_2 = trie.commit(2)?;
        store.finish_block_commit(TrieKind::State, 2, root_2)?;

        assert_ne!(root_1, root_2);
        assert_eq!(trie.get(0x1234_u64)?, Some(vec![3]));
        assert_eq!(trie.get(0x5678_u64)?, None);

        // The older root is still readable while it stays in the window.
        let old = Trie::from_root(StateScope::new(store), root_1);
        assert_eq!(old.get(0x1234_u64)?, Some(vec![1]));
        assert_eq!(old.get(0x5678_u64)?, Some(vec![2]));

        Ok(())
    }

    #[test]
    fn values_survive_eviction_to_the_backing_store() -> TrieOpResult<()> {
        common_setup();

        let entries: Vec<_> = generate_n_random_fixed_trie_value_entries(200, 6).collect();
        let (mut trie, store) = state_trie_with_store(2);

        let mut last_root = KECCAK_NULL_RLP;
        for (block, chunk) in entries.chunks(20).enumerate() {
            let block = block as u64 + 1;

            for (k, v) in chunk.iter() {
                trie.set(*k, v.clone())?;
            }
            last_root = trie.commit(block)?;
            store.finish_block_commit(TrieKind::State, block, last_root)?;
        }

        // With a depth of 2 and ten committed blocks, the early blocks have
        // been persisted and evicted by now.
        assert!(store.reorg_boundary().is_some());

        let reopened = Trie::from_root(StateScope::new(store), last_root);
        for (k, v) in entries.iter() {
            assert_eq!(reopened.get(*k)?.as_ref(), Some(v));
        }

        Ok(())
    }

    #[test]
    fn small_root_is_committed_under_its_own_hash() -> TrieOpResult<()> {
        common_setup();

        let (mut trie, store) = state_trie_with_store(64);

        // A single short leaf encodes to fewer than 32 bytes, so nothing in
        // the walk would record it; the root must still be resolvable.
        trie.set(0x12_u64, vec![1])?;
        let root = trie.commit(1)?;
        store.finish_block_commit(TrieKind::State, 1, root)?;

        let reopened = Trie::from_root(StateScope::new(store), root);
        assert_eq!(reopened.get(0x12_u64)?, Some(vec![1]));

        Ok(())
    }

    #[test]
    fn empty_commit_returns_the_empty_root() -> TrieOpResult<()> {
        common_setup();

        let (mut trie, store) = state_trie_with_store(64);
        let root = trie.commit(1)?;

        assert_eq!(root, KECCAK_NULL_RLP);
        assert!(store.reorg_boundary().is_none());

        Ok(())
    }

    #[test]
    fn hinted_gets_behave_like_plain_gets() -> TrieOpResult<()> {
        common_setup();

        use crate::store::flags::ReadHints;

        let (mut trie, store) = state_trie_with_store(64);
        trie.set(0x1234_u64, vec![9])?;
        let root = trie.commit(1)?;
        store.finish_block_commit(TrieKind::State, 1, root)?;

        let reopened = Trie::from_root(StateScope::new(store), root);
        assert_eq!(
            reopened.get_with_hints(0x1234_u64, ReadHints::READ_AHEAD)?,
            Some(vec![9])
        );

        Ok(())
    }
}
