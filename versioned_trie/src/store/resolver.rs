//! A hint-carrying decorator over any node source.

use bytes::Bytes;
use ethereum_types::H256;

use super::{flags::ReadHints, NodeSink, NodeSource, TrieStoreError};
use crate::nibbles::Nibbles;

/// Decorates a node source with a configured set of read hints.
///
/// Hints supplied by a caller on an individual read are combined with the
/// configured hints by bitwise union and forwarded to the inner source
/// unchanged; the decorator never alters, drops or reorders hint bits.
#[derive(Clone, Debug)]
pub struct HintedSource<S> {
    inner: S,
    hints: ReadHints,
}

impl<S> HintedSource<S> {
    /// Wraps `inner`, attaching `hints` to every read passing through.
    pub fn new(inner: S, hints: ReadHints) -> Self {
        Self { inner, hints }
    }

    /// The configured hints.
    pub fn hints(&self) -> ReadHints {
        self.hints
    }

    /// The wrapped source.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: NodeSource> NodeSource for HintedSource<S> {
    fn load_rlp(
        &self,
        path: &Nibbles,
        hash: H256,
        hints: ReadHints,
    ) -> Result<Bytes, TrieStoreError> {
        self.inner.load_rlp(path, hash, self.hints | hints)
    }
}

impl<S: NodeSink> NodeSink for HintedSource<S> {
    fn commit_node(
        &self,
        block: u64,
        path: &Nibbles,
        hash: H256,
        rlp: Bytes,
    ) -> Result<(), TrieStoreError> {
        self.inner.commit_node(block, path, hash, rlp)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use ethereum_types::H256;
    use parking_lot::Mutex;

    use super::HintedSource;
    use crate::{
        nibbles::Nibbles,
        store::{flags::ReadHints, NodeSource, TrieStoreError},
        testing_utils::common_setup,
    };

    /// A source that records the hints of every read reaching it.
    #[derive(Debug, Default)]
    struct RecordingSource {
        seen: Mutex<Vec<ReadHints>>,
    }

    impl NodeSource for RecordingSource {
        fn load_rlp(
            &self,
            _path: &Nibbles,
            _hash: H256,
            hints: ReadHints,
        ) -> Result<Bytes, TrieStoreError> {
            self.seen.lock().push(hints);
            Ok(Bytes::new())
        }
    }

    #[test]
    fn configured_and_per_read_hints_are_unioned() {
        common_setup();

        let hinted = HintedSource::new(RecordingSource::default(), ReadHints::READ_AHEAD);

        hinted
            .load_rlp(&Nibbles::default(), H256::zero(), ReadHints::CACHE_MISS)
            .unwrap();
        hinted
            .load_rlp(&Nibbles::default(), H256::zero(), ReadHints::default())
            .unwrap();

        let seen = hinted.inner().seen.lock();
        assert_eq!(seen[0], ReadHints::READ_AHEAD | ReadHints::CACHE_MISS);
        assert_eq!(seen[1], ReadHints::READ_AHEAD);
    }

    #[test]
    fn nested_decorators_accumulate_hints() {
        common_setup();

        let hinted = HintedSource::new(
            HintedSource::new(RecordingSource::default(), ReadHints::CACHE_MISS),
            ReadHints::READ_AHEAD,
        );

        hinted
            .load_rlp(&Nibbles::default(), H256::zero(), ReadHints::default())
            .unwrap();

        let seen = hinted.inner().inner().seen.lock();
        assert_eq!(seen[0], ReadHints::CACHE_MISS | ReadHints::READ_AHEAD);
    }
}
