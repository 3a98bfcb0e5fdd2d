//! The in-memory trie node model.
//!
//! Nodes form an immutable, `Arc`-shared graph: a mutation never edits a node
//! in place, it rebuilds the nodes on the path to the key and leaves every
//! other subtree shared with older roots. A [`Node::Hash`] is a lazy
//! placeholder for a subtree that lives in the node store; it holds only the
//! content hash and is resolved (loaded and decoded) on first traversal.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use ethereum_types::H256;
use parking_lot::RwLock;

use crate::nibbles::Nibbles;

/// A shared handle to a node, carrying a per-node memoized hash.
///
/// The memo slot is the only interior mutability in the graph: it caches the
/// node's content hash once computed and is never written with a different
/// value afterwards, so sharing it between concurrent readers is safe.
#[derive(Clone, Debug, Default)]
pub struct NodeRef {
    node: Arc<Node>,
    pub(crate) hash: Arc<RwLock<Option<H256>>>,
}

impl Deref for NodeRef {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

impl From<Node> for NodeRef {
    fn from(node: Node) -> Self {
        let hash = match &node {
            Node::Hash(h) => Some(*h),
            _ => None,
        };

        Self {
            node: Arc::new(node),
            hash: Arc::new(RwLock::new(hash)),
        }
    }
}

impl Eq for NodeRef {}

/// Structural equality; memoized hashes are ignored.
impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl NodeRef {
    /// The memoized content hash, if one has been computed.
    pub fn cached_hash(&self) -> Option<H256> {
        *self.hash.read()
    }

    pub(crate) fn set_cached_hash(&self, h: H256) {
        *self.hash.write() = Some(h);
    }

    /// The kind of the referenced node.
    pub fn kind(&self) -> NodeKind {
        NodeKind::from(&**self)
    }
}

/// One node of a Merkle-Patricia trie.
#[derive(Clone, Debug, Default)]
pub enum Node {
    /// An empty (sub)trie.
    #[default]
    Empty,
    /// An unresolved subtree known only by its content hash, loadable from
    /// the node store on demand.
    Hash(H256),
    /// A branch node with 16 children indexed by the next nibble, plus an
    /// optional value for keys that end here.
    Branch {
        /// The 16 children of this branch.
        children: [NodeRef; 16],
        /// The payload for a key terminating at this branch. Empty when no
        /// such key exists (fixed-length keys never terminate at a branch).
        value: Vec<u8>,
    },
    /// An extension node compressing a run of nibbles shared by every
    /// descendant.
    Extension {
        /// The compressed nibble run.
        key: Nibbles,
        /// The single child, always a branch (or a placeholder for one).
        child: NodeRef,
    },
    /// A leaf node terminating a path.
    Leaf {
        /// The remaining nibbles of the key.
        key: Nibbles,
        /// The stored value.
        value: Vec<u8>,
    },
}

impl Eq for Node {}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Empty, Node::Empty) => true,
            (Node::Hash(h1), Node::Hash(h2)) => h1 == h2,
            (
                Node::Branch {
                    children: c1,
                    value: v1,
                },
                Node::Branch {
                    children: c2,
                    value: v2,
                },
            ) => v1 == v2 && c1 == c2,
            (
                Node::Extension { key: k1, child: c1 },
                Node::Extension { key: k2, child: c2 },
            ) => k1 == k2 && c1 == c2,
            (Node::Leaf { key: k1, value: v1 }, Node::Leaf { key: k2, value: v2 }) => {
                k1 == k2 && v1 == v2
            }
            (_, _) => false,
        }
    }
}

impl Node {
    /// Returns `true` for [`Node::Empty`].
    pub const fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    pub(crate) fn branch(children: [NodeRef; 16], value: Vec<u8>) -> NodeRef {
        Node::Branch { children, value }.into()
    }

    pub(crate) fn extension(key: Nibbles, child: NodeRef) -> NodeRef {
        Node::Extension { key, child }.into()
    }

    pub(crate) fn leaf(key: Nibbles, value: Vec<u8>) -> NodeRef {
        Node::Leaf { key, value }.into()
    }

    pub(crate) fn empty_branch_children() -> [NodeRef; 16] {
        Default::default()
    }
}

/// Simplified node type, mostly to make logging cleaner.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NodeKind {
    /// Empty node.
    Empty,
    /// Unresolved hash placeholder.
    Hash,
    /// Branch node.
    Branch,
    /// Extension node.
    Extension,
    /// Leaf node.
    Leaf,
}

impl From<&Node> for NodeKind {
    fn from(node: &Node) -> Self {
        match node {
            Node::Empty => Self::Empty,
            Node::Hash(_) => Self::Hash,
            Node::Branch { .. } => Self::Branch,
            Node::Extension { .. } => Self::Extension,
            Node::Leaf { .. } => Self::Leaf,
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Empty => "Empty",
            NodeKind::Hash => "Hash",
            NodeKind::Branch => "Branch",
            NodeKind::Extension => "Extension",
            NodeKind::Leaf => "Leaf",
        };

        write!(f, "{}", s)
    }
}
