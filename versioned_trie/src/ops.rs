//! Path-copying get/set/delete over the node graph.
//!
//! Every mutation rebuilds only the nodes on the path to the key and leaves
//! the rest of the graph shared. Traversal resolves [`Node::Hash`]
//! placeholders through the [`NodeSource`] on demand, tracking the nibble
//! path from the root so the store can be consulted by `(path, hash)`.

use log::trace;
use thiserror::Error;

use crate::{
    hashing::decode_node,
    nibbles::{Nibble, Nibbles},
    node::{Node, NodeKind, NodeRef},
    store::{flags::ReadHints, NodeSource, TrieStoreError},
};

/// The result of a trie operation.
pub type TrieOpResult<T> = Result<T, TrieOpError>;

/// An error during a trie operation. All of these are fatal for the caller.
#[derive(Debug, Error)]
pub enum TrieOpError {
    /// The node store failed to resolve or record a node.
    #[error(transparent)]
    Store(#[from] TrieStoreError),

    /// A resolved node collapsed into an impossible shape.
    #[error("branch collapse found an impossible child node type: {0}")]
    InvalidCollapse(NodeKind),
}

/// Loads and decodes a [`Node::Hash`] placeholder through the source;
/// returns any other node unchanged.
fn resolve<S: NodeSource>(
    node: &NodeRef,
    path: &Nibbles,
    source: &S,
    hints: ReadHints,
) -> TrieOpResult<NodeRef> {
    match &**node {
        Node::Hash(h) => {
            trace!("resolving node {:x} at path {}", h, path);

            let rlp = source.load_rlp(path, *h, hints)?;
            let resolved: NodeRef = decode_node(&rlp)
                .map_err(TrieStoreError::Corrupt)?
                .into();
            resolved.set_cached_hash(*h);

            Ok(resolved)
        }
        _ => Ok(node.clone()),
    }
}

pub(crate) fn get_in<S: NodeSource>(
    node: &NodeRef,
    path: Nibbles,
    key: &mut Nibbles,
    source: &S,
    hints: ReadHints,
) -> TrieOpResult<Option<Vec<u8>>> {
    let node = resolve(node, &path, source, hints)?;

    match &*node {
        Node::Empty => {
            trace!("get traversed Empty");
            Ok(None)
        }
        Node::Hash(_) => unreachable!("hash placeholder survived resolution"),
        Node::Branch { children, value } => {
            if key.is_empty() {
                return Ok((!value.is_empty()).then(|| value.clone()));
            }

            let nib = key.pop_next_nibble_front();
            trace!("get traversed Branch (nibble: {:x})", nib);
            get_in(
                &children[nib as usize],
                path.merge_nibble(nib),
                key,
                source,
                hints,
            )
        }
        Node::Extension { key: ext_key, child } => {
            trace!("get traversed Extension (key: {})", ext_key);

            if key.count < ext_key.count
                || !key.nibbles_are_identical_up_to_smallest_count(ext_key)
            {
                return Ok(None);
            }

            key.truncate_n_nibbles_front_mut(ext_key.count);
            get_in(child, path.merge_nibbles(ext_key), key, source, hints)
        }
        Node::Leaf {
            key: leaf_key,
            value,
        } => {
            trace!("get traversed Leaf (key: {})", leaf_key);
            Ok((leaf_key == &*key).then(|| value.clone()))
        }
    }
}

/// Prefix/postfix info when splitting an existing node against a new key.
#[derive(Debug)]
struct PrefixSplit {
    common_prefix: Nibbles,
    existing_postfix: Nibbles,
    new_postfix: Nibbles,
}

fn split_prefixes(existing: &Nibbles, new: &Nibbles) -> PrefixSplit {
    let idx = Nibbles::find_idx_of_first_difference(existing, new);
    let (common_prefix, existing_postfix) = existing.split_at_idx(idx);

    PrefixSplit {
        common_prefix,
        existing_postfix,
        new_postfix: new.split_at_idx_postfix(idx),
    }
}

/// Whether the existing node or the new entry lands in the value slot of the
/// branch created by a split.
#[derive(Debug)]
enum BranchValuePlacement {
    BranchValue(Vec<u8>, (Nibble, NodeRef)),
    BothChildren((Nibble, NodeRef), (Nibble, NodeRef)),
}

pub(crate) fn insert_in<S: NodeSource>(
    node: &NodeRef,
    path: Nibbles,
    mut key: Nibbles,
    value: Vec<u8>,
    source: &S,
) -> TrieOpResult<NodeRef> {
    let node = resolve(node, &path, source, ReadHints::default())?;

    match &*node {
        Node::Empty => {
            trace!("insert traversed Empty");
            Ok(Node::leaf(key, value))
        }
        Node::Hash(_) => unreachable!("hash placeholder survived resolution"),
        Node::Branch {
            children,
            value: branch_value,
        } => {
            if key.is_empty() {
                trace!("insert placed value in a Branch");
                return Ok(Node::branch(children.clone(), value));
            }

            let nib = key.pop_next_nibble_front();
            trace!("insert traversed Branch (nibble: {:x})", nib);

            let updated_child = insert_in(
                &children[nib as usize],
                path.merge_nibble(nib),
                key,
                value,
                source,
            )?;

            let mut updated_children = children.clone();
            updated_children[nib as usize] = updated_child;
            Ok(Node::branch(updated_children, branch_value.clone()))
        }
        Node::Extension { key: ext_key, child } => {
            trace!("insert traversed Extension (key: {})", ext_key);

            if key.count >= ext_key.count
                && key.nibbles_are_identical_up_to_smallest_count(ext_key)
            {
                key.truncate_n_nibbles_front_mut(ext_key.count);
                let updated_child =
                    insert_in(child, path.merge_nibbles(ext_key), key, value, source)?;

                return Ok(Node::extension(*ext_key, updated_child));
            }

            // The extension splits into a branch. One nibble of the existing
            // postfix is covered by the branch itself; anything left keeps
            // an extension in front of the original child.
            let info = split_prefixes(ext_key, &key);
            let existing_tail = info.existing_postfix.truncate_n_nibbles_front(1);
            let updated_existing = match existing_tail.count {
                0 => child.clone(),
                _ => Node::extension(existing_tail, child.clone()),
            };

            Ok(place_branch_and_maybe_ext(
                &info,
                updated_existing,
                key,
                value,
            ))
        }
        Node::Leaf {
            key: leaf_key,
            value: leaf_value,
        } => {
            trace!("insert traversed Leaf (key: {})", leaf_key);

            if leaf_key == &key {
                return Ok(Node::leaf(key, value));
            }

            let info = split_prefixes(leaf_key, &key);

            // One nibble of the existing leaf's postfix moves into the
            // branch created by the split.
            let existing_truncated = Node::leaf(
                leaf_key.truncate_n_nibbles_front(info.common_prefix.count + 1),
                leaf_value.clone(),
            );

            Ok(place_branch_and_maybe_ext(
                &info,
                existing_truncated,
                key,
                value,
            ))
        }
    }
}

fn place_branch_and_maybe_ext(
    info: &PrefixSplit,
    existing_node: NodeRef,
    new_key: Nibbles,
    new_value: Vec<u8>,
) -> NodeRef {
    let mut children = Node::empty_branch_children();
    let mut value = vec![];

    match place_in_branch(info, existing_node, new_key, new_value) {
        BranchValuePlacement::BranchValue(branch_value, (nib, node)) => {
            children[nib as usize] = node;
            value = branch_value;
        }
        BranchValuePlacement::BothChildren((nib_1, node_1), (nib_2, node_2)) => {
            children[nib_1 as usize] = node_1;
            children[nib_2 as usize] = node_2;
        }
    }

    let branch = Node::branch(children, value);

    match info.common_prefix.count {
        0 => branch,
        _ => Node::extension(info.common_prefix, branch),
    }
}

fn place_in_branch(
    info: &PrefixSplit,
    existing_node: NodeRef,
    new_key: Nibbles,
    new_value: Vec<u8>,
) -> BranchValuePlacement {
    // The two postfixes are never equal here; at most one of them is empty.
    match (info.existing_postfix.count, info.new_postfix.count, &*existing_node) {
        (0, _, Node::Leaf { value, .. }) => BranchValuePlacement::BranchValue(
            value.clone(),
            new_leaf_and_nibble(info, new_key, new_value),
        ),
        (_, 0, _) => BranchValuePlacement::BranchValue(
            new_value,
            (info.existing_postfix.get_nibble(0), existing_node.clone()),
        ),
        (_, _, _) => BranchValuePlacement::BothChildren(
            (info.existing_postfix.get_nibble(0), existing_node.clone()),
            new_leaf_and_nibble(info, new_key, new_value),
        ),
    }
}

fn new_leaf_and_nibble(
    info: &PrefixSplit,
    new_key: Nibbles,
    new_value: Vec<u8>,
) -> (Nibble, NodeRef) {
    let nib = info.new_postfix.get_nibble(0);
    let leaf = Node::leaf(
        new_key.truncate_n_nibbles_front(info.common_prefix.count + 1),
        new_value,
    );

    (nib, leaf)
}

pub(crate) fn delete_in<S: NodeSource>(
    node: &NodeRef,
    path: Nibbles,
    mut key: Nibbles,
    source: &S,
) -> TrieOpResult<Option<(NodeRef, Vec<u8>)>> {
    let node = resolve(node, &path, source, ReadHints::default())?;

    match &*node {
        Node::Empty => {
            trace!("delete traversed Empty");
            Ok(None)
        }
        Node::Hash(_) => unreachable!("hash placeholder survived resolution"),
        Node::Branch { children, value } => {
            if key.is_empty() {
                return Ok((!value.is_empty())
                    .then(|| (Node::branch(children.clone(), vec![]), value.clone())));
            }

            let nib = key.pop_next_nibble_front();
            trace!("delete traversed Branch (nibble: {:x})", nib);

            let child_path = path.merge_nibble(nib);
            match delete_in(&children[nib as usize], child_path, key, source)? {
                None => Ok(None),
                Some((updated_child, deleted)) => {
                    // The deleted slot was non-empty, so this counts the
                    // children left if the updated child vanished.
                    let remaining = non_empty_children(children) - 1;

                    let updated = if !updated_child.is_empty()
                        || remaining >= 2
                        || (remaining == 1 && !value.is_empty())
                    {
                        let mut updated_children = children.clone();
                        updated_children[nib as usize] = updated_child;
                        Node::branch(updated_children, value.clone())
                    } else if remaining == 1 {
                        // Down to a single child and no value: the branch
                        // collapses. The survivor must be resolved so its
                        // key can be merged into the replacement node.
                        collapse_branch(children, nib, &path, source)?
                    } else {
                        // Only the value is left; it becomes a leaf that a
                        // parent extension will absorb.
                        Node::leaf(Nibbles::default(), value.clone())
                    };

                    Ok(Some((updated, deleted)))
                }
            }
        }
        Node::Extension { key: ext_key, child } => {
            trace!("delete traversed Extension (key: {})", ext_key);

            if key.count < ext_key.count
                || !key.nibbles_are_identical_up_to_smallest_count(ext_key)
            {
                return Ok(None);
            }

            key.truncate_n_nibbles_front_mut(ext_key.count);
            match delete_in(child, path.merge_nibbles(ext_key), key, source)? {
                None => Ok(None),
                Some((updated_child, deleted)) => {
                    let updated = collapse_ext(ext_key, &updated_child)?;
                    Ok(Some((updated, deleted)))
                }
            }
        }
        Node::Leaf {
            key: leaf_key,
            value,
        } => {
            trace!("delete traversed Leaf (key: {})", leaf_key);
            Ok((leaf_key == &key).then(|| {
                trace!("deleting leaf ({})", leaf_key);
                (Node::Empty.into(), value.clone())
            }))
        }
    }
}

/// Replaces a branch that is down to one remaining child after a delete.
fn collapse_branch<S: NodeSource>(
    children: &[NodeRef; 16],
    deleted_nib: Nibble,
    branch_path: &Nibbles,
    source: &S,
) -> TrieOpResult<NodeRef> {
    let (nib, survivor) = children
        .iter()
        .enumerate()
        .find(|(i, c)| *i != deleted_nib as usize && !c.is_empty())
        .map(|(i, c)| (i as Nibble, c))
        .expect("a two-child branch lost its second child during a collapse");

    let survivor = resolve(survivor, &branch_path.merge_nibble(nib), source, ReadHints::default())?;

    trace!(
        "branch at {} collapsed; survivor in slot {:x} is a {}",
        branch_path,
        nib,
        survivor.kind()
    );

    match &*survivor {
        Node::Branch { .. } => Ok(Node::extension(Nibbles::from_nibble(nib), survivor.clone())),
        Node::Extension { key, child } => Ok(Node::extension(
            Nibbles::from_nibble(nib).merge_nibbles(key),
            child.clone(),
        )),
        Node::Leaf { key, value } => Ok(Node::leaf(
            Nibbles::from_nibble(nib).merge_nibbles(key),
            value.clone(),
        )),
        other => Err(TrieOpError::InvalidCollapse(NodeKind::from(other))),
    }
}

/// Re-canonicalizes an extension whose child changed during a delete.
fn collapse_ext(ext_key: &Nibbles, child: &NodeRef) -> TrieOpResult<NodeRef> {
    match &**child {
        Node::Branch { .. } | Node::Hash(_) => Ok(Node::extension(*ext_key, child.clone())),
        Node::Extension { key, child } => {
            Ok(Node::extension(ext_key.merge_nibbles(key), child.clone()))
        }
        Node::Leaf { key, value } => Ok(Node::leaf(ext_key.merge_nibbles(key), value.clone())),
        other => Err(TrieOpError::InvalidCollapse(NodeKind::from(other))),
    }
}

pub(crate) fn non_empty_children(children: &[NodeRef; 16]) -> usize {
    children.iter().filter(|c| !c.is_empty()).count()
}
