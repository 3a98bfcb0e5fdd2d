//! Canonical RLP encoding, keccak hashing and decoding of trie nodes.
//!
//! A node whose RLP encoding is shorter than 32 bytes is inlined raw into
//! its parent's encoding; anything at or above 32 bytes is referenced by its
//! keccak digest. The empty trie hashes to [`keccak_hash::KECCAK_NULL_RLP`].

use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::keccak;
use rlp::{DecoderError, Rlp, RlpStream};

use crate::{
    nibbles::Nibbles,
    node::{Node, NodeRef},
};

/// The encoded form of a node as seen by its parent.
#[derive(Clone, Debug)]
pub enum EncodedNode {
    /// RLP shorter than 32 bytes, inlined into the parent.
    Raw(Bytes),
    /// Nodes of 32 or more encoded bytes are referenced by hash.
    Hashed(H256),
}

impl From<&EncodedNode> for H256 {
    fn from(v: &EncodedNode) -> Self {
        match v {
            EncodedNode::Raw(b) => keccak(b),
            EncodedNode::Hashed(h) => *h,
        }
    }
}

/// Computes the root hash of the subtree under `node`, memoizing per-node
/// hashes along the way.
pub(crate) fn hash_node(node: &NodeRef) -> H256 {
    (&encode_and_hash_node(node)).into()
}

/// Encodes a node reference the way its parent embeds it, consulting and
/// filling the memoized hash slot.
pub(crate) fn encode_and_hash_node(node: &NodeRef) -> EncodedNode {
    if let Some(h) = node.cached_hash() {
        return EncodedNode::Hashed(h);
    }

    let res = match &**node {
        Node::Empty => EncodedNode::Raw(Bytes::from_static(&rlp::NULL_RLP)),
        Node::Hash(h) => EncodedNode::Hashed(*h),
        body => hash_bytes_if_large_enough(encode_node_raw(body)),
    };

    // Raw encodings are too small to have a standalone hash, so only cache
    // for the hashed case.
    if let EncodedNode::Hashed(h) = &res {
        node.set_cached_hash(*h);
    }

    res
}

/// The full RLP encoding of a branch, extension or leaf body, before the
/// inline-or-hash decision.
///
/// # Panics
/// Panics on [`Node::Empty`] and [`Node::Hash`], which have no body of their
/// own.
pub(crate) fn encode_node_raw(node: &Node) -> Bytes {
    match node {
        Node::Branch { children, value } => {
            let mut stream = RlpStream::new_list(17);

            for c in children.iter() {
                append_to_stream(&mut stream, encode_and_hash_node(c));
            }

            match value.is_empty() {
                false => stream.append(value),
                true => stream.append_empty_data(),
            };

            stream.out().into()
        }
        Node::Extension { key, child } => {
            let mut stream = RlpStream::new_list(2);

            stream.append(&key.to_hex_prefix_encoding(false));
            append_to_stream(&mut stream, encode_and_hash_node(child));

            stream.out().into()
        }
        Node::Leaf { key, value } => {
            let mut stream = RlpStream::new_list(2);

            stream.append(&key.to_hex_prefix_encoding(true));
            stream.append(value);

            stream.out().into()
        }
        Node::Empty | Node::Hash(_) => {
            unreachable!("tried to body-encode an empty or placeholder node")
        }
    }
}

fn hash_bytes_if_large_enough(bytes: Bytes) -> EncodedNode {
    match bytes.len() >= 32 {
        false => EncodedNode::Raw(bytes),
        true => EncodedNode::Hashed(keccak(&bytes)),
    }
}

fn append_to_stream(s: &mut RlpStream, node: EncodedNode) {
    match node {
        EncodedNode::Raw(b) => s.append_raw(&b, 1),
        EncodedNode::Hashed(h) => s.append(&h),
    };
}

/// Decodes a node from its RLP encoding, the exact inverse of the encoding
/// above. Children appear as [`Node::Hash`] placeholders (32-byte strings),
/// inline-decoded small nodes (nested lists) or [`Node::Empty`] (empty
/// strings).
pub(crate) fn decode_node(bytes: &[u8]) -> Result<Node, DecoderError> {
    let rlp = Rlp::new(bytes);

    match rlp.item_count()? {
        17 => {
            let mut children = Node::empty_branch_children();
            for (i, child) in children.iter_mut().enumerate() {
                *child = decode_child(rlp.at(i)?)?;
            }

            let value = rlp.at(16)?.data()?.to_vec();

            Ok(Node::Branch { children, value })
        }
        2 => {
            let (key, is_leaf) = Nibbles::from_hex_prefix_encoding(rlp.at(0)?.data()?)
                .map_err(|_| DecoderError::Custom("invalid hex-prefix key"))?;

            match is_leaf {
                true => Ok(Node::Leaf {
                    key,
                    value: rlp.at(1)?.data()?.to_vec(),
                }),
                false => Ok(Node::Extension {
                    key,
                    child: decode_child(rlp.at(1)?)?,
                }),
            }
        }
        _ => Err(DecoderError::Custom("trie node is not a 2 or 17 item list")),
    }
}

fn decode_child(rlp: Rlp<'_>) -> Result<NodeRef, DecoderError> {
    if rlp.is_list() {
        // An inline child, embedded because its encoding is < 32 bytes.
        return Ok(decode_node(rlp.as_raw())?.into());
    }

    let data = rlp.data()?;
    match data.len() {
        0 => Ok(Node::Empty.into()),
        32 => Ok(Node::Hash(H256::from_slice(data)).into()),
        _ => Err(DecoderError::Custom(
            "child reference is neither empty, a hash nor a list",
        )),
    }
}
