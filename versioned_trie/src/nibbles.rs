//! Nibble sequences used as trie paths.
//!
//! A [`Nibbles`] is an ordered sequence of up to 64 4-bit nibbles, packed
//! big-nibble-first into a [`U256`] alongside an explicit count. Account and
//! storage keys are always 64 nibbles (a hashed key), but intermediate node
//! paths may be any length from `0` (the root) up to the full key length. A
//! prefix of a longer path denotes an ancestor of the node at that path.

use std::{
    fmt::{self, Debug, Display, LowerHex},
    str::FromStr,
};

use ethereum_types::{H256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single 4-bit nibble, stored in a `u8` for convenience.
pub type Nibble = u8;

/// The maximum number of nibbles in a path (a 32-byte hashed key).
pub const MAX_NIBBLES: usize = 64;

/// An error when converting raw bytes into [`Nibbles`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BytesToNibblesError {
    /// The byte slice was longer than 32 bytes.
    #[error("tried to create nibbles from {0} bytes (maximum is 32)")]
    TooManyBytes(usize),
}

/// An error when decoding a hex-prefix ("compact") encoded key.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FromHexPrefixError {
    /// The encoding was empty.
    #[error("hex-prefix bytes were empty")]
    Empty,

    /// The encoding was too long to hold a 64-nibble key.
    #[error("hex-prefix encoding of {0} bytes is too long")]
    TooLong(usize),

    /// The flag nibble held bits outside the odd/leaf flags.
    #[error("invalid hex-prefix flag nibble: {0:#x}")]
    InvalidFlags(u8),
}

/// An error when parsing a hex string into [`Nibbles`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StrToNibblesError {
    /// The string contained a character that is not a hex digit.
    #[error("string contained a non-hex digit")]
    NonHexDigit,

    /// The string encoded more than 64 nibbles.
    #[error("string encoded more than 64 nibbles")]
    TooLong,
}

/// A packed sequence of nibbles with the front nibble stored in the most
/// significant used bits.
#[derive(Clone, Copy, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Nibbles {
    /// The number of nibbles in this sequence.
    pub count: usize,
    /// Packed nibbles. Only the low `4 * count` bits are used; the rest must
    /// be zero.
    pub packed: U256,
}

impl Display for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as LowerHex>::fmt(self, f)
    }
}

impl Debug for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nibbles({self:x})")
    }
}

impl LowerHex for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::with_capacity(2 + self.count);
        s.push_str("0x");
        for i in 0..self.count {
            s.push(char::from_digit(self.get_nibble(i) as u32, 16).unwrap_or('?'));
        }
        write!(f, "{}", s)
    }
}

impl FromStr for Nibbles {
    type Err = StrToNibblesError;

    /// Parses a hex nibble string, with or without a leading `0x`. Leading
    /// zero digits are significant.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        if stripped.len() > MAX_NIBBLES {
            return Err(StrToNibblesError::TooLong);
        }

        let mut out = Nibbles::default();
        for c in stripped.chars() {
            let nib = c.to_digit(16).ok_or(StrToNibblesError::NonHexDigit)? as Nibble;
            out.push_nibble_back(nib);
        }

        Ok(out)
    }
}

impl From<H256> for Nibbles {
    fn from(v: H256) -> Self {
        Self::from_h256_be(v)
    }
}

macro_rules! impl_from_uint {
    ($type:ty) => {
        impl From<$type> for Nibbles {
            fn from(v: $type) -> Self {
                // Ethereum types don't have `BITS` defined.
                #[allow(clippy::manual_bits)]
                let size_bits = std::mem::size_of::<$type>() * 8;
                let count = (size_bits - v.leading_zeros() as usize + 3) / 4;

                Self {
                    count,
                    packed: v.into(),
                }
            }
        }
    };
}

impl_from_uint!(u8);
impl_from_uint!(u16);
impl_from_uint!(u32);
impl_from_uint!(u64);
impl_from_uint!(usize);
impl_from_uint!(U256);

impl Nibbles {
    /// Creates a `Nibbles` from a single nibble.
    ///
    /// # Panics
    /// Panics if the nibble is > `0xf`.
    pub fn from_nibble(n: Nibble) -> Self {
        assert!(n <= 0xf);

        Self {
            count: 1,
            packed: n.into(),
        }
    }

    /// Creates a `Nibbles` from big endian bytes. Each byte contributes two
    /// nibbles.
    pub fn from_bytes_be(bytes: &[u8]) -> Result<Self, BytesToNibblesError> {
        if bytes.len() > 32 {
            return Err(BytesToNibblesError::TooManyBytes(bytes.len()));
        }

        Ok(Self {
            count: bytes.len() * 2,
            packed: U256::from_big_endian(bytes),
        })
    }

    /// Creates a 64-nibble `Nibbles` from a big endian `H256`.
    pub fn from_h256_be(v: H256) -> Self {
        Self {
            count: MAX_NIBBLES,
            packed: U256::from_big_endian(v.as_bytes()),
        }
    }

    /// Returns whether this sequence holds no nibbles.
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Gets the nibble at `idx`, where the front nibble is at idx `0`.
    ///
    /// # Panics
    /// Panics if `idx` is out of range.
    pub fn get_nibble(&self, idx: usize) -> Nibble {
        assert!(idx < self.count);

        let nib_idx = self.count - idx - 1;
        let byte = self.packed.byte(nib_idx / 2);

        match nib_idx % 2 {
            0 => byte & 0x0f,
            _ => byte >> 4,
        }
    }

    /// Pops the front (next) nibble.
    ///
    /// # Panics
    /// Panics if the sequence is empty.
    pub fn pop_next_nibble_front(&mut self) -> Nibble {
        let n = self.get_nibble(0);
        self.truncate_n_nibbles_front_mut(1);

        n
    }

    /// Returns the first `n` nibbles without mutating.
    ///
    /// # Panics
    /// Panics if `n` is larger than the number of nibbles contained.
    pub fn get_next_nibbles(&self, n: usize) -> Nibbles {
        assert!(n <= self.count);

        Nibbles {
            count: n,
            packed: self.packed >> ((self.count - n) * 4),
        }
    }

    /// Pops the next `n` nibbles from the front.
    ///
    /// # Panics
    /// Panics if `n` is larger than the number of nibbles contained.
    pub fn pop_nibbles_front(&mut self, n: usize) -> Nibbles {
        let r = self.get_next_nibbles(n);
        self.truncate_n_nibbles_front_mut(n);

        r
    }

    /// Appends a nibble to the back.
    ///
    /// # Panics
    /// Panics if the result would exceed 64 nibbles or the nibble is > `0xf`.
    pub fn push_nibble_back(&mut self, n: Nibble) {
        assert!(self.count < MAX_NIBBLES);
        assert!(n <= 0xf);

        self.count += 1;
        self.packed = (self.packed << 4) | n.into();
    }

    /// Drops the front `n` nibbles. Over-truncating leaves the empty
    /// sequence.
    pub fn truncate_n_nibbles_front_mut(&mut self, n: usize) {
        let n = n.min(self.count);

        self.count -= n;
        self.packed = self.packed & mask_of_1s(self.count * 4);
    }

    /// Drops the front `n` nibbles without mutating.
    pub fn truncate_n_nibbles_front(&self, n: usize) -> Nibbles {
        let mut nibs = *self;
        nibs.truncate_n_nibbles_front_mut(n);

        nibs
    }

    /// Drops the back `n` nibbles without mutating.
    pub fn truncate_n_nibbles_back(&self, n: usize) -> Nibbles {
        let n = n.min(self.count);

        Nibbles {
            count: self.count - n,
            packed: self.packed >> (n * 4),
        }
    }

    /// Splits at `idx`, returning the `(prefix, postfix)` pair. Splitting
    /// `0x1234` at `1` gives `(0x1, 0x234)`.
    ///
    /// # Panics
    /// Panics if `idx` is out of range.
    pub fn split_at_idx(&self, idx: usize) -> (Nibbles, Nibbles) {
        assert!(idx <= self.count);

        (self.get_next_nibbles(idx), self.split_at_idx_postfix(idx))
    }

    /// Splits at `idx` and returns only the postfix.
    ///
    /// # Panics
    /// Panics if `idx` is out of range.
    pub fn split_at_idx_postfix(&self, idx: usize) -> Nibbles {
        assert!(idx <= self.count);

        let postfix_count = self.count - idx;

        Nibbles {
            count: postfix_count,
            packed: self.packed & mask_of_1s(postfix_count * 4),
        }
    }

    /// Merges a single nibble onto the back. `self` is the prefix.
    ///
    /// # Panics
    /// Panics if the result would exceed 64 nibbles.
    pub fn merge_nibble(&self, post: Nibble) -> Nibbles {
        let mut nibs = *self;
        nibs.push_nibble_back(post);

        nibs
    }

    /// Merges two sequences. `self` is the prefix.
    ///
    /// # Panics
    /// Panics if the result would exceed 64 nibbles.
    pub fn merge_nibbles(&self, post: &Nibbles) -> Nibbles {
        let new_count = self.count + post.count;
        assert!(new_count <= MAX_NIBBLES);

        Nibbles {
            count: new_count,
            packed: (self.packed << (post.count * 4)) | post.packed,
        }
    }

    /// Checks whether two sequences are identical up to the shorter of the
    /// two.
    pub fn nibbles_are_identical_up_to_smallest_count(&self, other: &Nibbles) -> bool {
        let smaller_count = self.count.min(other.count);
        self.get_next_nibbles(smaller_count) == other.get_next_nibbles(smaller_count)
    }

    /// Finds the first index at which two sequences differ. If no index
    /// within the shorter sequence differs, returns the shorter count.
    pub fn find_idx_of_first_difference(n1: &Nibbles, n2: &Nibbles) -> usize {
        let min_count = n1.count.min(n2.count);
        (0..min_count)
            .find(|&i| n1.get_nibble(i) != n2.get_nibble(i))
            .unwrap_or(min_count)
    }

    /// Returns the minimum number of bytes needed to hold these nibbles.
    pub const fn min_bytes(&self) -> usize {
        (self.count + 1) / 2
    }

    /// Returns the packed nibbles as big-endian bytes, front-padded with a
    /// zero nibble when the count is odd.
    pub fn bytes_be(&self) -> Vec<u8> {
        let mut buf = [0; 32];
        self.packed.to_big_endian(&mut buf);

        buf[32 - self.min_bytes()..].to_vec()
    }

    /// Converts to hex-prefix ("compact") encoding. The flag nibble encodes
    /// the parity of the count and whether the node is a leaf (terminator).
    pub fn to_hex_prefix_encoding(&self, is_leaf: bool) -> Vec<u8> {
        let odd = self.count % 2 == 1;
        let mut out = Vec::with_capacity(1 + self.count / 2);

        let mut flag_byte = if is_leaf { 0x20 } else { 0x00 };
        let mut i = 0;

        if odd {
            flag_byte |= 0x10 | self.get_nibble(0);
            i = 1;
        }
        out.push(flag_byte);

        while i < self.count {
            out.push((self.get_nibble(i) << 4) | self.get_nibble(i + 1));
            i += 2;
        }

        out
    }

    /// Decodes a hex-prefix byte string into `(nibbles, is_leaf)`.
    pub fn from_hex_prefix_encoding(bytes: &[u8]) -> Result<(Self, bool), FromHexPrefixError> {
        if bytes.is_empty() {
            return Err(FromHexPrefixError::Empty);
        }
        if bytes.len() > 33 {
            return Err(FromHexPrefixError::TooLong(bytes.len()));
        }

        let flags = bytes[0] >> 4;
        if flags > 0b11 {
            return Err(FromHexPrefixError::InvalidFlags(flags));
        }

        let is_leaf = flags & 0b10 != 0;
        let odd = flags & 0b01 != 0;

        if (bytes.len() - 1) * 2 + usize::from(odd) > MAX_NIBBLES {
            return Err(FromHexPrefixError::TooLong(bytes.len()));
        }

        let mut nibs = Nibbles::default();
        if odd {
            nibs.push_nibble_back(bytes[0] & 0x0f);
        }
        for b in &bytes[1..] {
            nibs.push_nibble_back(b >> 4);
            nibs.push_nibble_back(b & 0x0f);
        }

        Ok((nibs, is_leaf))
    }
}

/// A mask covering the low `amt` bits.
fn mask_of_1s(amt: usize) -> U256 {
    match amt >= 256 {
        true => U256::MAX,
        false => (U256::one() << amt) - 1,
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use ethereum_types::H256;

    use super::Nibbles;

    fn nibs(s: &str) -> Nibbles {
        Nibbles::from_str(s).unwrap()
    }

    #[test]
    fn get_nibble_works() {
        let n = nibs("0x1234");
        assert_eq!(n.get_nibble(0), 0x1);
        assert_eq!(n.get_nibble(3), 0x4);

        let n = nibs("0x3ab76c381c0f8ea617ea96780ffd1e165c754b28a41a95922f9f70682c581353");
        assert_eq!(n.get_nibble(30), 0x1);
        assert_eq!(n.get_nibble(33), 0xc);
    }

    #[test]
    fn leading_zero_nibbles_are_significant() {
        let n = nibs("0x0012");
        assert_eq!(n.count, 4);
        assert_eq!(n.get_nibble(0), 0x0);
        assert_eq!(n.get_nibble(2), 0x1);
        assert_ne!(n, nibs("0x12"));
    }

    #[test]
    fn pop_and_truncate_work() {
        let mut n = nibs("0x1234");
        assert_eq!(n.pop_next_nibble_front(), 0x1);
        assert_eq!(n, nibs("0x234"));

        assert_eq!(n.pop_nibbles_front(2), nibs("0x23"));
        assert_eq!(n, nibs("0x4"));

        assert_eq!(nibs("0x1234").truncate_n_nibbles_back(2), nibs("0x12"));
        assert_eq!(nibs("0x1234").truncate_n_nibbles_front(2), nibs("0x34"));
    }

    #[test]
    fn split_and_merge_round_trip() {
        let n = nibs("0x12345");
        let (pre, post) = n.split_at_idx(2);

        assert_eq!(pre, nibs("0x12"));
        assert_eq!(post, nibs("0x345"));
        assert_eq!(pre.merge_nibbles(&post), n);
        assert_eq!(nibs("0x12").merge_nibble(0x3), nibs("0x123"));
    }

    #[test]
    fn first_difference_idx_works() {
        assert_eq!(
            Nibbles::find_idx_of_first_difference(&nibs("0x1234"), &nibs("0x1256")),
            2
        );
        assert_eq!(
            Nibbles::find_idx_of_first_difference(&nibs("0x1234"), &nibs("0x12")),
            2
        );
        assert_eq!(
            Nibbles::find_idx_of_first_difference(&nibs("0x1234"), &nibs("0x5678")),
            0
        );
    }

    #[test]
    fn hex_prefix_encoding_round_trips() {
        for (s, is_leaf) in [
            ("0x1234", true),
            ("0x1234", false),
            ("0x123", true),
            ("0x123", false),
            ("0x", true),
            ("0x", false),
        ] {
            let n = nibs(s);
            let enc = n.to_hex_prefix_encoding(is_leaf);
            assert_eq!(
                Nibbles::from_hex_prefix_encoding(&enc).unwrap(),
                (n, is_leaf)
            );
        }
    }

    #[test]
    fn hex_prefix_encoding_matches_known_vectors() {
        // Vectors from the yellow paper's compact encoding appendix.
        assert_eq!(
            nibs("0x12345").to_hex_prefix_encoding(false),
            vec![0x11, 0x23, 0x45]
        );
        assert_eq!(
            nibs("0x012345").to_hex_prefix_encoding(false),
            vec![0x00, 0x01, 0x23, 0x45]
        );
        assert_eq!(
            nibs("0x0f1cb8").to_hex_prefix_encoding(true),
            vec![0x20, 0x0f, 0x1c, 0xb8]
        );
        assert_eq!(
            nibs("0xf1cb8").to_hex_prefix_encoding(true),
            vec![0x3f, 0x1c, 0xb8]
        );
    }

    #[test]
    fn h256_keys_have_64_nibbles() {
        let n = Nibbles::from_h256_be(H256::repeat_byte(0xab));
        assert_eq!(n.count, 64);
        assert_eq!(n.get_nibble(0), 0xa);
        assert_eq!(n.get_nibble(63), 0xb);
        assert_eq!(n.bytes_be(), H256::repeat_byte(0xab).as_bytes().to_vec());
    }
}
