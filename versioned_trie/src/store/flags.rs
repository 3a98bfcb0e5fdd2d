//! Advisory read/write hint flags.
//!
//! Hints influence the backing store's caching and I/O strategy but have no
//! correctness effect: a store is free to ignore them, and every component
//! in between must forward them verbatim, combining layered hints by
//! bitwise union.

use bitflags::bitflags;

bitflags! {
    /// Hints attached to a read.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct ReadHints: u8 {
        /// The read is likely a cache miss; skip optimistic cache probing.
        const CACHE_MISS = 1 << 0;
        /// Sequential access is likely; prefetch adjacent data.
        const READ_AHEAD = 1 << 1;
    }
}

bitflags! {
    /// Hints attached to a write.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct WriteHints: u8 {
        /// The write may be batched with lower priority.
        const LOW_PRIORITY = 1 << 0;
        /// Durability may be relaxed for this write.
        const RELAXED_DURABILITY = 1 << 1;
    }
}
