//! Fibonacci index distribution for the trie levels.
//!
//! The set never re-hashes a key while descending. Each level takes a
//! different group of `FANOUT_BITS` bits out of the scrambled, golden-ratio
//! multiplied hash, so two distinct 32-bit hashes always part ways before
//! `MAX_DEPTH` is reached. Only identical hashes end up in a probe table.

/// The golden ratio the multipliers are derived from.
pub const GOLDEN_RATIO: f64 = 1.618_033_988_749_895;

/// `2^32 / GOLDEN_RATIO`, rounded to the nearest odd integer (`2654435769`).
pub const MUL32: u32 = 0x9E37_79B9;

/// Bits consumed per trie level.
pub const FANOUT_BITS: u32 = 4;

/// Slots per node.
pub const FANOUT: usize = 1 << FANOUT_BITS;

/// Levels available before all 32 hash bits are spent.
pub const MAX_DEPTH: usize = (u32::BITS / FANOUT_BITS) as usize;

/// Returns the slot index in `0..2^bits` for `hash` at `depth` (root is 0).
///
/// Sign bits take part like every other bit: the hash is an opaque `u32`.
#[inline]
pub fn index_of(hash: u32, bits: u32, depth: usize) -> usize {
    debug_assert!(bits > 0 && (depth as u32 + 1) * bits <= u32::BITS);
    let scrambled = hash ^ (hash >> bits);
    let shift = u32::BITS - bits - depth as u32 * bits;
    ((scrambled.wrapping_mul(MUL32) >> shift) & ((1 << bits) - 1)) as usize
}

/// Folds a 64-bit hasher output into the 32-bit code the trie works on.
#[inline]
pub fn fold_hash(hash: u64) -> u32 {
    (hash ^ (hash >> 32)) as u32
}
