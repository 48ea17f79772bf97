//! Address arithmetic for the bitmap trie.
//!
//! Pure, stateless functions that convert an unsigned trie coordinate and a
//! trie level into slot positions, shared prefixes, and compact-array
//! offsets. Every node variant is built on these helpers; none of them has a
//! failure mode — inputs are valid by construction of the calling code, and
//! internal misuse is guarded by `debug_assert!` only.
//!
//! # Coordinate layout
//!
//! A coordinate is a `u32` whose bits are consumed six at a time, from the
//! least significant end. Level 0 (the leaf level) branches on bits `[0, 6)`,
//! level 1 on bits `[6, 12)`, and so on up to [`MAX_LEVEL`]. A node at level
//! `L` is responsible for every coordinate sharing its prefix above bit
//! `6·L + 6`; the 31-bit coordinate space of one sign domain is therefore
//! always covered by level [`MAX_LEVEL`].

// =============================================================================
// Constants
// =============================================================================

/// Branching factor (2^6 = 64)
pub(crate) const BRANCHING_FACTOR: usize = 64;

/// Bits consumed per trie level
pub(crate) const BITS_PER_LEVEL: u32 = 6;

/// Bit mask for extracting the slot digit of a coordinate
pub(crate) const SLOT_MASK: u32 = (BRANCHING_FACTOR - 1) as u32;

/// Highest trie level (level 5 branches on bits `[30, 36)`, which covers
/// the 31-bit coordinate space of one sign domain)
pub(crate) const MAX_LEVEL: u8 = 5;

/// A fully-occupied population bitmap
pub(crate) const FULL_BITMAP: u64 = u64::MAX;

// =============================================================================
// Sign reflection
// =============================================================================

/// Offset mapping negative indices onto the unsigned coordinate space.
///
/// Negative indices reflect into ascending coordinates (`i32::MIN` becomes 0,
/// `-1` becomes `i32::MAX as u32`), so ascending coordinate order inside the
/// negative domain matches ascending index order.
pub(crate) const SIGN_OFFSET: u32 = 1 << 31;

/// Maps a negative index onto its unsigned coordinate.
#[inline]
#[allow(clippy::cast_sign_loss)]
pub(crate) const fn negative_coordinate(index: i32) -> u32 {
    debug_assert!(index < 0);
    (index as u32).wrapping_sub(SIGN_OFFSET)
}

/// Maps a non-negative index onto its unsigned coordinate.
#[inline]
#[allow(clippy::cast_sign_loss)]
pub(crate) const fn non_negative_coordinate(index: i32) -> u32 {
    debug_assert!(index >= 0);
    index as u32
}

// =============================================================================
// Digit and prefix extraction
// =============================================================================

/// Extracts the 6-bit digit governing branching at `level`.
#[inline]
pub(crate) const fn slot_of(level: u8, coordinate: u32) -> usize {
    ((coordinate >> (level as u32 * BITS_PER_LEVEL)) & SLOT_MASK) as usize
}

/// Clears every bit of the span a node at `level` covers (bits
/// `[0, 6·level + 6)`), leaving the prefix all of its occupants share.
#[inline]
pub(crate) const fn base_of(level: u8, coordinate: u32) -> u32 {
    let shift = level as u32 * BITS_PER_LEVEL + BITS_PER_LEVEL;
    if shift >= u32::BITS {
        0
    } else {
        coordinate & (u32::MAX << shift)
    }
}

/// Returns the bits of `coordinate` below `6·level`.
///
/// A result of zero means the coordinate "bottoms out" exactly at `level`:
/// a node branching there can store its value directly instead of holding a
/// subtree for it.
#[inline]
pub(crate) const fn sub_level_bits(level: u8, coordinate: u32) -> u32 {
    let shift = level as u32 * BITS_PER_LEVEL;
    if shift >= u32::BITS {
        coordinate
    } else {
        coordinate & !(u32::MAX << shift)
    }
}

/// Returns the level at which two distinct coordinates diverge.
///
/// At the returned level the coordinates occupy different slots while
/// sharing the same base; it is the level at which a common-ancestor node
/// joining them must branch.
#[inline]
pub(crate) const fn shared_level(first: u32, second: u32) -> u8 {
    debug_assert!(first != second);
    let diverging_bit = u32::BITS - 1 - (first ^ second).leading_zeros();
    (diverging_bit / BITS_PER_LEVEL) as u8
}

/// Reconstructs the coordinate of a slot's own base within a node.
#[inline]
pub(crate) const fn slot_coordinate(base: u32, level: u8, slot: usize) -> u32 {
    base | ((slot as u32) << (level as u32 * BITS_PER_LEVEL))
}

// =============================================================================
// Population bitmap helpers
// =============================================================================

/// Returns the single-bit mask for `slot`.
#[inline]
pub(crate) const fn bit_for(slot: usize) -> u64 {
    1 << slot
}

/// Returns the offset of `bit` within the compact array of a node whose
/// population bitmap is `bitmap`.
///
/// Counts the number of set bits below `bit`; compact arrays store occupied
/// slots in ascending bit order.
#[inline]
pub(crate) const fn compact_index(bitmap: u64, bit: u64) -> usize {
    (bitmap & (bit - 1)).count_ones() as usize
}

/// Clears the `n` lowest set bits of `bitmap`.
///
/// Used by windowed iteration to skip the first `n` occupants of a node.
#[inline]
pub(crate) const fn clear_low_set_bits(bitmap: u64, n: usize) -> u64 {
    let mut bits = bitmap;
    let mut remaining = n;
    while remaining > 0 {
        bits &= bits - 1;
        remaining -= 1;
    }
    bits
}

// =============================================================================
// Tests
// =============================================================================
