//! Transient (temporarily mutable) builder for bulk construction.

use std::marker::PhantomData;
use std::rc::Rc;

use super::ReferenceCounter;
use super::addressing::{
    BRANCHING_FACTOR, MAX_LEVEL, bit_for, negative_coordinate, non_negative_coordinate, slot_of,
    slot_coordinate,
};
use super::node::{Handle, Node};
use super::sparse_array::PersistentSparseArray;

// =============================================================================
// Scratch Nodes
// =============================================================================

/// Mutable scratch node used while a transient accumulates entries.
///
/// Unlike the persistent variants, scratch nodes use fixed 64-slot arrays
/// indexed directly by slot digit: no bitmaps, no compaction, no sharing.
/// A put is a plain array walk; the freeze pass converts the scratch tree
/// into minimal persistent nodes in a single traversal.
enum ScratchNode<V> {
    /// Level-0 node holding values by slot.
    Leaf {
        slots: Box<[Option<V>; BRANCHING_FACTOR]>,
    },
    /// Interior node holding scratch children by slot.
    Branch {
        level: u8,
        slots: Box<[Option<ScratchNode<V>>; BRANCHING_FACTOR]>,
    },
}

impl<V> ScratchNode<V> {
    /// Allocates a vacant level-0 scratch node.
    fn empty_leaf() -> Self {
        Self::Leaf {
            slots: Box::new(std::array::from_fn(|_| None)),
        }
    }

    /// Allocates a vacant interior scratch node for `level`.
    fn empty_branch(level: u8) -> Self {
        Self::Branch {
            level,
            slots: Box::new(std::array::from_fn(|_| None)),
        }
    }

    /// Stores `value` at `coordinate`, materializing the path down to the
    /// leaf as needed. Returns the value previously stored there.
    fn put(&mut self, coordinate: u32, value: V) -> Option<V> {
        match self {
            Self::Leaf { slots } => slots[slot_of(0, coordinate)].replace(value),
            Self::Branch { level, slots } => {
                let level = *level;
                let child = slots[slot_of(level, coordinate)].get_or_insert_with(|| {
                    if level == 1 {
                        Self::empty_leaf()
                    } else {
                        Self::empty_branch(level - 1)
                    }
                });
                child.put(coordinate, value)
            }
        }
    }

    /// Vacates every slot while keeping the scratch tree allocated, so a
    /// reused builder pays no fresh allocations along already-walked paths.
    fn clear(&mut self) {
        match self {
            Self::Leaf { slots } => {
                for slot in slots.iter_mut() {
                    *slot = None;
                }
            }
            Self::Branch { slots, .. } => {
                for child in slots.iter_mut().flatten() {
                    child.clear();
                }
            }
        }
    }
}

// =============================================================================
// Freezing
// =============================================================================

/// Converts a scratch subtree into its minimal persistent form.
///
/// Occupancy picks the variant: vacant subtrees vanish, one value becomes a
/// `Single`, full occupancy becomes a dense node, and an interior node left
/// with one surviving child collapses into that child, so synthetic levels
/// materialized by [`ScratchNode::put`] never reach the persistent trie.
fn freeze<V: Clone>(scratch: &ScratchNode<V>, base: u32) -> Node<V> {
    match scratch {
        ScratchNode::Leaf { slots } => freeze_leaf(slots, base),
        ScratchNode::Branch { level, slots } => freeze_branch(*level, slots, base),
    }
}

/// Freezes a level-0 scratch node.
fn freeze_leaf<V: Clone>(slots: &[Option<V>; BRANCHING_FACTOR], base: u32) -> Node<V> {
    let mut bitmap = 0u64;
    let mut values = Vec::new();
    for (slot, value) in slots.iter().enumerate() {
        if let Some(value) = value {
            bitmap |= bit_for(slot);
            values.push(value.clone());
        }
    }
    if values.is_empty() {
        Node::Empty
    } else if values.len() == 1 {
        let slot = bitmap.trailing_zeros() as usize;
        let mut values = values;
        Node::Single {
            coordinate: slot_coordinate(base, 0, slot),
            value: values.remove(0),
        }
    } else if values.len() == BRANCHING_FACTOR {
        Node::FullLeaf {
            base,
            values: ReferenceCounter::from(values),
        }
    } else {
        Node::Leaf {
            base,
            bitmap,
            values: ReferenceCounter::from(values),
        }
    }
}

/// Freezes an interior scratch node.
fn freeze_branch<V: Clone>(
    level: u8,
    slots: &[Option<ScratchNode<V>>; BRANCHING_FACTOR],
    base: u32,
) -> Node<V> {
    let mut bitmap = 0u64;
    let mut length = 0usize;
    let mut frozen: Vec<Node<V>> = Vec::new();
    for (slot, child) in slots.iter().enumerate() {
        let Some(child) = child else { continue };
        let node = freeze(child, slot_coordinate(base, level, slot));
        if node.is_empty() {
            continue;
        }
        length += node.len();
        bitmap |= bit_for(slot);
        frozen.push(node);
    }
    if frozen.is_empty() {
        return Node::Empty;
    }
    if frozen.len() == 1 {
        let mut frozen = frozen;
        return frozen.remove(0);
    }
    let children: Vec<Handle<V>> = frozen.into_iter().map(ReferenceCounter::new).collect();
    if children.len() == BRANCHING_FACTOR {
        Node::FullBranch {
            base,
            level,
            length,
            children: ReferenceCounter::from(children),
        }
    } else {
        Node::Branch {
            base,
            level,
            length,
            bitmap,
            children: ReferenceCounter::from(children),
        }
    }
}

// =============================================================================
// TransientSparseArray Definition
// =============================================================================

/// A transient (temporarily mutable) sparse array for efficient bulk
/// construction.
///
/// Accumulates entries through in-place mutation — each `put` is a direct
/// array walk with no path copying — then freezes into a
/// [`PersistentSparseArray`] once the batch is complete. Building an array
/// of N entries this way costs O(N) node allocations total, against
/// O(N · depth) for repeated persistent inserts.
///
/// # Design
///
/// - Two independent scratch roots mirror the persistent array's split
///   between negative and non-negative indices
/// - `PhantomData<Rc<()>>` keeps the type `!Send` and `!Sync`: a transient
///   is a single-writer value
/// - `Clone` is intentionally not implemented (linear use is the point)
///
/// # Examples
///
/// ```rust
/// use sparray::persistent::TransientSparseArray;
///
/// let mut transient = TransientSparseArray::new();
/// transient.put(-2, "negative");
/// transient.put(10, "positive");
/// transient.put(10, "replaced");
///
/// let array = transient.persistent();
/// assert_eq!(array.len(), 2);
/// assert_eq!(array.get(10), Some(&"replaced"));
/// ```
///
/// # Append Cursor
///
/// ```rust
/// use sparray::persistent::TransientSparseArray;
///
/// let mut transient = TransientSparseArray::new();
/// assert_eq!(transient.add("first"), 0);
/// transient.put(10, "explicit");
/// assert_eq!(transient.add("after"), 11);
/// ```
pub struct TransientSparseArray<V> {
    /// Scratch root of the negative index domain.
    negative: ScratchNode<V>,
    /// Scratch root of the non-negative index domain.
    non_negative: ScratchNode<V>,
    /// Total occupied slots across both domains.
    length: usize,
    /// Next index used by [`add`](Self::add); one past the highest `put`.
    cursor: i32,
    /// Marker to ensure `!Send` and `!Sync`.
    _marker: PhantomData<Rc<()>>,
}

// Static assertions to verify TransientSparseArray is not Send/Sync
static_assertions::assert_not_impl_any!(TransientSparseArray<i32>: Send, Sync);
static_assertions::assert_not_impl_any!(TransientSparseArray<String>: Send, Sync);

// Arc feature verification: even with Arc, the transient remains !Send/!Sync
#[cfg(feature = "arc")]
mod arc_send_sync_verification {
    use super::TransientSparseArray;
    use std::sync::Arc;

    static_assertions::assert_not_impl_any!(TransientSparseArray<Arc<i32>>: Send, Sync);
    static_assertions::assert_not_impl_any!(TransientSparseArray<Arc<String>>: Send, Sync);
}

// =============================================================================
// TransientSparseArray Implementation
// =============================================================================

impl<V> TransientSparseArray<V> {
    /// Creates an empty transient sparse array.
    #[must_use]
    pub fn new() -> Self {
        Self {
            negative: ScratchNode::empty_branch(MAX_LEVEL),
            non_negative: ScratchNode::empty_branch(MAX_LEVEL),
            length: 0,
            cursor: 0,
            _marker: PhantomData,
        }
    }

    /// Returns the number of entries accumulated so far.
    ///
    /// # Complexity
    ///
    /// O(1)
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if no entries have been accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Stores `value` at `index`, returning the value it replaced.
    ///
    /// Advances the append cursor past `index`, so a later
    /// [`add`](Self::add) continues from the highest index stored.
    ///
    /// # Complexity
    ///
    /// O(1) — a direct walk of at most six fixed-size arrays.
    pub fn put(&mut self, index: i32, value: V) -> Option<V> {
        let replaced = if index < 0 {
            self.negative.put(negative_coordinate(index), value)
        } else {
            self.non_negative.put(non_negative_coordinate(index), value)
        };
        if replaced.is_none() {
            self.length += 1;
        }
        self.cursor = self.cursor.max(index.saturating_add(1));
        replaced
    }

    /// Appends `value` at the current cursor position, returning the index
    /// it was stored at.
    ///
    /// The cursor starts at 0 and tracks one past the highest index stored
    /// through [`put`](Self::put) or `add`.
    pub fn add(&mut self, value: V) -> i32 {
        let index = self.cursor;
        self.put(index, value);
        index
    }

    /// Clears all entries while retaining the scratch allocations, so the
    /// builder can be reused for another batch without re-allocating the
    /// paths it has already walked.
    pub fn reset(&mut self) {
        self.negative.clear();
        self.non_negative.clear();
        self.length = 0;
        self.cursor = 0;
    }
}

impl<V: Clone> TransientSparseArray<V> {
    /// Freezes the accumulated entries into a [`PersistentSparseArray`].
    ///
    /// The builder remains usable afterwards; values are cloned into the
    /// persistent trie.
    ///
    /// # Complexity
    ///
    /// O(N) over the occupied scratch nodes.
    #[must_use]
    pub fn persistent(&self) -> PersistentSparseArray<V> {
        PersistentSparseArray::from_roots(self.build_negative_root(), self.build_positive_root())
    }

    /// Freezes the negative-domain scratch root.
    pub(crate) fn build_negative_root(&self) -> Handle<V> {
        ReferenceCounter::new(freeze(&self.negative, 0))
    }

    /// Freezes the non-negative-domain scratch root.
    pub(crate) fn build_positive_root(&self) -> Handle<V> {
        ReferenceCounter::new(freeze(&self.non_negative, 0))
    }
}

impl<V> Default for TransientSparseArray<V> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_new_is_empty() {
        let transient: TransientSparseArray<i32> = TransientSparseArray::new();
        assert!(transient.is_empty());
        assert_eq!(transient.len(), 0);
        assert!(transient.persistent().is_empty());
    }

    #[rstest]
    fn test_put_counts_and_replaces() {
        let mut transient = TransientSparseArray::new();
        assert_eq!(transient.put(3, "a"), None);
        assert_eq!(transient.put(-3, "b"), None);
        assert_eq!(transient.len(), 2);
        assert_eq!(transient.put(3, "c"), Some("a"));
        assert_eq!(transient.len(), 2);
    }

    #[rstest]
    fn test_builder_matches_sequential_inserts() {
        let indices = [0, -1, 5, 69, -5, 4096, i32::MIN, i32::MAX, 63, 64];
        let mut transient = TransientSparseArray::new();
        let mut expected = PersistentSparseArray::new();
        for (position, index) in indices.iter().enumerate() {
            transient.put(*index, position);
            expected = expected.insert(*index, position);
        }
        let built = transient.persistent();
        built.check_invariants().unwrap();
        assert_eq!(built, expected);
    }

    #[rstest]
    fn test_dense_batch_produces_full_nodes() {
        let mut transient = TransientSparseArray::new();
        for index in 0..64 {
            transient.put(index, index);
        }
        let array = transient.persistent();
        array.check_invariants().unwrap();
        assert_eq!(array.len(), 64);
        assert_eq!(array.get(63), Some(&63));
    }

    #[rstest]
    fn test_add_auto_increments() {
        let mut transient = TransientSparseArray::new();
        assert_eq!(transient.add("a"), 0);
        assert_eq!(transient.add("b"), 1);
        transient.put(100, "c");
        assert_eq!(transient.add("d"), 101);
        let array = transient.persistent();
        assert_eq!(
            array.indices().collect::<Vec<_>>(),
            vec![0, 1, 100, 101]
        );
    }

    #[rstest]
    fn test_negative_put_keeps_cursor_non_negative() {
        let mut transient = TransientSparseArray::new();
        transient.put(-50, "n");
        assert_eq!(transient.add("first"), 0);
    }

    #[rstest]
    fn test_reset_allows_reuse() {
        let mut transient = TransientSparseArray::new();
        transient.put(1, "a");
        transient.put(-1, "b");
        transient.reset();
        assert!(transient.is_empty());
        assert_eq!(transient.add("fresh"), 0);
        let array = transient.persistent();
        assert_eq!(array.len(), 1);
        assert_eq!(array.get(1), None);
        assert_eq!(array.get(-1), None);
        assert_eq!(array.get(0), Some(&"fresh"));
    }

    #[rstest]
    fn test_persistent_leaves_builder_usable() {
        let mut transient = TransientSparseArray::new();
        transient.put(1, 10);
        let first = transient.persistent();
        transient.put(2, 20);
        let second = transient.persistent();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(second.get(2), Some(&20));
    }

    #[rstest]
    fn test_freeze_collapses_synthetic_levels() {
        // A single deep entry must freeze to a lone value node, not a chain
        // of one-child branches
        let mut transient = TransientSparseArray::new();
        transient.put(1 << 30, "deep");
        let array = transient.persistent();
        array.check_invariants().unwrap();
        assert_eq!(array.len(), 1);
        assert_eq!(array.get(1 << 30), Some(&"deep"));
    }
}
