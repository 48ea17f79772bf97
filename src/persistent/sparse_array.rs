//! Persistent sparse array keyed by `i32` indices.

use smallvec::SmallVec;

use super::ReferenceCounter;
use super::addressing::{
    FULL_BITMAP, SIGN_OFFSET, bit_for, clear_low_set_bits, compact_index, negative_coordinate,
    non_negative_coordinate, slot_coordinate,
};
use super::node::{Handle, InvariantViolation, Node};
use super::transient::TransientSparseArray;

// =============================================================================
// Sign Domains
// =============================================================================

/// The two independent halves of the signed index space.
///
/// Negative indices reflect into ascending unsigned coordinates through
/// [`negative_coordinate`], so ascending coordinate order within each half
/// yields ascending index order, with the negative half iterated first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Domain {
    /// Indices below zero.
    Negative,
    /// Indices at or above zero.
    NonNegative,
}

impl Domain {
    /// Recovers the signed index a coordinate encodes.
    #[allow(clippy::cast_possible_wrap)]
    const fn index_of(self, coordinate: u32) -> i32 {
        match self {
            Self::Negative => coordinate.wrapping_add(SIGN_OFFSET) as i32,
            Self::NonNegative => coordinate as i32,
        }
    }
}

// =============================================================================
// PersistentSparseArray
// =============================================================================

/// A persistent (immutable) sparse array mapping `i32` indices to values.
///
/// Built on a 64-way bitmap-compressed trie with one root per sign of the
/// index. Every update copies only the path from a root to the touched
/// slot and returns a new array sharing all untouched structure with the
/// original, so point operations are O(log64 N) — bounded by a trie depth
/// of six — and old versions remain fully usable.
///
/// # Examples
///
/// ```rust
/// use sparray::persistent::PersistentSparseArray;
///
/// let array = PersistentSparseArray::new().insert(3, "three");
/// let updated = array.insert(-7, "minus seven");
///
/// assert_eq!(array.len(), 1);
/// assert_eq!(updated.len(), 2);
/// assert_eq!(updated.get(-7), Some(&"minus seven"));
/// ```
pub struct PersistentSparseArray<V> {
    /// Root of the negative index domain.
    negative: Handle<V>,
    /// Root of the non-negative index domain.
    non_negative: Handle<V>,
    /// Total entries across both domains.
    length: usize,
}

impl<V> PersistentSparseArray<V> {
    /// Assembles an array from pre-built domain roots.
    pub(crate) fn from_roots(negative: Handle<V>, non_negative: Handle<V>) -> Self {
        let length = negative.len() + non_negative.len();
        Self {
            negative,
            non_negative,
            length,
        }
    }

    /// Creates an empty sparse array.
    ///
    /// Allocation-free: both roots start as the unit `Empty` node.
    ///
    /// # Complexity
    ///
    /// O(1)
    #[must_use]
    pub fn new() -> Self {
        Self {
            negative: ReferenceCounter::new(Node::Empty),
            non_negative: ReferenceCounter::new(Node::Empty),
            length: 0,
        }
    }

    /// Returns the number of entries in the array.
    ///
    /// # Complexity
    ///
    /// O(1)
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the array contains no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns a reference to the value at `index`, if present.
    ///
    /// # Complexity
    ///
    /// O(log64 N) worst case; the trie depth never exceeds six.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sparray::persistent::PersistentSparseArray;
    ///
    /// let array = PersistentSparseArray::new().insert(1_000_000, "far out");
    /// assert_eq!(array.get(1_000_000), Some(&"far out"));
    /// assert_eq!(array.get(999_999), None);
    /// ```
    #[must_use]
    pub fn get(&self, index: i32) -> Option<&V> {
        if index < 0 {
            self.negative.find(negative_coordinate(index))
        } else {
            self.non_negative.find(non_negative_coordinate(index))
        }
    }

    /// Returns `true` if the array holds a value at `index`.
    #[must_use]
    pub fn contains_index(&self, index: i32) -> bool {
        self.get(index).is_some()
    }

    /// Returns a lazy iterator over `(index, &value)` entries in ascending
    /// index order.
    ///
    /// Materializes nothing up front; advancing the iterator walks the trie
    /// with a bounded-depth frame stack.
    #[must_use]
    pub fn iter(&self) -> PersistentSparseArrayIterator<'_, V> {
        PersistentSparseArrayIterator::over(self, 0, self.length)
    }

    /// Returns a lazy iterator over at most `limit` entries starting at
    /// entry position `offset` (in ascending index order).
    ///
    /// Seeking costs O(log64 N): subtree entry counts let the iterator skip
    /// whole branches without visiting them, so disjoint windows can be
    /// consumed independently or in parallel (with the `arc` feature).
    ///
    /// An `offset` at or past the end yields an empty iterator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sparray::persistent::PersistentSparseArray;
    ///
    /// let array: PersistentSparseArray<i32> =
    ///     (0..100).map(|index| (index, index * 10)).collect();
    ///
    /// let window: Vec<i32> = array.iter_range(40, 3).map(|(index, _)| index).collect();
    /// assert_eq!(window, vec![40, 41, 42]);
    /// ```
    #[must_use]
    pub fn iter_range(&self, offset: usize, limit: usize) -> PersistentSparseArrayIterator<'_, V> {
        PersistentSparseArrayIterator::over(self, offset, limit)
    }

    /// Returns an iterator over the occupied indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = i32> + '_ {
        self.iter().map(|(index, _)| index)
    }

    /// Returns an iterator over the values in ascending index order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Validates the structural invariants of both trie roots and the
    /// cached length.
    ///
    /// Diagnostic aid for test harnesses; a violation indicates a defect in
    /// this crate, not misuse by the caller.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvariantViolation`] encountered.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.negative.check_invariants()?;
        self.non_negative.check_invariants()?;
        let actual = self.negative.len() + self.non_negative.len();
        if actual == self.length {
            Ok(())
        } else {
            Err(InvariantViolation::LengthMismatch {
                level: 0,
                stored: self.length,
                actual,
            })
        }
    }
}

impl<V: Clone> PersistentSparseArray<V> {
    /// Creates an array holding a single entry.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sparray::persistent::PersistentSparseArray;
    ///
    /// let array = PersistentSparseArray::singleton(-3, "x");
    /// assert_eq!(array.len(), 1);
    /// assert_eq!(array.get(-3), Some(&"x"));
    /// ```
    #[must_use]
    pub fn singleton(index: i32, value: V) -> Self {
        Self::new().insert(index, value)
    }

    /// Returns a new array with `value` stored at `index`, replacing any
    /// existing value there.
    ///
    /// The original array is unchanged; the two share all untouched nodes.
    ///
    /// # Complexity
    ///
    /// O(log64 N)
    #[must_use]
    pub fn insert(&self, index: i32, value: V) -> Self {
        if index < 0 {
            let (negative, added) =
                Node::assign(&self.negative, negative_coordinate(index), value);
            Self {
                negative,
                non_negative: self.non_negative.clone(),
                length: self.length + usize::from(added),
            }
        } else {
            let (non_negative, added) =
                Node::assign(&self.non_negative, non_negative_coordinate(index), value);
            Self {
                negative: self.negative.clone(),
                non_negative,
                length: self.length + usize::from(added),
            }
        }
    }

    /// Returns a new array without an entry at `index`.
    ///
    /// Removing an absent index returns an array sharing both roots with
    /// the original (no path is copied).
    ///
    /// # Complexity
    ///
    /// O(log64 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sparray::persistent::PersistentSparseArray;
    ///
    /// let array = PersistentSparseArray::new().insert(5, "a").insert(69, "c");
    /// let trimmed = array.remove(69);
    ///
    /// assert_eq!(trimmed.get(69), None);
    /// assert_eq!(array.get(69), Some(&"c"));
    /// ```
    #[must_use]
    pub fn remove(&self, index: i32) -> Self {
        if index < 0 {
            match Node::delete(&self.negative, negative_coordinate(index)) {
                Some(negative) => Self {
                    negative,
                    non_negative: self.non_negative.clone(),
                    length: self.length - 1,
                },
                None => self.clone(),
            }
        } else {
            match Node::delete(&self.non_negative, non_negative_coordinate(index)) {
                Some(non_negative) => Self {
                    negative: self.negative.clone(),
                    non_negative,
                    length: self.length - 1,
                },
                None => self.clone(),
            }
        }
    }

    /// Applies `function` to the value at `index`, returning the updated
    /// array, or `None` when the index is vacant.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sparray::persistent::PersistentSparseArray;
    ///
    /// let array = PersistentSparseArray::new().insert(2, 10);
    /// let doubled = array.update(2, |value| value * 2).unwrap();
    ///
    /// assert_eq!(doubled.get(2), Some(&20));
    /// assert!(array.update(3, |value| value * 2).is_none());
    /// ```
    #[must_use]
    pub fn update<F>(&self, index: i32, function: F) -> Option<Self>
    where
        F: FnOnce(&V) -> V,
    {
        let value = self.get(index)?;
        Some(self.insert(index, function(value)))
    }

    /// Updates, inserts, or removes the entry at `index` through a single
    /// closure over its current occupancy.
    ///
    /// The closure receives the current value (or `None` when vacant) and
    /// decides the outcome: `Some(value)` stores it, `None` leaves the
    /// index vacant.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sparray::persistent::PersistentSparseArray;
    ///
    /// let counters = PersistentSparseArray::new().insert(7, 1);
    ///
    /// // Increment if present, start at 1 otherwise
    /// let bumped = counters.update_with(7, |current| Some(current.map_or(1, |c| c + 1)));
    /// let started = counters.update_with(8, |current| Some(current.map_or(1, |c| c + 1)));
    ///
    /// assert_eq!(bumped.get(7), Some(&2));
    /// assert_eq!(started.get(8), Some(&1));
    /// ```
    #[must_use]
    pub fn update_with<F>(&self, index: i32, updater: F) -> Self
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        match updater(self.get(index)) {
            Some(value) => self.insert(index, value),
            None => {
                if self.contains_index(index) {
                    self.remove(index)
                } else {
                    self.clone()
                }
            }
        }
    }

    /// Converts to a transient builder seeded with this array's entries.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sparray::persistent::PersistentSparseArray;
    ///
    /// let array = PersistentSparseArray::new().insert(1, "a");
    /// let mut transient = array.transient();
    /// transient.put(2, "b");
    ///
    /// let rebuilt = transient.persistent();
    /// assert_eq!(rebuilt.len(), 2);
    /// assert_eq!(array.len(), 1); // Original unchanged
    /// ```
    #[must_use]
    pub fn transient(&self) -> TransientSparseArray<V> {
        let mut transient = TransientSparseArray::new();
        for (index, value) in self {
            transient.put(index, value.clone());
        }
        transient
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<V> Clone for PersistentSparseArray<V> {
    fn clone(&self) -> Self {
        Self {
            negative: self.negative.clone(),
            non_negative: self.non_negative.clone(),
            length: self.length,
        }
    }
}

impl<V> Default for PersistentSparseArray<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for PersistentSparseArray<V> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

impl<V: PartialEq> PartialEq for PersistentSparseArray<V> {
    fn eq(&self, other: &Self) -> bool {
        self.length == other.length && self.iter().eq(other.iter())
    }
}

impl<V: Eq> Eq for PersistentSparseArray<V> {}

impl<V: Clone> FromIterator<(i32, V)> for PersistentSparseArray<V> {
    fn from_iter<I: IntoIterator<Item = (i32, V)>>(iterable: I) -> Self {
        let mut transient = TransientSparseArray::new();
        for (index, value) in iterable {
            transient.put(index, value);
        }
        transient.persistent()
    }
}

impl<'a, V> IntoIterator for &'a PersistentSparseArray<V> {
    type Item = (i32, &'a V);
    type IntoIter = PersistentSparseArrayIterator<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<V: Clone> IntoIterator for PersistentSparseArray<V> {
    type Item = (i32, V);
    type IntoIter = PersistentSparseArrayIntoIterator<V>;

    /// Consumes the array into an owning iterator.
    ///
    /// Values are cloned out of the trie, since nodes may still be shared
    /// with other versions of the array.
    fn into_iter(self) -> Self::IntoIter {
        let entries: Vec<(i32, V)> = self
            .iter()
            .map(|(index, value)| (index, value.clone()))
            .collect();
        PersistentSparseArrayIntoIterator {
            entries: entries.into_iter(),
        }
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// One suspended node visit on the iterator's stack.
///
/// `bits` tracks the slots not yet visited; popping its lowest set bit
/// resumes the scan exactly where it left off.
struct Frame<'a, V> {
    node: &'a Node<V>,
    bits: u64,
}

impl<'a, V> Frame<'a, V> {
    /// Opens a frame over a node with every occupied slot pending.
    fn enter(node: &'a Node<V>) -> Self {
        let bits = match node {
            Node::Empty => 0,
            Node::Single { .. } => 1,
            Node::Leaf { bitmap, .. } | Node::Branch { bitmap, .. } => *bitmap,
            Node::FullLeaf { .. } | Node::FullBranch { .. } => FULL_BITMAP,
            Node::Super {
                value_bitmap,
                child_bitmap,
                ..
            } => value_bitmap | child_bitmap,
        };
        Self { node, bits }
    }
}

/// Lazy borrowed iterator over `(index, &value)` entries in ascending
/// index order.
///
/// Holds a stack of suspended node visits whose depth is bounded by the
/// trie height, so construction is O(log64 N) and advancing is amortized
/// O(1). Created by [`PersistentSparseArray::iter`] and
/// [`PersistentSparseArray::iter_range`].
pub struct PersistentSparseArrayIterator<'a, V> {
    /// Suspended visits along the current root-to-node path.
    stack: SmallVec<[Frame<'a, V>; 8]>,
    /// Sign domain the stack currently walks.
    domain: Domain,
    /// The non-negative root, queued while the negative domain drains.
    queued: Option<&'a Node<V>>,
    /// Entries left to yield.
    remaining: usize,
}

impl<'a, V> PersistentSparseArrayIterator<'a, V> {
    /// Builds an iterator over the window `[offset, offset + limit)` of the
    /// array's entry positions.
    fn over(array: &'a PersistentSparseArray<V>, offset: usize, limit: usize) -> Self {
        let remaining = limit.min(array.length.saturating_sub(offset));
        let negative_length = array.negative.len();
        let mut iterator = if offset < negative_length {
            Self {
                stack: SmallVec::new(),
                domain: Domain::Negative,
                queued: Some(array.non_negative.as_ref()),
                remaining,
            }
        } else {
            Self {
                stack: SmallVec::new(),
                domain: Domain::NonNegative,
                queued: None,
                remaining,
            }
        };
        if remaining > 0 {
            if offset < negative_length {
                iterator.descend_to(array.negative.as_ref(), offset);
            } else {
                iterator.descend_to(array.non_negative.as_ref(), offset - negative_length);
            }
        }
        iterator
    }

    /// Pushes the frames for the path leading to entry position `offset`
    /// within `root`, skipping earlier subtrees by their stored lengths.
    fn descend_to(&mut self, root: &'a Node<V>, offset: usize) {
        debug_assert!(offset < root.len());
        let mut node = root;
        let mut offset = offset;
        'descend: loop {
            match node {
                Node::Empty => return,
                Node::Single { .. } => {
                    self.stack.push(Frame::enter(node));
                    return;
                }
                Node::Leaf { bitmap, .. } => {
                    self.stack.push(Frame {
                        node,
                        bits: clear_low_set_bits(*bitmap, offset),
                    });
                    return;
                }
                Node::FullLeaf { .. } => {
                    self.stack.push(Frame {
                        node,
                        bits: FULL_BITMAP << offset,
                    });
                    return;
                }
                Node::Branch {
                    bitmap, children, ..
                } => {
                    let mut bits = *bitmap;
                    for child in children.iter() {
                        bits &= bits - 1;
                        if offset < child.len() {
                            self.stack.push(Frame { node, bits });
                            node = child;
                            continue 'descend;
                        }
                        offset -= child.len();
                    }
                    unreachable!("offset is bounded by the subtree length");
                }
                Node::FullBranch { children, .. } => {
                    let mut bits = FULL_BITMAP;
                    for child in children.iter() {
                        bits &= bits - 1;
                        if offset < child.len() {
                            self.stack.push(Frame { node, bits });
                            node = child;
                            continue 'descend;
                        }
                        offset -= child.len();
                    }
                    unreachable!("offset is bounded by the subtree length");
                }
                Node::Super {
                    value_bitmap,
                    child_bitmap,
                    children,
                    ..
                } => {
                    let mut bits = value_bitmap | child_bitmap;
                    while bits != 0 {
                        let bit = bits & bits.wrapping_neg();
                        bits &= bits - 1;
                        if value_bitmap & bit != 0 {
                            if offset == 0 {
                                // Keep the target slot pending so the next
                                // advance yields its direct value
                                self.stack.push(Frame {
                                    node,
                                    bits: bits | bit,
                                });
                                return;
                            }
                            offset -= 1;
                        } else {
                            let child = &children[compact_index(*child_bitmap, bit)];
                            if offset < child.len() {
                                self.stack.push(Frame { node, bits });
                                node = child;
                                continue 'descend;
                            }
                            offset -= child.len();
                        }
                    }
                    unreachable!("offset is bounded by the subtree length");
                }
            }
        }
    }
}

impl<'a, V> Iterator for PersistentSparseArrayIterator<'a, V> {
    type Item = (i32, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == 0 {
                return None;
            }
            let Some(frame) = self.stack.last_mut() else {
                let root = self.queued.take()?;
                self.domain = Domain::NonNegative;
                if !root.is_empty() {
                    self.stack.push(Frame::enter(root));
                }
                continue;
            };
            if frame.bits == 0 {
                self.stack.pop();
                continue;
            }
            let slot = frame.bits.trailing_zeros() as usize;
            frame.bits &= frame.bits - 1;
            let bit = bit_for(slot);
            let node = frame.node;
            match node {
                Node::Empty => {
                    self.stack.pop();
                }
                Node::Single { coordinate, value } => {
                    self.stack.pop();
                    self.remaining -= 1;
                    return Some((self.domain.index_of(*coordinate), value));
                }
                Node::Leaf {
                    base,
                    bitmap,
                    values,
                } => {
                    self.remaining -= 1;
                    let index = self.domain.index_of(slot_coordinate(*base, 0, slot));
                    return Some((index, &values[compact_index(*bitmap, bit)]));
                }
                Node::FullLeaf { base, values } => {
                    self.remaining -= 1;
                    let index = self.domain.index_of(slot_coordinate(*base, 0, slot));
                    return Some((index, &values[slot]));
                }
                Node::Branch {
                    bitmap, children, ..
                } => {
                    let child = &children[compact_index(*bitmap, bit)];
                    self.stack.push(Frame::enter(child));
                }
                Node::FullBranch { children, .. } => {
                    self.stack.push(Frame::enter(&children[slot]));
                }
                Node::Super {
                    base,
                    level,
                    value_bitmap,
                    child_bitmap,
                    values,
                    children,
                    ..
                } => {
                    if value_bitmap & bit != 0 {
                        self.remaining -= 1;
                        let index =
                            self.domain.index_of(slot_coordinate(*base, *level, slot));
                        return Some((index, &values[compact_index(*value_bitmap, bit)]));
                    }
                    let child = &children[compact_index(*child_bitmap, bit)];
                    self.stack.push(Frame::enter(child));
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for PersistentSparseArrayIterator<'_, V> {}

impl<V> std::iter::FusedIterator for PersistentSparseArrayIterator<'_, V> {}

/// Owning iterator over `(index, value)` entries in ascending index order.
///
/// Created by [`IntoIterator`] on [`PersistentSparseArray`]; values are
/// cloned out of the (possibly shared) trie up front.
pub struct PersistentSparseArrayIntoIterator<V> {
    entries: std::vec::IntoIter<(i32, V)>,
}

impl<V> Iterator for PersistentSparseArrayIntoIterator<V> {
    type Item = (i32, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<V> ExactSizeIterator for PersistentSparseArrayIntoIterator<V> {}

impl<V> std::iter::FusedIterator for PersistentSparseArrayIntoIterator<V> {}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
mod serde_support {
    use super::PersistentSparseArray;
    use serde::de::{Deserialize, Deserializer};
    use serde::ser::{Serialize, SerializeSeq, Serializer};

    impl<V: Serialize> Serialize for PersistentSparseArray<V> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut sequence = serializer.serialize_seq(Some(self.len()))?;
            for entry in self.iter() {
                sequence.serialize_element(&entry)?;
            }
            sequence.end()
        }
    }

    impl<'de, V: Deserialize<'de> + Clone> Deserialize<'de> for PersistentSparseArray<V> {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let entries = Vec::<(i32, V)>::deserialize(deserializer)?;
            Ok(entries.into_iter().collect())
        }
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
        let array: PersistentSparseArray<i32> = PersistentSparseArray::new();
        assert!(array.is_empty());
        assert_eq!(array.len(), 0);
        assert_eq!(array.get(0), None);
        array.check_invariants().unwrap();
    }

    #[rstest]
    fn test_insert_and_get_across_signs() {
        let array = PersistentSparseArray::new()
            .insert(5, "a")
            .insert(-5, "b")
            .insert(69, "c");
        assert_eq!(array.len(), 3);
        assert_eq!(array.get(5), Some(&"a"));
        assert_eq!(array.get(-5), Some(&"b"));
        assert_eq!(array.get(69), Some(&"c"));
        assert_eq!(array.get(6), None);
        assert_eq!(array.get(-6), None);
        array.check_invariants().unwrap();
    }

    #[rstest]
    #[case(i32::MIN)]
    #[case(i32::MIN + 1)]
    #[case(-1)]
    #[case(0)]
    #[case(i32::MAX - 1)]
    #[case(i32::MAX)]
    fn test_extreme_indices(#[case] index: i32) {
        let array = PersistentSparseArray::singleton(index, "edge");
        assert_eq!(array.get(index), Some(&"edge"));
        assert_eq!(array.indices().collect::<Vec<_>>(), vec![index]);
        array.check_invariants().unwrap();
    }

    #[rstest]
    fn test_insert_replaces_without_growing() {
        let array = PersistentSparseArray::new().insert(7, 1).insert(7, 2);
        assert_eq!(array.len(), 1);
        assert_eq!(array.get(7), Some(&2));
    }

    #[rstest]
    fn test_remove_absent_shares_roots() {
        let array = PersistentSparseArray::new().insert(5, "a");
        let unchanged = array.remove(6);
        assert_eq!(unchanged.len(), 1);
        assert_eq!(unchanged, array);
    }

    #[rstest]
    fn test_structural_sharing_preserves_old_version() {
        let original = PersistentSparseArray::new().insert(5, "a").insert(69, "c");
        let updated = original.remove(69);
        assert_eq!(original.len(), 2);
        assert_eq!(original.get(69), Some(&"c"));
        assert_eq!(updated.len(), 1);
        assert_eq!(updated.get(69), None);
        assert_eq!(updated.get(5), Some(&"a"));
        original.check_invariants().unwrap();
        updated.check_invariants().unwrap();
    }

    #[rstest]
    fn test_iteration_order_negatives_first() {
        let array = PersistentSparseArray::new()
            .insert(100, "c")
            .insert(-100, "a")
            .insert(0, "b")
            .insert(i32::MIN, "first")
            .insert(i32::MAX, "last");
        let indices: Vec<i32> = array.indices().collect();
        assert_eq!(indices, vec![i32::MIN, -100, 0, 100, i32::MAX]);
        let values: Vec<&&str> = array.values().collect();
        assert_eq!(values, vec![&"first", &"a", &"b", &"c", &"last"]);
    }

    #[rstest]
    fn test_iterator_is_exact_size() {
        let array: PersistentSparseArray<i32> =
            (0..50).map(|index| (index, index)).collect();
        let mut iterator = array.iter();
        assert_eq!(iterator.len(), 50);
        iterator.next();
        assert_eq!(iterator.len(), 49);
    }

    #[rstest]
    #[case(0, 5)]
    #[case(3, 4)]
    #[case(95, 10)]
    #[case(100, 1)]
    #[case(40, 0)]
    fn test_iter_range_matches_full_iteration(#[case] offset: usize, #[case] limit: usize) {
        let array: PersistentSparseArray<i32> = (-50..50)
            .map(|index| (index * 7, index))
            .collect();
        let expected: Vec<(i32, &i32)> = array.iter().skip(offset).take(limit).collect();
        let window: Vec<(i32, &i32)> = array.iter_range(offset, limit).collect();
        assert_eq!(window, expected);
    }

    #[rstest]
    fn test_iter_range_seeks_across_domains() {
        let array: PersistentSparseArray<i32> =
            (-3..3).map(|index| (index, index * 10)).collect();
        // Offset 3 lands exactly on the first non-negative entry
        let window: Vec<i32> = array.iter_range(3, 2).map(|(index, _)| index).collect();
        assert_eq!(window, vec![0, 1]);
    }

    #[rstest]
    fn test_iter_range_into_deep_trie() {
        let array: PersistentSparseArray<usize> = (0..4096)
            .map(|position| (position * 3, position as usize))
            .collect();
        for offset in [0, 1, 63, 64, 1000, 4095] {
            let entry = array.iter_range(offset, 1).next().unwrap();
            assert_eq!(entry, ((offset as i32) * 3, &offset));
        }
    }

    #[rstest]
    fn test_update_present_and_absent() {
        let array = PersistentSparseArray::new().insert(2, 10);
        let doubled = array.update(2, |value| value * 2).unwrap();
        assert_eq!(doubled.get(2), Some(&20));
        assert!(array.update(3, |value| value * 2).is_none());
    }

    #[rstest]
    fn test_update_with_inserts_updates_and_removes() {
        let empty: PersistentSparseArray<i32> = PersistentSparseArray::new();
        let inserted = empty.update_with(1, |_| Some(10));
        assert_eq!(inserted.get(1), Some(&10));

        let updated = inserted.update_with(1, |current| current.map(|value| value + 1));
        assert_eq!(updated.get(1), Some(&11));

        let removed = updated.update_with(1, |_| None);
        assert!(removed.is_empty());

        let still_empty = empty.update_with(9, |_| None);
        assert!(still_empty.is_empty());
    }

    #[rstest]
    fn test_equality_ignores_construction_order() {
        let forward: PersistentSparseArray<i32> =
            (0..20).map(|index| (index, index)).collect();
        let backward: PersistentSparseArray<i32> =
            (0..20).rev().map(|index| (index, index)).collect();
        assert_eq!(forward, backward);

        let different = forward.insert(5, 999);
        assert_ne!(forward, different);
    }

    #[rstest]
    fn test_debug_formats_as_map() {
        let array = PersistentSparseArray::new().insert(-1, "a").insert(2, "b");
        assert_eq!(format!("{array:?}"), r#"{-1: "a", 2: "b"}"#);
    }

    #[rstest]
    fn test_owning_into_iterator() {
        let array = PersistentSparseArray::new()
            .insert(1, String::from("one"))
            .insert(-1, String::from("minus one"));
        let entries: Vec<(i32, String)> = array.into_iter().collect();
        assert_eq!(
            entries,
            vec![(-1, String::from("minus one")), (1, String::from("one"))]
        );
    }

    #[rstest]
    fn test_dense_block_promotion_round_trip() {
        let mut array: PersistentSparseArray<i32> = PersistentSparseArray::new();
        for index in 0..64 {
            array = array.insert(index, index);
        }
        array.check_invariants().unwrap();
        assert_eq!(array.len(), 64);

        array = array.remove(32);
        array.check_invariants().unwrap();
        assert_eq!(array.len(), 63);
        assert_eq!(array.get(32), None);
        assert_eq!(array.get(33), Some(&33));
    }

    #[rstest]
    fn test_transient_round_trip_preserves_original() {
        let array = PersistentSparseArray::new().insert(1, 10).insert(2, 20);
        let mut transient = array.transient();
        transient.put(3, 30);
        let grown = transient.persistent();
        assert_eq!(array.len(), 2);
        assert_eq!(grown.len(), 3);
        assert_eq!(grown.get(3), Some(&30));
    }
}
