//! Node variants of the bitmap trie.
//!
//! Seven node kinds implement the same operation contract (lookup, update,
//! delete, size, invariant check) with layouts tuned to different occupancy
//! levels:
//!
//! | Variant      | Occupancy            | Storage                          |
//! |--------------|----------------------|----------------------------------|
//! | `Empty`      | 0 values             | none                             |
//! | `Single`     | exactly 1 value      | coordinate + value               |
//! | `Leaf`       | 2–63 values, level 0 | bitmap + compact value array     |
//! | `FullLeaf`   | 64 values, level 0   | dense value array, no bitmap     |
//! | `Branch`     | 2–63 children        | bitmap + compact child array     |
//! | `FullBranch` | 64 children          | dense child array, no bitmap     |
//! | `Super`      | mixed values/children| two bitmaps + two compact arrays |
//!
//! Nodes are immutable once constructed. An update never mutates in place:
//! it allocates fresh compact arrays for the touched path and returns a
//! replacement node, leaving every prior version of the trie intact.
//!
//! The `Super` variant lets a freshly synthesized ancestor start at the exact
//! level where two occupants diverge: a slot whose key "bottoms out" at that
//! level (all sub-level bits zero) holds its value directly, while other
//! slots hold subtrees, tracked by two disjoint bitmaps.

use thiserror::Error;

use super::ReferenceCounter;
use super::addressing::{
    FULL_BITMAP, MAX_LEVEL, base_of, bit_for, compact_index, shared_level, slot_coordinate,
    slot_of, sub_level_bits,
};

/// Shared, immutable handle to a node.
///
/// A child may be referenced by multiple parent versions simultaneously;
/// lifetime is "longest holder".
pub(crate) type Handle<V> = ReferenceCounter<Node<V>>;

// =============================================================================
// Node Definition
// =============================================================================

/// Internal node of the bitmap trie.
///
/// The set of variants is closed; operations dispatch by pattern matching so
/// the compiler checks exhaustiveness.
#[derive(Clone)]
pub(crate) enum Node<V> {
    /// Empty trie (canonical root of a vacant sign domain).
    Empty,
    /// A single value at an arbitrary depth.
    Single {
        /// Full coordinate of the value.
        coordinate: u32,
        /// The stored value.
        value: V,
    },
    /// Sparse level-0 node holding 2–63 values.
    Leaf {
        /// Common prefix (bits `[0, 6)` cleared).
        base: u32,
        /// Population bitmap; bit `i` set iff slot `i` is occupied.
        bitmap: u64,
        /// Occupied slots in ascending bit order.
        values: ReferenceCounter<[V]>,
    },
    /// Dense level-0 node holding all 64 values.
    FullLeaf {
        /// Common prefix (bits `[0, 6)` cleared).
        base: u32,
        /// One value per slot; no bitmap needed.
        values: ReferenceCounter<[V]>,
    },
    /// Sparse branch holding 2–63 child subtrees.
    Branch {
        /// Common prefix of every occupant.
        base: u32,
        /// Trie level this node branches on (always > 0).
        level: u8,
        /// Total number of values reachable below this node.
        length: usize,
        /// Population bitmap over child slots.
        bitmap: u64,
        /// Occupied children in ascending bit order.
        children: ReferenceCounter<[Handle<V>]>,
    },
    /// Dense branch holding all 64 child subtrees.
    FullBranch {
        /// Common prefix of every occupant.
        base: u32,
        /// Trie level this node branches on (always > 0).
        level: u8,
        /// Total number of values reachable below this node.
        length: usize,
        /// One child per slot; no bitmap needed.
        children: ReferenceCounter<[Handle<V>]>,
    },
    /// Adaptive branch mixing direct values and child subtrees.
    ///
    /// A slot holds a value directly when its key bottoms out exactly at
    /// this level (sub-level bits all zero); other occupied slots hold
    /// subtrees. The two bitmaps are disjoint.
    Super {
        /// Common prefix of every occupant.
        base: u32,
        /// Trie level this node branches on (always > 0).
        level: u8,
        /// Total number of values stored here or reachable below.
        length: usize,
        /// Bitmap over slots holding a value directly.
        value_bitmap: u64,
        /// Bitmap over slots holding a child subtree.
        child_bitmap: u64,
        /// Direct values in ascending bit order.
        values: ReferenceCounter<[V]>,
        /// Children in ascending bit order.
        children: ReferenceCounter<[Handle<V>]>,
    },
}

// =============================================================================
// Invariant Diagnostics
// =============================================================================

/// Structural inconsistency detected by [`check_invariants`].
///
/// These are diagnostic failures signalling a defect in the trie
/// implementation itself, not runtime conditions a caller can trigger
/// through the public API.
///
/// [`check_invariants`]: crate::persistent::PersistentSparseArray::check_invariants
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvariantViolation {
    /// A population bitmap disagrees with its compact array length.
    #[error("bitmap population {population} does not match compact array length {length}")]
    PopulationMismatch {
        /// Set bits in the bitmap.
        population: u32,
        /// Elements in the compact array.
        length: usize,
    },
    /// A node's stored entry count disagrees with its contents.
    #[error("node at level {level} stores length {stored} but its entries total {actual}")]
    LengthMismatch {
        /// Level of the offending node.
        level: u8,
        /// Length the node reports.
        stored: usize,
        /// Length obtained by summing its occupants.
        actual: usize,
    },
    /// A child sits at or above its parent's level.
    #[error("child at level {child} does not sit strictly below its parent level {parent}")]
    ChildLevel {
        /// Parent node level.
        parent: u8,
        /// Child node level.
        child: u8,
    },
    /// A child's coordinates fall outside the slot it occupies.
    #[error("occupant of slot {slot} does not belong under base {base:#010x}")]
    SlotMismatch {
        /// Slot the child occupies.
        slot: usize,
        /// Base prefix of the parent.
        base: u32,
    },
    /// An empty node is stored in an occupied slot.
    #[error("empty child stored in an occupied slot")]
    EmptyChild,
    /// A branch-like node holds fewer than two occupants.
    #[error("node holds {population} occupants; expected at least 2")]
    Underfull {
        /// Number of occupants found.
        population: usize,
    },
    /// A sparse node is fully occupied but was not promoted to its dense
    /// representation.
    #[error("fully occupied sparse node should use its dense representation")]
    MissedPromotion,
    /// A Super node's value and child bitmaps overlap.
    #[error("value and child bitmaps overlap: {overlap:#018x}")]
    BitmapOverlap {
        /// The overlapping bits.
        overlap: u64,
    },
    /// A Super node holds no direct values.
    #[error("super node holds no direct values")]
    SuperWithoutValues,
    /// A node's base prefix has bits set inside its own span.
    #[error("base {base:#010x} has bits set below the span of level {level}")]
    MisalignedBase {
        /// The offending base.
        base: u32,
        /// Level of the node.
        level: u8,
    },
    /// A node branches above the maximum trie level.
    #[error("node level {level} exceeds the maximum trie level")]
    LevelOutOfRange {
        /// Level of the node.
        level: u8,
    },
}

// =============================================================================
// Accessors
// =============================================================================

impl<V> Node<V> {
    /// Number of values stored in or reachable below this node.
    ///
    /// O(1): branch-like variants carry a stored count.
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Single { .. } => 1,
            Self::Leaf { bitmap, .. } => bitmap.count_ones() as usize,
            Self::FullLeaf { values, .. } => values.len(),
            Self::Branch { length, .. }
            | Self::FullBranch { length, .. }
            | Self::Super { length, .. } => *length,
        }
    }

    /// Returns `true` if this node holds no values.
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` for the level-0 (value-holding) variants.
    #[allow(dead_code)]
    pub(crate) fn is_leaf(&self) -> bool {
        matches!(
            self,
            Self::Single { .. } | Self::Leaf { .. } | Self::FullLeaf { .. }
        )
    }

    /// Level this node branches on; leaf-like variants report 0.
    fn level(&self) -> u8 {
        match self {
            Self::Empty | Self::Single { .. } | Self::Leaf { .. } | Self::FullLeaf { .. } => 0,
            Self::Branch { level, .. }
            | Self::FullBranch { level, .. }
            | Self::Super { level, .. } => *level,
        }
    }

    /// A coordinate every occupant of this node shares its prefix with.
    ///
    /// Must not be called on `Empty`.
    fn base_coordinate(&self) -> u32 {
        match self {
            Self::Empty => unreachable!("empty nodes are never stored in occupied slots"),
            Self::Single { coordinate, .. } => *coordinate,
            Self::Leaf { base, .. }
            | Self::FullLeaf { base, .. }
            | Self::Branch { base, .. }
            | Self::FullBranch { base, .. }
            | Self::Super { base, .. } => *base,
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Finds the value stored at `coordinate`, if any.
    ///
    /// Branch-like variants verify the base prefix before descending: an
    /// ancestor asked about a coordinate outside its span answers "absent"
    /// without recursing.
    pub(crate) fn find(&self, coordinate: u32) -> Option<&V> {
        match self {
            Self::Empty => None,
            Self::Single {
                coordinate: existing,
                value,
            } => (*existing == coordinate).then_some(value),
            Self::Leaf {
                base,
                bitmap,
                values,
            } => {
                if base_of(0, coordinate) != *base {
                    return None;
                }
                let bit = bit_for(slot_of(0, coordinate));
                if bitmap & bit == 0 {
                    None
                } else {
                    Some(&values[compact_index(*bitmap, bit)])
                }
            }
            Self::FullLeaf { base, values } => {
                if base_of(0, coordinate) != *base {
                    return None;
                }
                Some(&values[slot_of(0, coordinate)])
            }
            Self::Branch {
                base,
                level,
                bitmap,
                children,
                ..
            } => {
                if base_of(*level, coordinate) != *base {
                    return None;
                }
                let bit = bit_for(slot_of(*level, coordinate));
                if bitmap & bit == 0 {
                    None
                } else {
                    children[compact_index(*bitmap, bit)].find(coordinate)
                }
            }
            Self::FullBranch {
                base,
                level,
                children,
                ..
            } => {
                if base_of(*level, coordinate) != *base {
                    return None;
                }
                children[slot_of(*level, coordinate)].find(coordinate)
            }
            Self::Super {
                base,
                level,
                value_bitmap,
                child_bitmap,
                values,
                children,
                ..
            } => {
                if base_of(*level, coordinate) != *base {
                    return None;
                }
                let slot = slot_of(*level, coordinate);
                let bit = bit_for(slot);
                if value_bitmap & bit != 0 {
                    // The slot holds exactly the key that bottoms out here.
                    (coordinate == slot_coordinate(*base, *level, slot))
                        .then(|| &values[compact_index(*value_bitmap, bit)])
                } else if child_bitmap & bit != 0 {
                    children[compact_index(*child_bitmap, bit)].find(coordinate)
                } else {
                    None
                }
            }
        }
    }
}

// =============================================================================
// Update
// =============================================================================

impl<V: Clone> Node<V> {
    /// Assigns `value` to `coordinate`, returning the replacement node and
    /// whether a new entry was added (`false` means a pure replacement).
    ///
    /// Path copying: only the spine from this node to the touched slot is
    /// reallocated; untouched children are shared with the original.
    pub(crate) fn assign(node: &Handle<V>, coordinate: u32, value: V) -> (Handle<V>, bool) {
        match node.as_ref() {
            Self::Empty => (
                ReferenceCounter::new(Self::Single { coordinate, value }),
                true,
            ),
            Self::Single {
                coordinate: existing,
                value: existing_value,
            } => {
                if *existing == coordinate {
                    (
                        ReferenceCounter::new(Self::Single { coordinate, value }),
                        false,
                    )
                } else {
                    (
                        ReferenceCounter::new(Self::join_values(
                            *existing,
                            existing_value.clone(),
                            coordinate,
                            value,
                        )),
                        true,
                    )
                }
            }
            Self::Leaf {
                base,
                bitmap,
                values,
            } => Self::assign_into_leaf(node, *base, *bitmap, values, coordinate, value),
            Self::FullLeaf { base, values } => {
                Self::assign_into_full_leaf(node, *base, values, coordinate, value)
            }
            Self::Branch {
                base,
                level,
                length,
                bitmap,
                children,
            } => Self::assign_into_branch(
                node, *base, *level, *length, *bitmap, children, coordinate, value,
            ),
            Self::FullBranch {
                base,
                level,
                length,
                children,
            } => Self::assign_into_full_branch(
                node, *base, *level, *length, children, coordinate, value,
            ),
            Self::Super {
                base,
                level,
                length,
                value_bitmap,
                child_bitmap,
                values,
                children,
            } => Self::assign_into_super(
                node,
                SuperFields {
                    base: *base,
                    level: *level,
                    length: *length,
                    value_bitmap: *value_bitmap,
                    child_bitmap: *child_bitmap,
                    values,
                    children,
                },
                coordinate,
                value,
            ),
        }
    }

    /// Helper for assigning into a sparse leaf.
    fn assign_into_leaf(
        node: &Handle<V>,
        base: u32,
        bitmap: u64,
        values: &ReferenceCounter<[V]>,
        coordinate: u32,
        value: V,
    ) -> (Handle<V>, bool) {
        if base_of(0, coordinate) != base {
            return Self::diverge(node, coordinate, value);
        }
        let bit = bit_for(slot_of(0, coordinate));
        let position = compact_index(bitmap, bit);
        let mut new_values = values.to_vec();
        if bitmap & bit != 0 {
            new_values[position] = value;
            (
                ReferenceCounter::new(Self::Leaf {
                    base,
                    bitmap,
                    values: ReferenceCounter::from(new_values),
                }),
                false,
            )
        } else {
            new_values.insert(position, value);
            let new_bitmap = bitmap | bit;
            let node = if new_bitmap == FULL_BITMAP {
                // Promotion: all 64 slots occupied, drop the bitmap
                Self::FullLeaf {
                    base,
                    values: ReferenceCounter::from(new_values),
                }
            } else {
                Self::Leaf {
                    base,
                    bitmap: new_bitmap,
                    values: ReferenceCounter::from(new_values),
                }
            };
            (ReferenceCounter::new(node), true)
        }
    }

    /// Helper for assigning into a dense leaf (always a replacement).
    fn assign_into_full_leaf(
        node: &Handle<V>,
        base: u32,
        values: &ReferenceCounter<[V]>,
        coordinate: u32,
        value: V,
    ) -> (Handle<V>, bool) {
        if base_of(0, coordinate) != base {
            return Self::diverge(node, coordinate, value);
        }
        let mut new_values = values.to_vec();
        new_values[slot_of(0, coordinate)] = value;
        (
            ReferenceCounter::new(Self::FullLeaf {
                base,
                values: ReferenceCounter::from(new_values),
            }),
            false,
        )
    }

    /// Helper for assigning into a sparse branch.
    #[allow(clippy::too_many_arguments)]
    fn assign_into_branch(
        node: &Handle<V>,
        base: u32,
        level: u8,
        length: usize,
        bitmap: u64,
        children: &ReferenceCounter<[Handle<V>]>,
        coordinate: u32,
        value: V,
    ) -> (Handle<V>, bool) {
        if base_of(level, coordinate) != base {
            return Self::diverge(node, coordinate, value);
        }
        let bit = bit_for(slot_of(level, coordinate));
        let position = compact_index(bitmap, bit);
        let mut new_children = children.to_vec();
        if bitmap & bit != 0 {
            let (new_child, added) = Self::assign(&children[position], coordinate, value);
            new_children[position] = new_child;
            (
                ReferenceCounter::new(Self::Branch {
                    base,
                    level,
                    length: length + usize::from(added),
                    bitmap,
                    children: ReferenceCounter::from(new_children),
                }),
                added,
            )
        } else {
            new_children.insert(
                position,
                ReferenceCounter::new(Self::Single { coordinate, value }),
            );
            let new_bitmap = bitmap | bit;
            let node = if new_bitmap == FULL_BITMAP {
                Self::FullBranch {
                    base,
                    level,
                    length: length + 1,
                    children: ReferenceCounter::from(new_children),
                }
            } else {
                Self::Branch {
                    base,
                    level,
                    length: length + 1,
                    bitmap: new_bitmap,
                    children: ReferenceCounter::from(new_children),
                }
            };
            (ReferenceCounter::new(node), true)
        }
    }

    /// Helper for assigning into a dense branch.
    fn assign_into_full_branch(
        node: &Handle<V>,
        base: u32,
        level: u8,
        length: usize,
        children: &ReferenceCounter<[Handle<V>]>,
        coordinate: u32,
        value: V,
    ) -> (Handle<V>, bool) {
        if base_of(level, coordinate) != base {
            return Self::diverge(node, coordinate, value);
        }
        let slot = slot_of(level, coordinate);
        let (new_child, added) = Self::assign(&children[slot], coordinate, value);
        let mut new_children = children.to_vec();
        new_children[slot] = new_child;
        (
            ReferenceCounter::new(Self::FullBranch {
                base,
                level,
                length: length + usize::from(added),
                children: ReferenceCounter::from(new_children),
            }),
            added,
        )
    }

    /// Helper for assigning into a Super node.
    fn assign_into_super(
        node: &Handle<V>,
        fields: SuperFields<'_, V>,
        coordinate: u32,
        value: V,
    ) -> (Handle<V>, bool) {
        let SuperFields {
            base,
            level,
            length,
            value_bitmap,
            child_bitmap,
            values,
            children,
        } = fields;
        if base_of(level, coordinate) != base {
            return Self::diverge(node, coordinate, value);
        }
        let slot = slot_of(level, coordinate);
        let bit = bit_for(slot);
        if value_bitmap & bit != 0 {
            let position = compact_index(value_bitmap, bit);
            let slot_base = slot_coordinate(base, level, slot);
            if coordinate == slot_base {
                // Pure replacement of the bottomed-out value
                let mut new_values = values.to_vec();
                new_values[position] = value;
                (
                    ReferenceCounter::new(Self::Super {
                        base,
                        level,
                        length,
                        value_bitmap,
                        child_bitmap,
                        values: ReferenceCounter::from(new_values),
                        children: children.clone(),
                    }),
                    false,
                )
            } else {
                // The slot's direct value and the new value both live below
                // this slot; push them down into a joined subtree.
                let joined = Self::join_values(
                    slot_base,
                    values[position].clone(),
                    coordinate,
                    value,
                );
                let mut new_values = values.to_vec();
                new_values.remove(position);
                let mut new_children = children.to_vec();
                new_children.insert(
                    compact_index(child_bitmap, bit),
                    ReferenceCounter::new(joined),
                );
                let node = Self::rebuild_super(
                    base,
                    level,
                    length + 1,
                    value_bitmap & !bit,
                    child_bitmap | bit,
                    new_values,
                    new_children,
                );
                (ReferenceCounter::new(node), true)
            }
        } else if child_bitmap & bit != 0 {
            let position = compact_index(child_bitmap, bit);
            let (new_child, added) = Self::assign(&children[position], coordinate, value);
            let mut new_children = children.to_vec();
            new_children[position] = new_child;
            (
                ReferenceCounter::new(Self::Super {
                    base,
                    level,
                    length: length + usize::from(added),
                    value_bitmap,
                    child_bitmap,
                    values: values.clone(),
                    children: ReferenceCounter::from(new_children),
                }),
                added,
            )
        } else if coordinate == slot_coordinate(base, level, slot) {
            // The new key bottoms out exactly here: store it directly
            let mut new_values = values.to_vec();
            new_values.insert(compact_index(value_bitmap, bit), value);
            (
                ReferenceCounter::new(Self::Super {
                    base,
                    level,
                    length: length + 1,
                    value_bitmap: value_bitmap | bit,
                    child_bitmap,
                    values: ReferenceCounter::from(new_values),
                    children: children.clone(),
                }),
                true,
            )
        } else {
            let mut new_children = children.to_vec();
            new_children.insert(
                compact_index(child_bitmap, bit),
                ReferenceCounter::new(Self::Single { coordinate, value }),
            );
            (
                ReferenceCounter::new(Self::Super {
                    base,
                    level,
                    length: length + 1,
                    value_bitmap,
                    child_bitmap: child_bitmap | bit,
                    values: values.clone(),
                    children: ReferenceCounter::from(new_children),
                }),
                true,
            )
        }
    }

    /// Synthesizes a common ancestor when `coordinate` falls outside the
    /// node's base prefix.
    fn diverge(node: &Handle<V>, coordinate: u32, value: V) -> (Handle<V>, bool) {
        (
            ReferenceCounter::new(Self::join_with_subtree(node.clone(), coordinate, value)),
            true,
        )
    }

    /// Builds the smallest node containing two values at distinct
    /// coordinates.
    fn join_values(
        first_coordinate: u32,
        first_value: V,
        second_coordinate: u32,
        second_value: V,
    ) -> Self {
        let level = shared_level(first_coordinate, second_coordinate);
        let base = base_of(level, first_coordinate);
        let first_slot = slot_of(level, first_coordinate);
        let second_slot = slot_of(level, second_coordinate);
        if level == 0 {
            let (bitmap, values) = if first_slot < second_slot {
                (
                    bit_for(first_slot) | bit_for(second_slot),
                    vec![first_value, second_value],
                )
            } else {
                (
                    bit_for(first_slot) | bit_for(second_slot),
                    vec![second_value, first_value],
                )
            };
            return Self::Leaf {
                base,
                bitmap,
                values: ReferenceCounter::from(values),
            };
        }
        let first_direct = sub_level_bits(level, first_coordinate) == 0;
        let second_direct = sub_level_bits(level, second_coordinate) == 0;
        let single = |coordinate, value| {
            ReferenceCounter::new(Self::Single { coordinate, value })
        };
        match (first_direct, second_direct) {
            (true, true) => {
                let (value_bitmap, values) = if first_slot < second_slot {
                    (
                        bit_for(first_slot) | bit_for(second_slot),
                        vec![first_value, second_value],
                    )
                } else {
                    (
                        bit_for(first_slot) | bit_for(second_slot),
                        vec![second_value, first_value],
                    )
                };
                Self::Super {
                    base,
                    level,
                    length: 2,
                    value_bitmap,
                    child_bitmap: 0,
                    values: ReferenceCounter::from(values),
                    children: ReferenceCounter::from(Vec::new()),
                }
            }
            (true, false) => Self::Super {
                base,
                level,
                length: 2,
                value_bitmap: bit_for(first_slot),
                child_bitmap: bit_for(second_slot),
                values: ReferenceCounter::from(vec![first_value]),
                children: ReferenceCounter::from(vec![single(second_coordinate, second_value)]),
            },
            (false, true) => Self::Super {
                base,
                level,
                length: 2,
                value_bitmap: bit_for(second_slot),
                child_bitmap: bit_for(first_slot),
                values: ReferenceCounter::from(vec![second_value]),
                children: ReferenceCounter::from(vec![single(first_coordinate, first_value)]),
            },
            (false, false) => {
                let first_child = single(first_coordinate, first_value);
                let second_child = single(second_coordinate, second_value);
                let children = if first_slot < second_slot {
                    vec![first_child, second_child]
                } else {
                    vec![second_child, first_child]
                };
                Self::Branch {
                    base,
                    level,
                    length: 2,
                    bitmap: bit_for(first_slot) | bit_for(second_slot),
                    children: ReferenceCounter::from(children),
                }
            }
        }
    }

    /// Wraps an existing subtree and a new value under a common ancestor at
    /// their divergence level.
    ///
    /// This is what keeps single-value insertion into a deep trie
    /// O(divergence depth): the ancestor starts exactly where the prefixes
    /// part ways instead of rebuilding synthetic branches down to level 0.
    fn join_with_subtree(existing: Handle<V>, coordinate: u32, value: V) -> Self {
        let existing_coordinate = existing.base_coordinate();
        let level = shared_level(existing_coordinate, coordinate);
        debug_assert!(level > existing.level());
        let base = base_of(level, coordinate);
        let existing_slot = slot_of(level, existing_coordinate);
        let new_slot = slot_of(level, coordinate);
        let length = existing.len() + 1;
        if sub_level_bits(level, coordinate) == 0 {
            Self::Super {
                base,
                level,
                length,
                value_bitmap: bit_for(new_slot),
                child_bitmap: bit_for(existing_slot),
                values: ReferenceCounter::from(vec![value]),
                children: ReferenceCounter::from(vec![existing]),
            }
        } else {
            let single = ReferenceCounter::new(Self::Single { coordinate, value });
            let children = if existing_slot < new_slot {
                vec![existing, single]
            } else {
                vec![single, existing]
            };
            Self::Branch {
                base,
                level,
                length,
                bitmap: bit_for(existing_slot) | bit_for(new_slot),
                children: ReferenceCounter::from(children),
            }
        }
    }

    /// Picks the canonical variant for a Super node's occupancy after a
    /// structural change.
    ///
    /// A Super without direct values is an ordinary branch; a fully
    /// occupied one with no values is a dense branch.
    fn rebuild_super(
        base: u32,
        level: u8,
        length: usize,
        value_bitmap: u64,
        child_bitmap: u64,
        values: Vec<V>,
        children: Vec<Handle<V>>,
    ) -> Self {
        if value_bitmap == 0 {
            if child_bitmap == FULL_BITMAP {
                Self::FullBranch {
                    base,
                    level,
                    length,
                    children: ReferenceCounter::from(children),
                }
            } else {
                Self::Branch {
                    base,
                    level,
                    length,
                    bitmap: child_bitmap,
                    children: ReferenceCounter::from(children),
                }
            }
        } else {
            Self::Super {
                base,
                level,
                length,
                value_bitmap,
                child_bitmap,
                values: ReferenceCounter::from(values),
                children: ReferenceCounter::from(children),
            }
        }
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Deletes `coordinate`, returning the replacement node or `None` when
    /// the key was absent (the caller keeps its old handle, preserving
    /// sharing).
    pub(crate) fn delete(node: &Handle<V>, coordinate: u32) -> Option<Handle<V>> {
        match node.as_ref() {
            Self::Empty => None,
            Self::Single {
                coordinate: existing,
                ..
            } => (*existing == coordinate).then(|| ReferenceCounter::new(Self::Empty)),
            Self::Leaf {
                base,
                bitmap,
                values,
            } => Self::delete_from_leaf(*base, *bitmap, values, coordinate),
            Self::FullLeaf { base, values } => {
                Self::delete_from_full_leaf(*base, values, coordinate)
            }
            Self::Branch {
                base,
                level,
                length,
                bitmap,
                children,
            } => Self::delete_from_branch(*base, *level, *length, *bitmap, children, coordinate),
            Self::FullBranch {
                base,
                level,
                length,
                children,
            } => Self::delete_from_full_branch(*base, *level, *length, children, coordinate),
            Self::Super {
                base,
                level,
                length,
                value_bitmap,
                child_bitmap,
                values,
                children,
            } => Self::delete_from_super(
                SuperFields {
                    base: *base,
                    level: *level,
                    length: *length,
                    value_bitmap: *value_bitmap,
                    child_bitmap: *child_bitmap,
                    values,
                    children,
                },
                coordinate,
            ),
        }
    }

    /// Helper for deleting from a sparse leaf.
    fn delete_from_leaf(
        base: u32,
        bitmap: u64,
        values: &ReferenceCounter<[V]>,
        coordinate: u32,
    ) -> Option<Handle<V>> {
        if base_of(0, coordinate) != base {
            return None;
        }
        let bit = bit_for(slot_of(0, coordinate));
        if bitmap & bit == 0 {
            return None;
        }
        let position = compact_index(bitmap, bit);
        let new_bitmap = bitmap & !bit;
        let mut new_values = values.to_vec();
        new_values.remove(position);
        let node = if new_values.len() == 1 {
            // Collapse: a one-value leaf is canonically a Single
            let remaining_slot = new_bitmap.trailing_zeros() as usize;
            Self::Single {
                coordinate: slot_coordinate(base, 0, remaining_slot),
                value: new_values.remove(0),
            }
        } else {
            Self::Leaf {
                base,
                bitmap: new_bitmap,
                values: ReferenceCounter::from(new_values),
            }
        };
        Some(ReferenceCounter::new(node))
    }

    /// Helper for deleting from a dense leaf (demotes to sparse).
    fn delete_from_full_leaf(
        base: u32,
        values: &ReferenceCounter<[V]>,
        coordinate: u32,
    ) -> Option<Handle<V>> {
        if base_of(0, coordinate) != base {
            return None;
        }
        let slot = slot_of(0, coordinate);
        let mut new_values = values.to_vec();
        new_values.remove(slot);
        Some(ReferenceCounter::new(Self::Leaf {
            base,
            bitmap: FULL_BITMAP & !bit_for(slot),
            values: ReferenceCounter::from(new_values),
        }))
    }

    /// Helper for deleting from a sparse branch.
    fn delete_from_branch(
        base: u32,
        level: u8,
        length: usize,
        bitmap: u64,
        children: &ReferenceCounter<[Handle<V>]>,
        coordinate: u32,
    ) -> Option<Handle<V>> {
        if base_of(level, coordinate) != base {
            return None;
        }
        let bit = bit_for(slot_of(level, coordinate));
        if bitmap & bit == 0 {
            return None;
        }
        let position = compact_index(bitmap, bit);
        let new_child = Self::delete(&children[position], coordinate)?;
        let mut new_children = children.to_vec();
        if new_child.is_empty() {
            new_children.remove(position);
            if new_children.len() == 1 {
                // Collapse: the surviving child replaces the branch
                return Some(new_children.remove(0));
            }
            Some(ReferenceCounter::new(Self::Branch {
                base,
                level,
                length: length - 1,
                bitmap: bitmap & !bit,
                children: ReferenceCounter::from(new_children),
            }))
        } else {
            new_children[position] = new_child;
            Some(ReferenceCounter::new(Self::Branch {
                base,
                level,
                length: length - 1,
                bitmap,
                children: ReferenceCounter::from(new_children),
            }))
        }
    }

    /// Helper for deleting from a dense branch (demotes to sparse when a
    /// child empties out).
    fn delete_from_full_branch(
        base: u32,
        level: u8,
        length: usize,
        children: &ReferenceCounter<[Handle<V>]>,
        coordinate: u32,
    ) -> Option<Handle<V>> {
        if base_of(level, coordinate) != base {
            return None;
        }
        let slot = slot_of(level, coordinate);
        let new_child = Self::delete(&children[slot], coordinate)?;
        let mut new_children = children.to_vec();
        if new_child.is_empty() {
            new_children.remove(slot);
            Some(ReferenceCounter::new(Self::Branch {
                base,
                level,
                length: length - 1,
                bitmap: FULL_BITMAP & !bit_for(slot),
                children: ReferenceCounter::from(new_children),
            }))
        } else {
            new_children[slot] = new_child;
            Some(ReferenceCounter::new(Self::FullBranch {
                base,
                level,
                length: length - 1,
                children: ReferenceCounter::from(new_children),
            }))
        }
    }

    /// Helper for deleting from a Super node.
    fn delete_from_super(fields: SuperFields<'_, V>, coordinate: u32) -> Option<Handle<V>> {
        let SuperFields {
            base,
            level,
            length,
            value_bitmap,
            child_bitmap,
            values,
            children,
        } = fields;
        if base_of(level, coordinate) != base {
            return None;
        }
        let slot = slot_of(level, coordinate);
        let bit = bit_for(slot);
        if value_bitmap & bit != 0 {
            if coordinate != slot_coordinate(base, level, slot) {
                return None;
            }
            let mut new_values = values.to_vec();
            new_values.remove(compact_index(value_bitmap, bit));
            Some(Self::collapse_super(
                base,
                level,
                length - 1,
                value_bitmap & !bit,
                child_bitmap,
                new_values,
                children.to_vec(),
            ))
        } else if child_bitmap & bit != 0 {
            let position = compact_index(child_bitmap, bit);
            let new_child = Self::delete(&children[position], coordinate)?;
            let mut new_children = children.to_vec();
            if new_child.is_empty() {
                new_children.remove(position);
                Some(Self::collapse_super(
                    base,
                    level,
                    length - 1,
                    value_bitmap,
                    child_bitmap & !bit,
                    values.to_vec(),
                    new_children,
                ))
            } else {
                new_children[position] = new_child;
                Some(ReferenceCounter::new(Self::Super {
                    base,
                    level,
                    length: length - 1,
                    value_bitmap,
                    child_bitmap,
                    values: values.clone(),
                    children: ReferenceCounter::from(new_children),
                }))
            }
        } else {
            None
        }
    }

    /// Chooses the canonical node for a Super's post-removal occupancy:
    /// a lone direct value degrades to a Single, a lone child replaces the
    /// node entirely, and a value-less Super becomes an ordinary branch.
    fn collapse_super(
        base: u32,
        level: u8,
        length: usize,
        value_bitmap: u64,
        child_bitmap: u64,
        values: Vec<V>,
        mut children: Vec<Handle<V>>,
    ) -> Handle<V> {
        if children.is_empty() && values.len() == 1 {
            let slot = value_bitmap.trailing_zeros() as usize;
            let mut values = values;
            return ReferenceCounter::new(Self::Single {
                coordinate: slot_coordinate(base, level, slot),
                value: values.remove(0),
            });
        }
        if values.is_empty() && children.len() == 1 {
            return children.remove(0);
        }
        ReferenceCounter::new(Self::rebuild_super(
            base,
            level,
            length,
            value_bitmap,
            child_bitmap,
            values,
            children,
        ))
    }
}

/// Borrowed field bundle for the Super variant, keeping its helper
/// signatures readable.
struct SuperFields<'a, V> {
    base: u32,
    level: u8,
    length: usize,
    value_bitmap: u64,
    child_bitmap: u64,
    values: &'a ReferenceCounter<[V]>,
    children: &'a ReferenceCounter<[Handle<V>]>,
}

// =============================================================================
// Invariant Checking
// =============================================================================

impl<V> Node<V> {
    /// Validates the structural invariants of this subtree.
    ///
    /// Not part of the hot path; intended for test harnesses after
    /// arbitrary update/delete sequences.
    pub(crate) fn check_invariants(&self) -> Result<(), InvariantViolation> {
        match self {
            Self::Empty | Self::Single { .. } => Ok(()),
            Self::Leaf {
                base,
                bitmap,
                values,
            } => {
                Self::check_population(*bitmap, values.len())?;
                Self::check_base(*base, 0)?;
                if *bitmap == FULL_BITMAP {
                    return Err(InvariantViolation::MissedPromotion);
                }
                if values.len() < 2 {
                    return Err(InvariantViolation::Underfull {
                        population: values.len(),
                    });
                }
                Ok(())
            }
            Self::FullLeaf { base, values } => {
                Self::check_population(FULL_BITMAP, values.len())?;
                Self::check_base(*base, 0)
            }
            Self::Branch {
                base,
                level,
                length,
                bitmap,
                children,
            } => {
                Self::check_population(*bitmap, children.len())?;
                Self::check_level_and_base(*base, *level)?;
                if *bitmap == FULL_BITMAP {
                    return Err(InvariantViolation::MissedPromotion);
                }
                if children.len() < 2 {
                    return Err(InvariantViolation::Underfull {
                        population: children.len(),
                    });
                }
                Self::check_children(*base, *level, *length, *bitmap, 0, children)
            }
            Self::FullBranch {
                base,
                level,
                length,
                children,
            } => {
                Self::check_population(FULL_BITMAP, children.len())?;
                Self::check_level_and_base(*base, *level)?;
                Self::check_children(*base, *level, *length, FULL_BITMAP, 0, children)
            }
            Self::Super {
                base,
                level,
                length,
                value_bitmap,
                child_bitmap,
                values,
                children,
            } => {
                let overlap = value_bitmap & child_bitmap;
                if overlap != 0 {
                    return Err(InvariantViolation::BitmapOverlap { overlap });
                }
                Self::check_population(*value_bitmap, values.len())?;
                Self::check_population(*child_bitmap, children.len())?;
                Self::check_level_and_base(*base, *level)?;
                if *value_bitmap == 0 {
                    return Err(InvariantViolation::SuperWithoutValues);
                }
                let population = values.len() + children.len();
                if population < 2 {
                    return Err(InvariantViolation::Underfull { population });
                }
                Self::check_children(
                    *base,
                    *level,
                    *length,
                    *child_bitmap,
                    values.len(),
                    children,
                )
            }
        }
    }

    /// Verifies that a bitmap's population matches its compact array.
    fn check_population(bitmap: u64, length: usize) -> Result<(), InvariantViolation> {
        let population = bitmap.count_ones();
        if population as usize == length {
            Ok(())
        } else {
            Err(InvariantViolation::PopulationMismatch { population, length })
        }
    }

    /// Verifies that a base prefix is aligned to its level's span.
    fn check_base(base: u32, level: u8) -> Result<(), InvariantViolation> {
        if base_of(level, base) == base {
            Ok(())
        } else {
            Err(InvariantViolation::MisalignedBase { base, level })
        }
    }

    /// Verifies level range and base alignment for branch-like nodes.
    fn check_level_and_base(base: u32, level: u8) -> Result<(), InvariantViolation> {
        if level == 0 || level > MAX_LEVEL {
            return Err(InvariantViolation::LevelOutOfRange { level });
        }
        Self::check_base(base, level)
    }

    /// Validates every child of a branch-like node and the parent's stored
    /// length (`direct_values` counts values the parent stores itself).
    fn check_children(
        base: u32,
        level: u8,
        stored: usize,
        child_bitmap: u64,
        direct_values: usize,
        children: &ReferenceCounter<[Handle<V>]>,
    ) -> Result<(), InvariantViolation> {
        let mut actual = direct_values;
        let mut bits = child_bitmap;
        for child in children.iter() {
            let slot = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            if child.is_empty() {
                return Err(InvariantViolation::EmptyChild);
            }
            if child.level() >= level {
                return Err(InvariantViolation::ChildLevel {
                    parent: level,
                    child: child.level(),
                });
            }
            let representative = child.base_coordinate();
            if base_of(level, representative) != base || slot_of(level, representative) != slot {
                return Err(InvariantViolation::SlotMismatch { slot, base });
            }
            child.check_invariants()?;
            actual += child.len();
        }
        if actual == stored {
            Ok(())
        } else {
            Err(InvariantViolation::LengthMismatch {
                level,
                stored,
                actual,
            })
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

    fn empty() -> Handle<&'static str> {
        ReferenceCounter::new(Node::Empty)
    }

    fn build(entries: &[(u32, &'static str)]) -> Handle<&'static str> {
        let mut node = empty();
        for (coordinate, value) in entries {
            let (next, _) = Node::assign(&node, *coordinate, *value);
            node = next;
        }
        node
    }

    #[rstest]
    fn test_assign_into_empty_yields_single() {
        let (node, added) = Node::assign(&empty(), 42, "a");
        assert!(added);
        assert!(node.is_leaf());
        assert_eq!(node.len(), 1);
        assert_eq!(node.find(42), Some(&"a"));
        node.check_invariants().unwrap();
    }

    #[rstest]
    fn test_two_leaf_siblings_share_a_leaf() {
        let node = build(&[(5, "a"), (6, "b")]);
        assert!(matches!(node.as_ref(), Node::Leaf { .. }));
        assert_eq!(node.find(5), Some(&"a"));
        assert_eq!(node.find(6), Some(&"b"));
        assert_eq!(node.find(7), None);
        node.check_invariants().unwrap();
    }

    #[rstest]
    fn test_diverging_coordinates_join_under_branch() {
        // 5 and 69 differ first at level 1, and neither bottoms out there
        let node = build(&[(5, "a"), (69, "c")]);
        assert!(matches!(node.as_ref(), Node::Branch { level: 1, .. }));
        assert_eq!(node.find(5), Some(&"a"));
        assert_eq!(node.find(69), Some(&"c"));
        assert_eq!(node.find(6), None);
        node.check_invariants().unwrap();
    }

    #[rstest]
    fn test_bottoming_out_key_joins_under_super() {
        // 64 has no bits below level 1, so the ancestor stores it directly
        let node = build(&[(5, "a"), (64, "b")]);
        assert!(matches!(node.as_ref(), Node::Super { level: 1, .. }));
        assert_eq!(node.find(5), Some(&"a"));
        assert_eq!(node.find(64), Some(&"b"));
        assert_eq!(node.find(0), None);
        node.check_invariants().unwrap();
    }

    #[rstest]
    fn test_super_pushes_colliding_direct_value_down() {
        let node = build(&[(5, "a"), (64, "b")]);
        // 65 shares slot 1 at level 1 with the direct value 64
        let (node, added) = Node::assign(&node, 65, "c");
        assert!(added);
        assert_eq!(node.len(), 3);
        assert_eq!(node.find(64), Some(&"b"));
        assert_eq!(node.find(65), Some(&"c"));
        node.check_invariants().unwrap();
    }

    #[rstest]
    fn test_leaf_promotes_to_full_leaf_at_sixty_four() {
        let entries: Vec<(u32, &'static str)> = (0..64).map(|slot| (slot, "x")).collect();
        let node = build(&entries);
        assert!(matches!(node.as_ref(), Node::FullLeaf { .. }));
        assert_eq!(node.len(), 64);
        for slot in 0..64 {
            assert_eq!(node.find(slot), Some(&"x"));
        }
        node.check_invariants().unwrap();
    }

    #[rstest]
    fn test_full_leaf_demotes_on_delete() {
        let entries: Vec<(u32, &'static str)> = (0..64).map(|slot| (slot, "x")).collect();
        let node = build(&entries);
        let node = Node::delete(&node, 10).unwrap();
        assert!(matches!(node.as_ref(), Node::Leaf { .. }));
        assert_eq!(node.len(), 63);
        assert_eq!(node.find(10), None);
        assert_eq!(node.find(11), Some(&"x"));
        node.check_invariants().unwrap();
    }

    #[rstest]
    fn test_replacement_does_not_grow() {
        let node = build(&[(5, "a"), (6, "b")]);
        let (node, added) = Node::assign(&node, 5, "z");
        assert!(!added);
        assert_eq!(node.len(), 2);
        assert_eq!(node.find(5), Some(&"z"));
        node.check_invariants().unwrap();
    }

    #[rstest]
    fn test_delete_absent_returns_none() {
        let node = build(&[(5, "a"), (69, "c")]);
        assert!(Node::delete(&node, 6).is_none());
        assert!(Node::delete(&node, 1 << 20).is_none());
    }

    #[rstest]
    fn test_branch_collapses_to_surviving_child() {
        let node = build(&[(5, "a"), (69, "c")]);
        let node = Node::delete(&node, 69).unwrap();
        assert!(matches!(
            node.as_ref(),
            Node::Single { coordinate: 5, .. }
        ));
        node.check_invariants().unwrap();
    }

    #[rstest]
    fn test_super_collapses_to_lone_direct_value() {
        let node = build(&[(5, "a"), (64, "b")]);
        let node = Node::delete(&node, 5).unwrap();
        assert!(matches!(
            node.as_ref(),
            Node::Single {
                coordinate: 64,
                ..
            }
        ));
        node.check_invariants().unwrap();
    }

    #[rstest]
    fn test_leaf_collapses_to_single() {
        let node = build(&[(5, "a"), (6, "b"), (7, "c")]);
        let node = Node::delete(&node, 6).unwrap();
        let node = Node::delete(&node, 7).unwrap();
        assert!(matches!(
            node.as_ref(),
            Node::Single { coordinate: 5, .. }
        ));
        node.check_invariants().unwrap();
    }

    #[rstest]
    fn test_draining_restores_canonical_empty() {
        let node = build(&[(5, "a"), (69, "c")]);
        let node = Node::delete(&node, 5).unwrap();
        let node = Node::delete(&node, 69).unwrap();
        assert!(node.is_empty());
        assert_eq!(node.len(), 0);
    }

    #[rstest]
    fn test_structural_sharing_on_assign() {
        // 4096 bottoms out at level 2: the root is a Super holding it
        // directly next to the subtree containing 5 and 69
        let original = build(&[(5, "a"), (69, "c"), (4096, "d")]);
        // 4097 collides with the direct value; pushing both down leaves an
        // ordinary branch whose untouched subtree is shared
        let (updated, _) = Node::assign(&original, 4097, "e");
        let Node::Super { children: old, .. } = original.as_ref() else {
            panic!("expected a super root");
        };
        let Node::Branch { children: new, .. } = updated.as_ref() else {
            panic!("expected a branch root");
        };
        assert!(ReferenceCounter::ptr_eq(&old[0], &new[0]));
        assert_eq!(original.find(4097), None);
        assert_eq!(updated.find(4097), Some(&"e"));
    }

    #[rstest]
    fn test_stored_lengths_survive_interleaved_ops() {
        let mut node = empty();
        for coordinate in (0..2048).step_by(3) {
            let (next, _) = Node::assign(&node, coordinate, "v");
            node = next;
        }
        for coordinate in (0..2048).step_by(6) {
            if let Some(next) = Node::delete(&node, coordinate) {
                node = next;
            }
        }
        node.check_invariants().unwrap();
        let expected = (0..2048).step_by(3).filter(|c| c % 6 != 0).count();
        assert_eq!(node.len(), expected);
    }
}
