//! Property-based tests for PersistentSparseArray.
//!
//! Verifies the algebraic laws of the persistent array and its agreement
//! with a `BTreeMap<i32, _>` reference model under arbitrary workloads.

use proptest::prelude::*;
use sparray::persistent::{PersistentSparseArray, TransientSparseArray};
use std::collections::BTreeMap;

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Indices biased toward a narrow band so entries collide into shared
/// subtrees, while still exercising the full signed range.
fn arbitrary_index() -> impl Strategy<Value = i32> {
    prop_oneof![
        4 => -256..256i32,
        1 => any::<i32>(),
        1 => prop_oneof![Just(i32::MIN), Just(i32::MAX), Just(0), Just(-1)],
    ]
}

fn arbitrary_value() -> impl Strategy<Value = i32> {
    any::<i32>()
}

fn arbitrary_entries() -> impl Strategy<Value = Vec<(i32, i32)>> {
    prop::collection::vec((arbitrary_index(), arbitrary_value()), 0..64)
}

#[derive(Debug, Clone)]
enum Operation {
    Insert(i32, i32),
    Remove(i32),
}

fn arbitrary_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        2 => (arbitrary_index(), arbitrary_value())
            .prop_map(|(index, value)| Operation::Insert(index, value)),
        1 => arbitrary_index().prop_map(Operation::Remove),
    ]
}

// =============================================================================
// Get-Insert Law: array.insert(i, v).get(i) == Some(&v)
// =============================================================================

proptest! {
    #[test]
    fn prop_get_insert_law(
        entries in arbitrary_entries(),
        index in arbitrary_index(),
        value in arbitrary_value()
    ) {
        let array: PersistentSparseArray<i32> = entries.into_iter().collect();
        let inserted = array.insert(index, value);

        prop_assert_eq!(inserted.get(index), Some(&value));
    }
}

// =============================================================================
// Get-Insert-Other Law: i != j => array.insert(i, v).get(j) == array.get(j)
// =============================================================================

proptest! {
    #[test]
    fn prop_get_insert_other_law(
        entries in arbitrary_entries(),
        first in arbitrary_index(),
        second in arbitrary_index(),
        value in arbitrary_value()
    ) {
        prop_assume!(first != second);

        let array: PersistentSparseArray<i32> = entries.into_iter().collect();
        let inserted = array.insert(first, value);

        prop_assert_eq!(inserted.get(second), array.get(second));
    }
}

// =============================================================================
// Remove-Get Law: array.remove(i).get(i) == None
// =============================================================================

proptest! {
    #[test]
    fn prop_remove_get_law(
        entries in arbitrary_entries(),
        index in arbitrary_index()
    ) {
        let array: PersistentSparseArray<i32> = entries.into_iter().collect();
        let removed = array.remove(index);

        prop_assert_eq!(removed.get(index), None);
        prop_assert!(removed.check_invariants().is_ok());
    }
}

// =============================================================================
// Remove-Insert Law: !array.contains_index(i)
//                    => array.insert(i, v).remove(i) == array
// =============================================================================

proptest! {
    #[test]
    fn prop_remove_insert_law(
        entries in arbitrary_entries(),
        index in arbitrary_index(),
        value in arbitrary_value()
    ) {
        let array: PersistentSparseArray<i32> = entries.into_iter().collect();

        if !array.contains_index(index) {
            let round_tripped = array.insert(index, value).remove(index);
            prop_assert_eq!(round_tripped, array);
        }
    }
}

// =============================================================================
// Idempotence Law: re-inserting the stored value leaves an equal array
// =============================================================================

proptest! {
    #[test]
    fn prop_reinsert_is_idempotent_by_value(
        entries in arbitrary_entries(),
        index in arbitrary_index(),
        value in arbitrary_value()
    ) {
        let once = PersistentSparseArray::new().insert(index, value);
        let twice = once.insert(index, value);

        prop_assert_eq!(twice.len(), once.len());
        prop_assert_eq!(&twice, &once);

        let array: PersistentSparseArray<i32> = entries.into_iter().collect();
        if let Some(existing) = array.get(index).copied() {
            let reinserted = array.insert(index, existing);
            prop_assert_eq!(reinserted, array);
        }
    }
}

// =============================================================================
// Length Law: len() always equals the number of iterated entries
// =============================================================================

proptest! {
    #[test]
    fn prop_length_matches_iteration(entries in arbitrary_entries()) {
        let array: PersistentSparseArray<i32> = entries.into_iter().collect();
        prop_assert_eq!(array.len(), array.iter().count());
        prop_assert_eq!(array.is_empty(), array.len() == 0);
    }
}

// =============================================================================
// Ordering Law: iteration is strictly ascending by index
// =============================================================================

proptest! {
    #[test]
    fn prop_iteration_is_strictly_ascending(entries in arbitrary_entries()) {
        let array: PersistentSparseArray<i32> = entries.into_iter().collect();
        let indices: Vec<i32> = array.indices().collect();
        prop_assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

// =============================================================================
// Model Law: agreement with BTreeMap under arbitrary op interleavings
// =============================================================================

proptest! {
    #[test]
    fn prop_matches_btreemap_model(
        operations in prop::collection::vec(arbitrary_operation(), 0..200)
    ) {
        let mut model: BTreeMap<i32, i32> = BTreeMap::new();
        let mut array: PersistentSparseArray<i32> = PersistentSparseArray::new();

        for operation in operations {
            match operation {
                Operation::Insert(index, value) => {
                    model.insert(index, value);
                    array = array.insert(index, value);
                }
                Operation::Remove(index) => {
                    model.remove(&index);
                    array = array.remove(index);
                }
            }
            prop_assert!(array.check_invariants().is_ok());
            prop_assert_eq!(array.len(), model.len());
        }

        let entries: Vec<(i32, i32)> =
            array.iter().map(|(index, value)| (index, *value)).collect();
        let expected: Vec<(i32, i32)> =
            model.iter().map(|(index, value)| (*index, *value)).collect();
        prop_assert_eq!(entries, expected);
    }
}

// =============================================================================
// Window Law: chunked iter_range windows reassemble the full iteration
// =============================================================================

proptest! {
    #[test]
    fn prop_windows_cover_full_iteration(
        entries in arbitrary_entries(),
        chunk in 1usize..10
    ) {
        let array: PersistentSparseArray<i32> = entries.into_iter().collect();
        let full: Vec<(i32, i32)> =
            array.iter().map(|(index, value)| (index, *value)).collect();

        let mut reassembled = Vec::new();
        let mut offset = 0;
        while offset < array.len() {
            reassembled.extend(
                array
                    .iter_range(offset, chunk)
                    .map(|(index, value)| (index, *value)),
            );
            offset += chunk;
        }

        prop_assert_eq!(reassembled, full);
    }
}

// =============================================================================
// Builder Law: the transient builder produces the same array
// =============================================================================

proptest! {
    #[test]
    fn prop_transient_builds_same_array(entries in arbitrary_entries()) {
        let sequential = entries
            .iter()
            .fold(PersistentSparseArray::new(), |array, (index, value)| {
                array.insert(*index, *value)
            });

        let mut transient = TransientSparseArray::new();
        for (index, value) in &entries {
            transient.put(*index, *value);
        }
        let built = transient.persistent();

        prop_assert!(built.check_invariants().is_ok());
        prop_assert_eq!(built, sequential);
    }
}

// =============================================================================
// Persistence Law: updates never disturb the prior version
// =============================================================================

proptest! {
    #[test]
    fn prop_updates_preserve_prior_versions(
        entries in arbitrary_entries(),
        index in arbitrary_index(),
        value in arbitrary_value()
    ) {
        let array: PersistentSparseArray<i32> = entries.into_iter().collect();
        let snapshot: Vec<(i32, i32)> =
            array.iter().map(|(index, value)| (index, *value)).collect();

        let _inserted = array.insert(index, value);
        let _removed = array.remove(index);

        let after: Vec<(i32, i32)> =
            array.iter().map(|(index, value)| (index, *value)).collect();
        prop_assert_eq!(after, snapshot);
    }
}
