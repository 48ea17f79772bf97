//! Persistent (immutable) sparse-array data structures.
//!
//! This module provides the crate's two collection types:
//!
//! - [`PersistentSparseArray`]: an immutable `i32`-indexed sparse array
//!   (bitmap-compressed trie with structural sharing)
//! - [`TransientSparseArray`]: a temporarily-mutable builder for efficient
//!   bulk construction
//!
//! # Structural Sharing
//!
//! Every update to a [`PersistentSparseArray`] copies only the path from the
//! root to the touched slot; the rest of the trie is shared with the prior
//! version. Any number of versions may coexist, and — because finished nodes
//! are never mutated — any number of threads may read a shared version
//! concurrently (with the `arc` feature enabled).
//!
//! # Examples
//!
//! ## `PersistentSparseArray`
//!
//! ```rust
//! use sparray::persistent::PersistentSparseArray;
//!
//! let array = PersistentSparseArray::new()
//!     .insert(0, "zero")
//!     .insert(1_000_000, "million")
//!     .insert(-1, "minus one");
//!
//! assert_eq!(array.get(1_000_000), Some(&"million"));
//! assert_eq!(array.len(), 3);
//!
//! // Entries iterate in ascending index order, negatives first
//! let indices: Vec<i32> = array.indices().collect();
//! assert_eq!(indices, vec![-1, 0, 1_000_000]);
//! ```
//!
//! ## `TransientSparseArray`
//!
//! ```rust
//! use sparray::persistent::TransientSparseArray;
//!
//! let mut transient = TransientSparseArray::new();
//! for index in 0..1_000 {
//!     transient.put(index, index * 2);
//! }
//! let array = transient.persistent();
//! assert_eq!(array.len(), 1_000);
//! assert_eq!(array.get(500), Some(&1_000));
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

mod addressing;
mod node;
mod sparse_array;
mod transient;

pub use node::InvariantViolation;
pub use sparse_array::PersistentSparseArray;
pub use sparse_array::PersistentSparseArrayIntoIterator;
pub use sparse_array::PersistentSparseArrayIterator;
pub use transient::TransientSparseArray;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod reference_counter_tests {
    use super::ReferenceCounter;
    use rstest::rstest;

    #[rstest]
    fn test_reference_counter_clone() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        let reference_counter_clone = reference_counter.clone();
        assert_eq!(*reference_counter, *reference_counter_clone);
    }

    #[rstest]
    fn test_reference_counter_strong_count() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 1);
        let reference_counter_clone = reference_counter.clone();
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 2);
        drop(reference_counter_clone);
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 1);
    }
}
