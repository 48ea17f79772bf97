//! # sparray
//!
//! A persistent (immutable) integer-indexed sparse array for Rust.
//!
//! ## Overview
//!
//! [`PersistentSparseArray`](persistent::PersistentSparseArray) maps `i32`
//! indices to values through a 64-way bitmap-compressed trie. Point lookup,
//! point update, and point deletion each run in O(log64 N) worst case —
//! effectively O(1), since the trie depth is bounded by a small constant —
//! and every update returns a *new* array that shares all untouched
//! structure with the original.
//!
//! - **Persistent**: updates never mutate; old versions stay valid.
//! - **Sparse**: only occupied slots are stored, compressed through
//!   population bitmaps.
//! - **Full signed domain**: indices span all of `i32`, handled by two
//!   independent trie roots rather than sign-aware node logic.
//! - **Bulk construction**: [`TransientSparseArray`](persistent::TransientSparseArray)
//!   assembles an array from a batch of entries far faster than repeated
//!   persistent inserts.
//!
//! ## Feature Flags
//!
//! - `arc`: share nodes with `Arc` instead of `Rc`, so finished arrays can
//!   be read concurrently from multiple threads
//! - `serde`: `Serialize`/`Deserialize` as a sequence of `(index, value)`
//!   entries
//!
//! ## Example
//!
//! ```rust
//! use sparray::persistent::PersistentSparseArray;
//!
//! let array = PersistentSparseArray::new()
//!     .insert(5, "a")
//!     .insert(-5, "b")
//!     .insert(69, "c");
//!
//! assert_eq!(array.get(5), Some(&"a"));
//! assert_eq!(array.get(-5), Some(&"b"));
//! assert_eq!(array.get(6), None);
//!
//! // Structural sharing: the original array is preserved
//! let updated = array.remove(69);
//! assert_eq!(array.len(), 3);   // Original unchanged
//! assert_eq!(updated.len(), 2); // New version
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types.
///
/// # Usage
///
/// ```rust
/// use sparray::prelude::*;
/// ```
pub mod prelude {
    pub use crate::persistent::*;
}

pub mod persistent;
