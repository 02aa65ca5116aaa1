//! Concurrent sets with a linearizable `size`.
//!
//! This crate hosts the consumer side of `size_synchronization`: the [`SizeSet`] operation
//! surface and a chaining hash set, [`SizedHashSet`], wired to any of the size calculators.  The
//! set shows what an integration owes the calculator — the entry/exit bracket on every operation,
//! the announce/commit/clear dance on the announcing path, and helping whenever a traversal
//! witnesses someone else's half-committed update.
mod hash_set;

pub use hash_set::SizedHashSet;

/// A set of integer keys with a linearizable size.
pub trait SizeSet {
    /// Whether `key` is present.
    fn contains(&self, key: i64) -> bool;

    /// Add `key`; true if it was newly inserted.
    fn insert(&self, key: i64) -> bool;

    /// Take `key` out; true if it was present.
    fn remove(&self, key: i64) -> bool;

    /// The number of keys, linearizable to an instant within the call, saturating at `i32::MAX`.
    fn size(&self) -> i32;

    /// Sum of all present keys. A debug checksum, not a linearizable operation.
    fn sum_of_keys(&self) -> i64;
}
