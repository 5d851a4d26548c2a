//! The key-ordering seam between the tree and its caller.
//!
//! The tree never requires `K: Ord` directly; every comparison goes through
//! a caller-supplied [`Comparator`]. The comparator must be a consistent
//! total order — the tree assumes transitivity and does not attempt to
//! detect violations. What it *does* handle is outright failure: a
//! comparator may refuse to order a pair of keys, and that failure aborts
//! the surrounding operation before any node is mutated.

use core::cmp::Ordering;

use thiserror::Error;

/// Failure reported by a [`Comparator`].
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ComparatorError(String);

impl ComparatorError {
    /// Creates a comparator error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        ComparatorError(reason.into())
    }
}

/// A total order over keys of type `K`.
pub trait Comparator<K> {
    /// Compares two keys. An `Err` aborts the tree operation in progress.
    fn compare(&self, a: &K, b: &K) -> Result<Ordering, ComparatorError>;
}

/// Orders keys by their [`Ord`] implementation. Never fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord> Comparator<K> for NaturalOrder {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Result<Ordering, ComparatorError> {
        Ok(a.cmp(b))
    }
}

impl<K, F> Comparator<K> for F
where
    F: Fn(&K, &K) -> Result<Ordering, ComparatorError>,
{
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Result<Ordering, ComparatorError> {
        self(a, b)
    }
}
