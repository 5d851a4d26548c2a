//! The public multi-valued B+Tree index.

use core::cmp::Ordering;
use core::iter::FusedIterator;

use crate::compare::{Comparator, NaturalOrder};
use crate::error::Result;
use crate::raw::{Handle, RawTree};
use crate::value_set::{ConflictPolicy, ValueSet};

/// A multi-valued B+Tree: an ordered index from keys to [`ValueSet`]s of
/// object identifiers.
///
/// All data lives in the leaves; inner nodes hold only routing keys, and
/// leaves are doubly linked in ascending key order so range scans walk
/// siblings instead of re-descending. Duplicate-key inserts merge into the
/// existing entry's value set according to a [`ConflictPolicy`] rather than
/// creating additional tree entries.
///
/// Every operation is synchronous and visits `O(log n)` nodes (plus the
/// yielded range for scans). The tree performs no locking: it expects a
/// single writer at a time, serialized by the embedding storage layer;
/// readers may share the tree with each other but not with a writer.
///
/// Key ordering comes from a [`Comparator`]; the default [`NaturalOrder`]
/// uses `K: Ord` and never fails. A failing comparator aborts the current
/// operation with [`Error::Comparator`](crate::Error::Comparator) before
/// any node has been touched, so the tree is left in its prior state.
///
/// # Example
///
/// ```
/// # fn main() -> mulberry::Result<()> {
/// use mulberry::{BPlusTree, ConflictPolicy};
///
/// let mut index: BPlusTree<i64, u64> = BPlusTree::new(16);
/// index.insert(3, 100, ConflictPolicy::Union)?;
/// index.insert(3, 200, ConflictPolicy::Union)?;
/// index.insert(8, 300, ConflictPolicy::Union)?;
///
/// let hits = index.search(&3)?.expect("key present");
/// assert_eq!(hits.as_slice(), &[100, 200]);
///
/// let keys: Vec<i64> = index
///     .range_scan(&0, &5)?
///     .map(|entry| entry.map(|(key, _)| *key))
///     .collect::<mulberry::Result<_>>()?;
/// assert_eq!(keys, vec![3]);
/// # Ok(())
/// # }
/// ```
pub struct BPlusTree<K, V, C = NaturalOrder> {
    raw: RawTree<K, V, C>,
}

impl<K, V> BPlusTree<K, V> {
    /// Creates an empty tree ordering keys by their `Ord` implementation.
    ///
    /// `order` is the branching factor: the maximum number of children per
    /// inner node. Nodes split upon reaching `order` keys.
    ///
    /// # Panics
    ///
    /// Panics if `order < 3`; smaller orders cannot form a B+Tree.
    pub fn new(order: usize) -> Self {
        Self::with_comparator(order, NaturalOrder)
    }
}

impl<K, V, C> BPlusTree<K, V, C> {
    /// Creates an empty tree with a caller-supplied key [`Comparator`].
    ///
    /// # Panics
    ///
    /// Panics if `order < 3`; smaller orders cannot form a B+Tree.
    pub fn with_comparator(order: usize, cmp: C) -> Self {
        assert!(order >= 3, "`BPlusTree` - `order` must be at least 3!");
        Self {
            raw: RawTree::new(order, cmp),
        }
    }

    /// Returns the number of distinct keys in the tree.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        self.raw.len() == 0
    }

    /// Returns the configured branching factor.
    pub fn order(&self) -> usize {
        self.raw.order()
    }

    /// Returns the number of levels from the root down to the leaves.
    /// An empty tree has depth 1: its root is a single empty leaf.
    pub fn depth(&self) -> Result<usize> {
        self.raw.depth()
    }

    /// Removes every entry, resetting to a single empty root leaf.
    pub fn clear(&mut self) {
        self.raw.clear();
    }
}

impl<K: Clone, V: Ord, C: Comparator<K>> BPlusTree<K, V, C> {
    /// Inserts `value` under `key`.
    ///
    /// An absent key gets a new singleton value set. For a present key the
    /// `policy` decides: [`ConflictPolicy::Replace`] discards the stored
    /// set for a singleton of `value`; [`ConflictPolicy::Union`] adds
    /// `value` to the stored set (a no-op if already present).
    pub fn insert(&mut self, key: K, value: V, policy: ConflictPolicy) -> Result<()> {
        self.raw.insert(key, value, policy)
    }

    /// Returns the value set stored for `key`, or `None` if absent.
    pub fn search(&self, key: &K) -> Result<Option<&ValueSet<V>>> {
        self.raw.search(key)
    }

    /// Returns true if `key` has an entry.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.raw.search(key)?.is_some())
    }

    /// Removes `key`, returning its value set, or `None` if absent.
    pub fn remove(&mut self, key: &K) -> Result<Option<ValueSet<V>>> {
        self.raw.remove(key)
    }

    /// Lazily yields `(key, value set)` pairs for every key in
    /// `[low, high)`, in ascending order.
    ///
    /// Each call produces a fresh, finite scan. Bound comparisons happen as
    /// the scan advances, so items are `Result`s when a fallible comparator
    /// is in use; with [`NaturalOrder`] they cannot fail.
    pub fn range_scan<'a>(&'a self, low: &K, high: &'a K) -> Result<RangeScan<'a, K, V, C>> {
        let cursor = self.raw.lower_bound(low)?;
        Ok(RangeScan {
            raw: &self.raw,
            high,
            cursor,
            done: false,
        })
    }

    /// Audits the whole structure: key ordering, node occupancy, uniform
    /// leaf depth, separator bounds, parent back-references, and the leaf
    /// chain. Walks every node; intended for tests and recovery checks,
    /// not per-operation use.
    pub fn validate(&self) -> Result<()> {
        self.raw.validate()
    }
}

/// Lazy ordered scan over `[low, high)`, yielded by
/// [`BPlusTree::range_scan`]. Walks the leaf sibling chain.
pub struct RangeScan<'a, K, V, C> {
    raw: &'a RawTree<K, V, C>,
    high: &'a K,
    cursor: Option<(Handle, usize)>,
    done: bool,
}

impl<'a, K: Clone, V: Ord, C: Comparator<K>> Iterator for RangeScan<'a, K, V, C> {
    type Item = Result<(&'a K, &'a ValueSet<V>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let (leaf_h, idx) = match self.cursor {
                Some(cursor) => cursor,
                None => {
                    self.done = true;
                    return None;
                }
            };
            let leaf = match self.raw.leaf(leaf_h) {
                Ok(leaf) => leaf,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            if idx >= leaf.keys.len() {
                self.cursor = leaf.right.map(|next_h| (next_h, 0));
                continue;
            }

            let key = &leaf.keys[idx];
            match self.raw.comparator().compare(key, self.high) {
                Ok(Ordering::Less) => {
                    self.cursor = Some((leaf_h, idx + 1));
                    return match self.raw.value_set(leaf.values[idx]) {
                        Ok(set) => Some(Ok((key, set))),
                        Err(err) => {
                            self.done = true;
                            Some(Err(err))
                        }
                    };
                }
                Ok(_) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
            }
        }
    }
}

impl<K: Clone, V: Ord, C: Comparator<K>> FusedIterator for RangeScan<'_, K, V, C> {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scan_keys(tree: &BPlusTree<i64, u64>, low: i64, high: i64) -> Vec<i64> {
        tree.range_scan(&low, &high)
            .unwrap()
            .map(|entry| entry.map(|(key, _)| *key))
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    #[should_panic(expected = "`BPlusTree` - `order` must be at least 3!")]
    fn order_below_three_is_rejected() {
        let _ = BPlusTree::<i64, u64>::new(2);
    }

    #[test]
    fn empty_scan_yields_nothing() {
        let tree: BPlusTree<i64, u64> = BPlusTree::new(4);
        assert_eq!(scan_keys(&tree, i64::MIN, i64::MAX), Vec::<i64>::new());
    }

    #[test]
    fn scan_respects_half_open_bounds() {
        let mut tree: BPlusTree<i64, u64> = BPlusTree::new(4);
        for k in [10, 20, 30, 40] {
            tree.insert(k, k as u64, ConflictPolicy::Union).unwrap();
        }

        assert_eq!(scan_keys(&tree, 10, 40), vec![10, 20, 30]);
        assert_eq!(scan_keys(&tree, 11, 41), vec![20, 30, 40]);
        assert_eq!(scan_keys(&tree, 20, 20), Vec::<i64>::new());
        assert_eq!(scan_keys(&tree, 41, 99), Vec::<i64>::new());
    }

    #[test]
    fn scans_are_restartable() {
        let mut tree: BPlusTree<i64, u64> = BPlusTree::new(4);
        for k in 1..=9 {
            tree.insert(k, 0, ConflictPolicy::Union).unwrap();
        }
        assert_eq!(scan_keys(&tree, 2, 5), vec![2, 3, 4]);
        assert_eq!(scan_keys(&tree, 2, 5), vec![2, 3, 4]);
    }

    #[test]
    fn reversed_comparator_reverses_scan_order() {
        let reversed = |a: &i64, b: &i64| -> core::result::Result<Ordering, crate::ComparatorError> {
            Ok(b.cmp(a))
        };
        let mut tree: BPlusTree<i64, u64, _> = BPlusTree::with_comparator(4, reversed);
        for k in 1..=9 {
            tree.insert(k, 0, ConflictPolicy::Union).unwrap();
        }
        tree.validate().unwrap();

        // Under the reversed order, "ascending" runs from 9 down to 1 and
        // the half-open window [8, 4) contains 8, 7, 6, 5.
        let keys: Vec<i64> = tree
            .range_scan(&8, &4)
            .unwrap()
            .map(|entry| entry.map(|(key, _)| *key))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(keys, vec![8, 7, 6, 5]);
    }
}
