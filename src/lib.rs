//! Multi-valued B+Tree index.
//!
//! This crate provides [`BPlusTree`], an in-memory balanced search tree
//! mapping each ordered key to a *set* of associated values (object
//! identifiers). It is the secondary-index engine of a graph object store:
//! attribute values are keys, the objects carrying them are the value sets,
//! and equality and range predicates resolve to point lookups and ordered
//! scans over this tree.
//!
//! - **Multi-valued entries** — duplicate-key inserts merge into the
//!   existing entry's [`ValueSet`] under a [`ConflictPolicy`] (`Replace` or
//!   `Union`) instead of creating additional tree entries.
//! - **Linked leaves** — all data lives in the leaves, which form a doubly
//!   linked chain in key order; [`BPlusTree::range_scan`] walks siblings
//!   lazily instead of re-descending.
//! - **Caller-supplied ordering** — comparisons go through a [`Comparator`];
//!   the default [`NaturalOrder`] uses `K: Ord`. Comparator failures abort
//!   the operation and leave the tree untouched.
//! - **Corruption is an error, not a panic** — structural invariant
//!   violations surface as [`Error::InvariantViolation`], distinct from the
//!   ordinary "key absent" result (`Ok(None)`).
//!
//! # Example
//!
//! ```
//! # fn main() -> mulberry::Result<()> {
//! use mulberry::{BPlusTree, ConflictPolicy};
//!
//! // An index over an "age" attribute: age -> object ids.
//! let mut ages: BPlusTree<u32, u64> = BPlusTree::new(32);
//! ages.insert(35, 1001, ConflictPolicy::Union)?;
//! ages.insert(35, 1002, ConflictPolicy::Union)?;
//! ages.insert(62, 1003, ConflictPolicy::Union)?;
//!
//! // Equality predicate: every object with age 35.
//! assert_eq!(ages.search(&35)?.map(|s| s.len()), Some(2));
//!
//! // Range predicate: ages in [30, 60).
//! for entry in ages.range_scan(&30, &60)? {
//!     let (age, objects) = entry?;
//!     assert_eq!(*age, 35);
//!     assert_eq!(objects.as_slice(), &[1001, 1002]);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! The tree is not internally synchronized. It assumes one logical writer
//! at a time per instance — its role is an index embedded in a larger
//! transactional context that serializes mutations externally. Concurrent
//! readers are fine with each other, never with a writer.

#![forbid(unsafe_code)]
#![forbid(keyword_idents)]
#![forbid(non_ascii_idents)]
#![forbid(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::cargo)]
#![warn(clippy::pedantic)]

mod compare;
mod error;
mod raw;
mod value_set;

pub mod tree;

pub use compare::{Comparator, ComparatorError, NaturalOrder};
pub use error::{Error, Result};
pub use tree::{BPlusTree, RangeScan};
pub use value_set::{ConflictPolicy, ValueSet};
