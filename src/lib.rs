//! Augmented AVL tree collections for Rust.
//!
//! The crate is built around one substrate, [`AvlTree`]: a height-balanced
//! binary tree augmented with subtree sizes (order-statistic indexing) and a
//! per-subtree monoid cache (logarithmic range queries), parameterized by
//! small policy values — a comparator, a merge-on-insert policy, and a range
//! summary. Four façades parameterize it into everyday collections:
//!
//! - [`AvlVector`] — a sequence with O(log n) insertion and removal at any
//!   position;
//! - [`AvlSet`] — an ordered set with access by sorted position;
//! - [`AvlMultiset`] — a counted bag holding one node per distinct key;
//! - [`AvlMap`] — an ordered key/value map with rank operations.
//!
//! # Example
//!
//! ```
//! use alder_tree::AvlVector;
//!
//! let mut seq = AvlVector::new();
//! seq.push(10);
//! seq.push(20);
//! seq.insert(0, 5);
//!
//! assert_eq!(seq.iter().copied().collect::<Vec<_>>(), [5, 10, 20]);
//! assert_eq!(seq[2], 20);
//! ```
//!
//! # Features
//!
//! - **`no_std` compatible** — only requires `alloc`.
//! - **O(log n) everything** — point operations, rank lookups, and range
//!   queries all descend once.
//! - **Compositional policies** — comparator, merger, and range summary are
//!   ordinary values implementing the [`policy`] traits, so bespoke
//!   collections (interval accounting, merged runs, custom orders) are a
//!   type alias away.
//!
//! # Implementation
//!
//! Nodes live in a slot arena and link children by niche-compressed
//! handles. Every node caches its subtree size, AVL balance factor, and the
//! in-order fold of the configured summary; mutations descend once,
//! recording the path, then repair balances and caches on the way back up.

#![no_std]
// These forbid rules and lint groups are meant to be very restrictive.
#![forbid(unsafe_code)]
#![forbid(keyword_idents)]
#![forbid(non_ascii_idents)]
#![forbid(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::cargo)]
#![warn(clippy::pedantic)]
// Enable coverage attributes for nightly builds.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

mod error;
mod raw;

pub mod avl_tree;
pub mod map;
pub mod multiset;
pub mod policy;
pub mod set;
pub mod vector;

pub use avl_tree::{AvlTree, OrderedInsert, OrderedReplace};
pub use error::Error;
pub use map::AvlMap;
pub use multiset::AvlMultiset;
pub use set::AvlSet;
pub use vector::AvlVector;
