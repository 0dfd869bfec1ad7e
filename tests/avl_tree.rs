use alder_tree::policy::{
    KeyOrder, MergeCount, MergeIfEqual, NaturalOrder, NeverMerge, NoSummary, RangeSummary,
    SumSummary,
};
use alder_tree::{AvlTree, Error};
use proptest::prelude::*;

/// The number of operations to perform in each proptest case.
const TEST_SIZE: usize = 512;

type PlainTree = AvlTree<i64>;
type SumTree = AvlTree<i64, usize, NaturalOrder, NeverMerge, SumSummary>;
type MergeSetTree = AvlTree<i64, usize, NaturalOrder, MergeIfEqual, NoSummary>;
type CountedTree = AvlTree<(i64, i64), usize, KeyOrder, MergeCount>;

/// Sums the count component of `(key, count)` entries.
#[derive(Clone, Copy, Debug, Default)]
struct CountTotals;

impl RangeSummary<(i64, i64)> for CountTotals {
    type Intermediate = i64;
    type Output = i64;

    fn lift(&self, entry: &(i64, i64)) -> i64 {
        entry.1
    }

    fn combine(&self, a: i64, b: i64) -> i64 {
        a + b
    }

    fn finish(&self, folded: i64) -> i64 {
        folded
    }
}

fn contents<T>(tree: &AvlTree<i64, usize, NaturalOrder, NeverMerge, T>) -> Vec<i64>
where
    T: alder_tree::policy::RangeSummary<i64>,
{
    tree.iter().copied().collect()
}

/// AVL height bound: 1.44 * log2(n + 2), rounded up.
fn height_bound(len: usize) -> usize {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bound = (1.44 * ((len + 2) as f64).log2()).ceil() as usize;
    bound
}

// ─── Concrete scenarios ──────────────────────────────────────────────────────

#[test]
fn positional_inserts_land_in_order() {
    let mut tree = PlainTree::new();
    for (index, value) in [(0, 10), (1, 20), (0, 5), (3, 30), (2, 15)] {
        assert!(!tree.insert_at(index, value).unwrap());
    }
    assert_eq!(contents(&tree), [5, 10, 15, 20, 30]);
    assert_eq!(tree.len(), 5);
    assert_eq!(tree.get(3).unwrap(), &20);
    tree.assert_invariants();
}

#[test]
fn counted_ordered_inserts_merge_per_key() {
    let mut tree = CountedTree::new();
    for entry in [(7, 1), (3, 1), (7, 1), (3, 2), (5, 1)] {
        tree.insert_ordered(entry).unwrap();
    }
    let entries: Vec<(i64, i64)> = tree.iter().copied().collect();
    assert_eq!(entries, [(3, 3), (5, 1), (7, 2)]);
    assert_eq!(tree.len(), 3);
    tree.assert_invariants();
}

#[test]
fn range_sums_over_positions() {
    let mut tree = SumTree::new();
    for (index, value) in [(0, 1), (1, 2), (2, 3), (3, 4), (4, 5)] {
        tree.insert_at(index, value).unwrap();
    }
    assert_eq!(tree.range_query(1, 4).unwrap(), 9);
    assert_eq!(tree.range_query(0, 5).unwrap(), 15);
    tree.assert_invariants();
}

#[test]
fn draining_removals_stay_balanced() {
    let mut tree = PlainTree::new();
    for value in 1..=15 {
        let end = tree.len();
        tree.insert_at(end, value).unwrap();
    }
    for remaining in (0..15usize).rev() {
        tree.remove_at(0).unwrap();
        assert_eq!(tree.len(), remaining);
        assert!(tree.height() <= height_bound(remaining));
        tree.assert_invariants();
    }
    assert!(tree.is_empty());
}

#[test]
fn ordered_remove_of_absent_value_is_none() {
    let mut tree = MergeSetTree::new();
    for value in [1, 3, 5, 7] {
        tree.insert_ordered(value).unwrap();
    }
    assert_eq!(tree.remove_ordered(&4), None);
    assert_eq!(contents_merge_set(&tree), [1, 3, 5, 7]);
    tree.assert_invariants();
}

#[test]
fn ordered_replace_can_merge_into_neighbor() {
    let mut tree = MergeSetTree::new();
    for value in [1, 2, 4, 5] {
        tree.insert_ordered(value).unwrap();
    }
    let outcome = tree.replace_ordered(&2, 4).unwrap();
    assert!(outcome.merged);
    assert_eq!(outcome.inserted_index, 1);
    assert_eq!(outcome.removed_index, 1);
    assert_eq!(contents_merge_set(&tree), [1, 4, 5]);
    tree.assert_invariants();
}

#[test]
fn ordered_replace_shifts_removed_index_left_of_insertion() {
    let mut tree = PlainTree::new();
    for value in [10, 20, 30] {
        tree.insert_ordered(value).unwrap();
    }
    // 30 vacates index 2, but inserting 5 at index 0 shifts the vacated
    // position to 3 in the final tree.
    let outcome = tree.replace_ordered(&30, 5).unwrap();
    assert!(!outcome.merged);
    assert_eq!(outcome.inserted_index, 0);
    assert_eq!(outcome.removed_index, 3);
    assert_eq!(contents(&tree), [5, 10, 20]);
}

fn contents_merge_set(tree: &MergeSetTree) -> Vec<i64> {
    tree.iter().copied().collect()
}

// ─── Error taxonomy ──────────────────────────────────────────────────────────

#[test]
fn out_of_range_indices_are_rejected() {
    let mut tree = PlainTree::new();
    assert_eq!(tree.get(0), Err(Error::OutOfRange));
    assert_eq!(tree.remove_at(0), Err(Error::OutOfRange));
    assert_eq!(tree.insert_at(1, 9), Err(Error::OutOfRange));

    tree.insert_at(0, 1).unwrap();
    tree.insert_at(1, 2).unwrap();
    assert_eq!(tree.get(2), Err(Error::OutOfRange));
    assert_eq!(tree.insert_at(3, 9), Err(Error::OutOfRange));
    assert_eq!(tree.remove_at(2), Err(Error::OutOfRange));
    assert_eq!(tree.replace_at(2, 9).map(|_| ()), Err(Error::OutOfRange));
    // Failed calls leave the tree untouched.
    assert_eq!(contents(&tree), [1, 2]);
}

#[test]
fn empty_range_queries_are_rejected() {
    let mut tree = SumTree::new();
    assert_eq!(tree.range_query(0, 0), Err(Error::OutOfRange));
    for (index, value) in [(0, 1), (1, 2), (2, 3)] {
        tree.insert_at(index, value).unwrap();
    }
    assert_eq!(tree.range_query(1, 1), Err(Error::OutOfRange));
    assert_eq!(tree.range_query(2, 1), Err(Error::OutOfRange));
    assert_eq!(tree.range_query(0, 4), Err(Error::OutOfRange));
}

#[test]
fn ordered_replace_of_absent_value_is_none() {
    let mut tree = PlainTree::new();
    for value in [1, 2, 3] {
        tree.insert_ordered(value).unwrap();
    }
    assert_eq!(tree.replace_ordered(&9, 4), None);
    assert_eq!(contents(&tree), [1, 2, 3]);
}

// ─── Smaller laws ────────────────────────────────────────────────────────────

#[test]
fn insert_reports_duplicate_run_start() {
    let mut tree = PlainTree::new();
    for value in [10, 20, 20, 30] {
        tree.insert_ordered(value).unwrap();
    }
    // A duplicate lands at the left edge of its run of equals.
    let outcome = tree.insert_ordered(20).unwrap();
    assert!(!outcome.merged);
    assert_eq!(outcome.index, 1);
    assert_eq!(contents(&tree), [10, 20, 20, 20, 30]);
}

#[test]
fn update_at_repairs_summary_caches() {
    let mut tree = SumTree::new();
    for (index, value) in [(0, 1), (1, 2), (2, 3), (3, 4)] {
        tree.insert_at(index, value).unwrap();
    }
    tree.update_at(2, |value| *value += 10).unwrap();
    assert_eq!(tree.range_query(0, 4).unwrap(), 20);
    tree.assert_invariants();
    assert_eq!(tree.update_at(4, |value| *value = 0), Err(Error::OutOfRange));
}

#[test]
fn merges_refresh_summary_caches() {
    let mut tree: AvlTree<(i64, i64), usize, KeyOrder, MergeCount, CountTotals> = AvlTree::new();
    for entry in [(7, 1), (3, 1), (5, 1)] {
        tree.insert_ordered(entry).unwrap();
    }
    // Absorbed into the resident (7, 1) entry; the count change must show
    // up in every cache above it.
    let outcome = tree.insert_ordered((7, 4)).unwrap();
    assert!(outcome.merged);
    assert_eq!(outcome.index, 2);
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.range_query(0, 3).unwrap(), 7);
    assert_eq!(tree.range_query(2, 3).unwrap(), 5);
    tree.assert_invariants();
}

// ─── Property-based laws ─────────────────────────────────────────────────────

#[derive(Clone, Debug)]
enum SeqOp {
    InsertAt(usize, i64),
    RemoveAt(usize),
    ReplaceAt(usize, i64),
    Get(usize),
}

fn seq_op_strategy() -> impl Strategy<Value = SeqOp> {
    prop_oneof![
        6 => (any::<usize>(), -1000i64..1000).prop_map(|(i, v)| SeqOp::InsertAt(i, v)),
        3 => any::<usize>().prop_map(SeqOp::RemoveAt),
        2 => (any::<usize>(), -1000i64..1000).prop_map(|(i, v)| SeqOp::ReplaceAt(i, v)),
        2 => any::<usize>().prop_map(SeqOp::Get),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Replays a random op sequence against a Vec model, checking results,
    /// contents, the height bound, and every structural invariant at each
    /// step.
    #[test]
    fn positional_ops_match_vec_model(ops in proptest::collection::vec(seq_op_strategy(), TEST_SIZE)) {
        let mut tree = SumTree::new();
        let mut model: Vec<i64> = Vec::new();

        for op in ops {
            match op {
                SeqOp::InsertAt(seed, value) => {
                    let index = seed % (model.len() + 1);
                    prop_assert!(!tree.insert_at(index, value).unwrap());
                    model.insert(index, value);
                }
                SeqOp::RemoveAt(seed) => {
                    if model.is_empty() {
                        prop_assert_eq!(tree.remove_at(0), Err(Error::OutOfRange));
                        continue;
                    }
                    let index = seed % model.len();
                    prop_assert_eq!(tree.remove_at(index).unwrap(), model.remove(index));
                }
                SeqOp::ReplaceAt(seed, value) => {
                    if model.is_empty() {
                        continue;
                    }
                    let index = seed % model.len();
                    let (previous, merged) = tree.replace_at(index, value).unwrap();
                    prop_assert!(!merged);
                    prop_assert_eq!(previous, core::mem::replace(&mut model[index], value));
                }
                SeqOp::Get(seed) => {
                    if model.is_empty() {
                        continue;
                    }
                    let index = seed % model.len();
                    prop_assert_eq!(tree.get(index).unwrap(), &model[index]);
                }
            }

            prop_assert_eq!(tree.len(), model.len());
            prop_assert!(tree.height() <= height_bound(model.len()));
            tree.assert_invariants();
        }
        prop_assert_eq!(contents(&tree), model);
    }

    /// Inserting then removing at the same index returns the value and
    /// restores the previous contents.
    #[test]
    fn insert_remove_round_trip(
        base in proptest::collection::vec(-1000i64..1000, 0..64),
        seed in any::<usize>(),
        value in -1000i64..1000,
    ) {
        let mut tree = PlainTree::new();
        for (index, &v) in base.iter().enumerate() {
            tree.insert_at(index, v).unwrap();
        }
        let index = seed % (base.len() + 1);
        tree.insert_at(index, value).unwrap();
        prop_assert_eq!(tree.remove_at(index).unwrap(), value);
        prop_assert_eq!(contents(&tree), base);
    }

    /// An insertion shifts exactly the positions at and after its index.
    #[test]
    fn insert_shifts_suffix_only(
        base in proptest::collection::vec(-1000i64..1000, 0..64),
        seed in any::<usize>(),
        value in -1000i64..1000,
    ) {
        let mut tree = PlainTree::new();
        for (index, &v) in base.iter().enumerate() {
            tree.insert_at(index, v).unwrap();
        }
        let at = seed % (base.len() + 1);
        tree.insert_at(at, value).unwrap();
        for (index, &v) in base.iter().enumerate() {
            let shifted = if index < at { index } else { index + 1 };
            prop_assert_eq!(tree.get(shifted).unwrap(), &v);
        }
        prop_assert_eq!(tree.get(at).unwrap(), &value);
    }

    /// In-order traversal after any ordered-insert sequence is sorted, and
    /// each reported landing index is the leftmost position of its value.
    #[test]
    fn ordered_inserts_keep_sorted_order(values in proptest::collection::vec(-100i64..100, 0..TEST_SIZE)) {
        let mut tree = PlainTree::new();
        let mut model: Vec<i64> = Vec::new();

        for value in values {
            let outcome = tree.insert_ordered(value).unwrap();
            let expected = model.partition_point(|&v| v < value);
            prop_assert!(!outcome.merged);
            prop_assert_eq!(outcome.index, expected);
            model.insert(expected, value);
            tree.assert_invariants();
        }
        prop_assert_eq!(contents(&tree), model);
    }

    /// Ordered removal reports the model rank of the removed value and
    /// never touches the tree on a miss.
    #[test]
    fn ordered_removals_match_sorted_model(
        inserts in proptest::collection::vec(-50i64..50, 0..128),
        removes in proptest::collection::vec(-50i64..50, 0..128),
    ) {
        let mut tree = MergeSetTree::new();
        let mut model: Vec<i64> = Vec::new();

        for value in inserts {
            tree.insert_ordered(value).unwrap();
            if let Err(slot) = model.binary_search(&value) {
                model.insert(slot, value);
            }
        }
        for value in removes {
            match model.binary_search(&value) {
                Ok(slot) => {
                    let (index, removed) = tree.remove_ordered(&value).unwrap();
                    prop_assert_eq!(index, slot);
                    prop_assert_eq!(removed, value);
                    model.remove(slot);
                }
                Err(_) => prop_assert_eq!(tree.remove_ordered(&value), None),
            }
            tree.assert_invariants();
        }
        prop_assert_eq!(contents_merge_set(&tree), model);
    }

    /// Range queries agree with a linear reference fold over every range.
    #[test]
    fn range_queries_match_linear_fold(values in proptest::collection::vec(-1000i64..1000, 1..128)) {
        let mut tree = SumTree::new();
        for (index, &v) in values.iter().enumerate() {
            tree.insert_at(index, v).unwrap();
        }
        for lo in 0..values.len() {
            for hi in lo + 1..=values.len() {
                let expected: i64 = values[lo..hi].iter().sum();
                prop_assert_eq!(tree.range_query(lo, hi).unwrap(), expected);
            }
        }
    }

    /// `replace_at` is `remove_at` followed by `insert_at` when merging is
    /// off.
    #[test]
    fn replace_equals_remove_then_insert(
        base in proptest::collection::vec(-1000i64..1000, 1..64),
        seed in any::<usize>(),
        value in -1000i64..1000,
    ) {
        let mut replaced = PlainTree::new();
        let mut reinserted = PlainTree::new();
        for (index, &v) in base.iter().enumerate() {
            replaced.insert_at(index, v).unwrap();
            reinserted.insert_at(index, v).unwrap();
        }
        let index = seed % base.len();

        let (previous, merged) = replaced.replace_at(index, value).unwrap();
        prop_assert!(!merged);
        prop_assert_eq!(previous, base[index]);

        reinserted.remove_at(index).unwrap();
        reinserted.insert_at(index, value).unwrap();

        prop_assert_eq!(contents(&replaced), contents(&reinserted));
    }
}
