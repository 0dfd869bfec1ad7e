use core::cmp::Ordering;
use core::iter::FusedIterator;
use core::mem;

use smallvec::SmallVec;

use crate::error::Error;
use crate::policy::{Comparator, Merger, RangeSummary, TreeIndex};

use super::arena::Arena;
use super::handle::Handle;
use super::node::{AvlNode, Side};

// An AVL tree of n nodes is at most 1.44 * log2(n + 2) levels tall, so 48
// inline slots cover every tree the 32-bit handle space can address.
const MAX_HEIGHT: usize = 48;

/// One step of a root-to-node descent: the node passed through and the side
/// taken out of it.
#[derive(Clone, Copy)]
struct PathStep {
    node: Handle,
    side: Side,
}

/// Stack of descent steps, replayed bottom-up for balance and cache repair.
type Path = SmallVec<[PathStep; MAX_HEIGHT]>;

/// The core tree: an arena of AVL nodes and a root link.
///
/// Operations take their policies as arguments; the public facade owns the
/// policy values and threads them through. Every mutating operation returns
/// with invariants restored: exact subtree sizes, balance factors in
/// `{-1, 0, +1}`, and subrange caches consistent with the configured
/// summary.
#[derive(Clone)]
pub(crate) struct RawAvlTree<V, S, R> {
    nodes: Arena<AvlNode<V, S, R>>,
    root: Option<Handle>,
}

impl<V, S: TreeIndex, R: Clone> RawAvlTree<V, S, R> {
    pub(crate) const fn new() -> Self {
        Self {
            nodes: Arena::new(),
            root: None,
        }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Arena::with_capacity(capacity),
            root: None,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.nodes.capacity()
    }

    /// Total element count, off the root's cached size.
    pub(crate) fn len(&self) -> S {
        self.size_of(self.root)
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
    }

    /// Exact height of the tree, following the taller side by balance
    /// factor.
    pub(crate) fn height(&self) -> usize {
        let mut height = 0;
        let mut cur = self.root;
        while let Some(h) = cur {
            let node = self.nodes.get(h);
            height += 1;
            cur = if node.balance > 0 { node.right } else { node.left };
        }
        height
    }

    /// Cached size of a possibly-empty subtree. Never recurses.
    #[inline]
    fn size_of(&self, subtree: Option<Handle>) -> S {
        match subtree {
            Some(h) => self.nodes.get(h).size,
            None => S::ZERO,
        }
    }

    #[inline]
    pub(crate) fn value(&self, handle: Handle) -> &V {
        &self.nodes.get(handle).value
    }

    #[inline]
    pub(crate) fn value_mut(&mut self, handle: Handle) -> &mut V {
        &mut self.nodes.get_mut(handle).value
    }

    /// Fold of the summary over the whole tree, off the root cache.
    pub(crate) fn root_subrange(&self) -> Option<&R> {
        self.root.map(|h| &self.nodes.get(h).subrange)
    }

    // ─── Node cache and rotation primitives ──────────────────────────────

    fn alloc_leaf<P>(&mut self, value: V, summary: &P) -> Result<Handle, Error>
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        let subrange = summary.lift(&value);
        self.nodes.try_alloc(AvlNode::leaf(value, subrange))
    }

    /// Recomputes `size` and `subrange` of one node from its children,
    /// folding `left ⊕ self ⊕ right`. Children's caches must be current.
    fn refresh<P>(&mut self, handle: Handle, summary: &P)
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        let node = self.nodes.get(handle);
        let mut size = S::ONE;
        let mut folded = summary.lift(&node.value);
        if let Some(left) = node.left {
            let child = self.nodes.get(left);
            size = size + child.size;
            folded = summary.combine(child.subrange.clone(), folded);
        }
        if let Some(right) = node.right {
            let child = self.nodes.get(right);
            size = size + child.size;
            folded = summary.combine(folded, child.subrange.clone());
        }
        let node = self.nodes.get_mut(handle);
        node.size = size;
        node.subrange = folded;
    }

    /// Left rotation about `handle`; returns the pivot, the subtree's new
    /// root. Refreshes the caches of both reshaped nodes.
    fn rotate_left<P>(&mut self, handle: Handle, summary: &P) -> Handle
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        let pivot = self.nodes.get(handle).right.expect("`rotate_left()` - no right child!");
        let (pivot_left, pivot_balance) = {
            let p = self.nodes.get(pivot);
            (p.left, p.balance)
        };
        let balance_after = {
            let n = self.nodes.get_mut(handle);
            n.right = pivot_left;
            n.balance -= 1 + pivot_balance.max(0);
            n.balance
        };
        {
            let p = self.nodes.get_mut(pivot);
            p.left = Some(handle);
            p.balance -= 1 - balance_after.min(0);
        }
        self.refresh(handle, summary);
        self.refresh(pivot, summary);
        pivot
    }

    /// Right rotation about `handle`; mirror of [`Self::rotate_left`].
    fn rotate_right<P>(&mut self, handle: Handle, summary: &P) -> Handle
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        let pivot = self.nodes.get(handle).left.expect("`rotate_right()` - no left child!");
        let (pivot_right, pivot_balance) = {
            let p = self.nodes.get(pivot);
            (p.right, p.balance)
        };
        let balance_after = {
            let n = self.nodes.get_mut(handle);
            n.left = pivot_right;
            n.balance += 1 - pivot_balance.min(0);
            n.balance
        };
        {
            let p = self.nodes.get_mut(pivot);
            p.right = Some(handle);
            p.balance += 1 + balance_after.max(0);
        }
        self.refresh(handle, summary);
        self.refresh(pivot, summary);
        pivot
    }

    fn ensure_not_right_heavy<P>(&mut self, handle: Handle, summary: &P) -> Handle
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        if self.nodes.get(handle).balance > 0 {
            self.rotate_left(handle, summary)
        } else {
            handle
        }
    }

    fn ensure_not_left_heavy<P>(&mut self, handle: Handle, summary: &P) -> Handle
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        if self.nodes.get(handle).balance < 0 {
            self.rotate_right(handle, summary)
        } else {
            handle
        }
    }

    /// Restores a node at balance `+2`. A left-leaning right child forces
    /// the double rotation.
    fn rebalance_right_heavy<P>(&mut self, handle: Handle, summary: &P) -> Handle
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        let right = self.nodes.get(handle).right.expect("`rebalance_right_heavy()` - no right child!");
        let fixed = self.ensure_not_left_heavy(right, summary);
        self.nodes.get_mut(handle).right = Some(fixed);
        self.rotate_left(handle, summary)
    }

    /// Restores a node at balance `-2`; mirror of
    /// [`Self::rebalance_right_heavy`].
    fn rebalance_left_heavy<P>(&mut self, handle: Handle, summary: &P) -> Handle
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        let left = self.nodes.get(handle).left.expect("`rebalance_left_heavy()` - no left child!");
        let fixed = self.ensure_not_right_heavy(left, summary);
        self.nodes.get_mut(handle).left = Some(fixed);
        self.rotate_right(handle, summary)
    }

    /// Points the parent link recorded in `parent` (or the root) at `child`.
    fn relink(&mut self, parent: Option<&PathStep>, child: Option<Handle>) {
        match parent {
            None => self.root = child,
            Some(step) => self.nodes.get_mut(step.node).set_link(step.side, child),
        }
    }

    // ─── Bottom-up repair passes ─────────────────────────────────────────

    /// Walks a descent path after a one-node growth at its bottom: adjusts
    /// balances while the height change propagates, rebalances at `±2`, and
    /// refreshes size/subrange caches all the way to the root.
    fn ascend_after_growth<P>(&mut self, path: &Path, summary: &P)
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        let mut grew = true;
        for depth in (0..path.len()).rev() {
            let PathStep { node: handle, side } = path[depth];
            if grew {
                let balance = {
                    let node = self.nodes.get_mut(handle);
                    node.balance += side.growth();
                    node.balance
                };
                match balance {
                    0 => {
                        // The shorter side caught up; height is unchanged.
                        grew = false;
                        self.refresh(handle, summary);
                    }
                    -1 | 1 => self.refresh(handle, summary),
                    _ => {
                        // A rebalanced insertion restores the pre-insert
                        // height, so the change stops propagating here.
                        let new_root = if balance > 0 {
                            self.rebalance_right_heavy(handle, summary)
                        } else {
                            self.rebalance_left_heavy(handle, summary)
                        };
                        let parent = if depth == 0 { None } else { Some(&path[depth - 1]) };
                        self.relink(parent, Some(new_root));
                        grew = false;
                    }
                }
            } else {
                self.refresh(handle, summary);
            }
        }
    }

    /// Walks a descent path after a one-node shrink at its bottom; dual of
    /// [`Self::ascend_after_growth`].
    fn ascend_after_shrink<P>(&mut self, path: &Path, summary: &P)
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        let mut shrank = true;
        for depth in (0..path.len()).rev() {
            let PathStep { node: handle, side } = path[depth];
            if shrank {
                let balance = {
                    let node = self.nodes.get_mut(handle);
                    node.balance -= side.growth();
                    node.balance
                };
                match balance {
                    0 => self.refresh(handle, summary),
                    -1 | 1 => {
                        // The other side still holds the height up.
                        shrank = false;
                        self.refresh(handle, summary);
                    }
                    _ => {
                        let new_root = if balance > 0 {
                            self.rebalance_right_heavy(handle, summary)
                        } else {
                            self.rebalance_left_heavy(handle, summary)
                        };
                        let parent = if depth == 0 { None } else { Some(&path[depth - 1]) };
                        self.relink(parent, Some(new_root));
                        shrank = self.nodes.get(new_root).balance == 0;
                    }
                }
            } else {
                self.refresh(handle, summary);
            }
        }
    }

    /// Refreshes subrange caches after a merge mutated the value at
    /// `handle`. Sizes are untouched by merges, but the recomputation is
    /// shared with the structural passes.
    fn refresh_merged<P>(&mut self, handle: Handle, path: &Path, summary: &P)
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        self.refresh(handle, summary);
        for step in path.iter().rev() {
            self.refresh(step.node, summary);
        }
    }

    // ─── Indexed operations ──────────────────────────────────────────────

    /// Handle of the node holding position `index`.
    fn node_at(&self, index: S) -> Result<Handle, Error> {
        if index >= self.len() {
            return Err(Error::OutOfRange);
        }
        let Some(mut cur) = self.root else {
            return Err(Error::OutOfRange);
        };
        let mut index = index;
        loop {
            let node = self.nodes.get(cur);
            let left_size = self.size_of(node.left);
            match index.cmp(&left_size) {
                Ordering::Equal => return Ok(cur),
                Ordering::Less => {
                    cur = node.left.expect("`node_at()` - cached size implies a left child!");
                }
                Ordering::Greater => {
                    index = index - left_size - S::ONE;
                    cur = node.right.expect("`node_at()` - cached size implies a right child!");
                }
            }
        }
    }

    pub(crate) fn get(&self, index: S) -> Result<&V, Error> {
        let handle = self.node_at(index)?;
        Ok(self.value(handle))
    }

    pub(crate) fn get_mut(&mut self, index: S) -> Result<&mut V, Error> {
        let handle = self.node_at(index)?;
        Ok(self.value_mut(handle))
    }

    /// Inserts `value` so that it lands at `index` (one past the end is
    /// legal). Returns true iff the value was absorbed by a merge instead of
    /// becoming a node.
    pub(crate) fn insert_at<M, P>(
        &mut self,
        index: S,
        value: V,
        merger: &M,
        summary: &P,
    ) -> Result<bool, Error>
    where
        M: Merger<V>,
        P: RangeSummary<V, Intermediate = R>,
    {
        if index > self.len() {
            return Err(Error::OutOfRange);
        }
        let Some(root) = self.root else {
            let leaf = self.alloc_leaf(value, summary)?;
            self.root = Some(leaf);
            return Ok(false);
        };

        let mut path = Path::new();
        let mut cur = root;
        let mut index = index;
        let mut value = value;
        loop {
            value = match merger.try_merge(&mut self.nodes.get_mut(cur).value, value) {
                Ok(()) => {
                    self.refresh_merged(cur, &path, summary);
                    return Ok(true);
                }
                Err(donor) => donor,
            };
            let (left, right) = {
                let node = self.nodes.get(cur);
                (node.left, node.right)
            };
            let left_size = self.size_of(left);
            if index <= left_size {
                match left {
                    Some(child) => {
                        path.push(PathStep { node: cur, side: Side::Left });
                        cur = child;
                    }
                    None => {
                        // index <= size of an empty subtree, so it is 0.
                        let leaf = self.alloc_leaf(value, summary)?;
                        path.push(PathStep { node: cur, side: Side::Left });
                        self.nodes.get_mut(cur).left = Some(leaf);
                        break;
                    }
                }
            } else {
                index = index - left_size - S::ONE;
                match right {
                    Some(child) => {
                        path.push(PathStep { node: cur, side: Side::Right });
                        cur = child;
                    }
                    None => {
                        let leaf = self.alloc_leaf(value, summary)?;
                        path.push(PathStep { node: cur, side: Side::Right });
                        self.nodes.get_mut(cur).right = Some(leaf);
                        break;
                    }
                }
            }
        }
        self.ascend_after_growth(&path, summary);
        Ok(false)
    }

    /// Removes and returns the value at `index`.
    pub(crate) fn remove_at<P>(&mut self, index: S, summary: &P) -> Result<V, Error>
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        if index >= self.len() {
            return Err(Error::OutOfRange);
        }
        let Some(mut cur) = self.root else {
            return Err(Error::OutOfRange);
        };
        let mut path = Path::new();
        let mut index = index;
        loop {
            let node = self.nodes.get(cur);
            let left_size = self.size_of(node.left);
            match index.cmp(&left_size) {
                Ordering::Equal => break,
                Ordering::Less => {
                    let child = node.left.expect("`remove_at()` - cached size implies a left child!");
                    path.push(PathStep { node: cur, side: Side::Left });
                    cur = child;
                }
                Ordering::Greater => {
                    let child = node.right.expect("`remove_at()` - cached size implies a right child!");
                    index = index - left_size - S::ONE;
                    path.push(PathStep { node: cur, side: Side::Right });
                    cur = child;
                }
            }
        }
        Ok(self.remove_node(cur, path, summary))
    }

    /// Unlinks `target`, already located at the bottom of `path`, and
    /// repairs the tree above it.
    fn remove_node<P>(&mut self, target: Handle, mut path: Path, summary: &P) -> V
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        let (left, right) = {
            let node = self.nodes.get(target);
            (node.left, node.right)
        };
        if let (Some(_), Some(right)) = (left, right) {
            // Two children: the in-order successor (leftmost of the right
            // subtree) donates its value and is unlinked in its place.
            path.push(PathStep { node: target, side: Side::Right });
            let mut succ = right;
            while let Some(child) = self.nodes.get(succ).left {
                path.push(PathStep { node: succ, side: Side::Left });
                succ = child;
            }
            let succ_right = self.nodes.get(succ).right;
            let parent = *path.last().expect("`remove_node()` - successor path is never empty!");
            self.relink(Some(&parent), succ_right);
            let succ_node = self.nodes.take(succ);
            let removed = mem::replace(&mut self.nodes.get_mut(target).value, succ_node.value);
            self.ascend_after_shrink(&path, summary);
            removed
        } else {
            let child = left.or(right);
            self.relink(path.last().copied().as_ref(), child);
            let node = self.nodes.take(target);
            self.ascend_after_shrink(&path, summary);
            node.value
        }
    }

    /// Removes the value at `index` and reinserts `value` at the same
    /// position, offering it to the merge policy on the way down. Returns
    /// the displaced value and whether the replacement merged into a
    /// neighbor (net shrink by one).
    pub(crate) fn replace_at<M, P>(
        &mut self,
        index: S,
        value: V,
        merger: &M,
        summary: &P,
    ) -> Result<(V, bool), Error>
    where
        M: Merger<V>,
        P: RangeSummary<V, Intermediate = R>,
    {
        let previous = self.remove_at(index, summary)?;
        // The removal freed a slot, and slot reuse cannot fail.
        let merged = self
            .insert_at(index, value, merger, summary)
            .expect("`replace_at()` - reinsertion reuses the freed slot!");
        Ok((previous, merged))
    }

    /// Applies `op` to the value at `index` and refreshes the subrange
    /// caches on the path to it.
    pub(crate) fn update_at<F, P>(&mut self, index: S, op: F, summary: &P) -> Result<(), Error>
    where
        F: FnOnce(&mut V),
        P: RangeSummary<V, Intermediate = R>,
    {
        if index >= self.len() {
            return Err(Error::OutOfRange);
        }
        let Some(mut cur) = self.root else {
            return Err(Error::OutOfRange);
        };
        let mut path = Path::new();
        let mut index = index;
        loop {
            let node = self.nodes.get(cur);
            let left_size = self.size_of(node.left);
            match index.cmp(&left_size) {
                Ordering::Equal => break,
                Ordering::Less => {
                    let child = node.left.expect("`update_at()` - cached size implies a left child!");
                    path.push(PathStep { node: cur, side: Side::Left });
                    cur = child;
                }
                Ordering::Greater => {
                    let child = node.right.expect("`update_at()` - cached size implies a right child!");
                    index = index - left_size - S::ONE;
                    path.push(PathStep { node: cur, side: Side::Right });
                    cur = child;
                }
            }
        }
        op(&mut self.nodes.get_mut(cur).value);
        self.refresh_merged(cur, &path, summary);
        Ok(())
    }

    // ─── Ordered operations ──────────────────────────────────────────────

    /// Inserts `value` at the leftmost position consistent with the
    /// comparator, offering it to the merge policy at every visited node
    /// first. Returns the landing index and whether a merge absorbed the
    /// value.
    pub(crate) fn insert_ordered<C, M, P>(
        &mut self,
        value: V,
        comparator: &C,
        merger: &M,
        summary: &P,
    ) -> Result<(S, bool), Error>
    where
        C: Comparator<V>,
        M: Merger<V>,
        P: RangeSummary<V, Intermediate = R>,
    {
        let Some(root) = self.root else {
            let leaf = self.alloc_leaf(value, summary)?;
            self.root = Some(leaf);
            return Ok((S::ZERO, false));
        };

        let mut path = Path::new();
        let mut cur = root;
        // Count of elements ordered before the subtree rooted at `cur`.
        let mut before = S::ZERO;
        let mut value = value;
        loop {
            let left_size = {
                let node = self.nodes.get(cur);
                self.size_of(node.left)
            };
            value = match merger.try_merge(&mut self.nodes.get_mut(cur).value, value) {
                Ok(()) => {
                    let index = before + left_size;
                    self.refresh_merged(cur, &path, summary);
                    return Ok((index, true));
                }
                Err(donor) => donor,
            };
            let (left, right, descend_left) = {
                let node = self.nodes.get(cur);
                (node.left, node.right, !comparator.less(&node.value, &value))
            };
            if descend_left {
                match left {
                    Some(child) => {
                        path.push(PathStep { node: cur, side: Side::Left });
                        cur = child;
                    }
                    None => {
                        let leaf = self.alloc_leaf(value, summary)?;
                        path.push(PathStep { node: cur, side: Side::Left });
                        self.nodes.get_mut(cur).left = Some(leaf);
                        break;
                    }
                }
            } else {
                before = before + left_size + S::ONE;
                match right {
                    Some(child) => {
                        path.push(PathStep { node: cur, side: Side::Right });
                        cur = child;
                    }
                    None => {
                        let leaf = self.alloc_leaf(value, summary)?;
                        path.push(PathStep { node: cur, side: Side::Right });
                        self.nodes.get_mut(cur).right = Some(leaf);
                        break;
                    }
                }
            }
        }
        self.ascend_after_growth(&path, summary);
        Ok((before, false))
    }

    /// Searches by comparator dichotomy, confirming a hit with `==`, and
    /// removes the matching node. Not-found leaves the tree untouched and
    /// reports `None`; a hit reports the pre-removal index and the value.
    pub(crate) fn remove_ordered<C, P>(
        &mut self,
        value: &V,
        comparator: &C,
        summary: &P,
    ) -> Option<(S, V)>
    where
        V: PartialEq,
        C: Comparator<V>,
        P: RangeSummary<V, Intermediate = R>,
    {
        let mut cur = self.root?;
        let mut path = Path::new();
        let mut before = S::ZERO;
        loop {
            let node = self.nodes.get(cur);
            let left_size = self.size_of(node.left);
            if node.value == *value {
                let index = before + left_size;
                let removed = self.remove_node(cur, path, summary);
                return Some((index, removed));
            }
            if comparator.less(&node.value, value) {
                let child = node.right?;
                before = before + left_size + S::ONE;
                path.push(PathStep { node: cur, side: Side::Right });
                cur = child;
            } else {
                let child = node.left?;
                path.push(PathStep { node: cur, side: Side::Left });
                cur = child;
            }
        }
    }

    /// Removes `old` (if present) and reinserts `new` in order. Reports
    /// `(removed_index, inserted_index, merged)` with the removed index
    /// given relative to the final tree: an unmerged insertion at or left of
    /// the removal point shifts it by one.
    pub(crate) fn replace_ordered<C, M, P>(
        &mut self,
        old: &V,
        new: V,
        comparator: &C,
        merger: &M,
        summary: &P,
    ) -> Option<(S, S, bool)>
    where
        V: PartialEq,
        C: Comparator<V>,
        M: Merger<V>,
        P: RangeSummary<V, Intermediate = R>,
    {
        let (removed_index, _) = self.remove_ordered(old, comparator, summary)?;
        let (inserted_index, merged) = self
            .insert_ordered(new, comparator, merger, summary)
            .expect("`replace_ordered()` - reinsertion reuses the freed slot!");
        let removed_index = if !merged && inserted_index <= removed_index {
            removed_index + S::ONE
        } else {
            removed_index
        };
        Some((removed_index, inserted_index, merged))
    }

    /// Ordered lookup driven by a probe projection: `probe(v)` reports how
    /// the sought key orders against a stored value. Returns the index and
    /// handle of the first match on the dichotomy path.
    pub(crate) fn locate_by<F>(&self, mut probe: F) -> Option<(S, Handle)>
    where
        F: FnMut(&V) -> Ordering,
    {
        let mut cur = self.root?;
        let mut before = S::ZERO;
        loop {
            let node = self.nodes.get(cur);
            let left_size = self.size_of(node.left);
            match probe(&node.value) {
                Ordering::Equal => return Some((before + left_size, cur)),
                Ordering::Less => cur = node.left?,
                Ordering::Greater => {
                    before = before + left_size + S::ONE;
                    cur = node.right?;
                }
            }
        }
    }

    // ─── Range queries ───────────────────────────────────────────────────

    /// Folds the summary over positions `[lo, hi)`. The range must be
    /// non-empty and within bounds; the intermediate monoid has no identity
    /// to return for an empty fold.
    pub(crate) fn range_fold<P>(&self, lo: S, hi: S, summary: &P) -> Result<R, Error>
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        if lo >= hi || hi > self.len() {
            return Err(Error::OutOfRange);
        }
        let root = self.root.expect("`range_fold()` - a non-empty range implies a root!");
        Ok(self.fold_span(root, lo, hi, summary))
    }

    /// Recursive split-accumulate over `[lo, hi)` within one subtree.
    /// Precondition: `lo < hi <= size(handle)`. A fully covered subtree
    /// contributes its cached subrange without descending.
    fn fold_span<P>(&self, handle: Handle, lo: S, hi: S, summary: &P) -> R
    where
        P: RangeSummary<V, Intermediate = R>,
    {
        let node = self.nodes.get(handle);
        if lo == S::ZERO && hi == node.size {
            return node.subrange.clone();
        }
        let left_size = self.size_of(node.left);
        let mut acc: Option<R> = None;
        if lo < left_size {
            let left = node.left.expect("`fold_span()` - span in left subtree implies a left child!");
            acc = Some(self.fold_span(left, lo, hi.min(left_size), summary));
        }
        if lo <= left_size && hi > left_size {
            let lifted = summary.lift(&node.value);
            acc = Some(match acc {
                Some(folded) => summary.combine(folded, lifted),
                None => lifted,
            });
        }
        let pivot_end = left_size + S::ONE;
        if hi > pivot_end {
            let right = node.right.expect("`fold_span()` - span in right subtree implies a right child!");
            let sub_lo = if lo > pivot_end { lo - pivot_end } else { S::ZERO };
            let folded_right = self.fold_span(right, sub_lo, hi - pivot_end, summary);
            acc = Some(match acc {
                Some(folded) => summary.combine(folded, folded_right),
                None => folded_right,
            });
        }
        acc.expect("`fold_span()` - a non-empty span folds at least one element!")
    }

    // ─── Iteration ───────────────────────────────────────────────────────

    pub(crate) fn iter(&self) -> RawIter<'_, V, S, R> {
        let mut iter = RawIter {
            nodes: &self.nodes,
            stack: SmallVec::new(),
            remaining: self.len().to_usize(),
        };
        let mut cur = self.root;
        while let Some(handle) = cur {
            iter.stack.push(handle);
            cur = self.nodes.get(handle).left;
        }
        iter
    }

    // ─── Verification ────────────────────────────────────────────────────

    /// Verifies sizes, balance factors, and their consistency with real
    /// subtree heights over the whole tree. O(n); meant for debug builds
    /// and tests.
    pub(crate) fn check_structure(&self) {
        let (size, _) = self.check_structure_of(self.root);
        assert_eq!(self.nodes.len(), size, "arena holds orphaned nodes");
    }

    fn check_structure_of(&self, subtree: Option<Handle>) -> (usize, usize) {
        let Some(handle) = subtree else {
            return (0, 0);
        };
        let node = self.nodes.get(handle);
        let (left_size, left_height) = self.check_structure_of(node.left);
        let (right_size, right_height) = self.check_structure_of(node.right);
        let size = left_size + 1 + right_size;
        assert_eq!(node.size.to_usize(), size, "cached subtree size diverged");
        assert!(
            (-1..=1).contains(&node.balance),
            "balance factor {} outside [-1, 1]",
            node.balance
        );
        assert_eq!(
            i64::from(node.balance),
            right_height as i64 - left_height as i64,
            "balance factor inconsistent with subtree heights"
        );
        (size, 1 + left_height.max(right_height))
    }

    /// Verifies every subrange cache against a recomputed in-order fold.
    /// O(n); meant for tests.
    pub(crate) fn check_subranges<P>(&self, summary: &P)
    where
        P: RangeSummary<V, Intermediate = R>,
        R: PartialEq + core::fmt::Debug,
    {
        self.check_subrange_of(self.root, summary);
    }

    fn check_subrange_of<P>(&self, subtree: Option<Handle>, summary: &P) -> Option<R>
    where
        P: RangeSummary<V, Intermediate = R>,
        R: PartialEq + core::fmt::Debug,
    {
        let handle = subtree?;
        let node = self.nodes.get(handle);
        let left = self.check_subrange_of(node.left, summary);
        let right = self.check_subrange_of(node.right, summary);
        let mut folded = summary.lift(&node.value);
        if let Some(left) = left {
            folded = summary.combine(left, folded);
        }
        if let Some(right) = right {
            folded = summary.combine(folded, right);
        }
        assert_eq!(node.subrange, folded, "cached subrange diverged");
        Some(folded)
    }
}

/// Borrowed in-order traversal over a raw tree.
pub(crate) struct RawIter<'a, V, S, R> {
    nodes: &'a Arena<AvlNode<V, S, R>>,
    stack: SmallVec<[Handle; MAX_HEIGHT]>,
    remaining: usize,
}

impl<'a, V, S, R> Iterator for RawIter<'a, V, S, R> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        let nodes = self.nodes;
        let handle = self.stack.pop()?;
        let node = nodes.get(handle);
        let mut cur = node.right;
        while let Some(child) = cur {
            self.stack.push(child);
            cur = nodes.get(child).left;
        }
        self.remaining -= 1;
        Some(&node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V, S, R> ExactSizeIterator for RawIter<'_, V, S, R> {}

impl<V, S, R> FusedIterator for RawIter<'_, V, S, R> {}
