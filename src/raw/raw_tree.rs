use core::cmp::Ordering;
use core::mem;

use tracing::{debug, trace};

use crate::compare::Comparator;
use crate::error::{Error, Result};
use crate::value_set::{ConflictPolicy, ValueSet};

use super::arena::Arena;
use super::handle::Handle;
use super::node::{InnerNode, LeafNode, Node, SearchResult, SplitInfo};

/// The core B+Tree backing [`BPlusTree`](crate::BPlusTree).
///
/// Owns every node and value set through two arenas; the root handle is
/// always valid (an empty tree is a single empty root leaf). All key
/// comparisons go through the caller-supplied comparator, and every
/// comparison an operation needs completes before its first structural
/// mutation, so a comparator failure leaves the tree untouched.
pub(crate) struct RawTree<K, V, C> {
    /// Arena storing all tree nodes.
    nodes: Arena<Node<K>>,
    /// Arena storing all value sets (separate from nodes; leaves hold handles).
    values: Arena<ValueSet<V>>,
    /// Handle of the root node.
    root: Handle,
    /// Branching factor: maximum children per inner node. Nodes split upon
    /// reaching `order` keys and underflow below `order.div_ceil(2) - 1`.
    order: usize,
    /// Number of distinct keys in the tree.
    len: usize,
    /// Caller-supplied total order over keys.
    cmp: C,
}

impl<K, V, C> RawTree<K, V, C> {
    pub(crate) fn new(order: usize, cmp: C) -> Self {
        let mut nodes = Arena::new();
        let root = nodes.alloc(Node::Leaf(LeafNode::new()));
        Self {
            nodes,
            values: Arena::new(),
            root,
            order,
            len: 0,
            cmp,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn order(&self) -> usize {
        self.order
    }

    /// Minimum keys for any non-root node.
    fn min_keys(&self) -> usize {
        self.order.div_ceil(2) - 1
    }

    /// Steady-state maximum keys per node; reaching `order` triggers a split.
    fn max_keys(&self) -> usize {
        self.order - 1
    }

    pub(crate) fn node(&self, handle: Handle) -> Result<&Node<K>> {
        self.nodes
            .get(handle)
            .ok_or_else(|| Error::invariant("stale node handle"))
    }

    fn node_mut(&mut self, handle: Handle) -> Result<&mut Node<K>> {
        self.nodes
            .get_mut(handle)
            .ok_or_else(|| Error::invariant("stale node handle"))
    }

    pub(crate) fn leaf(&self, handle: Handle) -> Result<&LeafNode<K>> {
        self.node(handle)?.as_leaf()
    }

    fn leaf_mut(&mut self, handle: Handle) -> Result<&mut LeafNode<K>> {
        self.node_mut(handle)?.as_leaf_mut()
    }

    fn inner(&self, handle: Handle) -> Result<&InnerNode<K>> {
        self.node(handle)?.as_inner()
    }

    fn inner_mut(&mut self, handle: Handle) -> Result<&mut InnerNode<K>> {
        self.node_mut(handle)?.as_inner_mut()
    }

    pub(crate) fn value_set(&self, handle: Handle) -> Result<&ValueSet<V>> {
        self.values
            .get(handle)
            .ok_or_else(|| Error::invariant("stale value handle"))
    }

    /// Resets to a single empty root leaf, recycling both arenas.
    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.values.clear();
        self.root = self.nodes.alloc(Node::Leaf(LeafNode::new()));
        self.len = 0;
    }

    /// Number of levels from the root down to the leaves.
    pub(crate) fn depth(&self) -> Result<usize> {
        let mut depth = 1;
        let mut current = self.root;
        loop {
            match self.node(current)? {
                Node::Inner(inner) => {
                    current = *inner
                        .children
                        .first()
                        .ok_or_else(|| Error::invariant("inner node without children"))?;
                    depth += 1;
                }
                Node::Leaf(_) => return Ok(depth),
            }
        }
    }
}

impl<K: Clone, V: Ord, C: Comparator<K>> RawTree<K, V, C> {
    pub(crate) fn comparator(&self) -> &C {
        &self.cmp
    }

    /// Descends from the root to the leaf owning `key`.
    fn leaf_for(&self, key: &K) -> Result<Handle> {
        let mut current = self.root;
        loop {
            match self.node(current)? {
                Node::Inner(inner) => {
                    let idx = inner.route_child(&self.cmp, key)?;
                    current = inner.children[idx];
                }
                Node::Leaf(_) => return Ok(current),
            }
        }
    }

    /// Returns the value set stored for `key`, if any.
    pub(crate) fn search(&self, key: &K) -> Result<Option<&ValueSet<V>>> {
        let leaf_h = self.leaf_for(key)?;
        let leaf = self.leaf(leaf_h)?;
        match leaf.locate(&self.cmp, key)? {
            SearchResult::Found(idx) => Ok(Some(self.value_set(leaf.values[idx])?)),
            SearchResult::NotFound(_) => Ok(None),
        }
    }

    /// Inserts `value` under `key`, combining with an existing entry
    /// according to `policy`.
    pub(crate) fn insert(&mut self, key: K, value: V, policy: ConflictPolicy) -> Result<()> {
        let leaf_h = self.leaf_for(&key)?;
        let position = self.leaf(leaf_h)?.locate(&self.cmp, &key)?;

        match position {
            SearchResult::Found(idx) => {
                let value_h = self.leaf(leaf_h)?.values[idx];
                let set = self
                    .values
                    .get_mut(value_h)
                    .ok_or_else(|| Error::invariant("stale value handle"))?;
                match policy {
                    ConflictPolicy::Replace => *set = ValueSet::singleton(value),
                    ConflictPolicy::Union => {
                        set.insert(value);
                    }
                }
            }
            SearchResult::NotFound(idx) => {
                let value_h = self.values.alloc(ValueSet::singleton(value));
                let leaf = self.leaf_mut(leaf_h)?;
                leaf.keys.insert(idx, key);
                leaf.values.insert(idx, value_h);
                self.len += 1;

                if self.leaf(leaf_h)?.keys.len() == self.order {
                    self.split_leaf(leaf_h)?;
                }
            }
        }
        Ok(())
    }

    fn split_leaf(&mut self, leaf_h: Handle) -> Result<()> {
        let old_right = self.leaf(leaf_h)?.right;
        let (separator, mut right) = self.leaf_mut(leaf_h)?.split();
        right.left = Some(leaf_h);
        right.right = old_right;

        let right_h = self.nodes.alloc(Node::Leaf(right));
        self.leaf_mut(leaf_h)?.right = Some(right_h);
        if let Some(next_h) = old_right {
            self.leaf_mut(next_h)?.left = Some(right_h);
        }

        trace!(len = self.len, "leaf split");
        self.insert_into_parent(leaf_h, SplitInfo { separator, right: right_h })
    }

    fn split_inner(&mut self, inner_h: Handle) -> Result<()> {
        let (separator, right) = self.inner_mut(inner_h)?.split();
        let moved = right.children.clone();
        let right_h = self.nodes.alloc(Node::Inner(right));
        for child in moved {
            self.node_mut(child)?.set_parent(Some(right_h));
        }

        trace!(len = self.len, "inner split");
        self.insert_into_parent(inner_h, SplitInfo { separator, right: right_h })
    }

    /// Hands a completed split to the parent of `left_h`, splitting upward
    /// as needed; a split arriving above the root grows the tree.
    fn insert_into_parent(&mut self, left_h: Handle, split: SplitInfo<K>) -> Result<()> {
        let Some(parent_h) = self.node(left_h)?.parent() else {
            return self.grow_root(left_h, split);
        };

        let idx = self
            .inner(parent_h)?
            .position_of(left_h)
            .ok_or_else(|| Error::invariant("child missing from its parent"))?;
        {
            let parent = self.inner_mut(parent_h)?;
            parent.keys.insert(idx, split.separator);
            parent.children.insert(idx + 1, split.right);
        }
        self.node_mut(split.right)?.set_parent(Some(parent_h));

        if self.inner(parent_h)?.keys.len() == self.order {
            self.split_inner(parent_h)?;
        }
        Ok(())
    }

    fn grow_root(&mut self, left_h: Handle, split: SplitInfo<K>) -> Result<()> {
        let mut root = InnerNode::new();
        root.keys.push(split.separator);
        root.children.push(left_h);
        root.children.push(split.right);

        let root_h = self.nodes.alloc(Node::Inner(root));
        self.node_mut(left_h)?.set_parent(Some(root_h));
        self.node_mut(split.right)?.set_parent(Some(root_h));
        self.root = root_h;

        debug!(len = self.len, "root split, tree depth increased");
        Ok(())
    }

    /// Removes `key`, returning its value set; rebalances on underflow.
    pub(crate) fn remove(&mut self, key: &K) -> Result<Option<ValueSet<V>>> {
        let leaf_h = self.leaf_for(key)?;
        let idx = match self.leaf(leaf_h)?.locate(&self.cmp, key)? {
            SearchResult::Found(idx) => idx,
            SearchResult::NotFound(_) => return Ok(None),
        };

        let value_h = {
            let leaf = self.leaf_mut(leaf_h)?;
            leaf.keys.remove(idx);
            leaf.values.remove(idx)
        };
        let removed = self
            .values
            .take(value_h)
            .ok_or_else(|| Error::invariant("stale value handle"))?;
        self.len -= 1;

        if leaf_h != self.root && self.leaf(leaf_h)?.keys.len() < self.min_keys() {
            self.rebalance_leaf(leaf_h)?;
        }
        Ok(Some(removed))
    }

    fn rebalance_leaf(&mut self, leaf_h: Handle) -> Result<()> {
        let parent_h = self
            .node(leaf_h)?
            .parent()
            .ok_or_else(|| Error::invariant("non-root node without parent"))?;
        let child_idx = self
            .inner(parent_h)?
            .position_of(leaf_h)
            .ok_or_else(|| Error::invariant("child missing from its parent"))?;
        let child_count = self.inner(parent_h)?.children.len();
        if child_count < 2 {
            return Err(Error::invariant("underfull node has no sibling"));
        }

        // Prefer borrowing: it terminates rebalancing at this level.
        if child_idx > 0 {
            let left_h = self.inner(parent_h)?.children[child_idx - 1];
            if self.leaf(left_h)?.keys.len() > self.min_keys() {
                return self.borrow_leaf_from_left(parent_h, child_idx, left_h, leaf_h);
            }
        }
        if child_idx + 1 < child_count {
            let right_h = self.inner(parent_h)?.children[child_idx + 1];
            if self.leaf(right_h)?.keys.len() > self.min_keys() {
                return self.borrow_leaf_from_right(parent_h, child_idx, leaf_h, right_h);
            }
        }

        if child_idx > 0 {
            let left_h = self.inner(parent_h)?.children[child_idx - 1];
            self.merge_leaves(parent_h, child_idx - 1, left_h, leaf_h)
        } else {
            let right_h = self.inner(parent_h)?.children[child_idx + 1];
            self.merge_leaves(parent_h, child_idx, leaf_h, right_h)
        }
    }

    fn borrow_leaf_from_left(
        &mut self,
        parent_h: Handle,
        child_idx: usize,
        left_h: Handle,
        leaf_h: Handle,
    ) -> Result<()> {
        let (key, value_h) = {
            let left = self.leaf_mut(left_h)?;
            let key = left
                .keys
                .pop()
                .ok_or_else(|| Error::invariant("borrow from empty sibling"))?;
            let value_h = left
                .values
                .pop()
                .ok_or_else(|| Error::invariant("leaf key/value slot mismatch"))?;
            (key, value_h)
        };

        // The moved key becomes the leaf's first key and thus the new
        // separator between the two siblings.
        let separator = key.clone();
        let leaf = self.leaf_mut(leaf_h)?;
        leaf.keys.insert(0, key);
        leaf.values.insert(0, value_h);
        self.inner_mut(parent_h)?.keys[child_idx - 1] = separator;

        trace!(len = self.len, "leaf borrowed from left sibling");
        Ok(())
    }

    fn borrow_leaf_from_right(
        &mut self,
        parent_h: Handle,
        child_idx: usize,
        leaf_h: Handle,
        right_h: Handle,
    ) -> Result<()> {
        let (key, value_h) = {
            let right = self.leaf_mut(right_h)?;
            if right.keys.is_empty() || right.values.is_empty() {
                return Err(Error::invariant("borrow from empty sibling"));
            }
            (right.keys.remove(0), right.values.remove(0))
        };
        {
            let leaf = self.leaf_mut(leaf_h)?;
            leaf.keys.push(key);
            leaf.values.push(value_h);
        }

        // The right sibling's new first key is the new separator.
        let separator = self
            .leaf(right_h)?
            .keys
            .first()
            .ok_or_else(|| Error::invariant("sibling emptied by borrow"))?
            .clone();
        self.inner_mut(parent_h)?.keys[child_idx] = separator;

        trace!(len = self.len, "leaf borrowed from right sibling");
        Ok(())
    }

    fn merge_leaves(
        &mut self,
        parent_h: Handle,
        separator_idx: usize,
        left_h: Handle,
        right_h: Handle,
    ) -> Result<()> {
        let right = match self
            .nodes
            .take(right_h)
            .ok_or_else(|| Error::invariant("stale node handle"))?
        {
            Node::Leaf(leaf) => leaf,
            Node::Inner(_) => return Err(Error::invariant("expected leaf node, found inner")),
        };

        let chain_right = right.right;
        self.leaf_mut(left_h)?.merge_right(right);
        if let Some(next_h) = chain_right {
            self.leaf_mut(next_h)?.left = Some(left_h);
        }

        trace!(len = self.len, "leaf merged into left sibling");
        self.remove_separator(parent_h, separator_idx)
    }

    /// Removes `keys[separator_idx]` and `children[separator_idx + 1]` from
    /// an inner node after a child merge, then handles the node's own
    /// underflow: rebalance when non-root, shrink when an emptied root.
    fn remove_separator(&mut self, inner_h: Handle, separator_idx: usize) -> Result<()> {
        {
            let inner = self.inner_mut(inner_h)?;
            if separator_idx >= inner.keys.len() || separator_idx + 1 >= inner.children.len() {
                return Err(Error::invariant("separator index out of bounds"));
            }
            inner.keys.remove(separator_idx);
            inner.children.remove(separator_idx + 1);
        }

        if inner_h == self.root {
            if self.inner(inner_h)?.keys.is_empty() {
                self.shrink_root()?;
            }
            return Ok(());
        }

        if self.inner(inner_h)?.keys.len() < self.min_keys() {
            self.rebalance_inner(inner_h)?;
        }
        Ok(())
    }

    fn shrink_root(&mut self) -> Result<()> {
        let child_h = {
            let root = self.inner(self.root)?;
            if root.children.len() != 1 {
                return Err(Error::invariant("emptied root still has multiple children"));
            }
            root.children[0]
        };

        self.nodes
            .free(self.root)
            .ok_or_else(|| Error::invariant("stale node handle"))?;
        self.node_mut(child_h)?.set_parent(None);
        self.root = child_h;

        debug!(len = self.len, "root shrink, tree depth decreased");
        Ok(())
    }

    fn rebalance_inner(&mut self, node_h: Handle) -> Result<()> {
        let parent_h = self
            .node(node_h)?
            .parent()
            .ok_or_else(|| Error::invariant("non-root node without parent"))?;
        let child_idx = self
            .inner(parent_h)?
            .position_of(node_h)
            .ok_or_else(|| Error::invariant("child missing from its parent"))?;
        let child_count = self.inner(parent_h)?.children.len();
        if child_count < 2 {
            return Err(Error::invariant("underfull node has no sibling"));
        }

        if child_idx > 0 {
            let left_h = self.inner(parent_h)?.children[child_idx - 1];
            if self.inner(left_h)?.keys.len() > self.min_keys() {
                return self.borrow_inner_from_left(parent_h, child_idx, left_h, node_h);
            }
        }
        if child_idx + 1 < child_count {
            let right_h = self.inner(parent_h)?.children[child_idx + 1];
            if self.inner(right_h)?.keys.len() > self.min_keys() {
                return self.borrow_inner_from_right(parent_h, child_idx, node_h, right_h);
            }
        }

        if child_idx > 0 {
            let left_h = self.inner(parent_h)?.children[child_idx - 1];
            self.merge_inners(parent_h, child_idx - 1, left_h, node_h)
        } else {
            let right_h = self.inner(parent_h)?.children[child_idx + 1];
            self.merge_inners(parent_h, child_idx, node_h, right_h)
        }
    }

    fn borrow_inner_from_left(
        &mut self,
        parent_h: Handle,
        child_idx: usize,
        left_h: Handle,
        node_h: Handle,
    ) -> Result<()> {
        // The parent separator rotates down to the front of this node; the
        // left sibling's last key rotates up to replace it, and the left
        // sibling's last child comes across.
        let (up_key, moved_child) = {
            let left = self.inner_mut(left_h)?;
            let key = left
                .keys
                .pop()
                .ok_or_else(|| Error::invariant("borrow from empty sibling"))?;
            let child = left
                .children
                .pop()
                .ok_or_else(|| Error::invariant("inner key/child slot mismatch"))?;
            (key, child)
        };
        let down_key = mem::replace(&mut self.inner_mut(parent_h)?.keys[child_idx - 1], up_key);
        {
            let node = self.inner_mut(node_h)?;
            node.keys.insert(0, down_key);
            node.children.insert(0, moved_child);
        }
        self.node_mut(moved_child)?.set_parent(Some(node_h));

        trace!(len = self.len, "inner borrowed from left sibling");
        Ok(())
    }

    fn borrow_inner_from_right(
        &mut self,
        parent_h: Handle,
        child_idx: usize,
        node_h: Handle,
        right_h: Handle,
    ) -> Result<()> {
        // Mirror image: the parent separator rotates down to the back of
        // this node; the right sibling's first key rotates up.
        let (up_key, moved_child) = {
            let right = self.inner_mut(right_h)?;
            if right.keys.is_empty() || right.children.is_empty() {
                return Err(Error::invariant("borrow from empty sibling"));
            }
            (right.keys.remove(0), right.children.remove(0))
        };
        let down_key = mem::replace(&mut self.inner_mut(parent_h)?.keys[child_idx], up_key);
        {
            let node = self.inner_mut(node_h)?;
            node.keys.push(down_key);
            node.children.push(moved_child);
        }
        self.node_mut(moved_child)?.set_parent(Some(node_h));

        trace!(len = self.len, "inner borrowed from right sibling");
        Ok(())
    }

    fn merge_inners(
        &mut self,
        parent_h: Handle,
        separator_idx: usize,
        left_h: Handle,
        right_h: Handle,
    ) -> Result<()> {
        let separator = self.inner(parent_h)?.keys[separator_idx].clone();
        let right = match self
            .nodes
            .take(right_h)
            .ok_or_else(|| Error::invariant("stale node handle"))?
        {
            Node::Inner(inner) => inner,
            Node::Leaf(_) => return Err(Error::invariant("expected inner node, found leaf")),
        };

        let moved = right.children.clone();
        self.inner_mut(left_h)?.merge_right(separator, right);
        for child in moved {
            self.node_mut(child)?.set_parent(Some(left_h));
        }

        trace!(len = self.len, "inner merged into left sibling");
        self.remove_separator(parent_h, separator_idx)
    }

    /// Positions the first entry with key `>= key`: the scan start for a
    /// range over `[key, ..)`. `None` when every key is below `key`.
    pub(crate) fn lower_bound(&self, key: &K) -> Result<Option<(Handle, usize)>> {
        let leaf_h = self.leaf_for(key)?;
        let leaf = self.leaf(leaf_h)?;
        let idx = match leaf.locate(&self.cmp, key)? {
            SearchResult::Found(idx) | SearchResult::NotFound(idx) => idx,
        };
        if idx < leaf.keys.len() {
            return Ok(Some((leaf_h, idx)));
        }
        // Everything in this leaf is below `key`; the right sibling (never
        // empty in a valid tree) starts at or above it.
        Ok(leaf.right.map(|next_h| (next_h, 0)))
    }

    /// Full structural audit: ordering, occupancy, uniform leaf depth,
    /// separator bounds, parent back-references, leaf-chain coverage, and
    /// key count.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.node(self.root)?.parent().is_some() {
            return Err(Error::invariant("root has a parent"));
        }

        let mut leaves = Vec::new();
        let mut leaf_depth = None;
        let total = self.check_node(self.root, 1, None, None, &mut leaf_depth, &mut leaves)?;
        if total != self.len {
            return Err(Error::invariant(format!(
                "len is {} but leaves hold {} keys",
                self.len, total
            )));
        }
        if self.values.len() != self.len {
            return Err(Error::invariant(format!(
                "value arena holds {} sets for {} keys",
                self.values.len(),
                self.len
            )));
        }
        self.check_leaf_chain(&leaves)
    }

    fn check_node(
        &self,
        handle: Handle,
        depth: usize,
        low: Option<&K>,
        high: Option<&K>,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<Handle>,
    ) -> Result<usize> {
        match self.node(handle)? {
            Node::Leaf(leaf) => {
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        return Err(Error::invariant(format!(
                            "leaf at depth {depth}, expected {expected}"
                        )));
                    }
                    Some(_) => {}
                }
                if leaf.values.len() != leaf.keys.len() {
                    return Err(Error::invariant("leaf key/value slot mismatch"));
                }
                if handle != self.root
                    && !(self.min_keys()..=self.max_keys()).contains(&leaf.keys.len())
                {
                    return Err(Error::invariant(format!(
                        "leaf holds {} keys, outside {}..={}",
                        leaf.keys.len(),
                        self.min_keys(),
                        self.max_keys()
                    )));
                }
                self.check_keys(&leaf.keys, low, high)?;
                for &value_h in &leaf.values {
                    self.value_set(value_h)?;
                }
                leaves.push(handle);
                Ok(leaf.keys.len())
            }
            Node::Inner(inner) => {
                if inner.children.len() != inner.keys.len() + 1 {
                    return Err(Error::invariant(format!(
                        "inner node has {} children for {} keys",
                        inner.children.len(),
                        inner.keys.len()
                    )));
                }
                if handle == self.root {
                    if inner.keys.is_empty() {
                        return Err(Error::invariant("inner root without separators"));
                    }
                } else if !(self.min_keys()..=self.max_keys()).contains(&inner.keys.len()) {
                    return Err(Error::invariant(format!(
                        "inner node holds {} keys, outside {}..={}",
                        inner.keys.len(),
                        self.min_keys(),
                        self.max_keys()
                    )));
                }
                self.check_keys(&inner.keys, low, high)?;

                let mut total = 0;
                for (idx, &child_h) in inner.children.iter().enumerate() {
                    if self.node(child_h)?.parent() != Some(handle) {
                        return Err(Error::invariant("child parent back-reference is wrong"));
                    }
                    let child_low = if idx == 0 { low } else { Some(&inner.keys[idx - 1]) };
                    let child_high = if idx == inner.keys.len() {
                        high
                    } else {
                        Some(&inner.keys[idx])
                    };
                    total +=
                        self.check_node(child_h, depth + 1, child_low, child_high, leaf_depth, leaves)?;
                }
                Ok(total)
            }
        }
    }

    fn check_keys(&self, keys: &[K], low: Option<&K>, high: Option<&K>) -> Result<()> {
        for pair in keys.windows(2) {
            if self.cmp.compare(&pair[0], &pair[1])? != Ordering::Less {
                return Err(Error::invariant("keys within a node not strictly ascending"));
            }
        }
        if let (Some(first), Some(low)) = (keys.first(), low) {
            if self.cmp.compare(first, low)? == Ordering::Less {
                return Err(Error::invariant("key below its subtree's lower bound"));
            }
        }
        if let (Some(last), Some(high)) = (keys.last(), high) {
            if self.cmp.compare(last, high)? != Ordering::Less {
                return Err(Error::invariant("key at or above its subtree's upper bound"));
            }
        }
        Ok(())
    }

    fn check_leaf_chain(&self, leaves: &[Handle]) -> Result<()> {
        for (idx, &leaf_h) in leaves.iter().enumerate() {
            let leaf = self.leaf(leaf_h)?;
            let expected_left = if idx == 0 { None } else { Some(leaves[idx - 1]) };
            let expected_right = leaves.get(idx + 1).copied();
            if leaf.left != expected_left {
                return Err(Error::invariant("leaf chain left link out of order"));
            }
            if leaf.right != expected_right {
                return Err(Error::invariant("leaf chain right link out of order"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{ComparatorError, NaturalOrder};

    type Tree = RawTree<i64, u64, NaturalOrder>;

    fn tree(order: usize) -> Tree {
        RawTree::new(order, NaturalOrder)
    }

    fn keys_in_order(t: &Tree) -> Vec<i64> {
        let mut out = Vec::new();
        let mut cursor = t.lower_bound(&i64::MIN).unwrap();
        while let Some((leaf_h, idx)) = cursor {
            let leaf = t.leaf(leaf_h).unwrap();
            out.extend_from_slice(&leaf.keys[idx..]);
            cursor = leaf.right.map(|h| (h, 0));
        }
        out
    }

    #[test]
    fn empty_tree_is_a_single_leaf() {
        let t = tree(4);
        assert_eq!(t.len(), 0);
        assert_eq!(t.depth().unwrap(), 1);
        assert!(t.search(&7).unwrap().is_none());
        t.validate().unwrap();
    }

    #[test]
    fn ascending_inserts_keep_invariants() {
        let mut t = tree(4);
        for k in 1..=50 {
            t.insert(k, k as u64, ConflictPolicy::Replace).unwrap();
            t.validate().unwrap();
        }
        assert_eq!(t.len(), 50);
        for k in 1..=50 {
            assert_eq!(t.search(&k).unwrap().unwrap().as_slice(), &[k as u64]);
        }
        assert_eq!(keys_in_order(&t), (1..=50).collect::<Vec<_>>());
    }

    #[test]
    fn descending_and_shuffled_inserts_keep_invariants() {
        for order in [3, 4, 5, 7] {
            let mut t = tree(order);
            for k in (1..=40).rev() {
                t.insert(k, 0, ConflictPolicy::Union).unwrap();
                t.validate().unwrap();
            }
            // A fixed shuffle: odd keys above the existing range.
            for k in [77, 41, 99, 63, 55] {
                t.insert(k, 0, ConflictPolicy::Union).unwrap();
                t.validate().unwrap();
            }
            let mut expected: Vec<i64> = (1..=40).collect();
            expected.extend([41, 55, 63, 77, 99]);
            assert_eq!(keys_in_order(&t), expected);
        }
    }

    #[test]
    fn conflict_policies_merge_value_sets() {
        let mut t = tree(4);
        t.insert(10, 1, ConflictPolicy::Union).unwrap();
        t.insert(10, 2, ConflictPolicy::Union).unwrap();
        t.insert(10, 2, ConflictPolicy::Union).unwrap();
        assert_eq!(t.search(&10).unwrap().unwrap().as_slice(), &[1, 2]);
        assert_eq!(t.len(), 1);

        t.insert(10, 9, ConflictPolicy::Replace).unwrap();
        assert_eq!(t.search(&10).unwrap().unwrap().as_slice(), &[9]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn remove_returns_the_value_set() {
        let mut t = tree(4);
        t.insert(5, 100, ConflictPolicy::Union).unwrap();
        t.insert(5, 200, ConflictPolicy::Union).unwrap();

        let removed = t.remove(&5).unwrap().unwrap();
        assert_eq!(removed.as_slice(), &[100, 200]);
        assert!(t.remove(&5).unwrap().is_none());
        assert_eq!(t.len(), 0);
        t.validate().unwrap();
    }

    #[test]
    fn underflow_borrows_from_right_sibling() {
        let mut t = tree(4);
        for k in 1..=4 {
            t.insert(k, 0, ConflictPolicy::Replace).unwrap();
        }
        // Leaves are now [1, 2] and [3, 4] under a one-separator root.
        assert_eq!(t.depth().unwrap(), 2);

        t.remove(&2).unwrap().unwrap();
        t.remove(&1).unwrap().unwrap();
        // The left leaf emptied and borrowed 3 from its right sibling.
        t.validate().unwrap();
        assert_eq!(t.depth().unwrap(), 2);
        assert_eq!(keys_in_order(&t), vec![3, 4]);
        assert!(t.search(&3).unwrap().is_some());
    }

    #[test]
    fn underflow_borrows_from_left_sibling() {
        let mut t = tree(4);
        for k in 1..=4 {
            t.insert(k, 0, ConflictPolicy::Replace).unwrap();
        }

        t.remove(&3).unwrap().unwrap();
        t.remove(&4).unwrap().unwrap();
        // The right leaf emptied and borrowed 2 from its left sibling.
        t.validate().unwrap();
        assert_eq!(t.depth().unwrap(), 2);
        assert_eq!(keys_in_order(&t), vec![1, 2]);
        assert!(t.search(&2).unwrap().is_some());
    }

    #[test]
    fn exhausted_siblings_merge_and_shrink_the_root() {
        let mut t = tree(4);
        for k in 1..=4 {
            t.insert(k, 0, ConflictPolicy::Replace).unwrap();
        }
        for k in [2, 1, 3] {
            t.remove(&k).unwrap().unwrap();
            t.validate().unwrap();
        }
        // Both leaves fell to minimum, merged, and the root shrank away.
        assert_eq!(t.depth().unwrap(), 1);
        assert_eq!(keys_in_order(&t), vec![4]);

        t.remove(&4).unwrap().unwrap();
        t.validate().unwrap();
        assert_eq!(t.len(), 0);
        assert_eq!(t.depth().unwrap(), 1);
    }

    #[test]
    fn deep_trees_rebalance_inner_nodes() {
        // Order 3 keeps nodes tiny so a few dozen keys build several levels
        // and removal exercises inner-node borrows and merges.
        let mut t = tree(3);
        for k in 1..=30 {
            t.insert(k, 0, ConflictPolicy::Replace).unwrap();
            t.validate().unwrap();
        }
        assert!(t.depth().unwrap() >= 3);

        for k in 1..=30 {
            t.remove(&k).unwrap().unwrap();
            t.validate().unwrap();
        }
        assert_eq!(t.len(), 0);
        assert_eq!(t.depth().unwrap(), 1);

        for k in 1..=30 {
            t.insert(k, 0, ConflictPolicy::Replace).unwrap();
        }
        for k in (1..=30).rev() {
            t.remove(&k).unwrap().unwrap();
            t.validate().unwrap();
        }
        assert_eq!(t.len(), 0);

        // Middle-out removal hits borrow-left, borrow-right, and merge paths.
        for k in 1..=30 {
            t.insert(k, 0, ConflictPolicy::Replace).unwrap();
        }
        let mut order: Vec<i64> = (15..=30).collect();
        order.extend((1..=14).rev());
        for k in order {
            t.remove(&k).unwrap().unwrap();
            t.validate().unwrap();
        }
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn lower_bound_positions_scans() {
        let mut t = tree(4);
        for k in [10, 20, 30, 40, 50] {
            t.insert(k, 0, ConflictPolicy::Replace).unwrap();
        }

        let (leaf_h, idx) = t.lower_bound(&25).unwrap().unwrap();
        assert_eq!(t.leaf(leaf_h).unwrap().keys[idx], 30);

        let (leaf_h, idx) = t.lower_bound(&30).unwrap().unwrap();
        assert_eq!(t.leaf(leaf_h).unwrap().keys[idx], 30);

        assert!(t.lower_bound(&51).unwrap().is_none());
    }

    #[test]
    fn comparator_failure_leaves_tree_untouched() {
        const POISON: i64 = -1;
        let flaky = |a: &i64, b: &i64| {
            if *a == POISON || *b == POISON {
                Err(ComparatorError::new("poisoned key"))
            } else {
                Ok(a.cmp(b))
            }
        };
        let mut t: RawTree<i64, u64, _> = RawTree::new(4, flaky);
        for k in 1..=8 {
            t.insert(k, 0, ConflictPolicy::Replace).unwrap();
        }

        assert!(t.insert(POISON, 0, ConflictPolicy::Replace).is_err());
        assert!(t.remove(&POISON).is_err());
        assert_eq!(t.len(), 8);
        t.validate().unwrap();
    }

    #[test]
    fn clear_resets_to_an_empty_root_leaf() {
        let mut t = tree(4);
        for k in 1..=20 {
            t.insert(k, 0, ConflictPolicy::Replace).unwrap();
        }
        t.clear();
        assert_eq!(t.len(), 0);
        assert_eq!(t.depth().unwrap(), 1);
        t.validate().unwrap();

        t.insert(3, 0, ConflictPolicy::Replace).unwrap();
        assert_eq!(keys_in_order(&t), vec![3]);
    }
}
