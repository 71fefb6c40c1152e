//! # Delete Operation
//!
//! Removes one key from a unique index and repairs the tree bottom-up.
//! After the leaf removal, the operation revisits every node on the
//! descent path from the leaf's parent to the root. At each level it
//! replaces the deleted key if it also served as a separator, then
//! refills the node if it fell below minimum occupancy: borrow from a
//! sibling with spare keys, or merge with a neighbor when neither side
//! can lend.
//!
//! ## Rebalancing Rules
//!
//! - A lender must hold strictly more than the minimum; borrowing never
//!   creates a new deficit.
//! - The leftmost child can only borrow from the right; every other
//!   child tries its left sibling first, then the right when it has one.
//! - A merge keeps the fuller slot and always pulls the separator
//!   between the two merged children down into a merged internal node.
//! - A merge that empties the root hands the root flag to the merged
//!   node, shrinking the tree by one level. A non-root parent emptied by
//!   a merge gives up its slot immediately; the levels above either
//!   refill it (the slot is rewritten in place) or merge it away.
//! - A deleted key found in an internal node is replaced by the smallest
//!   key of the subtree right of it, which keeps equal-keys-go-right
//!   descents landing on the correct leaf. Lower levels are already
//!   rebalanced when the replacement runs, so the successor always
//!   exists.

use eyre::{bail, ensure, eyre, Result};

use crate::storage::{IoSession, Pointer};

use super::key::KeyCodec;
use super::navigation::{
    path_to_leaf, persist, persisted_pointer, read_node, read_root, NodePath,
};
use super::node::{TreeLayout, TreeNode};

/// Removes `key` and rebalances. Returns whether the key was present. A
/// miss leaves the store untouched.
pub(super) fn remove<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    key: &C::Key,
) -> Result<bool> {
    let Some(root) = read_root::<C>(session, layout)? else {
        return Ok(false);
    };
    let mut path = path_to_leaf(session, layout, root, key)?;

    if !path[0].remove_leaf_entry(key) {
        return Ok(false);
    }
    persist(session, &mut path[0])?;
    if !path[0].is_root() && path[0].key_count() < layout.min_keys() {
        fill_node(session, layout, &mut path, 0)?;
    }

    for level in 1..path.len() {
        check_internal_node(session, layout, &mut path, level, key)?;
    }
    Ok(true)
}

/// One ancestor's share of the repair: separator replacement if it held
/// the deleted key, then a refill if it fell below minimum occupancy.
fn check_internal_node<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    path: &mut NodePath<C>,
    level: usize,
    key: &C::Key,
) -> Result<()> {
    let keys = path[level].keys();
    if level == path.len() - 1 && keys.is_empty() {
        // The old root; a merge below already collapsed it away.
        return Ok(());
    }

    if let Some(key_at) = keys.iter().position(|present| present == key) {
        replace_separator(session, layout, &mut path[level], key_at)?;
    }

    if !path[level].is_root() && path[level].key_count() < layout.min_keys() {
        fill_node(session, layout, path, level)?;
    }
    Ok(())
}

/// Swaps the separator at `key_at` for the smallest key of its right
/// subtree.
fn replace_separator<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    node: &mut TreeNode<C>,
    key_at: usize,
) -> Result<()> {
    let children = node.internal_children();
    let Some(&right_child) = children.get(key_at + 1) else {
        bail!("separator at ordinal {} has no right child", key_at);
    };
    let successor = subtree_min::<C>(session, layout, right_child)?;
    let mut keys = node.keys();
    keys[key_at] = successor;
    node.set_internal_entries(&keys, &children);
    persist(session, node)
}

fn subtree_min<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    from: Pointer,
) -> Result<C::Key> {
    let mut current = read_node::<C>(session, layout, from)?;
    while !current.is_leaf() {
        let children = current.internal_children();
        let Some(&first) = children.first() else {
            bail!("internal node without children during successor scan");
        };
        current = read_node::<C>(session, layout, first)?;
    }
    current
        .first_key()
        .ok_or_else(|| eyre!("empty leaf during successor scan"))
}

/// Brings `path[level]` back to minimum occupancy via borrow or merge.
fn fill_node<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    path: &mut NodePath<C>,
    level: usize,
) -> Result<()> {
    ensure!(
        level + 1 < path.len(),
        "non-root node below minimum occupancy has no parent on the path"
    );
    let (lower, upper) = path.split_at_mut(level + 1);
    let child = &mut lower[level];
    let parent = &mut upper[0];

    let child_pointer = persisted_pointer(child)?;
    let siblings = parent.internal_children();
    ensure!(
        siblings.len() >= 2,
        "cannot rebalance under a parent with a single child"
    );
    let Some(child_at) = siblings.iter().position(|p| *p == child_pointer) else {
        bail!("node {} is not referenced by its path parent", child_pointer);
    };

    let borrowed = if child_at == 0 {
        try_borrow_right(session, layout, parent, child, child_at)?
    } else if try_borrow_left(session, layout, parent, child, child_at)? {
        true
    } else if child_at + 1 < siblings.len() {
        try_borrow_right(session, layout, parent, child, child_at)?
    } else {
        false
    };

    if !borrowed {
        let neighbor_at = if child_at + 1 < siblings.len() {
            child_at + 1
        } else {
            child_at - 1
        };
        merge_with_neighbor(session, layout, parent, child, child_at, neighbor_at)?;
    }
    Ok(())
}

/// Moves one entry from the right sibling when it has spares. The
/// separator follows: for a leaf borrow it becomes the lender's new
/// first key, for an internal borrow it rotates down into the child
/// while the lender's first key rotates up.
fn try_borrow_right<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    parent: &mut TreeNode<C>,
    child: &mut TreeNode<C>,
    child_at: usize,
) -> Result<bool> {
    let siblings = parent.internal_children();
    let Some(&lender_pointer) = siblings.get(child_at + 1) else {
        return Ok(false);
    };
    let mut lender = read_node::<C>(session, layout, lender_pointer)?;
    if lender.key_count() <= layout.min_keys() {
        return Ok(false);
    }

    let mut parent_keys = parent.keys();
    if child.is_leaf() {
        let mut lender_entries = lender.leaf_key_values();
        let moved = lender_entries.remove(0);
        lender.set_leaf_key_values(&lender_entries);

        let mut entries = child.leaf_key_values();
        entries.push(moved);
        child.set_leaf_key_values(&entries);

        let Some((new_first, _)) = lender_entries.first() else {
            bail!("leaf lender emptied by a single borrow");
        };
        parent_keys[child_at] = new_first.clone();
    } else {
        let mut lender_keys = lender.keys();
        let mut lender_children = lender.internal_children();
        let rotated_up = lender_keys.remove(0);
        let moved_child = lender_children.remove(0);
        lender.set_internal_entries(&lender_keys, &lender_children);

        let mut keys = child.keys();
        let mut children = child.internal_children();
        keys.push(parent_keys[child_at].clone());
        children.push(moved_child);
        child.set_internal_entries(&keys, &children);

        parent_keys[child_at] = rotated_up;
    }
    let parent_children = parent.internal_children();
    parent.set_internal_entries(&parent_keys, &parent_children);

    persist(session, parent)?;
    persist(session, child)?;
    persist(session, &mut lender)?;
    Ok(true)
}

/// Mirror of [`try_borrow_right`] against the left sibling.
fn try_borrow_left<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    parent: &mut TreeNode<C>,
    child: &mut TreeNode<C>,
    child_at: usize,
) -> Result<bool> {
    let siblings = parent.internal_children();
    let Some(&lender_pointer) = child_at
        .checked_sub(1)
        .and_then(|at| siblings.get(at))
    else {
        return Ok(false);
    };
    let mut lender = read_node::<C>(session, layout, lender_pointer)?;
    if lender.key_count() <= layout.min_keys() {
        return Ok(false);
    }

    let mut parent_keys = parent.keys();
    if child.is_leaf() {
        let mut lender_entries = lender.leaf_key_values();
        let Some(moved) = lender_entries.pop() else {
            bail!("leaf lender without spare entries");
        };
        lender.set_leaf_key_values(&lender_entries);

        parent_keys[child_at - 1] = moved.0.clone();
        let mut entries = child.leaf_key_values();
        entries.insert(0, moved);
        child.set_leaf_key_values(&entries);
    } else {
        let mut lender_keys = lender.keys();
        let mut lender_children = lender.internal_children();
        let (Some(rotated_up), Some(moved_child)) =
            (lender_keys.pop(), lender_children.pop())
        else {
            bail!("internal lender without spare entries");
        };
        lender.set_internal_entries(&lender_keys, &lender_children);

        let mut keys = child.keys();
        let mut children = child.internal_children();
        keys.insert(0, parent_keys[child_at - 1].clone());
        children.insert(0, moved_child);
        child.set_internal_entries(&keys, &children);

        parent_keys[child_at - 1] = rotated_up;
    }
    let parent_children = parent.internal_children();
    parent.set_internal_entries(&parent_keys, &parent_children);

    persist(session, parent)?;
    persist(session, child)?;
    persist(session, &mut lender)?;
    Ok(true)
}

/// Folds the child and its neighbor into one node. The fuller slot
/// survives; leaf merges concatenate the pairs, internal merges also
/// absorb the separator so key and child counts stay aligned.
fn merge_with_neighbor<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    parent: &mut TreeNode<C>,
    child: &TreeNode<C>,
    child_at: usize,
    neighbor_at: usize,
) -> Result<()> {
    let children = parent.internal_children();
    let Some(&neighbor_pointer) = children.get(neighbor_at) else {
        bail!("merge neighbor at ordinal {} missing under parent", neighbor_at);
    };
    let neighbor = read_node::<C>(session, layout, neighbor_pointer)?;

    let separator_at = child_at.min(neighbor_at);
    let Some(separator) = parent.keys().get(separator_at).cloned() else {
        bail!("parent has no separator at ordinal {}", separator_at);
    };

    let (left, right) = if child_at < neighbor_at {
        (child, &neighbor)
    } else {
        (&neighbor, child)
    };

    let keep_is_neighbor = neighbor.key_count() > child.key_count();
    let mut keep = if keep_is_neighbor {
        neighbor.clone()
    } else {
        child.clone()
    };
    let gone = if keep_is_neighbor {
        child.clone()
    } else {
        neighbor.clone()
    };

    if keep.is_leaf() {
        let mut entries = left.leaf_key_values();
        entries.extend(right.leaf_key_values());
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        keep.set_leaf_key_values(&entries);
    } else {
        let mut keys = left.keys();
        keys.extend(right.keys());
        keys.push(separator);
        keys.sort();
        let mut merged_children = left.internal_children();
        merged_children.extend(right.internal_children());
        keep.set_internal_entries(&keys, &merged_children);
    }

    let gone_pointer = persisted_pointer(&gone)?;
    let mut parent_keys = parent.keys();
    parent_keys.remove(separator_at);
    let mut parent_children = parent.internal_children();
    let Some(gone_at) = parent_children.iter().position(|p| *p == gone_pointer) else {
        bail!("merged-away child is not referenced by the parent");
    };
    parent_children.remove(gone_at);
    parent.set_internal_entries(&parent_keys, &parent_children);

    if parent_keys.is_empty() {
        if parent.is_root() {
            keep.set_root(true);
        }
        // The parent slot is freed now; if an upper level refills this
        // node, the refill rewrites the same slot in place.
        session.remove(persisted_pointer(parent)?)?;
    } else {
        persist(session, parent)?;
    }

    persist(session, &mut keep)?;

    if gone.is_leaf() {
        connect_siblings(session, layout, &gone)?;
    }
    session.remove(gone_pointer)?;
    Ok(())
}

/// Splices a removed leaf out of the chain.
fn connect_siblings<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    removed: &TreeNode<C>,
) -> Result<()> {
    let prev = removed.prev_sibling();
    let next = removed.next_sibling();
    if let Some(next_pointer) = next {
        let mut node = read_node::<C>(session, layout, next_pointer)?;
        node.set_prev_sibling(prev);
        persist(session, &mut node)?;
    }
    if let Some(prev_pointer) = prev {
        let mut node = read_node::<C>(session, layout, prev_pointer)?;
        node.set_next_sibling(next);
        persist(session, &mut node)?;
    }
    Ok(())
}
