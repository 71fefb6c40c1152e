//! # Insert Operation
//!
//! Adds one `(key, value pointer)` pair to a unique index. The operation
//! descends to the responsible leaf, then resolves overflow bottom-up:
//! leaf split, separator promotion, internal splits, and finally root
//! synthesis when the promotion outgrows the current root.
//!
//! ## Write Ordering
//!
//! A split writes the new right sibling first so it owns a slot before
//! anything references it, then repairs the leaf chain, then rewrites
//! the sibling (now carrying its back link), then the split leaf. Root
//! synthesis writes the new root before the demoted node, so the root
//! locator never points at a node that has already given up its root
//! flag.

use eyre::{bail, eyre, Result};

use crate::storage::{IoSession, Pointer};

use super::key::KeyCodec;
use super::navigation::{path_to_leaf, persist, persisted_pointer, read_node, read_root};
use super::node::{TreeLayout, TreeNode};

/// Inserts the pair and returns the leaf that ends up holding it. A key
/// already present fails without touching the store.
pub(super) fn insert<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    key: C::Key,
    value: Pointer,
) -> Result<TreeNode<C>> {
    let Some(root) = read_root::<C>(session, layout)? else {
        let mut leaf = TreeNode::new_leaf(layout);
        leaf.set_root(true);
        leaf.insert_leaf_entry(key, value);
        persist(session, &mut leaf)?;
        return Ok(leaf);
    };

    let mut path = path_to_leaf(session, layout, root, &key)?;

    let leaf = &mut path[0];
    if leaf.keys().binary_search(&key).is_ok() {
        bail!("key {:?} is already indexed", key);
    }

    if leaf.key_count() < layout.max_keys() {
        leaf.insert_leaf_entry(key, value);
        persist(session, leaf)?;
        return Ok(leaf.clone());
    }

    // Leaf split. The new sibling takes the upper half and joins the
    // chain to the right of the split leaf.
    let probe = key.clone();
    let moved = leaf.split_leaf(key, value);
    let mut sibling = TreeNode::new_leaf(layout);
    sibling.set_leaf_key_values(&moved);
    persist(session, &mut sibling)?;

    let old_next = leaf.next_sibling();
    leaf.set_next_sibling(sibling.pointer());
    sibling.set_prev_sibling(leaf.pointer());
    if let Some(next_pointer) = old_next {
        sibling.set_next_sibling(Some(next_pointer));
        let mut next = read_node::<C>(session, layout, next_pointer)?;
        next.set_prev_sibling(sibling.pointer());
        persist(session, &mut next)?;
    }
    persist(session, &mut sibling)?;
    persist(session, leaf)?;

    let sibling_first = sibling
        .first_key()
        .ok_or_else(|| eyre!("leaf split produced an empty sibling"))?;
    let answer = if probe >= sibling_first {
        sibling.clone()
    } else {
        leaf.clone()
    };

    if path.len() == 1 {
        // The split leaf was the root; grow the tree by one level.
        let leaf = &mut path[0];
        leaf.set_root(false);
        let mut new_root: TreeNode<C> = TreeNode::new_internal(layout);
        new_root.set_root(true);
        new_root.set_internal_entries(
            &[sibling_first],
            &[persisted_pointer(leaf)?, persisted_pointer(&sibling)?],
        );
        persist(session, &mut new_root)?;
        persist(session, leaf)?;
        return Ok(answer);
    }

    let mut promoted = sibling_first;
    let mut carried = sibling;
    for level in 1..path.len() {
        let current = &mut path[level];
        let carried_pointer = persisted_pointer(&carried)?;

        if current.key_count() < layout.max_keys() {
            let mut keys = current.keys();
            let mut children = current.internal_children();
            let at = keys
                .iter()
                .position(|present| *present > promoted)
                .unwrap_or(keys.len());
            let place_left = carried
                .first_key()
                .is_some_and(|first| first < promoted);
            keys.insert(at, promoted);
            children.insert(if place_left { at } else { at + 1 }, carried_pointer);
            current.set_internal_entries(&keys, &children);
            persist(session, current)?;
            return Ok(answer);
        }

        let (new_promoted, upper_keys, upper_children) =
            current.split_internal(promoted, carried_pointer);
        let mut new_sibling = TreeNode::new_internal(layout);
        new_sibling.set_internal_entries(&upper_keys, &upper_children);
        persist(session, &mut new_sibling)?;

        if current.is_root() {
            current.set_root(false);
            let mut new_root: TreeNode<C> = TreeNode::new_internal(layout);
            new_root.set_root(true);
            new_root.set_internal_entries(
                &[new_promoted],
                &[persisted_pointer(current)?, persisted_pointer(&new_sibling)?],
            );
            persist(session, &mut new_root)?;
            persist(session, current)?;
            return Ok(answer);
        }

        persist(session, current)?;
        promoted = new_promoted;
        carried = new_sibling;
    }

    bail!("split promotion escalated past the root")
}
