//! # Tree Navigation
//!
//! Shared traversal helpers for the operation modules: reading and
//! persisting nodes through an [`IoSession`], descending from the root to
//! the leaf responsible for a key, locating the chain ends, and a lazy
//! cursor that walks the leaf chain in either direction.
//!
//! ## Descent Convention
//!
//! Separator keys route equal keys to the right: a binary-search hit on
//! key ordinal `i` descends into child `i + 1`, a miss with insertion
//! point `i` descends into child `i`. Every separator therefore bounds
//! its left subtree strictly below and its right subtree at-or-above,
//! and lookups, inserts and deletes all walk the same line.

use eyre::{bail, eyre, Result};
use smallvec::SmallVec;

use crate::storage::{IoSession, Pointer};

use super::key::KeyCodec;
use super::node::{TreeLayout, TreeNode};

/// Nodes from leaf to root along one descent. Index 0 is the leaf.
pub(super) type NodePath<C> = SmallVec<[TreeNode<C>; 8]>;

pub(super) fn read_node<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    pointer: Pointer,
) -> Result<TreeNode<C>> {
    Ok(TreeNode::from_data(layout, session.read(pointer)?))
}

pub(super) fn read_root<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
) -> Result<Option<TreeNode<C>>> {
    Ok(session
        .get_root()?
        .map(|data| TreeNode::from_data(layout, data)))
}

/// Updates a node in place, or writes it for the first time and records
/// the assigned pointer.
pub(super) fn persist<C: KeyCodec>(
    session: &mut dyn IoSession,
    node: &mut TreeNode<C>,
) -> Result<()> {
    match node.pointer() {
        Some(pointer) => session.update(pointer, node.bytes(), node.is_root()),
        None => {
            let data = session.write(node.bytes(), node.is_root())?;
            node.set_pointer(data.pointer);
            Ok(())
        }
    }
}

/// The slot pointer of a node that must already be persisted.
pub(super) fn persisted_pointer<C: KeyCodec>(node: &TreeNode<C>) -> Result<Pointer> {
    node.pointer()
        .ok_or_else(|| eyre!("node has no storage slot yet"))
}

/// Child ordinal the descent takes for `key`. Equal keys go right.
fn descend_ordinal<C: KeyCodec>(keys: &[C::Key], key: &C::Key) -> usize {
    match keys.binary_search(key) {
        Ok(at) => at + 1,
        Err(at) => at,
    }
}

/// Walks from `root` down to the leaf responsible for `key`, returning
/// the visited nodes leaf-first.
pub(super) fn path_to_leaf<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    root: TreeNode<C>,
    key: &C::Key,
) -> Result<NodePath<C>> {
    let mut path: NodePath<C> = SmallVec::new();
    let mut current = root;
    while !current.is_leaf() {
        let ordinal = descend_ordinal::<C>(&current.keys(), key);
        let children = current.internal_children();
        let Some(child) = children.get(ordinal).copied() else {
            bail!(
                "internal node {} has no child at ordinal {} during descent",
                current
                    .pointer()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "<unpersisted>".into()),
                ordinal
            );
        };
        path.push(current);
        current = read_node(session, layout, child)?;
    }
    path.push(current);
    path.reverse();
    Ok(path)
}

/// First leaf of the chain, or `None` for an index with no root.
pub(super) fn far_left_leaf<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
) -> Result<Option<TreeNode<C>>> {
    edge_leaf(session, layout, |children| children.first().copied())
}

/// Last leaf of the chain, or `None` for an index with no root.
pub(super) fn far_right_leaf<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
) -> Result<Option<TreeNode<C>>> {
    edge_leaf(session, layout, |children| children.last().copied())
}

fn edge_leaf<C: KeyCodec>(
    session: &mut dyn IoSession,
    layout: TreeLayout,
    pick: impl Fn(&[Pointer]) -> Option<Pointer>,
) -> Result<Option<TreeNode<C>>> {
    let Some(mut current) = read_root(session, layout)? else {
        return Ok(None);
    };
    while !current.is_leaf() {
        let children = current.internal_children();
        let child = pick(&children)
            .ok_or_else(|| eyre!("internal node without children on edge descent"))?;
        current = read_node(session, layout, child)?;
    }
    Ok(Some(current))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Lazy walk over the leaf chain. Holds one leaf's pairs at a time and
/// follows sibling pointers on demand, so a scan never materializes the
/// tree and sees exactly the chain as of each hop.
pub(super) struct LeafCursor<C: KeyCodec> {
    layout: TreeLayout,
    direction: Direction,
    entries: Vec<(C::Key, Pointer)>,
    emitted: usize,
    follow: Option<Pointer>,
    done: bool,
}

impl<C: KeyCodec> LeafCursor<C> {
    /// Positions at the chain end matching `direction`.
    pub(super) fn open(
        session: &mut dyn IoSession,
        layout: TreeLayout,
        direction: Direction,
    ) -> Result<Self> {
        let start = match direction {
            Direction::Ascending => far_left_leaf::<C>(session, layout)?,
            Direction::Descending => far_right_leaf::<C>(session, layout)?,
        };
        let mut cursor = Self {
            layout,
            direction,
            entries: Vec::new(),
            emitted: 0,
            follow: None,
            done: start.is_none(),
        };
        if let Some(leaf) = start {
            cursor.load(&leaf);
        }
        Ok(cursor)
    }

    fn load(&mut self, leaf: &TreeNode<C>) {
        self.entries = leaf.leaf_key_values();
        self.emitted = 0;
        self.follow = match self.direction {
            Direction::Ascending => leaf.next_sibling(),
            Direction::Descending => leaf.prev_sibling(),
        };
    }

    /// Next pair in chain order, or `None` once the chain is exhausted.
    pub(super) fn next(
        &mut self,
        session: &mut dyn IoSession,
    ) -> Result<Option<(C::Key, Pointer)>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.emitted < self.entries.len() {
                let at = match self.direction {
                    Direction::Ascending => self.emitted,
                    Direction::Descending => self.entries.len() - 1 - self.emitted,
                };
                self.emitted += 1;
                return Ok(Some(self.entries[at].clone()));
            }
            match self.follow {
                None => {
                    self.done = true;
                }
                Some(pointer) => {
                    let leaf = read_node::<C>(session, self.layout, pointer)?;
                    self.load(&leaf);
                }
            }
        }
    }
}
