//! # Node Codec
//!
//! Tree nodes live on disk as fixed-size slots; this module translates
//! between those slots and typed views. [`TreeLayout`] fixes the geometry
//! for one index (degree, key width, value width, padded slot size) and
//! [`TreeNode`] wraps a slot's bytes with accessors for both variants.
//!
//! ## Binary Layout
//!
//! ```text
//! internal  ┌───────┬─────────┬───────┬─────────┬───────┬─ ─ ─
//!           │ flags │ child 0 │ key 0 │ child 1 │ key 1 │ ...
//!           │ 1 B   │ 13 B    │ K B   │ 13 B    │ K B   │
//!           └───────┴─────────┴───────┴─────────┴───────┴─ ─ ─
//!
//! leaf      ┌───────┬───────┬─────────┬─ ─ ─┬──────────┬──────────┐
//!           │ flags │ key 0 │ value 0 │ ... │ prev sib │ next sib │
//!           │ 1 B   │ K B   │ V B     │     │ 13 B     │ 13 B     │
//!           └───────┴───────┴─────────┴─ ─ ─┴──────────┴──────────┘
//! ```
//!
//! The flags byte carries the variant and root bits; an all-zero flags
//! byte is never a live node, which is what lets the allocator treat
//! zero-filled slots as tombstones. Occupancy inside a node is also
//! content-driven: a key ordinal is occupied when its key bytes or the
//! bytes right after them (the leaf value, or the next child pointer)
//! are non-zero, and a child ordinal is occupied when its kind byte says
//! node. Keys and children are always packed from ordinal zero, so
//! shrinking writers rewrite the prefix and zero the tail.

use std::marker::PhantomData;

use crate::config::{MIN_TREE_DEGREE, SLOT_ALIGNMENT};
use crate::storage::{NodeData, Pointer, PointerKind};

use super::key::KeyCodec;

const FLAG_INTERNAL: u8 = 0x01;
const FLAG_LEAF: u8 = 0x02;
const FLAG_ROOT: u8 = 0x04;

fn align_slot(n: usize) -> usize {
    (n + SLOT_ALIGNMENT - 1) & !(SLOT_ALIGNMENT - 1)
}

/// Node geometry for one index. Copyable; every node of the index carries
/// the same layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLayout {
    degree: usize,
    key_size: usize,
    value_size: usize,
    slot_size: usize,
}

impl TreeLayout {
    /// Builds the layout for `degree` children per internal node and the
    /// given key and value widths. Degree three is the smallest tree in
    /// which an internal split can leave both halves non-empty. Leaf
    /// values embed a pointer, so widths below [`Pointer::BYTES`] are
    /// padded up to it.
    pub fn new(degree: usize, key_size: usize, value_size: usize) -> Self {
        assert!(
            degree >= MIN_TREE_DEGREE,
            "tree degree must be at least {MIN_TREE_DEGREE}"
        );
        let value_size = value_size.max(Pointer::BYTES);
        let slot_size = align_slot(1 + degree * (key_size + value_size) + 2 * Pointer::BYTES);
        Self {
            degree,
            key_size,
            value_size,
            slot_size,
        }
    }

    /// [`TreeLayout::new`] with the key width taken from a codec.
    pub fn for_codec<C: KeyCodec>(degree: usize, value_size: usize) -> Self {
        Self::new(degree, C::KEY_SIZE, value_size)
    }

    #[inline]
    pub fn degree(&self) -> usize {
        self.degree
    }

    #[inline]
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    #[inline]
    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Padded slot size in bytes; the allocation unit of the storage layer.
    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Most keys a node may hold.
    #[inline]
    pub fn max_keys(&self) -> usize {
        self.degree - 1
    }

    /// Fewest keys a non-root node may hold after rebalancing.
    #[inline]
    pub fn min_keys(&self) -> usize {
        (self.degree - 1) / 2
    }
}

/// A decoded view over one node slot. The pointer is `None` until the
/// node has been persisted and assigned a slot.
#[derive(Debug)]
pub struct TreeNode<C: KeyCodec> {
    layout: TreeLayout,
    bytes: Vec<u8>,
    pointer: Option<Pointer>,
    _codec: PhantomData<C>,
}

// Manual impl: the derive would demand `C: Clone`, but `C` is only a
// zero-sized codec carried as `PhantomData`.
impl<C: KeyCodec> Clone for TreeNode<C> {
    fn clone(&self) -> Self {
        Self {
            layout: self.layout,
            bytes: self.bytes.clone(),
            pointer: self.pointer,
            _codec: PhantomData,
        }
    }
}

impl<C: KeyCodec> TreeNode<C> {
    pub fn new_leaf(layout: TreeLayout) -> Self {
        let mut bytes = vec![0u8; layout.slot_size()];
        bytes[0] = FLAG_LEAF;
        Self {
            layout,
            bytes,
            pointer: None,
            _codec: PhantomData,
        }
    }

    pub fn new_internal(layout: TreeLayout) -> Self {
        let mut bytes = vec![0u8; layout.slot_size()];
        bytes[0] = FLAG_INTERNAL;
        Self {
            layout,
            bytes,
            pointer: None,
            _codec: PhantomData,
        }
    }

    /// Wraps a slot read from storage.
    pub fn from_data(layout: TreeLayout, data: NodeData) -> Self {
        Self {
            layout,
            bytes: data.bytes,
            pointer: Some(data.pointer),
            _codec: PhantomData,
        }
    }

    #[inline]
    pub fn layout(&self) -> TreeLayout {
        self.layout
    }

    #[inline]
    pub fn pointer(&self) -> Option<Pointer> {
        self.pointer
    }

    pub fn set_pointer(&mut self, pointer: Pointer) {
        self.pointer = Some(pointer);
    }

    /// The slot image to persist.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.bytes[0] & FLAG_LEAF == FLAG_LEAF
    }

    #[inline]
    pub fn is_internal(&self) -> bool {
        self.bytes[0] & FLAG_INTERNAL == FLAG_INTERNAL
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.bytes[0] & FLAG_ROOT == FLAG_ROOT
    }

    pub fn set_root(&mut self, is_root: bool) {
        if is_root {
            self.bytes[0] |= FLAG_ROOT;
        } else {
            self.bytes[0] &= !FLAG_ROOT;
        }
    }

    fn key_slot(&self, ordinal: usize) -> usize {
        if self.is_leaf() {
            1 + ordinal * (self.layout.key_size + self.layout.value_size)
        } else {
            1 + Pointer::BYTES + ordinal * (self.layout.key_size + Pointer::BYTES)
        }
    }

    /// Bytes following a key that take part in the occupancy probe: the
    /// leaf value, or the next child pointer.
    fn key_tail(&self) -> usize {
        if self.is_leaf() {
            self.layout.value_size
        } else {
            Pointer::BYTES
        }
    }

    fn child_slot(&self, ordinal: usize) -> usize {
        1 + ordinal * (Pointer::BYTES + self.layout.key_size)
    }

    fn has_key(&self, ordinal: usize) -> bool {
        if ordinal >= self.layout.max_keys() {
            return false;
        }
        let at = self.key_slot(ordinal);
        let probed = &self.bytes[at..at + self.layout.key_size + self.key_tail()];
        probed.iter().any(|b| *b != 0)
    }

    fn has_child(&self, ordinal: usize) -> bool {
        if ordinal >= self.layout.degree() {
            return false;
        }
        self.bytes[self.child_slot(ordinal)] == PointerKind::Node as u8
    }

    /// Keys in ordinal order, for either variant. Stops at the first
    /// unoccupied ordinal; occupancy is always a prefix.
    pub fn keys(&self) -> Vec<C::Key> {
        let mut keys = Vec::with_capacity(self.layout.max_keys());
        for ordinal in 0..self.layout.max_keys() {
            if !self.has_key(ordinal) {
                break;
            }
            keys.push(C::decode(&self.bytes[self.key_slot(ordinal)..]));
        }
        keys
    }

    pub fn key_count(&self) -> usize {
        let mut count = 0;
        while self.has_key(count) {
            count += 1;
        }
        count
    }

    pub fn first_key(&self) -> Option<C::Key> {
        self.has_key(0)
            .then(|| C::decode(&self.bytes[self.key_slot(0)..]))
    }

    /// Leaf pairs in key order. A zeroed value slot ends the scan.
    pub fn leaf_key_values(&self) -> Vec<(C::Key, Pointer)> {
        let mut entries = Vec::with_capacity(self.layout.max_keys());
        for ordinal in 0..self.layout.max_keys() {
            if !self.has_key(ordinal) {
                break;
            }
            let at = self.key_slot(ordinal);
            let Some(value) = Pointer::from_slice(&self.bytes[at + self.layout.key_size..]) else {
                break;
            };
            entries.push((C::decode(&self.bytes[at..]), value));
        }
        entries
    }

    /// Rewrites the pair area from ordinal zero and zeroes the rest.
    /// Sibling pointers are untouched.
    pub fn set_leaf_key_values(&mut self, entries: &[(C::Key, Pointer)]) {
        debug_assert!(self.is_leaf());
        debug_assert!(entries.len() <= self.layout.max_keys());
        let pair = self.layout.key_size + self.layout.value_size;
        for (ordinal, (key, value)) in entries.iter().enumerate() {
            let at = self.key_slot(ordinal);
            C::encode(key, &mut self.bytes[at..]);
            value.write_to(&mut self.bytes[at + self.layout.key_size..]);
        }
        for ordinal in entries.len()..self.layout.max_keys() {
            let at = self.key_slot(ordinal);
            self.bytes[at..at + pair].fill(0);
        }
    }

    /// Adds one pair at its sorted position. The caller checks for room.
    pub fn insert_leaf_entry(&mut self, key: C::Key, value: Pointer) {
        let mut entries = self.leaf_key_values();
        let at = entries
            .iter()
            .position(|(present, _)| *present > key)
            .unwrap_or(entries.len());
        entries.insert(at, (key, value));
        self.set_leaf_key_values(&entries);
    }

    /// Removes the pair holding `key`, compacting the rest. Returns
    /// whether anything was removed.
    pub fn remove_leaf_entry(&mut self, key: &C::Key) -> bool {
        let mut entries = self.leaf_key_values();
        let before = entries.len();
        entries.retain(|(present, _)| present != key);
        let removed = entries.len() != before;
        if removed {
            self.set_leaf_key_values(&entries);
        }
        removed
    }

    /// Adds one pair to a full leaf and splits it. The lower half stays
    /// here; the moved upper half is returned for the new right sibling.
    pub fn split_leaf(&mut self, key: C::Key, value: Pointer) -> Vec<(C::Key, Pointer)> {
        let mid = self.layout.min_keys();
        let mut all = self.leaf_key_values();
        let at = all
            .iter()
            .position(|(present, _)| *present > key)
            .unwrap_or(all.len());
        all.insert(at, (key, value));
        let moved = all.split_off(mid + 1);
        self.set_leaf_key_values(&all);
        moved
    }

    pub fn prev_sibling(&self) -> Option<Pointer> {
        Pointer::from_slice(&self.bytes[self.sibling_slot(0)..])
    }

    pub fn next_sibling(&self) -> Option<Pointer> {
        Pointer::from_slice(&self.bytes[self.sibling_slot(1)..])
    }

    pub fn set_prev_sibling(&mut self, pointer: Option<Pointer>) {
        self.write_sibling(0, pointer);
    }

    pub fn set_next_sibling(&mut self, pointer: Option<Pointer>) {
        self.write_sibling(1, pointer);
    }

    fn sibling_slot(&self, which: usize) -> usize {
        1 + self.layout.max_keys() * (self.layout.key_size + self.layout.value_size)
            + which * Pointer::BYTES
    }

    fn write_sibling(&mut self, which: usize, pointer: Option<Pointer>) {
        debug_assert!(self.is_leaf());
        let at = self.sibling_slot(which);
        match pointer {
            Some(pointer) => pointer.write_to(&mut self.bytes[at..]),
            None => self.bytes[at..at + Pointer::BYTES].fill(0),
        }
    }

    /// Child pointers in ordinal order. Stops at the first unoccupied
    /// ordinal.
    pub fn internal_children(&self) -> Vec<Pointer> {
        let mut children = Vec::with_capacity(self.layout.degree());
        for ordinal in 0..self.layout.degree() {
            if !self.has_child(ordinal) {
                break;
            }
            let Some(child) = Pointer::from_slice(&self.bytes[self.child_slot(ordinal)..]) else {
                break;
            };
            children.push(child);
        }
        children
    }

    /// Rewrites keys and children from ordinal zero and zeroes both
    /// tails. `children` may be one longer than `keys`, or shorter while
    /// a rebalance is in flight.
    pub fn set_internal_entries(&mut self, keys: &[C::Key], children: &[Pointer]) {
        debug_assert!(self.is_internal());
        debug_assert!(keys.len() <= self.layout.max_keys());
        debug_assert!(children.len() <= self.layout.degree());
        for (ordinal, key) in keys.iter().enumerate() {
            let at = self.key_slot(ordinal);
            C::encode(key, &mut self.bytes[at..]);
        }
        for ordinal in keys.len()..self.layout.max_keys() {
            let at = self.key_slot(ordinal);
            self.bytes[at..at + self.layout.key_size].fill(0);
        }
        for (ordinal, child) in children.iter().enumerate() {
            let at = self.child_slot(ordinal);
            child.write_to(&mut self.bytes[at..]);
        }
        for ordinal in children.len()..self.layout.degree() {
            let at = self.child_slot(ordinal);
            self.bytes[at..at + Pointer::BYTES].fill(0);
        }
    }

    /// Adds a separator and its right child to a full internal node and
    /// splits it. Returns the key promoted to the parent and the upper
    /// half moved to the new right sibling.
    ///
    /// The cut point caps at `degree - 3` so the sibling keeps at least
    /// one key even at degree three.
    pub fn split_internal(
        &mut self,
        key: C::Key,
        child: Pointer,
    ) -> (C::Key, Vec<C::Key>, Vec<Pointer>) {
        let mut keys = self.keys();
        let mut children = self.internal_children();
        let at = keys
            .iter()
            .position(|present| *present > key)
            .unwrap_or(keys.len());
        keys.insert(at, key);
        children.insert(at + 1, child);

        let mid = self.layout.min_keys().min(self.layout.degree() - 3);
        let upper_keys = keys.split_off(mid + 2);
        let promoted = match keys.pop() {
            Some(promoted) => promoted,
            None => unreachable!("split of a non-full internal node"),
        };
        let upper_children = children.split_off(mid + 2);
        self.set_internal_entries(&keys, &children);
        (promoted, upper_keys, upper_children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::key::{CompactU32Key, U64Key};

    fn layout() -> TreeLayout {
        TreeLayout::for_codec::<U64Key>(4, Pointer::BYTES)
    }

    fn data_at(offset: u64) -> Pointer {
        Pointer::new_data(offset, 0)
    }

    fn node_at(offset: u64) -> Pointer {
        Pointer::new_node(offset, 0)
    }

    #[test]
    fn slot_size_is_padded_to_eight_bytes() {
        // 1 + 4*(9+13) + 26 = 115, padded to 120.
        assert_eq!(layout().slot_size(), 120);
        // 1 + 3*(4+13) + 26 = 78, padded to 80.
        assert_eq!(
            TreeLayout::for_codec::<CompactU32Key>(3, Pointer::BYTES).slot_size(),
            80
        );
        // Value widths below a pointer pad up to one.
        assert_eq!(TreeLayout::for_codec::<CompactU32Key>(3, 0).slot_size(), 80);
    }

    #[test]
    fn key_bounds_follow_degree() {
        let layout = layout();
        assert_eq!(layout.max_keys(), 3);
        assert_eq!(layout.min_keys(), 1);
    }

    #[test]
    fn fresh_nodes_carry_variant_flags() {
        let leaf = TreeNode::<U64Key>::new_leaf(layout());
        assert!(leaf.is_leaf() && !leaf.is_internal() && !leaf.is_root());
        assert!(leaf.pointer().is_none());

        let mut internal = TreeNode::<U64Key>::new_internal(layout());
        assert!(internal.is_internal() && !internal.is_leaf());
        internal.set_root(true);
        assert!(internal.is_root());
        internal.set_root(false);
        assert!(!internal.is_root());
    }

    #[test]
    fn leaf_pairs_round_trip_in_order() {
        let mut leaf = TreeNode::<U64Key>::new_leaf(layout());
        leaf.insert_leaf_entry(20, data_at(200));
        leaf.insert_leaf_entry(10, data_at(100));
        leaf.insert_leaf_entry(30, data_at(300));

        assert_eq!(leaf.keys(), vec![10, 20, 30]);
        assert_eq!(
            leaf.leaf_key_values(),
            vec![
                (10, data_at(100)),
                (20, data_at(200)),
                (30, data_at(300)),
            ]
        );
        assert_eq!(leaf.first_key(), Some(10));
    }

    #[test]
    fn shrinking_rewrite_zeroes_the_tail() {
        let mut leaf = TreeNode::<U64Key>::new_leaf(layout());
        leaf.set_leaf_key_values(&[
            (1, data_at(1)),
            (2, data_at(2)),
            (3, data_at(3)),
        ]);
        leaf.set_leaf_key_values(&[(2, data_at(2))]);

        assert_eq!(leaf.key_count(), 1);
        assert_eq!(leaf.leaf_key_values(), vec![(2, data_at(2))]);
    }

    #[test]
    fn remove_compacts_remaining_pairs() {
        let mut leaf = TreeNode::<U64Key>::new_leaf(layout());
        leaf.set_leaf_key_values(&[
            (1, data_at(1)),
            (2, data_at(2)),
            (3, data_at(3)),
        ]);

        assert!(leaf.remove_leaf_entry(&2));
        assert!(!leaf.remove_leaf_entry(&2));
        assert_eq!(leaf.leaf_key_values(), vec![(1, data_at(1)), (3, data_at(3))]);
    }

    #[test]
    fn zero_key_is_representable_under_flagged_codec() {
        let mut leaf = TreeNode::<U64Key>::new_leaf(layout());
        leaf.insert_leaf_entry(0, data_at(9));
        assert_eq!(leaf.key_count(), 1);
        assert_eq!(leaf.leaf_key_values(), vec![(0, data_at(9))]);
    }

    #[test]
    fn leaf_split_keeps_lower_half_here() {
        let mut leaf = TreeNode::<U64Key>::new_leaf(layout());
        leaf.set_leaf_key_values(&[
            (10, data_at(10)),
            (20, data_at(20)),
            (30, data_at(30)),
        ]);

        let moved = leaf.split_leaf(25, data_at(25));
        assert_eq!(leaf.keys(), vec![10, 20]);
        assert_eq!(
            moved,
            vec![(25, data_at(25)), (30, data_at(30))]
        );
    }

    #[test]
    fn sibling_pointers_default_empty_and_round_trip() {
        let mut leaf = TreeNode::<U64Key>::new_leaf(layout());
        assert_eq!(leaf.prev_sibling(), None);
        assert_eq!(leaf.next_sibling(), None);

        leaf.set_prev_sibling(Some(node_at(64)));
        leaf.set_next_sibling(Some(node_at(128)));
        assert_eq!(leaf.prev_sibling(), Some(node_at(64)));
        assert_eq!(leaf.next_sibling(), Some(node_at(128)));

        leaf.set_next_sibling(None);
        assert_eq!(leaf.next_sibling(), None);
        // Clearing a sibling never disturbs the pairs.
        assert_eq!(leaf.prev_sibling(), Some(node_at(64)));
    }

    #[test]
    fn internal_entries_round_trip() {
        let mut internal = TreeNode::<U64Key>::new_internal(layout());
        internal.set_internal_entries(
            &[10, 20],
            &[node_at(0), node_at(120), node_at(240)],
        );

        assert_eq!(internal.keys(), vec![10, 20]);
        assert_eq!(
            internal.internal_children(),
            vec![node_at(0), node_at(120), node_at(240)]
        );
        assert_eq!(internal.key_count(), 2);
    }

    #[test]
    fn transient_internal_may_hold_one_child_and_no_keys() {
        let mut internal = TreeNode::<U64Key>::new_internal(layout());
        internal.set_internal_entries(
            &[10],
            &[node_at(0), node_at(120)],
        );
        internal.set_internal_entries(&[], &[node_at(120)]);

        assert!(internal.keys().is_empty());
        assert_eq!(internal.internal_children(), vec![node_at(120)]);
    }

    #[test]
    fn internal_split_promotes_the_post_mid_key() {
        let mut internal = TreeNode::<U64Key>::new_internal(layout());
        internal.set_internal_entries(
            &[10, 20, 30],
            &[node_at(0), node_at(120), node_at(240), node_at(360)],
        );

        let (promoted, upper_keys, upper_children) = internal.split_internal(40, node_at(480));
        assert_eq!(promoted, 30);
        assert_eq!(internal.keys(), vec![10, 20]);
        assert_eq!(
            internal.internal_children(),
            vec![node_at(0), node_at(120), node_at(240)]
        );
        assert_eq!(upper_keys, vec![40]);
        assert_eq!(upper_children, vec![node_at(360), node_at(480)]);
    }

    #[test]
    fn internal_split_at_ordinal_zero_keeps_first_child() {
        let mut internal = TreeNode::<U64Key>::new_internal(layout());
        internal.set_internal_entries(
            &[20, 30, 40],
            &[node_at(0), node_at(120), node_at(240), node_at(360)],
        );

        // New separator sorts first; its child goes to its right, and
        // child zero stays in place.
        let (promoted, upper_keys, upper_children) = internal.split_internal(10, node_at(480));
        assert_eq!(promoted, 30);
        assert_eq!(internal.keys(), vec![10, 20]);
        assert_eq!(
            internal.internal_children(),
            vec![node_at(0), node_at(480), node_at(120)]
        );
        assert_eq!(upper_keys, vec![40]);
        assert_eq!(upper_children, vec![node_at(240), node_at(360)]);
    }

    #[test]
    fn degree_three_internal_split_leaves_no_empty_sibling() {
        let layout = TreeLayout::for_codec::<U64Key>(3, Pointer::BYTES);
        let mut internal = TreeNode::<U64Key>::new_internal(layout);
        internal.set_internal_entries(
            &[10, 20],
            &[node_at(0), node_at(80), node_at(160)],
        );

        let (promoted, upper_keys, upper_children) = internal.split_internal(30, node_at(240));
        assert_eq!(promoted, 20);
        assert_eq!(internal.keys(), vec![10]);
        assert_eq!(upper_keys, vec![30]);
        assert_eq!(internal.internal_children().len(), 2);
        assert_eq!(upper_children, vec![node_at(160), node_at(240)]);
    }

    #[test]
    fn persisted_bytes_rebuild_the_same_node() {
        let mut leaf = TreeNode::<U64Key>::new_leaf(layout());
        leaf.set_leaf_key_values(&[(5, data_at(50)), (6, data_at(60))]);
        leaf.set_root(true);
        leaf.set_next_sibling(Some(node_at(240)));

        let data = NodeData::new(node_at(0), leaf.bytes().to_vec());
        let reread = TreeNode::<U64Key>::from_data(layout(), data);
        assert!(reread.is_leaf() && reread.is_root());
        assert_eq!(reread.pointer(), Some(node_at(0)));
        assert_eq!(reread.leaf_key_values(), vec![(5, data_at(50)), (6, data_at(60))]);
        assert_eq!(reread.next_sibling(), Some(node_at(240)));
    }
}
