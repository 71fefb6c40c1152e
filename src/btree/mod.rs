//! # B+Tree Index Implementation
//!
//! This module implements the disk-backed B+Tree behind scute's unique
//! indexes. Nodes live in fixed-size storage slots addressed by 13-byte
//! [`Pointer`]s; keys are typed through a [`KeyCodec`] and values are data
//! pointers into whatever record store the caller maintains.
//!
//! ## Architecture Overview
//!
//! ```text
//!                      ┌─────────────┐
//!                      │ root (int.) │          internal: keys + children
//!                      └──┬───────┬──┘
//!                ┌────────┘       └────────┐
//!            ┌───┴────┐              ┌─────┴──┐
//!            │ int.   │              │ int.   │
//!            └─┬────┬─┘              └─┬────┬─┘
//!         ┌────┘    └───┐         ┌────┘    └───┐
//!      ┌──┴──┐      ┌───┴─┐     ┌─┴───┐     ┌───┴─┐
//!      │leaf │ ⇄    │leaf │  ⇄  │leaf │  ⇄  │leaf │   doubly linked chain
//!      └─────┘      └─────┘     └─────┘     └─────┘
//! ```
//!
//! Every key lives in exactly one leaf; internal keys are separators
//! only. Leaves form a doubly linked chain in key order, which is what
//! `size` and the sorted iterators walk. Descent is binary search with
//! equal keys routed right, so a separator equal to the probe always
//! leads to the leaf holding it.
//!
//! ## Module Organization
//!
//! - `key`: the [`KeyCodec`] trait and the fixed-width integer codecs
//! - `node`: slot layout, [`TreeLayout`] arithmetic and node accessors
//! - `navigation`: descent paths, edge leaves and the leaf-chain cursor
//! - `insert`: create operation with leaf/internal splits
//! - `delete`: remove operation with borrow, merge and root collapse
//! - `index`: the public [`UniqueTreeIndex`] surface and lock registry
//!
//! ## Thread Safety
//!
//! Tree nodes are plain byte buffers and carry no locks. Consistency
//! comes from the per-index `RwLock` handed out by [`LockRegistry`]:
//! one writer or many readers per index at a time.
//!
//! [`Pointer`]: crate::storage::Pointer

mod delete;
mod index;
mod insert;
mod key;
mod navigation;
mod node;

pub use index::{LockRegistry, SortedIter, UniqueTreeIndex};
pub use key::{CompactU32Key, CompactU64Key, KeyCodec, U64Key};
pub use navigation::Direction;
pub use node::TreeLayout;
