//! # Disk Pointers
//!
//! A [`Pointer`] is the engine's tagged disk locator: one kind byte, an
//! 8-byte offset, and a 4-byte chunk identifier, 13 bytes on disk. The same
//! type references data records (from leaf values), index nodes (child and
//! sibling links), and allocation slots.
//!
//! ## Binary Layout
//!
//! ```text
//! ┌──────┬────────────────────┬──────────────┐
//! │ kind │ offset (u64 LE)    │ chunk (u32)  │
//! │ 1 B  │ 8 B                │ 4 B          │
//! └──────┴────────────────────┴──────────────┘
//! kind: 0x01 = data record, 0x02 = index node, 0x00 = no pointer
//! ```
//!
//! Node pointers are relative to the beginning of their index's region
//! inside the chunk; only the storage manager translates them to absolute
//! file offsets. A zero kind byte marks an empty pointer slot, which is how
//! sparse child slots and freed allocation slots are detected.

use std::cmp::Ordering;

use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// What a pointer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PointerKind {
    /// A record in the external data store.
    Data = 0x01,
    /// An index node slot.
    Node = 0x02,
}

/// On-disk image of a pointer. Field order matches the binary layout; all
/// fields are alignment-1 so the struct is exactly 13 bytes with no padding.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct PointerImage {
    kind: u8,
    offset: U64,
    chunk: U32,
}

const _: () = assert!(core::mem::size_of::<PointerImage>() == Pointer::BYTES);

/// Tagged disk locator. Immutable value type; ordering is by
/// `(chunk, offset)` so pointers sort in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub kind: PointerKind,
    pub offset: u64,
    pub chunk: u32,
}

impl Pointer {
    pub const BYTES: usize = 13;

    pub fn new_data(offset: u64, chunk: u32) -> Self {
        Self { kind: PointerKind::Data, offset, chunk }
    }

    pub fn new_node(offset: u64, chunk: u32) -> Self {
        Self { kind: PointerKind::Node, offset, chunk }
    }

    pub fn is_data(&self) -> bool {
        self.kind == PointerKind::Data
    }

    pub fn is_node(&self) -> bool {
        self.kind == PointerKind::Node
    }

    pub fn to_bytes(&self) -> [u8; Self::BYTES] {
        let image = PointerImage {
            kind: self.kind as u8,
            offset: U64::new(self.offset),
            chunk: U32::new(self.chunk),
        };
        let mut bytes = [0u8; Self::BYTES];
        bytes.copy_from_slice(image.as_bytes());
        bytes
    }

    /// Serializes into the first [`Pointer::BYTES`] of `dst`.
    pub fn write_to(&self, dst: &mut [u8]) {
        dst[..Self::BYTES].copy_from_slice(&self.to_bytes());
    }

    /// Reads a pointer from the first [`Pointer::BYTES`] of `src`. Returns
    /// `None` when the slot is empty (zero kind byte) or holds an
    /// unrecognized kind.
    pub fn from_slice(src: &[u8]) -> Option<Self> {
        let image = PointerImage::read_from_bytes(&src[..Self::BYTES]).ok()?;
        let kind = match image.kind {
            0x01 => PointerKind::Data,
            0x02 => PointerKind::Node,
            _ => return None,
        };
        Some(Self {
            kind,
            offset: image.offset.get(),
            chunk: image.chunk.get(),
        })
    }

    /// Whether the first [`Pointer::BYTES`] of `src` hold no pointer.
    pub fn slot_is_empty(src: &[u8]) -> bool {
        src[0] == 0
    }
}

impl PartialOrd for Pointer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pointer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chunk
            .cmp(&other.chunk)
            .then(self.offset.cmp(&other.offset))
            .then((self.kind as u8).cmp(&(other.kind as u8)))
    }
}

impl std::fmt::Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.kind {
            PointerKind::Data => "data",
            PointerKind::Node => "node",
        };
        write!(f, "{}@{}:{}", tag, self.chunk, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let pointer = Pointer::new_node(0x1122334455, 7);
        let bytes = pointer.to_bytes();
        assert_eq!(bytes.len(), Pointer::BYTES);
        assert_eq!(bytes[0], 0x02);
        assert_eq!(Pointer::from_slice(&bytes), Some(pointer));
    }

    #[test]
    fn zero_kind_reads_as_absent() {
        let bytes = [0u8; Pointer::BYTES];
        assert!(Pointer::slot_is_empty(&bytes));
        assert_eq!(Pointer::from_slice(&bytes), None);
    }

    #[test]
    fn orders_by_chunk_then_offset() {
        let a = Pointer::new_node(500, 0);
        let b = Pointer::new_node(8, 1);
        let c = Pointer::new_node(16, 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn data_and_node_kinds_are_distinct() {
        let data = Pointer::new_data(64, 0);
        let node = Pointer::new_node(64, 0);
        assert!(data.is_data() && !data.is_node());
        assert!(node.is_node() && !node.is_data());
        assert_ne!(data, node);
        assert_eq!(data.to_bytes()[0], 0x01);
    }
}
