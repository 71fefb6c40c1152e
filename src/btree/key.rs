//! # Key Codecs
//!
//! A [`KeyCodec`] fixes how a key type lays out inside node slots. The
//! codec is chosen per index at construction and becomes part of the
//! node geometry: every key field in every slot of that index is exactly
//! [`KeyCodec::KEY_SIZE`] bytes.
//!
//! ## Presence Probing
//!
//! Nodes detect occupied key slots by content: a slot holds a key when
//! its key bytes or the value bytes right after them are non-zero. That
//! rule shapes the two encoding families here:
//!
//! - [`U64Key`] spends a leading `0x01` flag byte, so the encoding of
//!   zero is still non-zero on disk and the full `u64` range is usable.
//! - [`CompactU64Key`] and [`CompactU32Key`] store the raw little-endian
//!   value with no flag. Zero would be indistinguishable from an empty
//!   slot, so those codecs reject it via [`KeyCodec::is_valid`].

use std::fmt::Debug;

/// Fixed-width binary encoding for an index key type.
///
/// Implementations are zero-sized; all methods are associated functions
/// so the codec can ride along as a type parameter without occupying
/// space in node or index structs.
pub trait KeyCodec: 'static {
    type Key: Ord + Clone + Debug + Send + Sync;

    /// Encoded width in bytes. Every key slot in the node layout is this
    /// wide.
    const KEY_SIZE: usize;

    /// Writes `key` into the first [`Self::KEY_SIZE`] bytes of `dst`.
    fn encode(key: &Self::Key, dst: &mut [u8]);

    /// Reads a key from the first [`Self::KEY_SIZE`] bytes of `src`.
    fn decode(src: &[u8]) -> Self::Key;

    /// Whether `key` survives the round trip through this codec without
    /// colliding with the all-zero empty-slot image.
    fn is_valid(key: &Self::Key) -> bool;
}

/// `u64` keys with a leading `0x01` flag byte; 9 bytes on disk. Accepts
/// the whole `u64` range, including zero.
#[derive(Debug)]
pub struct U64Key;

impl KeyCodec for U64Key {
    type Key = u64;

    const KEY_SIZE: usize = 9;

    fn encode(key: &u64, dst: &mut [u8]) {
        dst[0] = 0x01;
        dst[1..9].copy_from_slice(&key.to_le_bytes());
    }

    fn decode(src: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&src[1..9]);
        u64::from_le_bytes(raw)
    }

    fn is_valid(_key: &u64) -> bool {
        true
    }
}

/// `u64` keys stored as the raw little-endian value; 8 bytes on disk.
/// Zero is rejected because its encoding is all zeros.
pub struct CompactU64Key;

impl KeyCodec for CompactU64Key {
    type Key = u64;

    const KEY_SIZE: usize = 8;

    fn encode(key: &u64, dst: &mut [u8]) {
        dst[..8].copy_from_slice(&key.to_le_bytes());
    }

    fn decode(src: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&src[..8]);
        u64::from_le_bytes(raw)
    }

    fn is_valid(key: &u64) -> bool {
        *key != 0
    }
}

/// `u32` keys stored as the raw little-endian value; 4 bytes on disk.
/// Zero is rejected because its encoding is all zeros.
pub struct CompactU32Key;

impl KeyCodec for CompactU32Key {
    type Key = u32;

    const KEY_SIZE: usize = 4;

    fn encode(key: &u32, dst: &mut [u8]) {
        dst[..4].copy_from_slice(&key.to_le_bytes());
    }

    fn decode(src: &[u8]) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&src[..4]);
        u32::from_le_bytes(raw)
    }

    fn is_valid(key: &u32) -> bool {
        *key != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_key_writes_flag_then_le_value() {
        let mut buf = [0u8; U64Key::KEY_SIZE];
        U64Key::encode(&0x0102_0304, &mut buf);
        assert_eq!(buf[0], 0x01);
        assert_eq!(&buf[1..5], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(U64Key::decode(&buf), 0x0102_0304);
    }

    #[test]
    fn u64_key_zero_is_valid_and_non_zero_on_disk() {
        assert!(U64Key::is_valid(&0));
        let mut buf = [0u8; U64Key::KEY_SIZE];
        U64Key::encode(&0, &mut buf);
        assert!(buf.iter().any(|b| *b != 0));
        assert_eq!(U64Key::decode(&buf), 0);
    }

    #[test]
    fn compact_u64_round_trips_but_rejects_zero() {
        let mut buf = [0u8; CompactU64Key::KEY_SIZE];
        CompactU64Key::encode(&u64::MAX, &mut buf);
        assert_eq!(CompactU64Key::decode(&buf), u64::MAX);

        assert!(!CompactU64Key::is_valid(&0));
        assert!(CompactU64Key::is_valid(&1));
    }

    #[test]
    fn compact_u32_round_trips_but_rejects_zero() {
        let mut buf = [0u8; CompactU32Key::KEY_SIZE];
        CompactU32Key::encode(&7, &mut buf);
        assert_eq!(&buf, &[7, 0, 0, 0]);
        assert_eq!(CompactU32Key::decode(&buf), 7);

        assert!(!CompactU32Key::is_valid(&0));
    }

    #[test]
    fn compact_zero_encoding_collides_with_empty_slot() {
        let mut buf = [0xFFu8; CompactU64Key::KEY_SIZE];
        CompactU64Key::encode(&0, &mut buf);
        assert!(buf.iter().all(|b| *b == 0));
    }
}
