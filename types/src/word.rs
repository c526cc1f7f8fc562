//! 32-byte storage words and ciphertext handles.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CiphertextType;

/// A 32-byte chain storage word. Used both as a slot address and as a slot value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Word(#[serde(with = "hex::serde")] [u8; 32]);

impl Word {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Big-endian encoding of `value`, right-aligned in the word.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// The low 64 bits of the word read as a big-endian integer.
    pub fn low_u64(&self) -> u64 {
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&self.0[24..]);
        u64::from_be_bytes(tail)
    }

    /// Place `bytes` right-aligned in a word. Inputs longer than 32 bytes
    /// keep only their trailing 32 bytes.
    pub fn right_aligned(bytes: &[u8]) -> Self {
        let mut word = [0u8; 32];
        let take = bytes.len().min(32);
        word[32 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
        Self(word)
    }
}

impl From<[u8; 32]> for Word {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word({})", hex::encode(self.0))
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// A 32-byte identifier naming a ciphertext value.
///
/// Handles are the join key between computation operands, cache entries and
/// chain storage: the durable ciphertext for a handle is stored at the slot
/// whose address equals the handle. Byte 30 carries the ciphertext type tag.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Handle(#[serde(with = "hex::serde")] [u8; 32]);

impl Handle {
    pub const ZERO: Self = Self([0u8; 32]);

    /// Index of the byte carrying the ciphertext type tag.
    pub const TYPE_BYTE: usize = 30;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Ciphertext type encoded in the handle, if the tag is known.
    pub fn ct_type(&self) -> Option<CiphertextType> {
        CiphertextType::from_code(self.0[Self::TYPE_BYTE])
    }

    /// The storage slot at which this handle's ciphertext is persisted.
    pub fn as_word(&self) -> Word {
        Word::new(self.0)
    }

    /// Abbreviated form for log lines: first and last three bytes.
    pub fn short(&self) -> String {
        format!(
            "{}..{}",
            hex::encode(&self.0[..3]),
            hex::encode(&self.0[29..])
        )
    }
}

impl From<Word> for Handle {
    fn from(word: Word) -> Self {
        Self(*word.as_bytes())
    }
}

impl From<Handle> for Word {
    fn from(handle: Handle) -> Self {
        Word::new(handle.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.short())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_round_trip_is_big_endian() {
        let word = Word::from_u64(0x0102_0304);
        assert_eq!(word.as_bytes()[28..], [1, 2, 3, 4]);
        assert_eq!(word.low_u64(), 0x0102_0304);
    }

    #[test]
    fn right_aligned_pads_on_the_left() {
        let word = Word::right_aligned(&[0xaa, 0xbb]);
        assert_eq!(word.as_bytes()[30], 0xaa);
        assert_eq!(word.as_bytes()[31], 0xbb);
        assert!(word.as_bytes()[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn right_aligned_keeps_trailing_bytes_of_long_input() {
        let mut long = vec![0xffu8; 8];
        long.extend_from_slice(&[7u8; 32]);
        assert_eq!(Word::right_aligned(&long), Word::new([7u8; 32]));
    }

    #[test]
    fn handle_type_byte() {
        let mut bytes = [0u8; 32];
        bytes[Handle::TYPE_BYTE] = 5;
        assert_eq!(Handle::new(bytes).ct_type(), Some(CiphertextType::Uint64));

        bytes[Handle::TYPE_BYTE] = 200;
        assert_eq!(Handle::new(bytes).ct_type(), None);
    }

    #[test]
    fn handle_serializes_as_hex() {
        let handle = Handle::new([0xab; 32]);
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: Handle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, handle);
    }
}
