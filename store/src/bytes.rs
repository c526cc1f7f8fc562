//! Length-prefixed byte arrays in slot storage.
//!
//! Layout at base address `A`:
//! - `A`: length in bytes, big-endian in the low bytes of the word
//! - `A+1 ..`: the payload in 32-byte chunks; a short final chunk is
//!   right-aligned in its word
//!
//! An unset base slot reads back as an empty array.

use veil_types::{Address, Word};

use crate::slot::offset;
use crate::{ChainStorage, StoreError};

/// Largest byte array [`read_bytes`] will reassemble. Larger length words are
/// treated as corrupt rather than walked.
pub const MAX_BYTE_ARRAY_LEN: u64 = 64 * 1024 * 1024;

const CHUNK: usize = 32;

pub fn put_bytes<S: ChainStorage + ?Sized>(
    storage: &mut S,
    contract: &Address,
    at: &Word,
    bytes: &[u8],
) {
    storage.set_state(contract, at, Word::from_u64(bytes.len() as u64));
    for (i, chunk) in bytes.chunks(CHUNK).enumerate() {
        let slot = offset(at, i as u64 + 1);
        storage.set_state(contract, &slot, Word::right_aligned(chunk));
    }
}

pub fn read_bytes<S: ChainStorage + ?Sized>(
    storage: &S,
    contract: &Address,
    at: &Word,
) -> Result<Vec<u8>, StoreError> {
    let header = storage.get_state(contract, at);
    if header.as_bytes()[..24].iter().any(|b| *b != 0) {
        return Err(StoreError::ByteArrayTooLong(u64::MAX));
    }
    let len = header.low_u64();
    if len > MAX_BYTE_ARRAY_LEN {
        return Err(StoreError::ByteArrayTooLong(len));
    }

    let len = len as usize;
    let mut out = Vec::with_capacity(len);
    let mut chunk_index = 1u64;
    while out.len() < len {
        let word = storage.get_state(contract, &offset(at, chunk_index));
        let take = (len - out.len()).min(CHUNK);
        out.extend_from_slice(&word.as_bytes()[CHUNK - take..]);
        chunk_index += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapStorage(HashMap<(Address, Word), Word>);

    impl ChainStorage for MapStorage {
        fn get_state(&self, contract: &Address, slot: &Word) -> Word {
            self.0.get(&(*contract, *slot)).copied().unwrap_or_default()
        }

        fn set_state(&mut self, contract: &Address, slot: &Word, value: Word) {
            if value.is_zero() {
                self.0.remove(&(*contract, *slot));
            } else {
                self.0.insert((*contract, *slot), value);
            }
        }
    }

    fn contract() -> Address {
        Address::from_low_u64(0x70)
    }

    #[test]
    fn unset_reads_empty() {
        let storage = MapStorage::default();
        assert!(read_bytes(&storage, &contract(), &Word::new([5; 32]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn short_tail_is_right_aligned() {
        let mut storage = MapStorage::default();
        let at = Word::from_u64(1000);
        let payload: Vec<u8> = (0u8..33).collect();
        put_bytes(&mut storage, &contract(), &at, &payload);

        assert_eq!(storage.get_state(&contract(), &at).low_u64(), 33);
        let tail = storage.get_state(&contract(), &Word::from_u64(1002));
        assert_eq!(tail.as_bytes()[31], 32);
        assert!(tail.as_bytes()[..31].iter().all(|b| *b == 0));
        assert_eq!(read_bytes(&storage, &contract(), &at).unwrap(), payload);
    }

    #[test]
    fn oversized_header_is_rejected() {
        let mut storage = MapStorage::default();
        let at = Word::from_u64(7);
        storage.set_state(&contract(), &at, Word::new([0xff; 32]));
        assert!(matches!(
            read_bytes(&storage, &contract(), &at),
            Err(StoreError::ByteArrayTooLong(_))
        ));

        storage.set_state(&contract(), &at, Word::from_u64(MAX_BYTE_ARRAY_LEN + 1));
        assert_eq!(
            read_bytes(&storage, &contract(), &at),
            Err(StoreError::ByteArrayTooLong(MAX_BYTE_ARRAY_LEN + 1))
        );
    }
}
