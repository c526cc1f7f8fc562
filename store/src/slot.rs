//! Slot address arithmetic.

use primitive_types::U256;
use sha3::{Digest, Keccak256};

use veil_types::{BlockNumber, Word};

/// `base + delta` as 256-bit big-endian integers, wrapping on overflow.
pub fn offset(base: &Word, delta: u64) -> Word {
    let (sum, _) = U256::from_big_endian(base.as_bytes()).overflowing_add(U256::from(delta));
    let mut out = [0u8; 32];
    sum.to_big_endian(&mut out);
    Word::new(out)
}

/// Base address of a hashed per-block namespace.
///
/// The preimage is the block number as a 32-byte big-endian word with `tag`
/// written over its leading bytes. Block numbers never reach the tag bytes.
pub fn namespace_base(tag: &[u8], block: BlockNumber) -> Word {
    debug_assert!(tag.len() <= 24, "namespace tag would overlap the block number");
    let mut preimage = *Word::from_u64(block).as_bytes();
    preimage[..tag.len()].copy_from_slice(tag);
    let digest = Keccak256::digest(preimage);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Word::new(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_carries_across_bytes() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0xff;
        let next = offset(&Word::new(bytes), 1);
        assert_eq!(next.as_bytes()[30], 1);
        assert_eq!(next.as_bytes()[31], 0);
    }

    #[test]
    fn offset_wraps_at_the_top() {
        let max = Word::new([0xff; 32]);
        assert_eq!(offset(&max, 1), Word::ZERO);
    }

    #[test]
    fn namespaces_are_distinct() {
        assert_ne!(namespace_base(b"main", 7), namespace_base(b"bigscalar", 7));
        assert_ne!(namespace_base(b"main", 7), namespace_base(b"main", 8));
        assert_eq!(namespace_base(b"main", 7), namespace_base(b"main", 7));
    }

    #[test]
    fn namespace_is_keccak_of_tagged_word() {
        let mut preimage = [0u8; 32];
        preimage[..4].copy_from_slice(b"main");
        preimage[31] = 1;
        let expected = Keccak256::digest(preimage);
        assert_eq!(&namespace_base(b"main", 1).as_bytes()[..], &expected[..]);
    }
}
