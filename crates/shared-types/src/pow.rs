//! Compact target encoding and proof-of-work arithmetic.

use primitive_types::U256;

use crate::entities::Hash;

/// Easiest target allowed on regression-test style networks (`0x207fffff`).
pub const REGTEST_POW_LIMIT_BITS: u32 = 0x207f_ffff;

/// Result of decoding a compact target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactTarget {
    pub target: U256,
    pub negative: bool,
    pub overflow: bool,
}

/// Decode the compact `bits` representation of a target.
pub fn decode_compact(bits: u32) -> CompactTarget {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;

    let negative = word != 0 && (bits & 0x0080_0000) != 0;
    let overflow = word != 0
        && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));

    let target = if overflow {
        U256::zero()
    } else if size <= 3 {
        word >>= 8 * (3 - size);
        U256::from(word)
    } else {
        U256::from(word) << (8 * (size - 3)) as usize
    };

    CompactTarget {
        target,
        negative,
        overflow,
    }
}

/// Encode a target into compact form.
pub fn encode_compact(target: U256) -> u32 {
    let mut size = (target.bits() as u32 + 7) / 8;
    let mut compact: u32 = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3)) as usize).low_u64() as u32
    };

    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | (size << 24)
}

/// Work represented by a header with the given `bits`: `2^256 / (target + 1)`.
pub fn block_proof(bits: u32) -> U256 {
    let decoded = decode_compact(bits);
    if decoded.negative || decoded.overflow || decoded.target.is_zero() {
        return U256::zero();
    }
    // 2^256 does not fit in U256; (~target / (target + 1)) + 1 is equivalent.
    (!decoded.target / (decoded.target + U256::one())) + U256::one()
}

/// Check a block hash against its claimed target and the network limit.
pub fn check_proof_of_work(hash: &Hash, bits: u32, pow_limit: &U256) -> bool {
    let decoded = decode_compact(bits);
    if decoded.negative
        || decoded.overflow
        || decoded.target.is_zero()
        || decoded.target > *pow_limit
    {
        return false;
    }
    U256::from_little_endian(hash) <= decoded.target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regtest_limit_work_is_two() {
        assert_eq!(block_proof(REGTEST_POW_LIMIT_BITS), U256::from(2));
    }

    #[test]
    fn test_harder_target_has_more_work() {
        assert_eq!(block_proof(0x1f7f_ffff), U256::from(512));
    }

    #[test]
    fn test_compact_roundtrip_known_values() {
        for bits in [0x1d00_ffffu32, 0x207f_ffff, 0x1f7f_ffff, 0x1b04_04cb] {
            assert_eq!(encode_compact(decode_compact(bits).target), bits);
        }
    }

    #[test]
    fn test_negative_and_overflow_flags() {
        assert!(decode_compact(0x0480_0001).negative);
        assert!(decode_compact(0xff12_3456).overflow);
        assert_eq!(block_proof(0xff12_3456), U256::zero());
    }

    #[test]
    fn test_pow_check_rejects_target_above_limit() {
        let limit = decode_compact(0x1f7f_ffff).target;
        assert!(!check_proof_of_work(&[0u8; 32], REGTEST_POW_LIMIT_BITS, &limit));
        assert!(check_proof_of_work(&[0u8; 32], 0x1f7f_ffff, &limit));
        assert!(!check_proof_of_work(&[0xff; 32], 0x1f7f_ffff, &limit));
    }
}
