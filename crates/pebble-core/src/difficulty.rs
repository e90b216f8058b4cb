//! Compact-bits difficulty encoding, proof-of-work checks, and block work.
//!
//! Targets are 256-bit unsigned integers encoded in headers using the
//! Bitcoin "compact bits" form: the high byte is a base-256 exponent, the
//! low 23 bits a mantissa, and bit 23 a sign bit that must never be set.
//! A block hash satisfies the target when, interpreted as a big-endian
//! 256-bit integer, it is at most the decoded target.
//!
//! Work is the expected number of hashes to find a block at a target:
//! `2^256 / (target + 1)`, accumulated per chain in a 256-bit sum that
//! decides best-tip selection.

use primitive_types::U256;

use crate::error::DifficultyError;
use crate::hash::Hash256;

/// Decode compact bits into a 256-bit target.
///
/// Fails when the sign bit is set or the mantissa shifted by the exponent
/// exceeds 256 bits.
pub fn bits_to_target(bits: u32) -> Result<U256, DifficultyError> {
    if bits & 0x0080_0000 != 0 {
        return Err(DifficultyError::NegativeMantissa(bits));
    }
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007F_FFFF;

    if mantissa == 0 {
        return Ok(U256::zero());
    }
    if exponent <= 3 {
        return Ok(U256::from(mantissa >> (8 * (3 - exponent))));
    }

    let shift = 8 * (exponent - 3);
    let mantissa_bits = (32 - mantissa.leading_zeros()) as usize;
    if shift + mantissa_bits > 256 {
        return Err(DifficultyError::Overflow(bits));
    }
    Ok(U256::from(mantissa) << shift)
}

/// Encode a 256-bit target into normalized compact bits.
///
/// The inverse of [`bits_to_target`] up to normalization: the returned
/// form always has a clear sign bit and a minimal exponent.
pub fn target_to_bits(target: U256) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let mut size = target.bits().div_ceil(8);
    let mut compact: u32 = if size <= 3 {
        target.low_u32() << (8 * (3 - size))
    } else {
        (target >> (8 * (size - 3))).low_u32()
    };

    // Normalize: keep the sign bit clear.
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    ((size as u32) << 24) | compact
}

/// Check a block hash against a compact-bits target.
///
/// The hash is interpreted as a big-endian 256-bit unsigned integer.
/// Undecodable bits never validate.
pub fn meets_target(hash: &Hash256, bits: u32) -> bool {
    match bits_to_target(bits) {
        Ok(target) => U256::from_big_endian(hash.as_bytes()) <= target,
        Err(_) => false,
    }
}

/// Expected work to produce a block at the given bits:
/// `⌊2^256 / (target + 1)⌋`.
///
/// Computed as `(!target / (target + 1)) + 1`, which avoids the 257-bit
/// numerator. Undecodable bits contribute zero work; a zero target (which
/// no hash can meet) saturates at `U256::MAX`.
pub fn work(bits: u32) -> U256 {
    let Ok(target) = bits_to_target(bits) else {
        return U256::zero();
    };
    if target.is_zero() {
        return U256::MAX;
    }
    (!target / (target + U256::one())) + U256::one()
}
