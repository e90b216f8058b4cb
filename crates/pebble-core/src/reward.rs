//! Block subsidy schedule and halving logic.
//!
//! The subsidy starts at [`INITIAL_SUBSIDY`] (50 PBL) and halves every
//! [`HALVING_INTERVAL`] (210,000) blocks, reaching zero once the shifted
//! value truncates to nothing (and unconditionally from the 64th halving,
//! guarding the shift).

use crate::constants::{HALVING_INTERVAL, INITIAL_SUBSIDY};

/// The block subsidy in sats for a given height.
pub fn subsidy(height: u32) -> u64 {
    let epoch = halving_epoch(height);
    if epoch >= 64 {
        return 0;
    }
    INITIAL_SUBSIDY >> epoch
}

/// Which halving epoch a height falls in: `height / HALVING_INTERVAL`.
pub fn halving_epoch(height: u32) -> u32 {
    height / HALVING_INTERVAL
}

/// Total issuance from genesis through `height` inclusive.
///
/// Walks the epoch structure rather than individual blocks. This is the
/// expected sum of UTXO values on a chain with no burnt fees.
pub fn cumulative_issuance(height: u32) -> u64 {
    let final_epoch = halving_epoch(height);
    let mut total: u64 = 0;

    for epoch in 0..=final_epoch {
        let reward = subsidy(epoch * HALVING_INTERVAL);
        if reward == 0 {
            break;
        }
        let start = epoch as u64 * HALVING_INTERVAL as u64;
        let end = if epoch == final_epoch {
            height as u64
        } else {
            (epoch as u64 + 1) * HALVING_INTERVAL as u64 - 1
        };
        total = total.saturating_add(reward.saturating_mul(end - start + 1));
    }

    total
}
