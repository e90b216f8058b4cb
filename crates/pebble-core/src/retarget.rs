//! Window-based difficulty retargeting.
//!
//! Every [`ChainParams::retarget_interval`] blocks the target is rescaled
//! by the ratio of actual to expected elapsed time over the closing window,
//! clamped to `[1/4, 4]` per adjustment. All arithmetic is 256-bit target
//! arithmetic; the result is capped at the network's proof-of-work floor.
//!
//! Three algorithms are available. They differ only in how the "actual"
//! timespan is derived from the window, and each is a pure function of its
//! inputs, so every node computes identical next bits:
//!
//! - [`Basic`](RetargetAlgorithm::Basic): raw span between the window's
//!   first and last timestamps.
//! - [`Linear`](RetargetAlgorithm::Linear): mean per-block solve time,
//!   scaled back to a window span. Smooths single outlier timestamps.
//! - [`Ema`](RetargetAlgorithm::Ema): exponential moving average of solve
//!   times (α = 1/8, fixed-point), scaled to a window span. Weighs recent
//!   blocks more heavily.

use primitive_types::U256;

use crate::constants::ChainParams;
use crate::difficulty::{bits_to_target, target_to_bits};

/// Maximum per-window adjustment factor.
pub const MAX_ADJUSTMENT_FACTOR: u64 = 4;

/// How the actual timespan is derived from the retarget window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RetargetAlgorithm {
    Basic,
    Linear,
    Ema,
}

/// A header's retarget-relevant fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    pub timestamp: u64,
    pub bits: u32,
}

/// Compute the expected bits for the block at `height`.
///
/// `window` holds the most recent headers on the chain being extended,
/// oldest first, ending at `height - 1`; callers pass up to
/// `retarget_interval` of them. Heights that are not a multiple of the
/// interval (and windows too short to measure) return the parent's bits
/// unchanged; height 0 returns the proof-of-work floor.
pub fn next_bits(params: &ChainParams, height: u32, window: &[HeaderInfo]) -> u32 {
    let Some(last) = window.last() else {
        return params.pow_limit_bits;
    };
    if height == 0 || height % params.retarget_interval != 0 {
        return last.bits;
    }

    let intervals = (window.len() - 1) as u64;
    let expected = params.target_block_time.saturating_mul(intervals);
    if expected == 0 {
        return last.bits;
    }

    let actual = match params.retarget_algorithm {
        RetargetAlgorithm::Basic => {
            last.timestamp.saturating_sub(window[0].timestamp)
        }
        RetargetAlgorithm::Linear => {
            mean_solve_time(window).saturating_mul(intervals)
        }
        RetargetAlgorithm::Ema => {
            ema_solve_time(window).saturating_mul(intervals)
        }
    };

    let clamped = actual.clamp(expected / MAX_ADJUSTMENT_FACTOR, expected.saturating_mul(MAX_ADJUSTMENT_FACTOR));

    let pow_limit = bits_to_target(params.pow_limit_bits).unwrap_or(U256::MAX);
    let prev_target = bits_to_target(last.bits).unwrap_or(pow_limit);

    // new_target = prev_target * clamped / expected, computed divide-first
    // so a near-limit target times a >1 ratio cannot leave 256 bits:
    //   (q * e + r) * c / e  =  q * c + r * c / e,   r < e ≤ 2^64
    // An overflow in q * c means the true result exceeds the floor anyway.
    let expected_u = U256::from(expected);
    let clamped_u = U256::from(clamped);
    let quotient = prev_target / expected_u;
    let remainder = prev_target % expected_u;
    let new_target = quotient
        .checked_mul(clamped_u)
        .and_then(|main| main.checked_add(remainder * clamped_u / expected_u))
        .unwrap_or(pow_limit);

    target_to_bits(new_target.min(pow_limit))
}

/// Mean per-block solve time over the window (integer division).
fn mean_solve_time(window: &[HeaderInfo]) -> u64 {
    let diffs = solve_times(window);
    if diffs.is_empty() {
        return 0;
    }
    diffs.iter().sum::<u64>() / diffs.len() as u64
}

/// Fixed-point exponential moving average of solve times, α = 1/8.
fn ema_solve_time(window: &[HeaderInfo]) -> u64 {
    let diffs = solve_times(window);
    let Some(&first) = diffs.first() else {
        return 0;
    };
    // Scale by 8 to keep fractional precision through the recurrence.
    let mut ema8 = first * 8;
    for &d in &diffs[1..] {
        ema8 = (ema8 * 7) / 8 + d;
    }
    ema8 / 8
}

/// Per-block solve times; a non-increasing timestamp counts as zero.
fn solve_times(window: &[HeaderInfo]) -> Vec<u64> {
    window
        .windows(2)
        .map(|pair| pair[1].timestamp.saturating_sub(pair[0].timestamp))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ChainParams, NetworkType};
    use crate::types::Script;

    /// Params with a 5-block interval and 8-second blocks: a full closing
    /// window has 5 headers, 4 intervals, expected span 32 seconds.
    fn params(algorithm: RetargetAlgorithm) -> ChainParams {
        ChainParams {
            network: NetworkType::Regtest,
            pow_limit_bits: 0x207f_ffff,
            retarget_interval: 5,
            target_block_time: 8,
            retarget_algorithm: algorithm,
            genesis_timestamp: 0,
            genesis_script: Script::burn(),
            p2p_port: 0,
            rpc_port: 0,
        }
    }

    const PREV_BITS: u32 = 0x1b00_ffff;

    fn window(start: u64, spacing: u64, count: usize) -> Vec<HeaderInfo> {
        (0..count)
            .map(|i| HeaderInfo { timestamp: start + i as u64 * spacing, bits: PREV_BITS })
            .collect()
    }

    fn scaled(bits: u32, num: u64, den: u64) -> u32 {
        let t = bits_to_target(bits).unwrap();
        target_to_bits(t * U256::from(num) / U256::from(den))
    }

    // ------------------------------------------------------------------
    // Cadence
    // ------------------------------------------------------------------

    #[test]
    fn off_interval_heights_keep_parent_bits() {
        let p = params(RetargetAlgorithm::Basic);
        let w = window(1_000, 1, 5); // way too fast, but height 7 is off-cadence
        assert_eq!(next_bits(&p, 7, &w), PREV_BITS);
    }

    #[test]
    fn empty_window_returns_pow_limit() {
        let p = params(RetargetAlgorithm::Basic);
        assert_eq!(next_bits(&p, 0, &[]), p.pow_limit_bits);
        assert_eq!(next_bits(&p, 5, &[]), p.pow_limit_bits);
    }

    #[test]
    fn single_header_window_keeps_bits() {
        let p = params(RetargetAlgorithm::Basic);
        let w = window(1_000, 8, 1);
        assert_eq!(next_bits(&p, 5, &w), PREV_BITS);
    }

    // ------------------------------------------------------------------
    // Basic: proportional adjustment
    // ------------------------------------------------------------------

    #[test]
    fn on_pace_window_keeps_target() {
        let p = params(RetargetAlgorithm::Basic);
        let w = window(1_000, 8, 5); // actual 32 == expected 32
        assert_eq!(next_bits(&p, 5, &w), PREV_BITS);
    }

    #[test]
    fn slow_blocks_double_target() {
        let p = params(RetargetAlgorithm::Basic);
        let w = window(1_000, 16, 5); // actual 64 = 2x expected
        assert_eq!(next_bits(&p, 5, &w), scaled(PREV_BITS, 2, 1));
    }

    #[test]
    fn fast_blocks_halve_target() {
        let p = params(RetargetAlgorithm::Basic);
        let w = window(1_000, 4, 5); // actual 16 = expected / 2
        assert_eq!(next_bits(&p, 5, &w), scaled(PREV_BITS, 1, 2));
    }

    // ------------------------------------------------------------------
    // Clamping
    // ------------------------------------------------------------------

    #[test]
    fn slow_window_clamps_at_4x() {
        let p = params(RetargetAlgorithm::Basic);
        let w = window(1_000, 100, 5); // actual 400 >> 4x expected
        assert_eq!(next_bits(&p, 5, &w), scaled(PREV_BITS, 4, 1));
    }

    #[test]
    fn instant_window_clamps_at_quarter() {
        let p = params(RetargetAlgorithm::Basic);
        let w = window(1_000, 0, 5); // actual 0, clamped to expected / 4
        assert_eq!(next_bits(&p, 5, &w), scaled(PREV_BITS, 1, 4));
    }

    #[test]
    fn exact_4x_boundary_not_clamped() {
        let p = params(RetargetAlgorithm::Basic);
        let w = window(1_000, 32, 5); // actual 128 = exactly 4x
        assert_eq!(next_bits(&p, 5, &w), scaled(PREV_BITS, 4, 1));
    }

    #[test]
    fn exact_quarter_boundary_not_clamped() {
        let p = params(RetargetAlgorithm::Basic);
        let w = window(1_000, 2, 5); // actual 8 = exactly expected / 4
        assert_eq!(next_bits(&p, 5, &w), scaled(PREV_BITS, 1, 4));
    }

    // ------------------------------------------------------------------
    // Pow-limit cap
    // ------------------------------------------------------------------

    #[test]
    fn target_never_exceeds_pow_limit() {
        let p = params(RetargetAlgorithm::Basic);
        // Parent already at the floor; slow blocks cannot raise it further.
        let w: Vec<HeaderInfo> = (0..5)
            .map(|i| HeaderInfo { timestamp: 1_000 + i * 100, bits: p.pow_limit_bits })
            .collect();
        assert_eq!(next_bits(&p, 5, &w), p.pow_limit_bits);
    }

    // ------------------------------------------------------------------
    // Linear
    // ------------------------------------------------------------------

    #[test]
    fn linear_matches_basic_on_uniform_spacing() {
        let basic = params(RetargetAlgorithm::Basic);
        let linear = params(RetargetAlgorithm::Linear);
        let w = window(1_000, 16, 5);
        assert_eq!(next_bits(&basic, 5, &w), next_bits(&linear, 5, &w));
    }

    #[test]
    fn linear_truncates_the_mean_solve_time() {
        // Solve times 8, 8, 8, 9: the mean truncates to 8, so Linear keeps
        // the target while Basic scales by the raw 33-second span.
        let mut w = window(1_000, 8, 4);
        w.push(HeaderInfo { timestamp: w[3].timestamp + 9, bits: PREV_BITS });

        let linear = params(RetargetAlgorithm::Linear);
        assert_eq!(next_bits(&linear, 5, &w), PREV_BITS);

        let basic = params(RetargetAlgorithm::Basic);
        assert_eq!(next_bits(&basic, 5, &w), scaled(PREV_BITS, 33, 32));
    }

    #[test]
    fn linear_is_deterministic() {
        let p = params(RetargetAlgorithm::Linear);
        let w = window(5_000, 13, 5);
        assert_eq!(next_bits(&p, 5, &w), next_bits(&p, 5, &w));
    }

    // ------------------------------------------------------------------
    // Ema
    // ------------------------------------------------------------------

    #[test]
    fn ema_matches_basic_on_uniform_spacing() {
        let basic = params(RetargetAlgorithm::Basic);
        let ema = params(RetargetAlgorithm::Ema);
        // Constant solve times: the EMA equals that constant exactly.
        let w = window(1_000, 16, 5);
        assert_eq!(next_bits(&basic, 5, &w), next_bits(&ema, 5, &w));
    }

    #[test]
    fn ema_discounts_a_late_slowdown() {
        let p = params(RetargetAlgorithm::Ema);
        // Fast start, slow finish: with α = 1/8 the smoothed solve time
        // (13s) stays well under the plain mean (26s), so the EMA raises
        // the target less than Linear does.
        let mut timestamps = vec![1_000u64];
        for d in [2, 2, 50, 50] {
            timestamps.push(timestamps.last().unwrap() + d);
        }
        let w: Vec<HeaderInfo> = timestamps
            .into_iter()
            .map(|timestamp| HeaderInfo { timestamp, bits: PREV_BITS })
            .collect();

        let ema_bits = next_bits(&p, 5, &w);
        let mean_bits = next_bits(&params(RetargetAlgorithm::Linear), 5, &w);
        assert_eq!(ema_bits, scaled(PREV_BITS, 52, 32));
        assert!(bits_to_target(ema_bits).unwrap() < bits_to_target(mean_bits).unwrap());
    }

    #[test]
    fn ema_is_deterministic() {
        let p = params(RetargetAlgorithm::Ema);
        let w = window(9_000, 5, 5);
        assert_eq!(next_bits(&p, 5, &w), next_bits(&p, 5, &w));
    }

    // ------------------------------------------------------------------
    // Solve-time helpers
    // ------------------------------------------------------------------

    #[test]
    fn non_monotonic_timestamps_count_as_zero() {
        let w = vec![
            HeaderInfo { timestamp: 100, bits: PREV_BITS },
            HeaderInfo { timestamp: 50, bits: PREV_BITS },
            HeaderInfo { timestamp: 60, bits: PREV_BITS },
        ];
        assert_eq!(solve_times(&w), vec![0, 10]);
    }

    #[test]
    fn mean_solve_time_truncates() {
        let w = window(0, 7, 3); // diffs 7, 7
        assert_eq!(mean_solve_time(&w), 7);
    }
}
