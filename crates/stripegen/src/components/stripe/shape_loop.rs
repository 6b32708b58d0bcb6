//! Geometric enumeration of candidate stripe sizes along one tensor axis.

use stripegen_common::math::{div_round_up, round_down_to_pow2};

/// Lazy, finite, restartable sequence of candidate sizes for one axis:
/// `base * m` for `m` in a doubling progression, capped by the tensor size.
///
/// The inclusive variant's last element is the first multiple of `base`
/// covering the whole axis, so call sites get a "no split" candidate for
/// free. The exclusive variant stays strictly below the axis size and may be
/// empty. Doubling keeps the search space logarithmic in the axis size.
#[derive(Clone, Copy, Debug)]
pub struct StripeShapeLoop {
    base: u32,
    /// Multiplier for the next element; doubles each step.
    next_mult: u32,
    /// Largest multiplier to emit. Not necessarily a power of two for the
    /// inclusive variant.
    cap: u32,
    done: bool,
}

impl StripeShapeLoop {
    /// Candidates up to and including one that covers the whole axis.
    pub fn inclusive(axis_size: u32, base: u32) -> Self {
        Self::inclusive_clamped(axis_size, base, 1, u32::MAX)
    }

    /// Inclusive variant with the multiplier range clamped to
    /// `[min_mult, max_mult]` (from `StripeConfig`).
    pub fn inclusive_clamped(axis_size: u32, base: u32, min_mult: u32, max_mult: u32) -> Self {
        let cap = div_round_up(axis_size, base).min(max_mult);
        Self {
            base,
            next_mult: min_mult,
            cap,
            done: cap < min_mult,
        }
    }

    /// Candidates strictly smaller than the axis size; may be empty.
    pub fn exclusive(axis_size: u32, base: u32) -> Self {
        Self::exclusive_clamped(axis_size, base, 1, u32::MAX)
    }

    /// Exclusive variant with the multiplier range clamped to
    /// `[min_mult, max_mult]` (from `StripeConfig`).
    pub fn exclusive_clamped(axis_size: u32, base: u32, min_mult: u32, max_mult: u32) -> Self {
        let mut cap = round_down_to_pow2(div_round_up(axis_size, base));
        if base * cap >= axis_size {
            cap /= 2;
        }
        cap = cap.min(max_mult);
        Self {
            base,
            next_mult: min_mult,
            cap,
            done: cap < min_mult,
        }
    }
}

impl Iterator for StripeShapeLoop {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.done {
            return None;
        }
        if self.next_mult >= self.cap {
            self.done = true;
            return Some(self.base * self.cap);
        }
        let value = self.base * self.next_mult;
        self.next_mult *= 2;
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(loop_: StripeShapeLoop) -> Vec<u32> {
        loop_.collect()
    }

    #[test]
    fn inclusive_covers_the_axis_last() {
        assert_eq!(collect(StripeShapeLoop::inclusive(32, 8)), vec![8, 16, 32]);
        assert_eq!(collect(StripeShapeLoop::inclusive(8, 8)), vec![8]);
    }

    #[test]
    fn inclusive_rounds_the_final_candidate_up() {
        // First multiple of 8 covering 49 is 56, not the next power of two.
        assert_eq!(
            collect(StripeShapeLoop::inclusive(49, 8)),
            vec![8, 16, 32, 56]
        );
    }

    #[test]
    fn exclusive_stays_strictly_below() {
        assert_eq!(collect(StripeShapeLoop::exclusive(32, 8)), vec![8, 16]);
        assert_eq!(collect(StripeShapeLoop::exclusive(8, 8)), vec![]);
        assert_eq!(collect(StripeShapeLoop::exclusive(49, 8)), vec![8, 16, 32]);
    }

    #[test]
    fn multiplier_clamp() {
        assert_eq!(
            collect(StripeShapeLoop::inclusive_clamped(64, 8, 1, 2)),
            vec![8, 16]
        );
        assert_eq!(
            collect(StripeShapeLoop::inclusive_clamped(64, 8, 2, u32::MAX)),
            vec![16, 32, 64]
        );
        assert_eq!(
            collect(StripeShapeLoop::exclusive_clamped(64, 8, 4, u32::MAX)),
            vec![32]
        );
    }

    #[test]
    fn restartable() {
        let loop_ = StripeShapeLoop::inclusive(32, 8);
        assert_eq!(collect(loop_), collect(loop_));
    }
}
