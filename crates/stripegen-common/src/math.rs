//! Integer rounding helpers used by the stripe and tile arithmetic.

/// Integer division rounding up. `b` must be nonzero.
pub const fn div_round_up(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

/// Rounds `a` up to the nearest multiple of `b`. `b` must be nonzero.
pub const fn round_up_to_multiple(a: u32, b: u32) -> u32 {
    div_round_up(a, b) * b
}

/// Rounds `a` down to the nearest multiple of `b`. `b` must be nonzero.
pub const fn round_down_to_multiple(a: u32, b: u32) -> u32 {
    (a / b) * b
}

pub const fn is_pow2(x: u32) -> bool {
    x != 0 && x & (x - 1) == 0
}

/// Largest power of two that is `<= x`. `x` must be nonzero.
pub const fn round_down_to_pow2(x: u32) -> u32 {
    1 << (31 - x.leading_zeros())
}
