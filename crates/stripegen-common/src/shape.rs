//! Tensor shapes and exact rational shape multipliers.
//!
//! Shapes are NHWC with the batch axis always 1 in this subsystem; they are
//! ordered and hashable so stripe-candidate records built from them can live
//! in ordered sets.

use core::fmt;
use core::ops::{Index, IndexMut, Mul};

use serde::{Deserialize, Serialize};

use crate::math::{div_round_up, round_up_to_multiple};

/// NHWC tensor shape (batch, height, width, channels).
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TensorShape(pub [u32; 4]);

impl TensorShape {
    pub const fn new(batch: u32, height: u32, width: u32, channels: u32) -> Self {
        Self([batch, height, width, channels])
    }

    pub const fn batch(&self) -> u32 {
        self.0[0]
    }

    pub const fn height(&self) -> u32 {
        self.0[1]
    }

    pub const fn width(&self) -> u32 {
        self.0[2]
    }

    pub const fn channels(&self) -> u32 {
        self.0[3]
    }

    /// Total number of elements.
    pub const fn elements(&self) -> u32 {
        self.0[0] * self.0[1] * self.0[2] * self.0[3]
    }

    /// Byte size when laid out in the brick-grouped linear format, assuming
    /// one byte per element and the given brick-group shape.
    pub fn bytes_nhwcb(&self, brick_group: TensorShape) -> u32 {
        round_up_to_multiple(self.height(), brick_group.height())
            * round_up_to_multiple(self.width(), brick_group.width())
            * round_up_to_multiple(self.channels(), brick_group.channels())
    }

    /// Number of stripes of `stripe` needed to cover this tensor, across all
    /// axes.
    pub fn num_stripes_total(&self, stripe: TensorShape) -> u32 {
        div_round_up(self.height(), stripe.height())
            * div_round_up(self.width(), stripe.width())
            * div_round_up(self.channels(), stripe.channels())
    }
}

impl Index<usize> for TensorShape {
    type Output = u32;

    fn index(&self, index: usize) -> &u32 {
        &self.0[index]
    }
}

impl IndexMut<usize> for TensorShape {
    fn index_mut(&mut self, index: usize) -> &mut u32 {
        &mut self.0[index]
    }
}

impl fmt::Debug for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl From<[u32; 4]> for TensorShape {
    fn from(value: [u32; 4]) -> Self {
        Self(value)
    }
}

/// Exact rational with unsigned terms. Multiplying a length by a fraction
/// uses truncating division, so downscale multipliers (e.g. 1/2 pooling)
/// must only be applied to lengths the denominator divides.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Fraction {
    pub num: u32,
    pub den: u32,
}

impl Fraction {
    pub const ONE: Fraction = Fraction { num: 1, den: 1 };

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub const fn apply(&self, value: u32) -> u32 {
        value * self.num / self.den
    }

    pub const fn inverse(&self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }
}

impl Mul<Fraction> for u32 {
    type Output = u32;

    fn mul(self, rhs: Fraction) -> u32 {
        rhs.apply(self)
    }
}

/// Per-axis scale relating one stage's stripe shape to the next (e.g. the
/// compute-output shape to the post-process-output shape).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ShapeMultiplier {
    pub h: Fraction,
    pub w: Fraction,
    pub c: Fraction,
}

impl ShapeMultiplier {
    pub const IDENTITY: ShapeMultiplier = ShapeMultiplier {
        h: Fraction::ONE,
        w: Fraction::ONE,
        c: Fraction::ONE,
    };

    pub const fn new(h: Fraction, w: Fraction, c: Fraction) -> Self {
        Self { h, w, c }
    }
}

impl Mul<ShapeMultiplier> for TensorShape {
    type Output = TensorShape;

    fn mul(self, rhs: ShapeMultiplier) -> TensorShape {
        TensorShape([
            self.0[0],
            rhs.h.apply(self.0[1]),
            rhs.w.apply(self.0[2]),
            rhs.c.apply(self.0[3]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accessors() {
        let s = TensorShape::new(1, 17, 16, 32);
        assert_eq!(s.height(), 17);
        assert_eq!(s.width(), 16);
        assert_eq!(s.channels(), 32);
        assert_eq!(s.elements(), 17 * 16 * 32);
    }

    #[test]
    fn nhwcb_bytes_round_up_every_axis() {
        let brick = TensorShape::new(1, 8, 8, 16);
        assert_eq!(
            TensorShape::new(1, 17, 16, 20).bytes_nhwcb(brick),
            24 * 16 * 32
        );
    }

    #[test]
    fn shape_multiplier() {
        let m = ShapeMultiplier::new(Fraction::new(1, 2), Fraction::new(1, 2), Fraction::ONE);
        assert_eq!(
            TensorShape::new(1, 16, 16, 32) * m,
            TensorShape::new(1, 8, 8, 32)
        );
        assert_eq!(
            TensorShape::new(1, 16, 16, 32) * ShapeMultiplier::IDENTITY,
            TensorShape::new(1, 16, 16, 32)
        );
    }

    #[test]
    fn stripe_counting() {
        let tensor = TensorShape::new(1, 17, 16, 32);
        let stripe = TensorShape::new(1, 8, 16, 32);
        assert_eq!(tensor.num_stripes_total(stripe), 3);
    }
}
