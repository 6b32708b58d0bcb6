//! Immutable description of the target accelerator, consumed read-only by
//! the whole search. Constructed once from the capability blob the driver
//! hands over; never mutated afterwards.

use derive_new::new;
use serde::{Deserialize, Serialize};
use stripegen_common::TensorShape;

/// Minimum alignment unit of the on-chip linear-tiled (NHWCB) layout.
pub const BRICK_GROUP_SHAPE: TensorShape = TensorShape::new(1, 8, 8, 16);

/// Cell shape of the depth-compressed FCAF layout.
pub const FCAF_DEEP_CELL_SHAPE: TensorShape = TensorShape::new(1, 8, 8, 32);

/// Cell shape of the width-compressed FCAF layout.
pub const FCAF_WIDE_CELL_SHAPE: TensorShape = TensorShape::new(1, 8, 16, 16);

/// Width/height of the compute engine's processing block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockConfig {
    pub width: u32,
    pub height: u32,
}

impl BlockConfig {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for BlockConfig {
    fn default() -> Self {
        BlockConfig::new(8, 8)
    }
}

impl core::fmt::Debug for BlockConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Fixed hardware description: memory budget, engine counts and rounding
/// granularities. Shared by reference for the lifetime of the search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, new, Serialize, Deserialize)]
pub struct HardwareCapabilities {
    total_sram_size: u32,
    num_srams: u32,
    num_ogs: u32,
}

impl HardwareCapabilities {
    /// Total on-chip memory, in bytes.
    pub fn total_sram_size(&self) -> u32 {
        self.total_sram_size
    }

    /// Number of parallel input SRAM banks (one per compute engine).
    pub fn num_srams(&self) -> u32 {
        self.num_srams
    }

    /// Number of output generators.
    pub fn num_ogs(&self) -> u32 {
        self.num_ogs
    }

    pub fn brick_group_shape(&self) -> TensorShape {
        BRICK_GROUP_SHAPE
    }

    /// A mid-size configuration: 1 MiB of SRAM, 16 engines, 16 output
    /// generators.
    pub fn standard() -> Self {
        Self::new(1024 * 1024, 16, 16)
    }
}
