use serde::{Deserialize, Serialize};
use stripegen_common::TensorShape;

/// Position of a Part within a cascade of on-chip-resident Parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CascadeType {
    /// Standalone: input and output both round-trip through DRAM.
    Lonely,
    /// First Part of a cascade: input from DRAM, output stays resident.
    Beginning,
    /// Interior Part: consumes the previous Part's resident output.
    Middle,
    /// Last Part: consumes a resident input, output returns to DRAM.
    End,
}

/// Search-priority filter for stripe generation. The high-priority pass
/// disables input-depth splitting, which is far more expensive to evaluate
/// (every candidate re-encodes weights); callers fall back to the low pass
/// only when the high pass produced nothing usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlanPriority {
    High,
    Low,
}

/// Compute-engine operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MceOperation {
    Convolution,
    DepthwiseConvolution,
    FullyConnected,
}

/// Algorithm the compute engine uses for a convolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MceAlgorithm {
    Direct,
    Winograd,
}

/// Element type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataType {
    UInt8Quantized,
    Int8Quantized,
    Int32Quantized,
}

/// External (DRAM-side) data layout of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataFormat {
    Nhwc,
    Nchw,
    Hwio,
    Hwim,
}

/// Quantization parameters. The scale is stored as its raw bit pattern so
/// the type stays `Eq`/`Ord`/`Hash` and can key caches and ordered sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QuantizationInfo {
    pub zero_point: i32,
    scale_bits: u32,
}

impl QuantizationInfo {
    pub fn new(zero_point: i32, scale: f32) -> Self {
        Self {
            zero_point,
            scale_bits: scale.to_bits(),
        }
    }

    pub fn scale(&self) -> f32 {
        f32::from_bits(self.scale_bits)
    }
}

impl Default for QuantizationInfo {
    fn default() -> Self {
        Self::new(0, 1.0)
    }
}

/// Full description of a tensor: shape, element type, external layout and
/// quantization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TensorInfo {
    pub dimensions: TensorShape,
    pub data_type: DataType,
    pub data_format: DataFormat,
    pub quantization: QuantizationInfo,
}

/// Horizontal and vertical stride of a convolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stride {
    pub x: u32,
    pub y: u32,
}

impl Stride {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}
