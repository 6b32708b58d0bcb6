//! Buffers of the execution graph: DRAM tensors, SRAM rolling buffers and
//! the virtual buffer representing data still inside the post-process
//! engine.

use std::sync::Arc;

use crate::components::stripe::PackedBoundaryThickness;
use crate::components::tile::{DramFormat, TileSizeCalculation};
use crate::components::weights::EncodedWeights;
use crate::components::{DataType, QuantizationInfo};
use stripegen_common::TensorShape;

/// Iteration order of stripes over the tensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TraversalOrder {
    #[default]
    Xyz,
    Zxy,
}

/// Role of a DRAM buffer in the final command stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferType {
    Input,
    Output,
    Intermediate,
    ConstantDma,
}

/// A tensor resident in DRAM.
#[derive(Clone, Debug)]
pub struct DramBuffer {
    pub format: DramFormat,
    pub data_type: DataType,
    pub tensor_shape: TensorShape,
    pub quantization: QuantizationInfo,
    pub size_in_bytes: u32,
    pub buffer_type: Option<BufferType>,
    /// Only present for weight buffers.
    pub encoded_weights: Option<Arc<EncodedWeights>>,
    pub operation_id: Option<u32>,
}

impl DramBuffer {
    pub fn build() -> DramBufferBuilder {
        DramBufferBuilder::default()
    }
}

#[derive(Default)]
pub struct DramBufferBuilder {
    format: Option<DramFormat>,
    data_type: Option<DataType>,
    tensor_shape: Option<TensorShape>,
    quantization: Option<QuantizationInfo>,
    size_in_bytes: Option<u32>,
    buffer_type: Option<BufferType>,
    encoded_weights: Option<Arc<EncodedWeights>>,
    operation_id: Option<u32>,
}

impl DramBufferBuilder {
    pub fn format(mut self, format: DramFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn tensor_shape(mut self, shape: TensorShape) -> Self {
        self.tensor_shape = Some(shape);
        self
    }

    pub fn quantization(mut self, quantization: QuantizationInfo) -> Self {
        self.quantization = Some(quantization);
        self
    }

    pub fn size_in_bytes(mut self, size: u32) -> Self {
        self.size_in_bytes = Some(size);
        self
    }

    pub fn buffer_type(mut self, buffer_type: BufferType) -> Self {
        self.buffer_type = Some(buffer_type);
        self
    }

    pub fn encoded_weights(mut self, weights: Arc<EncodedWeights>) -> Self {
        // The buffer size follows the encoded data.
        self.size_in_bytes = Some(weights.data.len() as u32);
        self.encoded_weights = Some(weights);
        self
    }

    pub fn operation_id(mut self, id: u32) -> Self {
        self.operation_id = Some(id);
        self
    }

    pub fn finish(self) -> DramBuffer {
        DramBuffer {
            format: self.format.unwrap_or(DramFormat::Nhwc),
            data_type: self.data_type.unwrap_or(DataType::UInt8Quantized),
            tensor_shape: self.tensor_shape.unwrap_or_default(),
            quantization: self.quantization.unwrap_or_default(),
            size_in_bytes: self.size_in_bytes.unwrap_or(0),
            buffer_type: self.buffer_type,
            encoded_weights: self.encoded_weights,
            operation_id: self.operation_id,
        }
    }
}

/// A rolling buffer resident in SRAM: `num_stripes` slots of
/// `slot_size_in_bytes` each.
#[derive(Clone, Debug)]
pub struct SramBuffer {
    pub data_type: DataType,
    pub tensor_shape: TensorShape,
    pub quantization: QuantizationInfo,
    pub stripe_shape: TensorShape,
    pub num_stripes: u32,
    pub slot_size_in_bytes: u32,
    pub size_in_bytes: u32,
    pub traversal_order: TraversalOrder,
    pub packed_boundary_thickness: PackedBoundaryThickness,
    /// Times the tensor streams through this buffer; more than 1 when a
    /// strategy re-loads the same data.
    pub num_loads: u32,
    /// Set when the tile was sized without the wide-cell rounding, so DMA
    /// from a wide-compressed DRAM buffer would overflow the slot.
    pub forbid_fcaf_wide: bool,
}

impl SramBuffer {
    pub fn build() -> SramBufferBuilder {
        SramBufferBuilder::default()
    }
}

pub struct SramBufferBuilder {
    data_type: DataType,
    tensor_shape: TensorShape,
    quantization: QuantizationInfo,
    stripe_shape: TensorShape,
    num_stripes: u32,
    slot_size_in_bytes: Option<u32>,
    size_in_bytes: Option<u32>,
    traversal_order: TraversalOrder,
    packed_boundary_thickness: PackedBoundaryThickness,
    num_loads: u32,
    forbid_fcaf_wide: bool,
}

impl Default for SramBufferBuilder {
    fn default() -> Self {
        Self {
            data_type: DataType::UInt8Quantized,
            tensor_shape: TensorShape::default(),
            quantization: QuantizationInfo::default(),
            stripe_shape: TensorShape::default(),
            num_stripes: 1,
            slot_size_in_bytes: None,
            size_in_bytes: None,
            traversal_order: TraversalOrder::Xyz,
            packed_boundary_thickness: PackedBoundaryThickness::NONE,
            num_loads: 1,
            forbid_fcaf_wide: false,
        }
    }
}

impl SramBufferBuilder {
    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn tensor_shape(mut self, shape: TensorShape) -> Self {
        self.tensor_shape = shape;
        self
    }

    pub fn quantization(mut self, quantization: QuantizationInfo) -> Self {
        self.quantization = quantization;
        self
    }

    pub fn stripe_shape(mut self, shape: TensorShape) -> Self {
        self.stripe_shape = shape;
        self
    }

    pub fn num_stripes(mut self, num: u32) -> Self {
        self.num_stripes = num;
        self
    }

    pub fn num_loads(mut self, num: u32) -> Self {
        self.num_loads = num;
        self
    }

    pub fn traversal_order(mut self, order: TraversalOrder) -> Self {
        self.traversal_order = order;
        self
    }

    pub fn packed_boundary_thickness(mut self, thickness: PackedBoundaryThickness) -> Self {
        self.packed_boundary_thickness = thickness;
        self
    }

    /// Sets the slot size directly; the tile is `num_stripes` slots. Used
    /// for weight buffers where the slot size comes from the encoder.
    pub fn slot_size(mut self, slot_size: u32) -> Self {
        self.slot_size_in_bytes = Some(slot_size);
        self
    }

    /// Takes the slot and tile sizes (and the wide-format restriction) from
    /// a tile-size calculation.
    pub fn from_tile_size(mut self, tile: TileSizeCalculation) -> Self {
        self.slot_size_in_bytes = Some(tile.slot_size_in_bytes);
        self.size_in_bytes = Some(tile.size_in_bytes);
        self.forbid_fcaf_wide = tile.forbid_fcaf_wide;
        self
    }

    pub fn finish(self) -> SramBuffer {
        let slot_size = self.slot_size_in_bytes.unwrap_or(0);
        SramBuffer {
            data_type: self.data_type,
            tensor_shape: self.tensor_shape,
            quantization: self.quantization,
            stripe_shape: self.stripe_shape,
            num_stripes: self.num_stripes,
            slot_size_in_bytes: slot_size,
            size_in_bytes: self.size_in_bytes.unwrap_or(slot_size * self.num_stripes),
            traversal_order: self.traversal_order,
            packed_boundary_thickness: self.packed_boundary_thickness,
            num_loads: self.num_loads,
            forbid_fcaf_wide: self.forbid_fcaf_wide,
        }
    }
}

/// Data held inside the post-process engine's input registers rather than in
/// addressable SRAM; it occupies no tile space.
#[derive(Clone, Debug)]
pub struct PleInputSramBuffer {
    pub data_type: DataType,
    pub tensor_shape: TensorShape,
    pub quantization: QuantizationInfo,
    pub stripe_shape: TensorShape,
    pub num_stripes: u32,
}

/// The three places a buffer can live.
#[derive(Clone, Debug)]
pub enum Buffer {
    Dram(DramBuffer),
    Sram(SramBuffer),
    PleInputSram(PleInputSramBuffer),
}

impl Buffer {
    pub fn tensor_shape(&self) -> TensorShape {
        match self {
            Buffer::Dram(b) => b.tensor_shape,
            Buffer::Sram(b) => b.tensor_shape,
            Buffer::PleInputSram(b) => b.tensor_shape,
        }
    }

    pub fn quantization(&self) -> QuantizationInfo {
        match self {
            Buffer::Dram(b) => b.quantization,
            Buffer::Sram(b) => b.quantization,
            Buffer::PleInputSram(b) => b.quantization,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Buffer::Dram(b) => b.data_type,
            Buffer::Sram(b) => b.data_type,
            Buffer::PleInputSram(b) => b.data_type,
        }
    }

    /// SRAM bytes this buffer occupies.
    pub fn size_in_bytes(&self) -> u32 {
        match self {
            Buffer::Dram(_) => 0,
            Buffer::Sram(b) => b.size_in_bytes,
            Buffer::PleInputSram(_) => 0,
        }
    }

    /// Whether this buffer holds the full tensor at once (DRAM always does;
    /// an SRAM buffer does when its stripe covers the tensor).
    pub fn is_full_tensor(&self) -> bool {
        match self {
            Buffer::Dram(_) => true,
            Buffer::Sram(b) => {
                b.stripe_shape.height() >= b.tensor_shape.height()
                    && b.stripe_shape.width() >= b.tensor_shape.width()
                    && b.stripe_shape.channels() >= b.tensor_shape.channels()
            }
            Buffer::PleInputSram(_) => false,
        }
    }

    pub fn sram(&self) -> Option<&SramBuffer> {
        match self {
            Buffer::Sram(b) => Some(b),
            _ => None,
        }
    }

    pub fn dram(&self) -> Option<&DramBuffer> {
        match self {
            Buffer::Dram(b) => Some(b),
            _ => None,
        }
    }

    pub fn ple_input_sram(&self) -> Option<&PleInputSramBuffer> {
        match self {
            Buffer::PleInputSram(b) => Some(b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sram_builder_defaults_the_tile_size_from_the_slot() {
        let buffer = SramBuffer::build()
            .tensor_shape(TensorShape::new(1, 32, 32, 16))
            .stripe_shape(TensorShape::new(1, 8, 32, 16))
            .num_stripes(2)
            .slot_size(8 * 32 * 16)
            .finish();
        assert_eq!(buffer.size_in_bytes, 2 * 8 * 32 * 16);
        assert_eq!(buffer.num_loads, 1);
    }

    #[test]
    fn full_tensor_detection() {
        let full = Buffer::Sram(
            SramBuffer::build()
                .tensor_shape(TensorShape::new(1, 17, 16, 16))
                .stripe_shape(TensorShape::new(1, 24, 16, 16))
                .finish(),
        );
        assert!(full.is_full_tensor());
        let split = Buffer::Sram(
            SramBuffer::build()
                .tensor_shape(TensorShape::new(1, 17, 16, 16))
                .stripe_shape(TensorShape::new(1, 8, 16, 16))
                .finish(),
        );
        assert!(!split.is_full_tensor());
        assert!(Buffer::Dram(DramBuffer::build().finish()).is_full_tensor());
    }
}
