//! Plan builders, one per compute-node kind.
//!
//! A `Part` is one node of the network graph. For a given cascade role it
//! enumerates stripe candidates (directly or via the
//! [`StripeGenerator`](crate::components::stripe::StripeGenerator)) and
//! lowers each one into a [`Plan`]: buffers with concrete tile sizes wired
//! to DMA/compute/post-process ops. Roles a kind cannot fill yield an empty
//! set rather than an error, as do candidates whose weights cannot be
//! compressed into SRAM.

pub mod fully_connected;
pub mod fused_ple;
pub mod mce;
pub mod standalone_ple;

pub use fully_connected::{FullyConnectedPart, FullyConnectedPartParams};
pub use fused_ple::{FusedPlePart, FusedPlePartParams};
pub use mce::{McePart, McePartParams};
pub use standalone_ple::{PoolingDirection, StandalonePlePart, StandalonePlePartParams};

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::components::plan::{
    Buffer, BufferId, BufferType, DramBuffer, Op, OpGraph, OpId, PartInputMapping,
    PartOutputMapping, PleInputSramBuffer, Plan, PleOp, SramBuffer,
};
use crate::components::plan::DmaOp;
use crate::components::caps::BRICK_GROUP_SHAPE;
use crate::components::stripe::BoundaryRequirements;
use crate::components::tile::DramFormat;
use crate::components::weights::EncodedWeights;
use crate::components::{BlockConfig, CascadeType, DataType, MceOperation, QuantizationInfo, TensorInfo};
use stripegen_common::TensorShape;

pub type Plans = Vec<Plan>;

/// The common contract every part kind implements. The whole-graph search
/// drives it role by role; `sram_buffer_inputs` carries the previous part's
/// still-resident output buffers for the continue-section roles.
pub trait Part {
    fn part_id(&self) -> crate::components::plan::PartId;

    fn get_plans(
        &self,
        cascade_type: CascadeType,
        block_config: BlockConfig,
        sram_buffer_inputs: &[Option<&Buffer>],
        num_weight_stripes: u32,
    ) -> Plans;

    /// The compute-engine operation this part runs, if any.
    fn mce_operation(&self) -> Option<MceOperation> {
        None
    }

    fn has_activation_bounds(&self) -> bool {
        false
    }

    /// Folds a following activation's saturation range into this part.
    fn apply_activation_bounds(&mut self, _lower: i16, _upper: i16) {}

    /// Whether the search may consider a two-slot weight tile for this part.
    fn can_double_buffer_weights(&self) -> bool {
        false
    }

    /// Per input, the boundary data this part needs from its producer.
    fn input_boundary_requirements(&self) -> Vec<BoundaryRequirements>;

    /// Per input, whether the data may stay inside the post-process engine
    /// instead of addressable SRAM.
    fn can_inputs_take_ple_input_sram(&self) -> Vec<bool>;

    /// Kicks off stage-1 weight compression for every stripe candidate this
    /// part could later request, so the expensive work overlaps the search.
    fn preprocess_weights_async(&self) {}
}

/// Weight and bias constants of a compute node, shared between the plan
/// builder and the weight encoder.
#[derive(Clone, Debug)]
pub struct ConvData {
    pub weight_info: TensorInfo,
    pub weight_data: Arc<Vec<u8>>,
    pub bias_info: TensorInfo,
    pub bias_data: Vec<i32>,
}

/// Adds the post-process op plus its SRAM output buffer and returns both
/// handles. The output tile is `num_output_stripes` brick-grouped stripe
/// slots.
pub fn add_ple_to_op_graph(
    op_graph: &mut OpGraph,
    memory_output_stripe: TensorShape,
    num_output_stripes: u32,
    ple_op: PleOp,
    output_shape: TensorShape,
    output_quantization: QuantizationInfo,
    output_data_type: DataType,
    operation_ids: &BTreeSet<u32>,
) -> (BufferId, OpId) {
    let op = op_graph.add_op(Op::ple(ple_op).with_operation_ids(operation_ids));

    let buffer = op_graph.add_buffer(Buffer::Sram(
        SramBuffer::build()
            .data_type(output_data_type)
            .tensor_shape(output_shape)
            .quantization(output_quantization)
            .stripe_shape(memory_output_stripe)
            .num_stripes(num_output_stripes)
            .slot_size(memory_output_stripe.bytes_nhwcb(BRICK_GROUP_SHAPE))
            .finish(),
    ));
    op_graph.set_producer(buffer, op);
    (buffer, op)
}

/// Adds the virtual buffer for data held inside the post-process engine.
pub fn add_ple_input_sram_buffer(
    op_graph: &mut OpGraph,
    num_stripes: u32,
    tensor_shape: TensorShape,
    stripe_shape: TensorShape,
    quantization: QuantizationInfo,
    data_type: DataType,
) -> BufferId {
    op_graph.add_buffer(Buffer::PleInputSram(PleInputSramBuffer {
        data_type,
        tensor_shape,
        quantization,
        stripe_shape,
        num_stripes,
    }))
}

/// Wraps a finished graph and its slot mappings into a [`Plan`].
pub fn add_new_plan(
    input_mappings: PartInputMapping,
    output_mappings: PartOutputMapping,
    op_graph: OpGraph,
    block_config: Option<BlockConfig>,
    plans: &mut Plans,
) {
    debug_assert!(op_graph.validate().is_ok());
    plans.push(Plan {
        op_graph,
        input_mappings,
        output_mappings,
        block_config,
    });
}

/// Adds the DRAM weight blob, the DMA bringing it on chip and the SRAM
/// weight tile (`num_weight_stripes` slots of the largest encoded stripe).
/// Returns the SRAM buffer for wiring into the compute op.
pub(crate) fn add_weight_buffers_and_dma(
    op_graph: &mut OpGraph,
    encoded_weights: Arc<EncodedWeights>,
    conv_data: &ConvData,
    memory_weight_stripe: TensorShape,
    num_weight_stripes: u32,
    num_weight_loads: u32,
    operation_ids: &BTreeSet<u32>,
) -> BufferId {
    let sram_buffer = op_graph.add_buffer(Buffer::Sram(
        SramBuffer::build()
            .data_type(conv_data.weight_info.data_type)
            .tensor_shape(conv_data.weight_info.dimensions)
            .quantization(conv_data.weight_info.quantization)
            .stripe_shape(memory_weight_stripe)
            .num_stripes(num_weight_stripes)
            .num_loads(num_weight_loads)
            .slot_size(encoded_weights.max_size)
            .finish(),
    ));

    let dram_buffer = op_graph.add_buffer(Buffer::Dram(
        DramBuffer::build()
            .format(DramFormat::Weight)
            .data_type(conv_data.weight_info.data_type)
            .tensor_shape(conv_data.weight_info.dimensions)
            .quantization(conv_data.weight_info.quantization)
            .buffer_type(BufferType::ConstantDma)
            .encoded_weights(encoded_weights)
            .finish(),
    ));

    let dma = op_graph.add_op(Op::dma(DmaOp::new(DramFormat::Weight)).with_operation_ids(operation_ids));
    op_graph.add_consumer(dram_buffer, dma, 0);
    op_graph.set_producer(sram_buffer, dma);

    sram_buffer
}

/// Whether a role reads its input from DRAM (as opposed to inheriting the
/// previous part's on-chip buffer).
pub(crate) fn role_reads_input_from_dram(cascade_type: CascadeType) -> bool {
    matches!(cascade_type, CascadeType::Lonely | CascadeType::Beginning)
}

/// Whether a role must land its output in DRAM (as opposed to leaving it
/// resident for the next part).
pub(crate) fn role_writes_output_to_dram(cascade_type: CascadeType) -> bool {
    matches!(cascade_type, CascadeType::Lonely | CascadeType::End)
}

/// Adds a DRAM tensor and the DMA filling `sram_buffer` from it. Returns the
/// DRAM buffer, which becomes the plan's input boundary.
pub(crate) fn add_dram_input_and_dma(
    op_graph: &mut OpGraph,
    tensor_shape: TensorShape,
    quantization: QuantizationInfo,
    data_type: DataType,
    sram_buffer: BufferId,
    operation_ids: &BTreeSet<u32>,
) -> BufferId {
    let dram_buffer = op_graph.add_buffer(Buffer::Dram(
        DramBuffer::build()
            .format(DramFormat::Nhwcb)
            .data_type(data_type)
            .tensor_shape(tensor_shape)
            .quantization(quantization)
            .size_in_bytes(tensor_shape.bytes_nhwcb(BRICK_GROUP_SHAPE))
            .buffer_type(BufferType::Intermediate)
            .finish(),
    ));
    let dma = op_graph.add_op(Op::dma(DmaOp::new(DramFormat::Nhwcb)).with_operation_ids(operation_ids));
    op_graph.add_consumer(dram_buffer, dma, 0);
    op_graph.set_producer(sram_buffer, dma);
    dram_buffer
}

/// Adds the DMA draining `sram_buffer` into a new DRAM tensor. Returns the
/// DRAM buffer, which becomes the plan's output boundary.
pub(crate) fn add_dram_output_and_dma(
    op_graph: &mut OpGraph,
    sram_buffer: BufferId,
    tensor_shape: TensorShape,
    quantization: QuantizationInfo,
    data_type: DataType,
    operation_ids: &BTreeSet<u32>,
) -> BufferId {
    let dma = op_graph.add_op(Op::dma(DmaOp::new(DramFormat::Nhwcb)).with_operation_ids(operation_ids));
    op_graph.add_consumer(sram_buffer, dma, 0);
    let dram_buffer = op_graph.add_buffer(Buffer::Dram(
        DramBuffer::build()
            .format(DramFormat::Nhwcb)
            .data_type(data_type)
            .tensor_shape(tensor_shape)
            .quantization(quantization)
            .size_in_bytes(tensor_shape.bytes_nhwcb(BRICK_GROUP_SHAPE))
            .buffer_type(BufferType::Intermediate)
            .finish(),
    ));
    op_graph.set_producer(dram_buffer, dma);
    dram_buffer
}

/// Identity post-process pass used when a compute op's result only needs to
/// be moved out of the engine.
pub(crate) fn passthrough_ple_op(
    block_config: BlockConfig,
    input_stripe: TensorShape,
    output_stripe: TensorShape,
    output_data_type: DataType,
) -> PleOp {
    PleOp::new(
        crate::components::ple::PleOperation::Passthrough,
        block_config,
        vec![input_stripe],
        output_stripe,
        output_data_type,
        true,
    )
}
