//! Plan builder for convolution-style compute nodes.
//!
//! Lonely and Beginning roles enumerate candidates through the stripe
//! generator; Middle and End roles instead derive the one tiling that is
//! compatible with the previous part's resident buffer. Every plan pairs the
//! compute pass with an identity post-process pass so the result lands in
//! addressable SRAM, except the MCE-only plans which leave it inside the
//! post-process engine for a following fused part.

use std::collections::BTreeSet;
use std::sync::Arc;

use stripegen_common::math::div_round_up;
use stripegen_common::{Fraction, ShapeMultiplier, TensorShape, ThreadPool};

use crate::components::caps::{BRICK_GROUP_SHAPE, HardwareCapabilities};
use crate::components::parts::{
    add_dram_input_and_dma, add_dram_output_and_dma, add_new_plan, add_ple_input_sram_buffer,
    add_ple_to_op_graph, add_weight_buffers_and_dma, passthrough_ple_op,
    role_reads_input_from_dram, role_writes_output_to_dram, ConvData, Part, Plans,
};
use crate::components::plan::{
    Buffer, BufferId, Op, OpGraph, OpId, PartId, PartInputMapping, PartInputSlot,
    PartOutputMapping, PartOutputSlot, SramBuffer, TraversalOrder,
};
use crate::components::plan::MceOp;
use crate::components::stripe::{
    create_stripe, BoundaryRequirements, InputMemoryStripeInfo, MceAndPleInfo, MceOnlyInfo,
    MceStripesInfo, MemoryStripeInfo, MemoryStripesInfo, NumMemoryStripes, NumStripes,
    PackedBoundaryThickness, PleStripesInfo, StripeConfig, StripeGenerator, Padding,
    WeightMemoryStripeInfo,
};
use crate::components::tile::calculate_tile_size;
use crate::components::weights::{get_weight_stripe_depth, WeightEncoderCache, WeightEncodingRequest};
use crate::components::{
    BlockConfig, CascadeType, DataType, MceAlgorithm, MceOperation, PlanPriority,
    QuantizationInfo, Stride, TensorInfo,
};

/// Construction parameters for [`McePart`]. Gathered in a struct because the
/// network frontend assembles them field by field.
pub struct McePartParams {
    pub part_id: PartId,
    pub operation_ids: BTreeSet<u32>,
    pub input_tensor_shape: TensorShape,
    pub output_tensor_shape: TensorShape,
    pub input_quantization_info: QuantizationInfo,
    pub output_quantization_info: QuantizationInfo,
    pub weights_info: TensorInfo,
    pub weights_data: Arc<Vec<u8>>,
    pub bias_info: TensorInfo,
    pub bias_data: Vec<i32>,
    pub stride: Stride,
    pub pad_top: u32,
    pub pad_left: u32,
    pub operation: MceOperation,
    pub input_data_type: DataType,
    pub output_data_type: DataType,
    pub upscale_factor: u32,
    pub lower_bound: i16,
    pub upper_bound: i16,
    pub disable_winograd: bool,
    pub capabilities: HardwareCapabilities,
    pub stripe_config: StripeConfig,
    pub thread_pool: Arc<ThreadPool>,
}

pub struct McePart {
    pub(crate) part_id: PartId,
    pub(crate) operation_ids: BTreeSet<u32>,
    pub(crate) input_tensor_shape: TensorShape,
    pub(crate) output_tensor_shape: TensorShape,
    pub(crate) input_quantization_info: QuantizationInfo,
    pub(crate) output_quantization_info: QuantizationInfo,
    pub(crate) weights_info: TensorInfo,
    pub(crate) weights_data: Arc<Vec<u8>>,
    pub(crate) bias_info: TensorInfo,
    pub(crate) bias_data: Vec<i32>,
    pub(crate) stride: Stride,
    pub(crate) pad_top: u32,
    pub(crate) pad_left: u32,
    pub(crate) operation: MceOperation,
    pub(crate) input_data_type: DataType,
    pub(crate) output_data_type: DataType,
    pub(crate) upscale_factor: u32,
    pub(crate) lower_bound: i16,
    pub(crate) upper_bound: i16,
    pub(crate) disable_winograd: bool,
    pub(crate) capabilities: HardwareCapabilities,
    pub(crate) stripe_generator: StripeGenerator,
    pub(crate) weight_encoder_cache: WeightEncoderCache,
    /// Whether the DRAM copy of the input might be stored compressed; the
    /// fully-connected reinterpretation rules this out.
    pub(crate) could_source_be_fcaf: bool,
    pub(crate) output_boundary_requirements: BoundaryRequirements,
}

impl McePart {
    pub fn new(params: McePartParams) -> Self {
        let mut stripe_config = params.stripe_config;
        // The engine only supports the smallest block when running fully
        // connected.
        if params.operation == MceOperation::FullyConnected {
            stripe_config.block_configs = vec![BlockConfig::new(8, 8)];
        }

        let upscale = Fraction::new(params.upscale_factor, 1);
        let stripe_generator = StripeGenerator::new(
            params.input_tensor_shape,
            params.output_tensor_shape,
            params.output_tensor_shape,
            params.weights_info.dimensions[0],
            params.weights_info.dimensions[1],
            Padding::new(params.pad_top, params.pad_left),
            params.upscale_factor,
            params.operation,
            crate::components::ple::PleOperation::Passthrough,
            ShapeMultiplier::new(upscale, upscale, Fraction::ONE),
            ShapeMultiplier::IDENTITY,
            params.capabilities,
            stripe_config,
        );

        Self {
            part_id: params.part_id,
            operation_ids: params.operation_ids,
            input_tensor_shape: params.input_tensor_shape,
            output_tensor_shape: params.output_tensor_shape,
            input_quantization_info: params.input_quantization_info,
            output_quantization_info: params.output_quantization_info,
            weights_info: params.weights_info,
            weights_data: params.weights_data,
            bias_info: params.bias_info,
            bias_data: params.bias_data,
            stride: params.stride,
            pad_top: params.pad_top,
            pad_left: params.pad_left,
            operation: params.operation,
            input_data_type: params.input_data_type,
            output_data_type: params.output_data_type,
            upscale_factor: params.upscale_factor,
            lower_bound: params.lower_bound,
            upper_bound: params.upper_bound,
            disable_winograd: params.disable_winograd,
            capabilities: params.capabilities,
            stripe_generator,
            weight_encoder_cache: WeightEncoderCache::new(
                params.capabilities,
                params.thread_pool,
            ),
            could_source_be_fcaf: true,
            output_boundary_requirements: BoundaryRequirements::default(),
        }
    }

    /// Boundary needs of the following part's input, used to size the
    /// output tile at the start of a cascade.
    pub fn set_output_boundary_requirements(&mut self, requirements: BoundaryRequirements) {
        self.output_boundary_requirements = requirements;
    }

    pub(crate) fn conv_data(&self) -> ConvData {
        ConvData {
            weight_info: self.weights_info,
            weight_data: Arc::clone(&self.weights_data),
            bias_info: self.bias_info,
            bias_data: self.bias_data.clone(),
        }
    }

    /// The algorithm the engine will actually run for this candidate.
    /// Winograd is only usable for unit-stride convolutions without
    /// upsampling, with block configs small enough for the transform, and
    /// only when the weights fit in a single decoder iteration.
    pub(crate) fn resolve_mce_algorithm(
        &self,
        block_config: BlockConfig,
        weight_stripe_channels: u32,
    ) -> MceAlgorithm {
        let kernel_height = self.weights_info.dimensions[0];
        let kernel_width = self.weights_info.dimensions[1];

        let winograd_possible = !self.disable_winograd
            && self.operation == MceOperation::Convolution
            && self.stride == Stride::new(1, 1)
            && self.upscale_factor == 1
            && (kernel_height > 1 || kernel_width > 1);
        if !winograd_possible {
            return MceAlgorithm::Direct;
        }

        // The 2D transform works on 4x4 output tiles; the wide and tall
        // blocks exceed what the transform hardware can feed.
        let is_winograd_2d = kernel_height > 1 && kernel_width > 1;
        if is_winograd_2d && (block_config.width > 16 || block_config.height > 16) {
            return MceAlgorithm::Direct;
        }

        // The weight decoder cannot iterate over the input depth with
        // transformed weights.
        if weight_stripe_channels < self.weights_info.dimensions[2] {
            return MceAlgorithm::Direct;
        }

        MceAlgorithm::Winograd
    }

    pub(crate) fn weight_encoding_request(
        &self,
        conv_data: &ConvData,
        mce_weight_stripe: TensorShape,
        algorithm: MceAlgorithm,
    ) -> WeightEncodingRequest {
        WeightEncodingRequest {
            weights_tensor_info: conv_data.weight_info,
            weights_data: Arc::clone(&conv_data.weight_data),
            bias_tensor_info: conv_data.bias_info,
            bias_data: conv_data.bias_data.clone(),
            input_quantization_info: self.input_quantization_info,
            output_quantization_info: self.output_quantization_info,
            stripe_depth: get_weight_stripe_depth(
                &conv_data.weight_info,
                mce_weight_stripe,
                self.stride,
            ),
            stride_y: self.stride.y,
            stride_x: self.stride.x,
            padding_top: self.pad_top,
            padding_left: self.pad_left,
            iteration_size: mce_weight_stripe[2],
            operation: self.operation,
            algorithm,
        }
    }

    /// Adds the SRAM input buffer, the weight buffers with their DMA, and
    /// the compute op consuming both. Returns `None` when the weights cannot
    /// be encoded within the SRAM budget, which abandons the candidate.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_mce_to_op_graph(
        &self,
        op_graph: &mut OpGraph,
        mce_compute: &MceStripesInfo,
        memory: &MemoryStripesInfo,
        num_memory_stripes: &NumMemoryStripes,
        input_shape: TensorShape,
        input_quantization: QuantizationInfo,
        conv_data: &ConvData,
        could_source_be_fcaf: bool,
    ) -> Option<(BufferId, OpId)> {
        let algorithm = self.resolve_mce_algorithm(mce_compute.block_config, mce_compute.weight[2]);

        let tile = calculate_tile_size(
            &self.capabilities,
            input_shape,
            memory.input.stripe.shape,
            memory.input.packed_boundary_thickness,
            num_memory_stripes.input,
            could_source_be_fcaf,
        );
        let input_buffer = op_graph.add_buffer(Buffer::Sram(
            SramBuffer::build()
                .data_type(self.input_data_type)
                .tensor_shape(input_shape)
                .quantization(input_quantization)
                .stripe_shape(memory.input.stripe.shape)
                .num_stripes(num_memory_stripes.input)
                .num_loads(memory.input.num_loads)
                .packed_boundary_thickness(memory.input.packed_boundary_thickness)
                .from_tile_size(tile)
                .finish(),
        ));

        let request = self.weight_encoding_request(conv_data, mce_compute.weight, algorithm);
        let encoded_weights = self.weight_encoder_cache.encode(request)?;
        let weight_buffer = add_weight_buffers_and_dma(
            op_graph,
            encoded_weights,
            conv_data,
            memory.weight.stripe.shape,
            num_memory_stripes.weight,
            memory.weight.num_loads,
            &self.operation_ids,
        );

        let mce_op = op_graph.add_op(
            Op::mce(MceOp {
                operation: self.operation,
                algorithm,
                block_config: mce_compute.block_config,
                input_stripe_shape: mce_compute.input,
                output_stripe_shape: mce_compute.output,
                weights_stripe_shape: memory.weight.stripe.shape,
                order: TraversalOrder::Xyz,
                stride: self.stride,
                pad_left: self.pad_left,
                pad_top: self.pad_top,
                upscale_factor: self.upscale_factor,
                lower_bound: self.lower_bound,
                upper_bound: self.upper_bound,
            })
            .with_operation_ids(&self.operation_ids),
        );
        op_graph.add_consumer(input_buffer, mce_op, 0);
        op_graph.add_consumer(weight_buffer, mce_op, 1);

        Some((input_buffer, mce_op))
    }

    /// One plan per buffering-depth combination: compute pass plus the
    /// identity post-process pass landing the output in SRAM (and DRAM when
    /// the role requires it).
    pub(crate) fn create_mce_and_identity_ple_plans(
        &self,
        info: &MceAndPleInfo,
        cascade_type: CascadeType,
        num_weight_stripes: u32,
        plans: &mut Plans,
    ) {
        let could_source_be_fcaf =
            self.could_source_be_fcaf && role_reads_input_from_dram(cascade_type);
        let conv_data = self.conv_data();

        for num_input_stripes in info.memory.input.stripe.range.min..=info.memory.input.stripe.range.max
        {
            for num_output_stripes in info.memory.output.range.min..=info.memory.output.range.max {
                for num_ple_input_stripes in
                    info.memory.ple_input.range.min..=info.memory.ple_input.range.max
                {
                    let num_memory_stripes = NumMemoryStripes {
                        input: num_input_stripes,
                        output: num_output_stripes,
                        weight: num_weight_stripes,
                        ple_input: num_ple_input_stripes,
                    };
                    let mut op_graph = OpGraph::new();
                    let Some((input_buffer, mce_op)) = self.add_mce_to_op_graph(
                        &mut op_graph,
                        &info.mce_compute,
                        &info.memory,
                        &num_memory_stripes,
                        self.input_tensor_shape,
                        self.input_quantization_info,
                        &conv_data,
                        could_source_be_fcaf,
                    ) else {
                        // Weights don't fit; no sibling candidate of this
                        // info will fare better.
                        return;
                    };

                    let ple_input_buffer = add_ple_input_sram_buffer(
                        &mut op_graph,
                        num_ple_input_stripes,
                        self.output_tensor_shape,
                        info.memory.ple_input.shape,
                        self.output_quantization_info,
                        self.output_data_type,
                    );
                    op_graph.set_producer(ple_input_buffer, mce_op);

                    let ple_op = passthrough_ple_op(
                        info.mce_compute.block_config,
                        info.ple_compute.input,
                        info.ple_compute.output,
                        self.output_data_type,
                    );
                    let (output_buffer, ple_op_id) = add_ple_to_op_graph(
                        &mut op_graph,
                        info.memory.output.shape,
                        num_output_stripes,
                        ple_op,
                        self.output_tensor_shape,
                        self.output_quantization_info,
                        self.output_data_type,
                        &self.operation_ids,
                    );
                    op_graph.add_consumer(ple_input_buffer, ple_op_id, 0);

                    let mut input_mappings = PartInputMapping::new();
                    let input_boundary = if role_reads_input_from_dram(cascade_type) {
                        add_dram_input_and_dma(
                            &mut op_graph,
                            self.input_tensor_shape,
                            self.input_quantization_info,
                            self.input_data_type,
                            input_buffer,
                            &self.operation_ids,
                        )
                    } else {
                        input_buffer
                    };
                    input_mappings.insert(
                        input_boundary,
                        PartInputSlot {
                            part_id: self.part_id,
                            input_index: 0,
                        },
                    );

                    let mut output_mappings = PartOutputMapping::new();
                    let output_boundary = if role_writes_output_to_dram(cascade_type) {
                        add_dram_output_and_dma(
                            &mut op_graph,
                            output_buffer,
                            self.output_tensor_shape,
                            self.output_quantization_info,
                            self.output_data_type,
                            &self.operation_ids,
                        )
                    } else {
                        output_buffer
                    };
                    output_mappings.insert(
                        output_boundary,
                        PartOutputSlot {
                            part_id: self.part_id,
                            output_index: 0,
                        },
                    );

                    add_new_plan(
                        input_mappings,
                        output_mappings,
                        op_graph,
                        Some(info.mce_compute.block_config),
                        plans,
                    );
                }
            }
        }
    }

    /// Plans whose output stays inside the post-process engine, for a
    /// following part that fuses its kernel onto this compute pass. Only
    /// meaningful for roles whose output stays on chip.
    pub(crate) fn create_mce_only_plans(
        &self,
        info: &MceOnlyInfo,
        cascade_type: CascadeType,
        num_weight_stripes: u32,
        plans: &mut Plans,
    ) {
        let could_source_be_fcaf =
            self.could_source_be_fcaf && role_reads_input_from_dram(cascade_type);
        let conv_data = self.conv_data();

        for num_input_stripes in info.memory.input.stripe.range.min..=info.memory.input.stripe.range.max
        {
            for num_ple_input_stripes in
                info.memory.ple_input.range.min..=info.memory.ple_input.range.max
            {
                let num_memory_stripes = NumMemoryStripes {
                    input: num_input_stripes,
                    output: 0,
                    weight: num_weight_stripes,
                    ple_input: num_ple_input_stripes,
                };
                let mut op_graph = OpGraph::new();
                let Some((input_buffer, mce_op)) = self.add_mce_to_op_graph(
                    &mut op_graph,
                    &info.mce_compute,
                    &info.memory,
                    &num_memory_stripes,
                    self.input_tensor_shape,
                    self.input_quantization_info,
                    &conv_data,
                    could_source_be_fcaf,
                ) else {
                    return;
                };

                let output_buffer = add_ple_input_sram_buffer(
                    &mut op_graph,
                    num_ple_input_stripes,
                    self.output_tensor_shape,
                    info.memory.ple_input.shape,
                    self.output_quantization_info,
                    self.output_data_type,
                );
                op_graph.set_producer(output_buffer, mce_op);

                let mut input_mappings = PartInputMapping::new();
                let input_boundary = if role_reads_input_from_dram(cascade_type) {
                    add_dram_input_and_dma(
                        &mut op_graph,
                        self.input_tensor_shape,
                        self.input_quantization_info,
                        self.input_data_type,
                        input_buffer,
                        &self.operation_ids,
                    )
                } else {
                    input_buffer
                };
                input_mappings.insert(
                    input_boundary,
                    PartInputSlot {
                        part_id: self.part_id,
                        input_index: 0,
                    },
                );

                let mut output_mappings = PartOutputMapping::new();
                output_mappings.insert(
                    output_buffer,
                    PartOutputSlot {
                        part_id: self.part_id,
                        output_index: 0,
                    },
                );

                add_new_plan(
                    input_mappings,
                    output_mappings,
                    op_graph,
                    Some(info.mce_compute.block_config),
                    plans,
                );
            }
        }
    }

    fn get_lonely_plans(&self, num_weight_stripes: u32) -> Plans {
        let mut plans = Plans::new();
        if !self.stripe_generator.stripe_config.plan_types.lonely {
            return plans;
        }

        // The high-priority pass avoids input-depth splitting; fall back to
        // the expensive candidates only when it produced nothing.
        for priority in [PlanPriority::High, PlanPriority::Low] {
            let infos = self.stripe_generator.generate_stripes(
                CascadeType::Lonely,
                self.output_boundary_requirements,
                Some(priority),
            );
            for info in &infos.mce_and_ple_infos {
                self.create_mce_and_identity_ple_plans(
                    info,
                    CascadeType::Lonely,
                    num_weight_stripes,
                    &mut plans,
                );
            }
            if !plans.is_empty() {
                break;
            }
        }
        plans
    }

    fn get_beginning_plans(&self, num_weight_stripes: u32) -> Plans {
        let mut plans = Plans::new();
        if !self.stripe_generator.stripe_config.plan_types.beginning {
            return plans;
        }

        let infos = self.stripe_generator.generate_stripes(
            CascadeType::Beginning,
            self.output_boundary_requirements,
            None,
        );
        for info in &infos.mce_and_ple_infos {
            self.create_mce_and_identity_ple_plans(
                info,
                CascadeType::Beginning,
                num_weight_stripes,
                &mut plans,
            );
        }
        for info in &infos.mce_only_infos {
            self.create_mce_only_plans(info, CascadeType::Beginning, num_weight_stripes, &mut plans);
        }
        plans
    }

    fn get_middle_plans(
        &self,
        block_config: BlockConfig,
        sram_buffer: &SramBuffer,
        num_weight_stripes: u32,
    ) -> Plans {
        let mut plans = Plans::new();
        if !self.stripe_generator.stripe_config.plan_types.middle {
            return plans;
        }
        if !self.is_sram_buffer_valid(sram_buffer) {
            return plans;
        }

        let mut num_stripes = ContinueSectionNumStripes {
            input: NumStripes::new(sram_buffer.num_stripes, sram_buffer.num_stripes),
            // The following layer may need several output buffers for its
            // boundary data; unusable depths are filtered out by that layer.
            output: NumStripes::new(1, 3),
            weight: NumStripes::new(num_weight_stripes, num_weight_stripes),
            ple_input: NumStripes::new(0, 0),
        };
        let Some((mce_and_ple, mce_only)) = self.generate_continue_section_stripe_infos(
            &mut num_stripes,
            sram_buffer,
            num_weight_stripes,
            block_config,
            CascadeType::Middle,
        ) else {
            return plans;
        };

        self.create_mce_and_identity_ple_plans(
            &mce_and_ple,
            CascadeType::Middle,
            num_weight_stripes,
            &mut plans,
        );
        self.create_mce_only_plans(&mce_only, CascadeType::Middle, num_weight_stripes, &mut plans);
        plans
    }

    fn get_end_plans(
        &self,
        block_config: BlockConfig,
        sram_buffer: &SramBuffer,
        num_weight_stripes: u32,
    ) -> Plans {
        let mut plans = Plans::new();
        if !self.stripe_generator.stripe_config.plan_types.end {
            return plans;
        }
        if !self.is_sram_buffer_valid(sram_buffer) {
            return plans;
        }

        let mut num_stripes = ContinueSectionNumStripes {
            input: NumStripes::new(sram_buffer.num_stripes, sram_buffer.num_stripes),
            output: NumStripes::new(1, 2),
            weight: NumStripes::new(num_weight_stripes, num_weight_stripes),
            ple_input: NumStripes::new(0, 0),
        };
        let Some((mce_and_ple, _)) = self.generate_continue_section_stripe_infos(
            &mut num_stripes,
            sram_buffer,
            num_weight_stripes,
            block_config,
            CascadeType::End,
        ) else {
            return plans;
        };

        self.create_mce_and_identity_ple_plans(
            &mce_and_ple,
            CascadeType::End,
            num_weight_stripes,
            &mut plans,
        );
        plans
    }

    /// Whether the previous part's resident buffer provides the boundary
    /// data this kernel needs: one slot for 1x1 kernels, two for 2-wide (top
    /// and left only), three for anything bigger, clamped by how many
    /// stripes the tensor actually splits into.
    fn is_sram_buffer_valid(&self, sram_buffer: &SramBuffer) -> bool {
        let kernel_height = self.weights_info.dimensions[0];
        let kernel_width = self.weights_info.dimensions[1];
        let height_splits = div_round_up(
            sram_buffer.tensor_shape.height(),
            sram_buffer.stripe_shape.height(),
        );
        let width_splits = div_round_up(
            sram_buffer.tensor_shape.width(),
            sram_buffer.stripe_shape.width(),
        );

        if kernel_height >= 3 || kernel_width >= 3 {
            if height_splits <= 3 && width_splits <= 3 {
                return sram_buffer.num_stripes == height_splits.min(3);
            }
            sram_buffer.num_stripes >= 3
        } else if kernel_height >= 2 || kernel_width >= 2 {
            if height_splits <= 2 && width_splits <= 2 {
                return sram_buffer.num_stripes == height_splits.min(2);
            }
            sram_buffer.num_stripes == 2
        } else {
            sram_buffer.num_stripes == 1
        }
    }

    /// Derives the single tiling compatible with the previous part's buffer.
    /// Full-tensor inputs become an accumulate-over-depth strategy; split
    /// inputs carry their split through. Returns `None` when no valid weight
    /// streaming exists for `num_weight_stripes`.
    fn generate_continue_section_stripe_infos(
        &self,
        num_stripes: &mut ContinueSectionNumStripes,
        sram_buffer: &SramBuffer,
        num_weight_stripes: u32,
        block_config: BlockConfig,
        cascade_type: CascadeType,
    ) -> Option<(MceAndPleInfo, MceOnlyInfo)> {
        debug_assert!(matches!(cascade_type, CascadeType::Middle | CascadeType::End));
        let kernel_height = self.weights_info.dimensions[0];
        let kernel_width = self.weights_info.dimensions[1];
        let stride_multiplier = self.stride.x * self.stride.y;
        let is_depthwise = self.operation == MceOperation::DepthwiseConvolution;
        let num_ogs = self.capabilities.num_ogs();

        let mce_input_stripe = sram_buffer.stripe_shape;
        let full_height =
            sram_buffer.stripe_shape.height() >= sram_buffer.tensor_shape.height();
        let full_width = sram_buffer.stripe_shape.width() >= sram_buffer.tensor_shape.width();
        let full_tensor = full_height && full_width;

        let mce_output_encoding = if full_tensor && num_weight_stripes == 1 {
            // Everything resident at once.
            TensorShape::default()
        } else if full_tensor {
            // Full plane, streaming the output depth.
            TensorShape::new(0, 0, 0, num_ogs)
        } else {
            TensorShape::new(
                0,
                if full_height { 0 } else { mce_input_stripe.height() },
                if full_width { 0 } else { mce_input_stripe.width() },
                0,
            )
        };
        let mce_output_stripe =
            create_stripe(self.output_tensor_shape, mce_output_encoding, num_ogs);

        let mce_weight_output_stripe = mce_output_stripe[3];
        let full_output_depth =
            mce_weight_output_stripe >= self.output_tensor_shape.channels();
        // Double-buffering weights that are all resident buys nothing.
        if full_output_depth && num_weight_stripes != 1 {
            return None;
        }

        let mce_weight_stripe = if is_depthwise {
            TensorShape::new(
                kernel_height,
                kernel_width,
                mce_weight_output_stripe * stride_multiplier,
                1,
            )
        } else {
            TensorShape::new(
                kernel_height,
                kernel_width,
                mce_input_stripe[3],
                mce_weight_output_stripe,
            )
        };
        let memory_weight_stripe = mce_weight_stripe;

        let memory_output_channels_encoding =
            if full_tensor && cascade_type == CascadeType::End {
                num_ogs
            } else {
                0
            };
        let memory_output_encoding = TensorShape::new(
            0,
            if full_height { 0 } else { mce_output_stripe.height() },
            if full_width { 0 } else { mce_output_stripe.width() },
            memory_output_channels_encoding,
        );
        let memory_output_stripe = create_stripe(
            self.output_tensor_shape,
            memory_output_encoding,
            BRICK_GROUP_SHAPE.channels(),
        );

        let full_depth = memory_output_stripe[3] >= self.output_tensor_shape.channels();
        let is_end_of_cascade = cascade_type == CascadeType::End;
        let max_output_stripes = if !full_tensor {
            // Plane split: the end of a cascade can double buffer, mid
            // cascade needs up to 3 for the next layer's boundary data.
            if is_end_of_cascade { 2 } else { 3 }
        } else if is_end_of_cascade && full_depth {
            1
        } else if !is_end_of_cascade {
            debug_assert!(full_depth);
            1
        } else {
            debug_assert!(full_tensor && is_end_of_cascade);
            2
        };
        num_stripes.output = NumStripes::new(1, max_output_stripes);

        let memory = MemoryStripesInfo {
            input: InputMemoryStripeInfo {
                stripe: MemoryStripeInfo {
                    range: num_stripes.input,
                    shape: mce_input_stripe,
                },
                packed_boundary_thickness: PackedBoundaryThickness::NONE,
                num_loads: 1,
            },
            output: MemoryStripeInfo {
                range: num_stripes.output,
                shape: memory_output_stripe,
            },
            weight: WeightMemoryStripeInfo {
                stripe: MemoryStripeInfo {
                    range: num_stripes.weight,
                    shape: memory_weight_stripe,
                },
                num_loads: 1,
            },
            ple_input: MemoryStripeInfo {
                range: num_stripes.ple_input,
                shape: mce_output_stripe,
            },
        };

        let mce_compute = MceStripesInfo {
            input: mce_input_stripe,
            output: mce_output_stripe,
            weight: mce_weight_stripe,
            block_config,
        };
        let mce_and_ple = MceAndPleInfo {
            mce_compute,
            ple_compute: PleStripesInfo {
                input: mce_output_stripe,
                output: mce_output_stripe,
                block_config,
            },
            memory,
        };

        let mut mce_only_memory = memory;
        mce_only_memory.output = MemoryStripeInfo::default();
        let mce_only = MceOnlyInfo {
            mce_compute,
            memory: mce_only_memory,
        };

        Some((mce_and_ple, mce_only))
    }
}

impl Part for McePart {
    fn part_id(&self) -> PartId {
        self.part_id
    }

    fn get_plans(
        &self,
        cascade_type: CascadeType,
        block_config: BlockConfig,
        sram_buffer_inputs: &[Option<&Buffer>],
        num_weight_stripes: u32,
    ) -> Plans {
        match cascade_type {
            CascadeType::Lonely => self.get_lonely_plans(num_weight_stripes),
            CascadeType::Beginning => self.get_beginning_plans(num_weight_stripes),
            CascadeType::Middle | CascadeType::End => {
                // The compute engine reads addressable SRAM only.
                let Some(sram_buffer) =
                    sram_buffer_inputs.first().copied().flatten().and_then(Buffer::sram)
                else {
                    return Plans::new();
                };
                match cascade_type {
                    CascadeType::Middle => {
                        self.get_middle_plans(block_config, sram_buffer, num_weight_stripes)
                    }
                    _ => self.get_end_plans(block_config, sram_buffer, num_weight_stripes),
                }
            }
        }
    }

    fn mce_operation(&self) -> Option<MceOperation> {
        Some(self.operation)
    }

    fn has_activation_bounds(&self) -> bool {
        true
    }

    fn apply_activation_bounds(&mut self, lower: i16, upper: i16) {
        self.lower_bound = self.lower_bound.max(lower);
        self.upper_bound = self.upper_bound.min(upper);
    }

    fn can_double_buffer_weights(&self) -> bool {
        true
    }

    fn input_boundary_requirements(&self) -> Vec<BoundaryRequirements> {
        let kernel_height = self.weights_info.dimensions[0];
        let kernel_width = self.weights_info.dimensions[1];
        let upscale = self.upscale_factor > 1;
        vec![BoundaryRequirements {
            needs_before_x: self.pad_left > 0,
            needs_after_x: upscale || kernel_width > self.pad_left + 1,
            needs_before_y: self.pad_top > 0,
            needs_after_y: upscale || kernel_height > self.pad_top + 1,
        }]
    }

    fn can_inputs_take_ple_input_sram(&self) -> Vec<bool> {
        vec![false]
    }

    fn preprocess_weights_async(&self) {
        let conv_data = self.conv_data();
        let kick_off = |infos: &crate::components::stripe::StripeInfos| {
            for info in &infos.mce_and_ple_infos {
                let algorithm =
                    self.resolve_mce_algorithm(info.mce_compute.block_config, info.mce_compute.weight[2]);
                let request =
                    self.weight_encoding_request(&conv_data, info.mce_compute.weight, algorithm);
                self.weight_encoder_cache.encode_stage1_async(request);
            }
            for info in &infos.mce_only_infos {
                let algorithm =
                    self.resolve_mce_algorithm(info.mce_compute.block_config, info.mce_compute.weight[2]);
                let request =
                    self.weight_encoding_request(&conv_data, info.mce_compute.weight, algorithm);
                self.weight_encoder_cache.encode_stage1_async(request);
            }
        };

        kick_off(&self.stripe_generator.generate_stripes(
            CascadeType::Lonely,
            self.output_boundary_requirements,
            Some(PlanPriority::High),
        ));
        kick_off(&self.stripe_generator.generate_stripes(
            CascadeType::Beginning,
            self.output_boundary_requirements,
            None,
        ));
    }
}

/// Buffering-depth ranges threaded through the continue-section derivation;
/// the output range is rewritten there from the chosen strategy.
struct ContinueSectionNumStripes {
    input: NumStripes,
    output: NumStripes,
    weight: NumStripes,
    ple_input: NumStripes,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::plan::OpKind;
    use crate::components::DataFormat;
    use pretty_assertions::assert_eq;

    fn conv_part_with_caps(
        input: TensorShape,
        output: TensorShape,
        kernel: u32,
        caps: HardwareCapabilities,
    ) -> McePart {
        let weights_info = TensorInfo {
            dimensions: TensorShape::new(kernel, kernel, input.channels(), output.channels()),
            data_type: DataType::UInt8Quantized,
            data_format: DataFormat::Hwio,
            quantization: QuantizationInfo::new(0, 0.5),
        };
        let bias_info = TensorInfo {
            dimensions: TensorShape::new(1, 1, 1, output.channels()),
            data_type: DataType::Int32Quantized,
            data_format: DataFormat::Nhwc,
            quantization: QuantizationInfo::new(0, 0.5),
        };
        let num_weights = kernel * kernel * input.channels() * output.channels();
        McePart::new(McePartParams {
            part_id: 0,
            operation_ids: BTreeSet::from([0]),
            input_tensor_shape: input,
            output_tensor_shape: output,
            input_quantization_info: QuantizationInfo::new(0, 1.0),
            output_quantization_info: QuantizationInfo::new(0, 1.0),
            weights_info,
            weights_data: Arc::new(vec![1u8; num_weights as usize]),
            bias_info,
            bias_data: vec![0; output.channels() as usize],
            stride: Stride::new(1, 1),
            pad_top: (kernel - 1) / 2,
            pad_left: (kernel - 1) / 2,
            operation: MceOperation::Convolution,
            input_data_type: DataType::UInt8Quantized,
            output_data_type: DataType::UInt8Quantized,
            upscale_factor: 1,
            lower_bound: 0,
            upper_bound: 255,
            disable_winograd: false,
            capabilities: caps,
            stripe_config: StripeConfig::default(),
            thread_pool: Arc::new(ThreadPool::new(0)),
        })
    }

    fn conv_part(input: TensorShape, output: TensorShape, kernel: u32) -> McePart {
        conv_part_with_caps(input, output, kernel, HardwareCapabilities::standard())
    }

    fn prev_buffer(tensor: TensorShape, stripe: TensorShape, num_stripes: u32) -> SramBuffer {
        SramBuffer::build()
            .tensor_shape(tensor)
            .stripe_shape(stripe)
            .num_stripes(num_stripes)
            .slot_size(stripe.elements())
            .finish()
    }

    #[test]
    fn lonely_plans_are_well_formed() {
        let part = conv_part(
            TensorShape::new(1, 32, 32, 16),
            TensorShape::new(1, 32, 32, 16),
            3,
        );
        let plans = part.get_plans(CascadeType::Lonely, BlockConfig::new(16, 16), &[], 1);
        assert!(!plans.is_empty());
        for plan in &plans {
            assert!(plan.op_graph.validate().is_ok());
            assert!(plan.block_config.is_some());
            // Standalone plans read from and write to DRAM.
            for id in plan.input_mappings.keys() {
                assert!(plan.op_graph.buffer(*id).dram().is_some());
            }
            for id in plan.output_mappings.keys() {
                assert!(plan.op_graph.buffer(*id).dram().is_some());
            }
            assert!(plan.sram_size_in_bytes() > 0);
        }
    }

    #[test]
    fn lonely_plans_are_deterministic() {
        let part = conv_part(
            TensorShape::new(1, 32, 32, 16),
            TensorShape::new(1, 32, 32, 32),
            3,
        );
        let a = part.get_plans(CascadeType::Lonely, BlockConfig::new(16, 16), &[], 1);
        let b = part.get_plans(CascadeType::Lonely, BlockConfig::new(16, 16), &[], 1);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.block_config, y.block_config);
            assert_eq!(x.sram_size_in_bytes(), y.sram_size_in_bytes());
        }
    }

    #[test]
    fn middle_role_rejects_buffers_without_boundary_stripes() {
        let part = conv_part(
            TensorShape::new(1, 64, 64, 16),
            TensorShape::new(1, 64, 64, 16),
            3,
        );
        // Height split 8 ways but only one slot resident: a 3x3 kernel
        // cannot see its neighbours.
        let buffer = prev_buffer(
            TensorShape::new(1, 64, 64, 16),
            TensorShape::new(1, 8, 64, 16),
            1,
        );
        let wrapped = Buffer::Sram(buffer);
        let plans = part.get_plans(
            CascadeType::Middle,
            BlockConfig::new(16, 16),
            &[Some(&wrapped)],
            1,
        );
        assert!(plans.is_empty());
    }

    #[test]
    fn middle_plans_follow_the_resident_split() {
        let part = conv_part(
            TensorShape::new(1, 64, 64, 16),
            TensorShape::new(1, 64, 64, 16),
            1,
        );
        let buffer = prev_buffer(
            TensorShape::new(1, 64, 64, 16),
            TensorShape::new(1, 8, 64, 16),
            1,
        );
        let wrapped = Buffer::Sram(buffer);
        let plans = part.get_plans(
            CascadeType::Middle,
            BlockConfig::new(16, 16),
            &[Some(&wrapped)],
            1,
        );
        assert!(!plans.is_empty());
        for plan in &plans {
            assert!(plan.op_graph.validate().is_ok());
            // Mid-cascade output stays on chip.
            for id in plan.output_mappings.keys() {
                assert!(plan.op_graph.buffer(*id).dram().is_none());
            }
            // The compute stripe inherits the resident height split.
            let (_, mce) = plan
                .op_graph
                .ops()
                .find(|(_, op)| matches!(op.kind, OpKind::Mce(_)))
                .unwrap();
            assert_eq!(mce.as_mce().unwrap().input_stripe_shape.height(), 8);
        }
    }

    #[test]
    fn middle_and_end_need_a_resident_input() {
        let part = conv_part(
            TensorShape::new(1, 32, 32, 16),
            TensorShape::new(1, 32, 32, 16),
            1,
        );
        for cascade in [CascadeType::Middle, CascadeType::End] {
            assert!(
                part.get_plans(cascade, BlockConfig::new(16, 16), &[None], 1)
                    .is_empty()
            );
        }
    }

    #[test]
    fn end_plans_land_in_dram() {
        let part = conv_part(
            TensorShape::new(1, 32, 32, 16),
            TensorShape::new(1, 32, 32, 16),
            1,
        );
        let buffer = prev_buffer(
            TensorShape::new(1, 32, 32, 16),
            TensorShape::new(1, 32, 32, 16),
            1,
        );
        let wrapped = Buffer::Sram(buffer);
        let plans = part.get_plans(
            CascadeType::End,
            BlockConfig::new(16, 16),
            &[Some(&wrapped)],
            1,
        );
        assert!(!plans.is_empty());
        for plan in &plans {
            for id in plan.output_mappings.keys() {
                assert!(plan.op_graph.buffer(*id).dram().is_some());
            }
        }
    }

    #[test]
    fn oversized_weights_abandon_every_plan() {
        // 64 bytes of SRAM cannot hold a single encoded weight stripe.
        let part = conv_part_with_caps(
            TensorShape::new(1, 32, 32, 16),
            TensorShape::new(1, 32, 32, 16),
            3,
            HardwareCapabilities::new(64, 16, 16),
        );
        let plans = part.get_plans(CascadeType::Lonely, BlockConfig::new(16, 16), &[], 1);
        assert!(plans.is_empty());
    }

    #[test]
    fn winograd_resolution() {
        let part = conv_part(
            TensorShape::new(1, 32, 32, 16),
            TensorShape::new(1, 32, 32, 16),
            3,
        );
        // Small blocks with full-depth weights can run the transform.
        assert_eq!(
            part.resolve_mce_algorithm(BlockConfig::new(16, 16), 16),
            MceAlgorithm::Winograd
        );
        // Wide blocks cannot, for a 2D kernel.
        assert_eq!(
            part.resolve_mce_algorithm(BlockConfig::new(32, 8), 16),
            MceAlgorithm::Direct
        );
        // Neither can multi-iteration weights.
        assert_eq!(
            part.resolve_mce_algorithm(BlockConfig::new(16, 16), 8),
            MceAlgorithm::Direct
        );

        let unit = conv_part(
            TensorShape::new(1, 32, 32, 16),
            TensorShape::new(1, 32, 32, 16),
            1,
        );
        assert_eq!(
            unit.resolve_mce_algorithm(BlockConfig::new(16, 16), 16),
            MceAlgorithm::Direct
        );
    }

    #[test]
    fn activation_bounds_reach_the_compute_op() {
        let mut part = conv_part(
            TensorShape::new(1, 16, 16, 16),
            TensorShape::new(1, 16, 16, 16),
            1,
        );
        assert!(part.has_activation_bounds());
        part.apply_activation_bounds(10, 100);
        let plans = part.get_plans(CascadeType::Lonely, BlockConfig::new(16, 16), &[], 1);
        assert!(!plans.is_empty());
        let mce = plans[0]
            .op_graph
            .ops()
            .find_map(|(_, op)| op.as_mce())
            .unwrap();
        assert_eq!(mce.lower_bound, 10);
        assert_eq!(mce.upper_bound, 100);
    }

    #[test]
    fn boundary_requirements_follow_kernel_and_padding() {
        let part = conv_part(
            TensorShape::new(1, 32, 32, 16),
            TensorShape::new(1, 32, 32, 16),
            3,
        );
        assert_eq!(
            part.input_boundary_requirements(),
            vec![BoundaryRequirements {
                needs_before_x: true,
                needs_after_x: true,
                needs_before_y: true,
                needs_after_y: true,
            }]
        );

        let unit = conv_part(
            TensorShape::new(1, 32, 32, 16),
            TensorShape::new(1, 32, 32, 16),
            1,
        );
        assert_eq!(
            unit.input_boundary_requirements(),
            vec![BoundaryRequirements::default()]
        );
    }

    #[test]
    fn preprocessing_matches_later_requests() {
        let part = conv_part(
            TensorShape::new(1, 32, 32, 16),
            TensorShape::new(1, 32, 32, 16),
            3,
        );
        part.preprocess_weights_async();
        // The warmed cache must serve the same requests the plans make.
        let plans = part.get_plans(CascadeType::Lonely, BlockConfig::new(16, 16), &[], 1);
        assert!(!plans.is_empty());
    }
}
