//! Plan builder for post-process kernels that run fused behind a compute
//! pass.
//!
//! The post-process engine can only be fed by the compute engine, so a
//! standalone kernel (pooling, leaky relu, sigmoid, ...) is lowered as an
//! identity depthwise pass whose output stays inside the engine, followed by
//! the kernel itself. When the previous part already left its result inside
//! the engine the identity pass is skipped and a fuse-only plan consumes it
//! directly.

use std::collections::BTreeSet;
use std::sync::Arc;

use stripegen_common::math::round_up_to_multiple;
use stripegen_common::{ShapeMultiplier, TensorShape, ThreadPool};

use crate::components::caps::{BRICK_GROUP_SHAPE, HardwareCapabilities};
use crate::components::parts::{
    add_dram_input_and_dma, add_dram_output_and_dma, add_new_plan, add_ple_input_sram_buffer,
    add_ple_to_op_graph, add_weight_buffers_and_dma, role_reads_input_from_dram,
    role_writes_output_to_dram, ConvData, Part, Plans,
};
use crate::components::plan::{
    Buffer, BufferId, MceOp, Op, OpGraph, PartId, PartInputMapping, PartInputSlot,
    PartOutputMapping, PartOutputSlot, PleInputSramBuffer, PleOp, SramBuffer, TraversalOrder,
};
use crate::components::ple::{filter_ple_block_configs, ple_block_config_allowed, PleOperation};
use crate::components::stripe::{
    create_stripe, BoundaryRequirements, InputMemoryStripeInfo, MceAndPleInfo, MceStripesInfo,
    MemoryStripeInfo, MemoryStripesInfo, NumMemoryStripes, NumStripes, Padding,
    PackedBoundaryThickness, PleOnlyInfo, PleStripesInfo, StripeConfig, StripeGenerator,
    WeightMemoryStripeInfo,
};
use crate::components::tile::calculate_tile_size;
use crate::components::weights::{get_weight_stripe_depth, WeightEncoderCache, WeightEncodingRequest};
use crate::components::{
    BlockConfig, CascadeType, DataFormat, DataType, MceAlgorithm, MceOperation, PlanPriority,
    QuantizationInfo, Stride, TensorInfo,
};

/// Construction parameters for [`FusedPlePart`].
pub struct FusedPlePartParams {
    pub part_id: PartId,
    pub operation_ids: BTreeSet<u32>,
    pub input_tensor_shape: TensorShape,
    pub output_tensor_shape: TensorShape,
    pub input_quantization_info: QuantizationInfo,
    pub output_quantization_info: QuantizationInfo,
    pub kernel_operation: PleOperation,
    /// How the kernel's output shape relates to its input shape (e.g. 1/2 on
    /// both spatial axes for a 2x2 pooling).
    pub shape_multiplier: ShapeMultiplier,
    pub input_data_type: DataType,
    pub output_data_type: DataType,
    pub capabilities: HardwareCapabilities,
    pub stripe_config: StripeConfig,
    pub thread_pool: Arc<ThreadPool>,
}

pub struct FusedPlePart {
    part_id: PartId,
    operation_ids: BTreeSet<u32>,
    input_tensor_shape: TensorShape,
    output_tensor_shape: TensorShape,
    input_quantization_info: QuantizationInfo,
    output_quantization_info: QuantizationInfo,
    kernel_operation: PleOperation,
    shape_multiplier: ShapeMultiplier,
    input_data_type: DataType,
    output_data_type: DataType,
    capabilities: HardwareCapabilities,
    stripe_generator: StripeGenerator,
    weight_encoder_cache: WeightEncoderCache,
    /// Constants of the identity depthwise pass; built once since they only
    /// depend on the input channel count and quantisation.
    identity_conv_data: ConvData,
    output_boundary_requirements: BoundaryRequirements,
}

impl FusedPlePart {
    pub fn new(params: FusedPlePartParams) -> Self {
        let mut stripe_config = params.stripe_config;
        // Each kernel is only built for certain block sizes.
        stripe_config.block_configs =
            filter_ple_block_configs(params.kernel_operation, stripe_config.block_configs);

        let stripe_generator = StripeGenerator::new(
            params.input_tensor_shape,
            params.input_tensor_shape,
            params.output_tensor_shape,
            1,
            1,
            Padding::new(0, 0),
            1,
            MceOperation::DepthwiseConvolution,
            params.kernel_operation,
            ShapeMultiplier::IDENTITY,
            params.shape_multiplier,
            params.capabilities,
            stripe_config,
        );

        let identity_conv_data =
            identity_conv_data(params.input_tensor_shape, params.input_quantization_info);

        Self {
            part_id: params.part_id,
            operation_ids: params.operation_ids,
            input_tensor_shape: params.input_tensor_shape,
            output_tensor_shape: params.output_tensor_shape,
            input_quantization_info: params.input_quantization_info,
            output_quantization_info: params.output_quantization_info,
            kernel_operation: params.kernel_operation,
            shape_multiplier: params.shape_multiplier,
            input_data_type: params.input_data_type,
            output_data_type: params.output_data_type,
            capabilities: params.capabilities,
            stripe_generator,
            weight_encoder_cache: WeightEncoderCache::new(
                params.capabilities,
                params.thread_pool,
            ),
            identity_conv_data,
            output_boundary_requirements: BoundaryRequirements::default(),
        }
    }

    pub fn set_output_boundary_requirements(&mut self, requirements: BoundaryRequirements) {
        self.output_boundary_requirements = requirements;
    }

    fn identity_weight_encoding_request(
        &self,
        mce_weight_stripe: TensorShape,
    ) -> WeightEncodingRequest {
        let conv_data = &self.identity_conv_data;
        WeightEncodingRequest {
            weights_tensor_info: conv_data.weight_info,
            weights_data: Arc::clone(&conv_data.weight_data),
            bias_tensor_info: conv_data.bias_info,
            bias_data: conv_data.bias_data.clone(),
            input_quantization_info: self.input_quantization_info,
            // The identity pass reproduces its input; requantisation to the
            // part's output happens in the kernel.
            output_quantization_info: self.input_quantization_info,
            stripe_depth: get_weight_stripe_depth(
                &conv_data.weight_info,
                mce_weight_stripe,
                Stride::new(1, 1),
            ),
            stride_y: 1,
            stride_x: 1,
            padding_top: 0,
            padding_left: 0,
            iteration_size: mce_weight_stripe[2],
            operation: MceOperation::DepthwiseConvolution,
            algorithm: MceAlgorithm::Direct,
        }
    }

    /// Adds the SRAM input buffer, the identity weights and the identity
    /// compute op whose output stays inside the post-process engine. Returns
    /// the input and engine-side buffers, or `None` when the identity
    /// weights cannot be encoded within the SRAM budget.
    fn add_identity_mce_to_op_graph(
        &self,
        op_graph: &mut OpGraph,
        mce_compute: &MceStripesInfo,
        memory: &MemoryStripesInfo,
        num_memory_stripes: &NumMemoryStripes,
        could_source_be_fcaf: bool,
    ) -> Option<(BufferId, BufferId)> {
        let tile = calculate_tile_size(
            &self.capabilities,
            self.input_tensor_shape,
            memory.input.stripe.shape,
            memory.input.packed_boundary_thickness,
            num_memory_stripes.input,
            could_source_be_fcaf,
        );
        let input_buffer = op_graph.add_buffer(Buffer::Sram(
            SramBuffer::build()
                .data_type(self.input_data_type)
                .tensor_shape(self.input_tensor_shape)
                .quantization(self.input_quantization_info)
                .stripe_shape(memory.input.stripe.shape)
                .num_stripes(num_memory_stripes.input)
                .num_loads(memory.input.num_loads)
                .packed_boundary_thickness(memory.input.packed_boundary_thickness)
                .from_tile_size(tile)
                .finish(),
        ));

        let request = self.identity_weight_encoding_request(mce_compute.weight);
        let encoded_weights = self.weight_encoder_cache.encode(request)?;
        let weight_buffer = add_weight_buffers_and_dma(
            op_graph,
            encoded_weights,
            &self.identity_conv_data,
            memory.weight.stripe.shape,
            num_memory_stripes.weight,
            memory.weight.num_loads,
            &self.operation_ids,
        );

        let (lower_bound, upper_bound) = match self.output_data_type {
            DataType::UInt8Quantized => (0, 255),
            _ => (-128, 127),
        };
        let mce_op = op_graph.add_op(
            Op::mce(MceOp {
                operation: MceOperation::DepthwiseConvolution,
                algorithm: MceAlgorithm::Direct,
                block_config: mce_compute.block_config,
                input_stripe_shape: mce_compute.input,
                output_stripe_shape: mce_compute.output,
                weights_stripe_shape: memory.weight.stripe.shape,
                order: TraversalOrder::Xyz,
                stride: Stride::new(1, 1),
                pad_left: 0,
                pad_top: 0,
                upscale_factor: 1,
                lower_bound,
                upper_bound,
            })
            .with_operation_ids(&self.operation_ids),
        );
        op_graph.add_consumer(input_buffer, mce_op, 0);
        op_graph.add_consumer(weight_buffer, mce_op, 1);

        // The identity pass hands the unchanged input tensor to the kernel.
        let ple_input_buffer = op_graph.add_buffer(Buffer::PleInputSram(PleInputSramBuffer {
            data_type: self.input_data_type,
            tensor_shape: self.input_tensor_shape,
            quantization: self.input_quantization_info,
            stripe_shape: memory.ple_input.shape,
            num_stripes: num_memory_stripes.ple_input,
        }));
        op_graph.set_producer(ple_input_buffer, mce_op);

        Some((input_buffer, ple_input_buffer))
    }

    /// One plan per buffering-depth combination: identity compute pass into
    /// the engine, then the kernel landing the result in SRAM (and DRAM when
    /// the role requires it).
    fn create_identity_mce_and_fused_ple_plans(
        &self,
        info: &MceAndPleInfo,
        cascade_type: CascadeType,
        num_weight_stripes: u32,
        plans: &mut Plans,
    ) {
        let could_source_be_fcaf = role_reads_input_from_dram(cascade_type);

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
                    let Some((input_buffer, ple_input_buffer)) = self.add_identity_mce_to_op_graph(
                        &mut op_graph,
                        &info.mce_compute,
                        &info.memory,
                        &num_memory_stripes,
                        could_source_be_fcaf,
                    ) else {
                        // The identity weights don't fit; no sibling
                        // candidate of this info will fare better.
                        return;
                    };

                    let ple_op = PleOp::new(
                        self.kernel_operation,
                        info.ple_compute.block_config,
                        vec![info.ple_compute.input],
                        info.ple_compute.output,
                        self.output_data_type,
                        true,
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

    /// Plans that consume a previous part's engine-resident output directly:
    /// just the kernel, no identity pass and no weights.
    fn create_fuse_only_plans(
        &self,
        info: &PleOnlyInfo,
        cascade_type: CascadeType,
        plans: &mut Plans,
    ) {
        for num_output_stripes in info.memory.output.range.min..=info.memory.output.range.max {
            for num_ple_input_stripes in
                info.memory.ple_input.range.min..=info.memory.ple_input.range.max
            {
                let mut op_graph = OpGraph::new();
                let ple_input_buffer = add_ple_input_sram_buffer(
                    &mut op_graph,
                    num_ple_input_stripes,
                    self.input_tensor_shape,
                    info.memory.ple_input.shape,
                    self.input_quantization_info,
                    self.input_data_type,
                );

                let ple_op = PleOp::new(
                    self.kernel_operation,
                    info.ple_compute.block_config,
                    vec![info.ple_compute.input],
                    info.ple_compute.output,
                    self.output_data_type,
                    true,
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
                input_mappings.insert(
                    ple_input_buffer,
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
                    Some(info.ple_compute.block_config),
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

        for priority in [PlanPriority::High, PlanPriority::Low] {
            let infos = self.stripe_generator.generate_stripes(
                CascadeType::Lonely,
                self.output_boundary_requirements,
                Some(priority),
            );
            for info in &infos.mce_and_ple_infos {
                self.create_identity_mce_and_fused_ple_plans(
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
            self.create_identity_mce_and_fused_ple_plans(
                info,
                CascadeType::Beginning,
                num_weight_stripes,
                &mut plans,
            );
        }
        plans
    }

    /// Derives the one tiling compatible with the previous part's resident
    /// buffer. An addressable-SRAM input gets the identity pass prepended;
    /// an engine-resident input is fused directly.
    fn generate_continue_section_plans(
        &self,
        block_config: BlockConfig,
        prev_buffer: &Buffer,
        num_weight_stripes: u32,
        cascade_type: CascadeType,
    ) -> Plans {
        let mut plans = Plans::new();
        let plan_types = &self.stripe_generator.stripe_config.plan_types;
        let is_end = cascade_type == CascadeType::End;
        match cascade_type {
            CascadeType::Middle if !plan_types.middle => return plans,
            CascadeType::End if !plan_types.end => return plans,
            _ => {}
        }
        if !ple_block_config_allowed(self.kernel_operation, block_config) {
            return plans;
        }

        let (prev_stripe_shape, prev_tensor_shape, prev_num_stripes) = match prev_buffer {
            Buffer::Sram(b) => (b.stripe_shape, b.tensor_shape, b.num_stripes),
            Buffer::PleInputSram(b) => (b.stripe_shape, b.tensor_shape, b.num_stripes),
            Buffer::Dram(_) => return plans,
        };

        let full_height = prev_stripe_shape.height() >= prev_tensor_shape.height();
        let full_width = prev_stripe_shape.width() >= prev_tensor_shape.width();
        let full_plane = full_height && full_width;

        // A split kernel input must produce brick-aligned output stripes, or
        // the following stripes would straddle brick groups.
        let mut ple_input_stripe = prev_stripe_shape;
        if !full_plane
            && (self.shape_multiplier.w.apply(ple_input_stripe.width())
                % BRICK_GROUP_SHAPE.width()
                != 0
                || self.shape_multiplier.h.apply(ple_input_stripe.height())
                    % BRICK_GROUP_SHAPE.height()
                    != 0)
        {
            return plans;
        }

        let mut ple_output_stripe = create_stripe(
            self.output_tensor_shape,
            ple_input_stripe * self.shape_multiplier,
            BRICK_GROUP_SHAPE.channels(),
        );
        let mut memory_output_channels_encoding = ple_output_stripe.channels();
        if full_plane && !is_end {
            // Keep the full depth resident so the next part sees the whole
            // tensor; the kernel still runs over rounded channel stripes.
            memory_output_channels_encoding = 0;
            ple_input_stripe[3] = round_up_to_multiple(
                prev_stripe_shape.channels(),
                BRICK_GROUP_SHAPE.channels(),
            );
            ple_output_stripe[3] = round_up_to_multiple(
                self.output_tensor_shape.channels(),
                BRICK_GROUP_SHAPE.channels(),
            );
        }

        let memory_output_stripe = create_stripe(
            self.output_tensor_shape,
            TensorShape::new(
                0,
                if full_height { 0 } else { ple_output_stripe.height() },
                if full_width { 0 } else { ple_output_stripe.width() },
                memory_output_channels_encoding,
            ),
            BRICK_GROUP_SHAPE.channels(),
        );
        let full_depth = memory_output_stripe.channels() >= self.output_tensor_shape.channels();
        let full_tensor = full_plane && full_depth;

        // The overlapping-window pooling kernels keep rolling state across
        // stripes; they only work mid-cascade on a whole resident tensor.
        if matches!(
            self.kernel_operation,
            PleOperation::MaxPool3x3_2_2Even | PleOperation::MaxPool3x3_2_2Odd
        ) && !full_tensor
        {
            return plans;
        }

        let splits = &self.stripe_generator.stripe_config.splits;
        let num_stripes_output = if !full_plane {
            if !(splits.mce_output_height_only || splits.mce_and_ple_output_height) {
                return plans;
            }
            if is_end {
                NumStripes::new(1, 2)
            } else {
                let b = self.output_boundary_requirements;
                let needs_before = b.needs_before_y || b.needs_before_x;
                let needs_after = b.needs_after_y || b.needs_after_x;
                if needs_before && needs_after {
                    NumStripes::new(3, 3)
                } else if needs_before || needs_after {
                    NumStripes::new(2, 2)
                } else {
                    NumStripes::new(1, 1)
                }
            }
        } else if is_end && full_depth {
            NumStripes::new(1, 1)
        } else if !is_end {
            NumStripes::new(1, 1)
        } else {
            // Ending with a depth-split output needs the depth strategy.
            if !splits.mce_and_ple_output_depth {
                return plans;
            }
            NumStripes::new(1, 2)
        };

        match prev_buffer {
            Buffer::Sram(_) => {
                // The identity pass re-reads the resident tile stripe by
                // stripe, so the whole input must be there at once.
                if prev_num_stripes != 1 {
                    return plans;
                }
                let mce_input_stripe = TensorShape::new(
                    prev_stripe_shape[0].min(self.input_tensor_shape[0]),
                    prev_stripe_shape[1].min(self.input_tensor_shape[1]),
                    prev_stripe_shape[2].min(self.input_tensor_shape[2]),
                    prev_stripe_shape[3].min(self.input_tensor_shape[3]),
                );
                let mce_output_stripe = mce_input_stripe;
                let mce_weight_stripe = TensorShape::new(1, 1, mce_input_stripe[3], 1);

                let memory = MemoryStripesInfo {
                    input: InputMemoryStripeInfo {
                        stripe: MemoryStripeInfo {
                            range: NumStripes::new(prev_num_stripes, prev_num_stripes),
                            shape: prev_stripe_shape,
                        },
                        packed_boundary_thickness: PackedBoundaryThickness::NONE,
                        num_loads: 1,
                    },
                    output: MemoryStripeInfo {
                        range: num_stripes_output,
                        shape: memory_output_stripe,
                    },
                    weight: WeightMemoryStripeInfo {
                        stripe: MemoryStripeInfo {
                            range: NumStripes::new(num_weight_stripes, num_weight_stripes),
                            shape: mce_weight_stripe,
                        },
                        num_loads: 1,
                    },
                    ple_input: MemoryStripeInfo {
                        range: NumStripes::new(0, 0),
                        shape: mce_output_stripe,
                    },
                };
                let info = MceAndPleInfo {
                    mce_compute: MceStripesInfo {
                        input: mce_input_stripe,
                        output: mce_output_stripe,
                        weight: mce_weight_stripe,
                        block_config,
                    },
                    ple_compute: PleStripesInfo {
                        input: ple_input_stripe,
                        output: ple_output_stripe,
                        block_config,
                    },
                    memory,
                };
                self.create_identity_mce_and_fused_ple_plans(
                    &info,
                    cascade_type,
                    num_weight_stripes,
                    &mut plans,
                );
            }
            Buffer::PleInputSram(_) => {
                let info = PleOnlyInfo {
                    ple_compute: PleStripesInfo {
                        input: ple_input_stripe,
                        output: ple_output_stripe,
                        block_config,
                    },
                    memory: MemoryStripesInfo {
                        input: InputMemoryStripeInfo::default(),
                        output: MemoryStripeInfo {
                            range: num_stripes_output,
                            shape: memory_output_stripe,
                        },
                        weight: WeightMemoryStripeInfo::default(),
                        ple_input: MemoryStripeInfo {
                            range: NumStripes::new(prev_num_stripes, prev_num_stripes),
                            shape: prev_stripe_shape,
                        },
                    },
                };
                self.create_fuse_only_plans(&info, cascade_type, &mut plans);
            }
            Buffer::Dram(_) => unreachable!(),
        }
        plans
    }
}

impl Part for FusedPlePart {
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
                let Some(prev_buffer) = sram_buffer_inputs.first().copied().flatten() else {
                    return Plans::new();
                };
                self.generate_continue_section_plans(
                    block_config,
                    prev_buffer,
                    num_weight_stripes,
                    cascade_type,
                )
            }
        }
    }

    fn can_double_buffer_weights(&self) -> bool {
        true
    }

    fn input_boundary_requirements(&self) -> Vec<BoundaryRequirements> {
        // The 1x1 identity pass needs no neighbour data.
        vec![BoundaryRequirements::default()]
    }

    fn can_inputs_take_ple_input_sram(&self) -> Vec<bool> {
        vec![true]
    }

    fn preprocess_weights_async(&self) {
        let kick_off = |infos: &crate::components::stripe::StripeInfos| {
            for info in &infos.mce_and_ple_infos {
                let request = self.identity_weight_encoding_request(info.mce_compute.weight);
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

/// Weights and bias of the identity depthwise pass: a weight of 2 at scale
/// 0.5 multiplies every element by exactly 1, and a zero bias at half the
/// input scale leaves the values untouched.
fn identity_conv_data(
    input_tensor_shape: TensorShape,
    input_quantization_info: QuantizationInfo,
) -> ConvData {
    let num_ifms = input_tensor_shape.channels();
    let weight_info = TensorInfo {
        dimensions: TensorShape::new(1, 1, num_ifms, 1),
        data_type: DataType::UInt8Quantized,
        data_format: DataFormat::Hwim,
        quantization: QuantizationInfo::new(0, 0.5),
    };
    let bias_info = TensorInfo {
        dimensions: TensorShape::new(1, 1, 1, num_ifms),
        data_type: DataType::Int32Quantized,
        data_format: DataFormat::Nhwc,
        quantization: QuantizationInfo::new(0, 0.5 * input_quantization_info.scale()),
    };
    ConvData {
        weight_info,
        weight_data: Arc::new(vec![2u8; num_ifms as usize]),
        bias_info,
        bias_data: vec![0; num_ifms as usize],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::plan::OpKind;
    use pretty_assertions::assert_eq;
    use stripegen_common::Fraction;

    fn ple_part(
        input: TensorShape,
        output: TensorShape,
        kernel_operation: PleOperation,
        shape_multiplier: ShapeMultiplier,
    ) -> FusedPlePart {
        FusedPlePart::new(FusedPlePartParams {
            part_id: 0,
            operation_ids: BTreeSet::from([0]),
            input_tensor_shape: input,
            output_tensor_shape: output,
            input_quantization_info: QuantizationInfo::new(0, 1.0),
            output_quantization_info: QuantizationInfo::new(0, 1.0),
            kernel_operation,
            shape_multiplier,
            input_data_type: DataType::UInt8Quantized,
            output_data_type: DataType::UInt8Quantized,
            capabilities: HardwareCapabilities::standard(),
            stripe_config: StripeConfig::default(),
            thread_pool: Arc::new(ThreadPool::new(0)),
        })
    }

    fn leaky_relu_part(shape: TensorShape) -> FusedPlePart {
        ple_part(shape, shape, PleOperation::LeakyRelu, ShapeMultiplier::IDENTITY)
    }

    #[test]
    fn lonely_plans_pair_an_identity_pass_with_the_kernel() {
        let part = leaky_relu_part(TensorShape::new(1, 32, 32, 16));
        let plans = part.get_plans(CascadeType::Lonely, BlockConfig::new(16, 16), &[], 1);
        assert!(!plans.is_empty());
        for plan in &plans {
            assert!(plan.op_graph.validate().is_ok());
            let mce = plan
                .op_graph
                .ops()
                .find_map(|(_, op)| op.as_mce())
                .unwrap();
            assert_eq!(mce.operation, MceOperation::DepthwiseConvolution);
            assert_eq!(mce.algorithm, MceAlgorithm::Direct);
            let ple = plan
                .op_graph
                .ops()
                .find_map(|(_, op)| op.as_ple())
                .unwrap();
            assert_eq!(ple.operation, PleOperation::LeakyRelu);
            // Standalone plans read from and write to DRAM.
            for id in plan.input_mappings.keys() {
                assert!(plan.op_graph.buffer(*id).dram().is_some());
            }
            for id in plan.output_mappings.keys() {
                assert!(plan.op_graph.buffer(*id).dram().is_some());
            }
        }
    }

    #[test]
    fn block_configs_are_restricted_to_the_kernel_builds() {
        let part = ple_part(
            TensorShape::new(1, 32, 32, 16),
            TensorShape::new(1, 32, 32, 16),
            PleOperation::MeanXy8x8,
            ShapeMultiplier::IDENTITY,
        );
        assert_eq!(
            part.stripe_generator.stripe_config.block_configs,
            vec![BlockConfig::new(8, 8)]
        );
    }

    #[test]
    fn middle_role_fuses_onto_an_engine_resident_input() {
        let shape = TensorShape::new(1, 32, 32, 16);
        let part = leaky_relu_part(shape);
        let prev = Buffer::PleInputSram(PleInputSramBuffer {
            data_type: DataType::UInt8Quantized,
            tensor_shape: shape,
            quantization: QuantizationInfo::new(0, 1.0),
            stripe_shape: shape,
            num_stripes: 0,
        });
        let plans = part.get_plans(
            CascadeType::Middle,
            BlockConfig::new(16, 16),
            &[Some(&prev)],
            1,
        );
        assert!(!plans.is_empty());
        for plan in &plans {
            assert!(plan.op_graph.validate().is_ok());
            // Fuse-only: no compute pass and no weights.
            assert!(!plan
                .op_graph
                .ops()
                .any(|(_, op)| matches!(op.kind, OpKind::Mce(_))));
            for id in plan.input_mappings.keys() {
                assert!(plan.op_graph.buffer(*id).ple_input_sram().is_some());
            }
            for id in plan.output_mappings.keys() {
                assert!(plan.op_graph.buffer(*id).dram().is_none());
            }
        }
    }

    #[test]
    fn middle_role_prepends_the_identity_pass_for_sram_inputs() {
        let shape = TensorShape::new(1, 32, 32, 16);
        let part = leaky_relu_part(shape);
        let prev = Buffer::Sram(
            SramBuffer::build()
                .tensor_shape(shape)
                .stripe_shape(shape)
                .num_stripes(1)
                .slot_size(shape.elements())
                .finish(),
        );
        let plans = part.get_plans(
            CascadeType::Middle,
            BlockConfig::new(16, 16),
            &[Some(&prev)],
            1,
        );
        assert!(!plans.is_empty());
        for plan in &plans {
            assert!(plan
                .op_graph
                .ops()
                .any(|(_, op)| matches!(op.kind, OpKind::Mce(_))));
        }
    }

    #[test]
    fn sram_inputs_must_be_fully_resident() {
        let shape = TensorShape::new(1, 64, 64, 16);
        let part = leaky_relu_part(shape);
        let prev = Buffer::Sram(
            SramBuffer::build()
                .tensor_shape(shape)
                .stripe_shape(TensorShape::new(1, 8, 64, 16))
                .num_stripes(2)
                .slot_size(8 * 64 * 16)
                .finish(),
        );
        let plans = part.get_plans(
            CascadeType::Middle,
            BlockConfig::new(16, 16),
            &[Some(&prev)],
            1,
        );
        assert!(plans.is_empty());
    }

    #[test]
    fn split_inputs_need_brick_aligned_kernel_output() {
        // 1/2 downscale of an 8-high stripe gives 4-high output stripes,
        // which no longer line up with brick groups.
        let part = ple_part(
            TensorShape::new(1, 64, 64, 16),
            TensorShape::new(1, 32, 32, 16),
            PleOperation::MaxPool2x2_2_2,
            ShapeMultiplier::new(Fraction::new(1, 2), Fraction::new(1, 2), Fraction::ONE),
        );
        let prev = Buffer::PleInputSram(PleInputSramBuffer {
            data_type: DataType::UInt8Quantized,
            tensor_shape: TensorShape::new(1, 64, 64, 16),
            quantization: QuantizationInfo::new(0, 1.0),
            stripe_shape: TensorShape::new(1, 8, 64, 16),
            num_stripes: 0,
        });
        let plans = part.get_plans(
            CascadeType::Middle,
            BlockConfig::new(16, 16),
            &[Some(&prev)],
            1,
        );
        assert!(plans.is_empty());
    }

    #[test]
    fn disallowed_block_configs_yield_nothing_mid_cascade() {
        let shape = TensorShape::new(1, 32, 32, 16);
        let part = ple_part(
            shape,
            shape,
            PleOperation::MeanXy8x8,
            ShapeMultiplier::IDENTITY,
        );
        let prev = Buffer::PleInputSram(PleInputSramBuffer {
            data_type: DataType::UInt8Quantized,
            tensor_shape: shape,
            quantization: QuantizationInfo::new(0, 1.0),
            stripe_shape: shape,
            num_stripes: 0,
        });
        let plans = part.get_plans(
            CascadeType::Middle,
            BlockConfig::new(16, 16),
            &[Some(&prev)],
            1,
        );
        assert!(plans.is_empty());
    }

    #[test]
    fn end_plans_land_in_dram() {
        let shape = TensorShape::new(1, 32, 32, 16);
        let part = leaky_relu_part(shape);
        let prev = Buffer::PleInputSram(PleInputSramBuffer {
            data_type: DataType::UInt8Quantized,
            tensor_shape: shape,
            quantization: QuantizationInfo::new(0, 1.0),
            stripe_shape: shape,
            num_stripes: 0,
        });
        let plans = part.get_plans(
            CascadeType::End,
            BlockConfig::new(16, 16),
            &[Some(&prev)],
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
    fn inputs_may_stay_inside_the_engine() {
        let part = leaky_relu_part(TensorShape::new(1, 16, 16, 16));
        assert_eq!(part.can_inputs_take_ple_input_sram(), vec![true]);
        assert_eq!(
            part.input_boundary_requirements(),
            vec![BoundaryRequirements::default()]
        );
        assert!(part.mce_operation().is_none());
    }

    #[test]
    fn preprocessing_matches_later_requests() {
        let part = leaky_relu_part(TensorShape::new(1, 32, 32, 16));
        part.preprocess_weights_async();
        let plans = part.get_plans(CascadeType::Lonely, BlockConfig::new(16, 16), &[], 1);
        assert!(!plans.is_empty());
    }
}
