//! Plan builder for fully-connected layers.
//!
//! The compute engine runs a fully-connected layer as a 1x1 convolution over
//! a reinterpreted input of shape `1x1x1xC`, with `C` the flattened element
//! count rounded up to the weight channel vector size. Everything below the
//! stripe enumeration is shared with [`McePart`]; only the candidate set and
//! the DRAM input handling differ: the input is read byte-for-byte from an
//! NHWC buffer, so it can never be compressed and its size is rounded up to
//! the DMA's 1024-byte granule.

use std::collections::BTreeSet;
use std::sync::Arc;

use stripegen_common::math::{div_round_up, round_up_to_multiple};
use stripegen_common::{TensorShape, ThreadPool};

use crate::components::caps::{BRICK_GROUP_SHAPE, HardwareCapabilities};
use crate::components::parts::{
    add_dram_output_and_dma, add_new_plan, add_ple_input_sram_buffer, add_ple_to_op_graph,
    passthrough_ple_op, Part, Plans,
};
use crate::components::plan::{
    Buffer, BufferType, DmaOp, DramBuffer, Op, OpGraph, PartId, PartInputMapping, PartInputSlot,
    PartOutputMapping, PartOutputSlot,
};
use crate::components::stripe::{
    create_stripe, BoundaryRequirements, InputMemoryStripeInfo, MceAndPleInfo, MceStripesInfo,
    MemoryStripeInfo, MemoryStripesInfo, NumMemoryStripes, NumStripes, PackedBoundaryThickness,
    PleStripesInfo, StripeConfig, StripeInfos, StripeShapeLoop, WeightMemoryStripeInfo,
};
use crate::components::tile::DramFormat;
use crate::components::weights::WEIGHTS_CHANNEL_VEC_PROD;
use crate::components::{
    BlockConfig, CascadeType, DataType, MceOperation, QuantizationInfo, Stride, TensorInfo,
};

use super::mce::{McePart, McePartParams};

/// Construction parameters for [`FullyConnectedPart`].
pub struct FullyConnectedPartParams {
    pub part_id: PartId,
    pub operation_ids: BTreeSet<u32>,
    /// The input as the network sees it; flattened and padded internally.
    pub input_tensor_shape: TensorShape,
    pub output_tensor_shape: TensorShape,
    pub input_quantization_info: QuantizationInfo,
    pub output_quantization_info: QuantizationInfo,
    pub weights_info: TensorInfo,
    pub weights_data: Arc<Vec<u8>>,
    pub bias_info: TensorInfo,
    pub bias_data: Vec<i32>,
    pub input_data_type: DataType,
    pub output_data_type: DataType,
    pub capabilities: HardwareCapabilities,
    pub stripe_config: StripeConfig,
    pub thread_pool: Arc<ThreadPool>,
}

pub struct FullyConnectedPart {
    mce: McePart,
    original_input_shape: TensorShape,
}

impl FullyConnectedPart {
    pub fn new(params: FullyConnectedPartParams) -> Self {
        let original_input_shape = params.input_tensor_shape;
        // The weight decoder consumes input channels in vectors, so the
        // flattened input is padded up to a whole number of them.
        let reinterpreted_input_shape = TensorShape::new(
            1,
            1,
            1,
            round_up_to_multiple(original_input_shape.elements(), WEIGHTS_CHANNEL_VEC_PROD),
        );
        let (lower_bound, upper_bound) = match params.output_data_type {
            DataType::UInt8Quantized => (0, 255),
            _ => (-128, 127),
        };

        let mut mce = McePart::new(McePartParams {
            part_id: params.part_id,
            operation_ids: params.operation_ids,
            input_tensor_shape: reinterpreted_input_shape,
            output_tensor_shape: params.output_tensor_shape,
            input_quantization_info: params.input_quantization_info,
            output_quantization_info: params.output_quantization_info,
            weights_info: params.weights_info,
            weights_data: params.weights_data,
            bias_info: params.bias_info,
            bias_data: params.bias_data,
            stride: Stride::new(1, 1),
            pad_top: 0,
            pad_left: 0,
            operation: MceOperation::FullyConnected,
            input_data_type: params.input_data_type,
            output_data_type: params.output_data_type,
            upscale_factor: 1,
            lower_bound,
            upper_bound,
            disable_winograd: true,
            capabilities: params.capabilities,
            stripe_config: params.stripe_config,
            thread_pool: params.thread_pool,
        });
        // The byte-for-byte NHWC copy rules out compressed sources.
        mce.could_source_be_fcaf = false;

        Self {
            mce,
            original_input_shape,
        }
    }

    /// Candidate tilings: the whole layer at once, output-depth streaming,
    /// and input-depth streaming (which accumulates partial sums and so
    /// reloads the input per output stripe).
    fn generate_stripe_infos(&self) -> StripeInfos {
        let block_config = BlockConfig::new(8, 8);
        let num_ogs = self.mce.capabilities.num_ogs();
        let num_srams = self.mce.capabilities.num_srams();
        let config = &self.mce.stripe_generator.stripe_config;
        let mut infos = StripeInfos::default();

        let mut add = |mce_input_stripe: TensorShape,
                       mce_output_stripe: TensorShape,
                       num_stripes_input: NumStripes,
                       num_stripes_output: NumStripes,
                       num_stripes_weights: NumStripes,
                       num_ifm_loads: u32| {
            let weight_stripe = TensorShape::new(
                1,
                1,
                mce_input_stripe.elements(),
                mce_output_stripe.channels(),
            );
            infos.mce_and_ple_infos.insert(MceAndPleInfo {
                mce_compute: MceStripesInfo {
                    input: mce_input_stripe,
                    output: mce_output_stripe,
                    weight: weight_stripe,
                    block_config,
                },
                ple_compute: PleStripesInfo {
                    input: mce_output_stripe,
                    output: mce_output_stripe,
                    block_config,
                },
                memory: MemoryStripesInfo {
                    input: InputMemoryStripeInfo {
                        stripe: MemoryStripeInfo {
                            range: num_stripes_input,
                            shape: mce_input_stripe,
                        },
                        packed_boundary_thickness: PackedBoundaryThickness::NONE,
                        num_loads: num_ifm_loads,
                    },
                    output: MemoryStripeInfo {
                        range: num_stripes_output,
                        shape: mce_output_stripe,
                    },
                    weight: WeightMemoryStripeInfo {
                        stripe: MemoryStripeInfo {
                            range: num_stripes_weights,
                            shape: weight_stripe,
                        },
                        num_loads: 1,
                    },
                    ple_input: MemoryStripeInfo {
                        range: NumStripes::new(0, 0),
                        shape: mce_output_stripe,
                    },
                },
            });
        };

        // Full IFM and full OFM.
        if config.splits.none {
            let mce_input_stripe = create_stripe(
                self.mce.input_tensor_shape,
                TensorShape::default(),
                BRICK_GROUP_SHAPE.channels(),
            );
            let mce_output_stripe =
                create_stripe(self.mce.output_tensor_shape, TensorShape::default(), num_ogs);
            add(
                mce_input_stripe,
                mce_output_stripe,
                NumStripes::new(1, 1),
                NumStripes::new(1, 1),
                NumStripes::new(1, 1),
                1,
            );
        }

        // Full IFM, streaming the output depth. Exclusive loop: the no-split
        // candidate already exists above.
        if config.splits.mce_and_ple_output_depth {
            for ofm_depth in StripeShapeLoop::exclusive_clamped(
                self.mce.output_tensor_shape.channels(),
                num_ogs,
                config.ofm_depth_multiplier.min,
                config.ofm_depth_multiplier.max,
            ) {
                let mce_input_stripe = create_stripe(
                    self.mce.input_tensor_shape,
                    TensorShape::default(),
                    BRICK_GROUP_SHAPE.channels(),
                );
                let mce_output_stripe = create_stripe(
                    self.mce.output_tensor_shape,
                    TensorShape::new(0, 0, 0, ofm_depth),
                    num_ogs,
                );
                let max_output_stripes =
                    if self.mce.output_tensor_shape.channels() > mce_output_stripe.channels() {
                        2
                    } else {
                        1
                    };
                add(
                    mce_input_stripe,
                    mce_output_stripe,
                    NumStripes::new(1, 1),
                    NumStripes::new(1, max_output_stripes),
                    NumStripes::new(1, 2),
                    1,
                );
            }
        }

        // Streaming both depths: each output stripe re-reads the input.
        if config.splits.output_depth_input_depth {
            for ifm_depth in StripeShapeLoop::exclusive_clamped(
                self.mce.input_tensor_shape.channels(),
                num_srams,
                config.ifm_depth_multiplier.min,
                config.ifm_depth_multiplier.max,
            ) {
                let mce_input_stripe = create_stripe(
                    self.mce.input_tensor_shape,
                    TensorShape::new(0, 0, 0, ifm_depth),
                    BRICK_GROUP_SHAPE.channels(),
                );
                let mce_output_stripe =
                    create_stripe(self.mce.output_tensor_shape, TensorShape::new(0, 0, 0, num_ogs), num_ogs);
                let max_input_stripes =
                    if self.mce.input_tensor_shape.channels() > mce_input_stripe.channels() {
                        2
                    } else {
                        1
                    };
                let max_output_stripes =
                    if self.mce.output_tensor_shape.channels() > mce_output_stripe.channels() {
                        2
                    } else {
                        1
                    };
                let num_ifm_loads = div_round_up(
                    self.mce.output_tensor_shape.channels(),
                    mce_output_stripe.channels(),
                );
                add(
                    mce_input_stripe,
                    mce_output_stripe,
                    NumStripes::new(1, max_input_stripes),
                    NumStripes::new(1, max_output_stripes),
                    NumStripes::new(1, 1),
                    num_ifm_loads,
                );
            }
        }

        infos
    }

    fn get_lonely_plans(&self, num_weight_stripes: u32) -> Plans {
        let mut plans = Plans::new();
        if !self.mce.stripe_generator.stripe_config.plan_types.lonely {
            return plans;
        }
        for info in &self.generate_stripe_infos().mce_and_ple_infos {
            self.create_lonely_plans_for_info(info, num_weight_stripes, &mut plans);
        }
        plans
    }

    fn create_lonely_plans_for_info(
        &self,
        info: &MceAndPleInfo,
        num_weight_stripes: u32,
        plans: &mut Plans,
    ) {
        let conv_data = self.mce.conv_data();

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
                    let Some((input_buffer, mce_op)) = self.mce.add_mce_to_op_graph(
                        &mut op_graph,
                        &info.mce_compute,
                        &info.memory,
                        &num_memory_stripes,
                        self.mce.input_tensor_shape,
                        self.mce.input_quantization_info,
                        &conv_data,
                        false,
                    ) else {
                        return;
                    };

                    // The input stays NHWC in DRAM and is copied into SRAM
                    // byte by byte; the DMA sees it as brick-grouped. Its
                    // size is rounded up to the transfer granule.
                    let dram_input = op_graph.add_buffer(Buffer::Dram(
                        DramBuffer::build()
                            .format(DramFormat::Nhwc)
                            .data_type(self.mce.input_data_type)
                            .tensor_shape(self.original_input_shape)
                            .quantization(self.mce.input_quantization_info)
                            .size_in_bytes(round_up_to_multiple(
                                self.original_input_shape.elements(),
                                1024,
                            ))
                            .buffer_type(BufferType::Intermediate)
                            .finish(),
                    ));
                    let dma = op_graph.add_op(
                        Op::dma(DmaOp::new(DramFormat::Nhwcb))
                            .with_operation_ids(&self.mce.operation_ids),
                    );
                    op_graph.add_consumer(dram_input, dma, 0);
                    op_graph.set_producer(input_buffer, dma);

                    let ple_input_buffer = add_ple_input_sram_buffer(
                        &mut op_graph,
                        num_ple_input_stripes,
                        self.mce.output_tensor_shape,
                        info.memory.ple_input.shape,
                        self.mce.output_quantization_info,
                        self.mce.output_data_type,
                    );
                    op_graph.set_producer(ple_input_buffer, mce_op);

                    let ple_op = passthrough_ple_op(
                        info.ple_compute.block_config,
                        info.ple_compute.input,
                        info.ple_compute.output,
                        self.mce.output_data_type,
                    );
                    let (output_buffer, ple_op_id) = add_ple_to_op_graph(
                        &mut op_graph,
                        info.memory.output.shape,
                        num_output_stripes,
                        ple_op,
                        self.mce.output_tensor_shape,
                        self.mce.output_quantization_info,
                        self.mce.output_data_type,
                        &self.mce.operation_ids,
                    );
                    op_graph.add_consumer(ple_input_buffer, ple_op_id, 0);

                    let mut input_mappings = PartInputMapping::new();
                    input_mappings.insert(
                        dram_input,
                        PartInputSlot {
                            part_id: self.mce.part_id,
                            input_index: 0,
                        },
                    );

                    let output_boundary = add_dram_output_and_dma(
                        &mut op_graph,
                        output_buffer,
                        self.mce.output_tensor_shape,
                        self.mce.output_quantization_info,
                        self.mce.output_data_type,
                        &self.mce.operation_ids,
                    );
                    let mut output_mappings = PartOutputMapping::new();
                    output_mappings.insert(
                        output_boundary,
                        PartOutputSlot {
                            part_id: self.mce.part_id,
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
}

impl Part for FullyConnectedPart {
    fn part_id(&self) -> PartId {
        self.mce.part_id
    }

    fn get_plans(
        &self,
        cascade_type: CascadeType,
        _block_config: BlockConfig,
        _sram_buffer_inputs: &[Option<&Buffer>],
        num_weight_stripes: u32,
    ) -> Plans {
        // Fully-connected layers are rare and usually large, so cascading
        // them buys little; only standalone plans are generated.
        match cascade_type {
            CascadeType::Lonely => self.get_lonely_plans(num_weight_stripes),
            _ => Plans::new(),
        }
    }

    fn mce_operation(&self) -> Option<MceOperation> {
        Some(MceOperation::FullyConnected)
    }

    fn has_activation_bounds(&self) -> bool {
        true
    }

    fn apply_activation_bounds(&mut self, lower: i16, upper: i16) {
        self.mce.apply_activation_bounds(lower, upper);
    }

    fn can_double_buffer_weights(&self) -> bool {
        true
    }

    fn input_boundary_requirements(&self) -> Vec<BoundaryRequirements> {
        vec![BoundaryRequirements::default()]
    }

    fn can_inputs_take_ple_input_sram(&self) -> Vec<bool> {
        vec![false]
    }

    fn preprocess_weights_async(&self) {
        let conv_data = self.mce.conv_data();
        for info in &self.generate_stripe_infos().mce_and_ple_infos {
            let algorithm = self
                .mce
                .resolve_mce_algorithm(info.mce_compute.block_config, info.mce_compute.weight[2]);
            let request =
                self.mce
                    .weight_encoding_request(&conv_data, info.mce_compute.weight, algorithm);
            self.mce.weight_encoder_cache.encode_stage1_async(request);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::DataFormat;
    use pretty_assertions::assert_eq;

    fn fc_part(input: TensorShape, num_ofms: u32) -> FullyConnectedPart {
        let num_ifms = round_up_to_multiple(input.elements(), WEIGHTS_CHANNEL_VEC_PROD);
        let weights_info = TensorInfo {
            dimensions: TensorShape::new(1, 1, num_ifms, num_ofms),
            data_type: DataType::UInt8Quantized,
            data_format: DataFormat::Hwio,
            quantization: QuantizationInfo::new(0, 0.5),
        };
        let bias_info = TensorInfo {
            dimensions: TensorShape::new(1, 1, 1, num_ofms),
            data_type: DataType::Int32Quantized,
            data_format: DataFormat::Nhwc,
            quantization: QuantizationInfo::new(0, 0.5),
        };
        FullyConnectedPart::new(FullyConnectedPartParams {
            part_id: 0,
            operation_ids: BTreeSet::from([0]),
            input_tensor_shape: input,
            output_tensor_shape: TensorShape::new(1, 1, 1, num_ofms),
            input_quantization_info: QuantizationInfo::new(0, 1.0),
            output_quantization_info: QuantizationInfo::new(0, 1.0),
            weights_info,
            weights_data: Arc::new(vec![1u8; (num_ifms * num_ofms) as usize]),
            bias_info,
            bias_data: vec![0; num_ofms as usize],
            input_data_type: DataType::UInt8Quantized,
            output_data_type: DataType::UInt8Quantized,
            capabilities: HardwareCapabilities::standard(),
            stripe_config: StripeConfig::default(),
            thread_pool: Arc::new(ThreadPool::new(0)),
        })
    }

    #[test]
    fn input_is_flattened_and_padded() {
        let part = fc_part(TensorShape::new(1, 8, 8, 16), 32);
        assert_eq!(
            part.mce.input_tensor_shape,
            TensorShape::new(1, 1, 1, 1024)
        );
        let uneven = fc_part(TensorShape::new(1, 7, 7, 32), 32);
        assert_eq!(
            uneven.mce.input_tensor_shape,
            TensorShape::new(1, 1, 1, 2048)
        );
    }

    #[test]
    fn lonely_plans_read_nhwc_and_write_dram() {
        let part = fc_part(TensorShape::new(1, 8, 8, 16), 32);
        let plans = part.get_plans(CascadeType::Lonely, BlockConfig::new(16, 16), &[], 1);
        assert!(!plans.is_empty());
        for plan in &plans {
            assert!(plan.op_graph.validate().is_ok());
            assert_eq!(plan.block_config, Some(BlockConfig::new(8, 8)));
            for id in plan.input_mappings.keys() {
                let dram = plan.op_graph.buffer(*id).dram().unwrap();
                assert_eq!(dram.format, DramFormat::Nhwc);
                assert_eq!(dram.size_in_bytes % 1024, 0);
            }
            for id in plan.output_mappings.keys() {
                assert!(plan.op_graph.buffer(*id).dram().is_some());
            }
        }
    }

    #[test]
    fn only_the_lonely_role_produces_plans() {
        let part = fc_part(TensorShape::new(1, 8, 8, 16), 32);
        for cascade in [CascadeType::Beginning, CascadeType::Middle, CascadeType::End] {
            assert!(
                part.get_plans(cascade, BlockConfig::new(8, 8), &[], 1)
                    .is_empty()
            );
        }
    }

    #[test]
    fn large_layers_get_depth_streaming_candidates() {
        let part = fc_part(TensorShape::new(1, 8, 8, 16), 64);
        let infos = part.generate_stripe_infos();
        // No-split plus exclusive OFM splits (16, 32) plus IFM splits.
        assert!(infos.mce_and_ple_infos.len() > 1);
        assert!(infos
            .mce_and_ple_infos
            .iter()
            .any(|i| i.mce_compute.output.channels() < 64));
        // Input-depth streaming reloads the input once per output stripe.
        assert!(infos
            .mce_and_ple_infos
            .iter()
            .any(|i| i.memory.input.num_loads > 1));
    }

    #[test]
    fn preprocessing_matches_later_requests() {
        let part = fc_part(TensorShape::new(1, 8, 8, 16), 32);
        part.preprocess_weights_async();
        let plans = part.get_plans(CascadeType::Lonely, BlockConfig::new(8, 8), &[], 1);
        assert!(!plans.is_empty());
    }
}
