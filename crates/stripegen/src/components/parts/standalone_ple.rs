//! Plan builder for post-process kernels that run without a compute pass.
//!
//! These kernels (elementwise addition, the UDMA average pool, 1D max pool)
//! read their inputs from addressable SRAM directly, so no identity compute
//! pass is needed. Splitting is enumerated over the output tensor and the
//! same encoding is applied to every input; elementwise kernels allow every
//! split, the others restrict them per kernel.

use std::collections::BTreeSet;

use stripegen_common::TensorShape;

use crate::components::caps::{BRICK_GROUP_SHAPE, HardwareCapabilities};
use crate::components::parts::{
    add_dram_input_and_dma, add_dram_output_and_dma, add_new_plan, add_ple_to_op_graph,
    role_reads_input_from_dram, role_writes_output_to_dram, Part, Plans,
};
use crate::components::plan::{
    Buffer, OpGraph, PartId, PartInputMapping, PartInputSlot, PartOutputMapping, PartOutputSlot,
    PleOp, SramBuffer,
};
use crate::components::ple::PleOperation;
use crate::components::stripe::{
    create_stripe, BoundaryRequirements, PackedBoundaryThickness, StripeConfig, StripeShapeLoop,
};
use crate::components::tile::calculate_tile_size;
use crate::components::{BlockConfig, CascadeType, DataType, QuantizationInfo};

/// The axis a 1D pooling kernel slides along.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolingDirection {
    X,
    Y,
}

/// Construction parameters for [`StandalonePlePart`].
pub struct StandalonePlePartParams {
    pub part_id: PartId,
    pub operation_ids: BTreeSet<u32>,
    pub input_tensor_shapes: Vec<TensorShape>,
    pub output_tensor_shape: TensorShape,
    pub input_quantization_infos: Vec<QuantizationInfo>,
    pub output_quantization_info: QuantizationInfo,
    pub kernel_operation: PleOperation,
    pub data_type: DataType,
    /// Only meaningful for the 1D max pool.
    pub pooling_direction: Option<PoolingDirection>,
    pub capabilities: HardwareCapabilities,
    pub stripe_config: StripeConfig,
}

pub struct StandalonePlePart {
    part_id: PartId,
    operation_ids: BTreeSet<u32>,
    input_tensor_shapes: Vec<TensorShape>,
    output_tensor_shape: TensorShape,
    input_quantization_infos: Vec<QuantizationInfo>,
    output_quantization_info: QuantizationInfo,
    kernel_operation: PleOperation,
    data_type: DataType,
    pooling_direction: Option<PoolingDirection>,
    capabilities: HardwareCapabilities,
    stripe_config: StripeConfig,
    output_boundary_requirements: BoundaryRequirements,
}

impl StandalonePlePart {
    pub fn new(params: StandalonePlePartParams) -> Self {
        debug_assert_eq!(
            params.input_tensor_shapes.len(),
            params.input_quantization_infos.len()
        );
        debug_assert!(matches!(
            params.kernel_operation,
            PleOperation::Addition
                | PleOperation::AdditionRescale
                | PleOperation::AvgPool3x3_1_1Udma
                | PleOperation::MaxPool1d
        ));
        Self {
            part_id: params.part_id,
            operation_ids: params.operation_ids,
            input_tensor_shapes: params.input_tensor_shapes,
            output_tensor_shape: params.output_tensor_shape,
            input_quantization_infos: params.input_quantization_infos,
            output_quantization_info: params.output_quantization_info,
            kernel_operation: params.kernel_operation,
            data_type: params.data_type,
            pooling_direction: params.pooling_direction,
            capabilities: params.capabilities,
            stripe_config: params.stripe_config,
            output_boundary_requirements: BoundaryRequirements::default(),
        }
    }

    pub fn set_output_boundary_requirements(&mut self, requirements: BoundaryRequirements) {
        self.output_boundary_requirements = requirements;
    }

    fn add_plan_with_stripe_shapes(
        &self,
        output_stripe_shape: TensorShape,
        input_stripe_shapes: &[TensorShape],
        cascade_type: CascadeType,
        plans: &mut Plans,
    ) {
        if self.kernel_operation == PleOperation::MaxPool1d {
            // Splitting along the pooling axis would leave partial windows
            // at stripe edges, which the kernel does not handle.
            let split_along_pool = match self.pooling_direction {
                Some(PoolingDirection::X) => {
                    input_stripe_shapes[0].width() < self.input_tensor_shapes[0].width()
                }
                Some(PoolingDirection::Y) => {
                    input_stripe_shapes[0].height() < self.input_tensor_shapes[0].height()
                }
                None => false,
            };
            if split_along_pool {
                return;
            }
        }

        let (mut min_output_stripes, mut max_output_stripes) = match cascade_type {
            CascadeType::Beginning | CascadeType::Middle => {
                // The following layers may need several output buffers for
                // their boundary data.
                let b = self.output_boundary_requirements;
                let needs_before = b.needs_before_x || b.needs_before_y;
                let needs_after = b.needs_after_x || b.needs_after_y;
                let n = if needs_before && needs_after {
                    3
                } else if needs_before || needs_after {
                    2
                } else {
                    1
                };
                (n, n)
            }
            // Double-buffering.
            CascadeType::Lonely | CascadeType::End => (1, 2),
        };
        // No point holding more stripes than the tensor has.
        max_output_stripes = max_output_stripes
            .min(self.output_tensor_shape.num_stripes_total(output_stripe_shape));
        min_output_stripes = min_output_stripes.min(max_output_stripes);

        for num_output_stripes in min_output_stripes..=max_output_stripes {
            let mut op_graph = OpGraph::new();

            let mut input_buffers = Vec::with_capacity(self.input_tensor_shapes.len());
            for (i, &input_shape) in self.input_tensor_shapes.iter().enumerate() {
                let tile = calculate_tile_size(
                    &self.capabilities,
                    input_shape,
                    input_stripe_shapes[i],
                    PackedBoundaryThickness::NONE,
                    2,
                    true,
                );
                input_buffers.push(op_graph.add_buffer(Buffer::Sram(
                    SramBuffer::build()
                        .data_type(self.data_type)
                        .tensor_shape(input_shape)
                        .quantization(self.input_quantization_infos[i])
                        .stripe_shape(input_stripe_shapes[i])
                        .num_stripes(2)
                        .from_tile_size(tile)
                        .finish(),
                )));
            }

            let ple_op = PleOp::new(
                self.kernel_operation,
                BlockConfig::default(),
                input_stripe_shapes.to_vec(),
                output_stripe_shape,
                self.data_type,
                true,
            );
            let (output_buffer, ple_op_id) = add_ple_to_op_graph(
                &mut op_graph,
                output_stripe_shape,
                num_output_stripes,
                ple_op,
                self.output_tensor_shape,
                self.output_quantization_info,
                self.data_type,
                &self.operation_ids,
            );

            let mut input_mappings = PartInputMapping::new();
            for (i, &buffer) in input_buffers.iter().enumerate() {
                op_graph.add_consumer(buffer, ple_op_id, i as u32);
                let input_boundary = if role_reads_input_from_dram(cascade_type) {
                    add_dram_input_and_dma(
                        &mut op_graph,
                        self.input_tensor_shapes[i],
                        self.input_quantization_infos[i],
                        self.data_type,
                        buffer,
                        &self.operation_ids,
                    )
                } else {
                    buffer
                };
                input_mappings.insert(
                    input_boundary,
                    PartInputSlot {
                        part_id: self.part_id,
                        input_index: i as u32,
                    },
                );
            }

            let mut output_mappings = PartOutputMapping::new();
            let output_boundary = if role_writes_output_to_dram(cascade_type) {
                add_dram_output_and_dma(
                    &mut op_graph,
                    output_buffer,
                    self.output_tensor_shape,
                    self.output_quantization_info,
                    self.data_type,
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

            add_new_plan(input_mappings, output_mappings, op_graph, None, plans);
        }
    }

    /// Builds the output stripe from the encoding and applies the same
    /// encoding to every input.
    fn add_plan_with_encoding(
        &self,
        height_encoding: u32,
        width_encoding: u32,
        depth_encoding: u32,
        cascade_type: CascadeType,
        plans: &mut Plans,
    ) {
        let encoding = TensorShape::new(0, height_encoding, width_encoding, depth_encoding);
        let output_stripe_shape = create_stripe(
            self.output_tensor_shape,
            encoding,
            BRICK_GROUP_SHAPE.channels(),
        );
        let input_stripe_shapes: Vec<TensorShape> = self
            .input_tensor_shapes
            .iter()
            .map(|&shape| create_stripe(shape, encoding, BRICK_GROUP_SHAPE.channels()))
            .collect();
        self.add_plan_with_stripe_shapes(
            output_stripe_shape,
            &input_stripe_shapes,
            cascade_type,
            plans,
        );
    }
}

impl Part for StandalonePlePart {
    fn part_id(&self) -> PartId {
        self.part_id
    }

    fn get_plans(
        &self,
        cascade_type: CascadeType,
        _block_config: BlockConfig,
        sram_buffer_inputs: &[Option<&Buffer>],
        _num_weight_stripes: u32,
    ) -> Plans {
        let mut plans = Plans::new();
        let continuing = matches!(cascade_type, CascadeType::Middle | CascadeType::End);
        if continuing {
            // These kernels read addressable SRAM only.
            for input in sram_buffer_inputs.iter().flatten() {
                if input.sram().is_none() {
                    return plans;
                }
            }
        }

        let mut stripe_config = self.stripe_config.clone();
        match self.kernel_operation {
            // Elementwise: every split works.
            PleOperation::Addition | PleOperation::AdditionRescale => {}
            PleOperation::AvgPool3x3_1_1Udma => {
                // The kernel needs whole rows and columns, so only a depth
                // split is possible. That makes it cascadable only when the
                // whole plane fits in SRAM.
                stripe_config.disable_split_width();
                stripe_config.disable_split_height();
                if cascade_type != CascadeType::Lonely {
                    stripe_config.disable_split_input_depth();
                    stripe_config.disable_split_output_depth();
                }
                if continuing {
                    let Some(prev) = sram_buffer_inputs
                        .first()
                        .copied()
                        .flatten()
                        .and_then(Buffer::sram)
                    else {
                        return plans;
                    };
                    // A split predecessor cannot feed the full-tensor plan.
                    if prev.stripe_shape.height() < self.input_tensor_shapes[0].height()
                        || prev.stripe_shape.width() < self.input_tensor_shapes[0].width()
                        || prev.stripe_shape.channels() < self.input_tensor_shapes[0].channels()
                    {
                        return plans;
                    }
                }
            }
            PleOperation::MaxPool1d => {
                // Cascading would need pooling-direction-first traversal;
                // only standalone plans are generated.
                if cascade_type != CascadeType::Lonely {
                    return plans;
                }
            }
            _ => return plans,
        }

        if continuing {
            // The plan inherits the predecessors' stripe shape, which must
            // agree across all resident inputs.
            let mut stripe_shape = None;
            for input in sram_buffer_inputs.iter().flatten() {
                let Some(sram) = input.sram() else {
                    return plans;
                };
                if stripe_shape.is_some_and(|s| s != sram.stripe_shape) {
                    return plans;
                }
                stripe_shape = Some(sram.stripe_shape);
            }
            let Some(stripe_shape) = stripe_shape else {
                return plans;
            };
            let input_stripe_shapes =
                vec![stripe_shape; self.input_tensor_shapes.len()];
            self.add_plan_with_stripe_shapes(
                stripe_shape,
                &input_stripe_shapes,
                cascade_type,
                &mut plans,
            );
            return plans;
        }

        // Lonely or Beginning: enumerate over the output tensor. Exclusive
        // loops throughout since the no-split candidate is added explicitly.
        let height_loop = StripeShapeLoop::exclusive_clamped(
            self.output_tensor_shape.height(),
            BRICK_GROUP_SHAPE.height(),
            stripe_config.block_height_multiplier.min,
            stripe_config.block_height_multiplier.max,
        );
        let width_loop = StripeShapeLoop::exclusive_clamped(
            self.output_tensor_shape.width(),
            BRICK_GROUP_SHAPE.width(),
            stripe_config.block_width_multiplier.min,
            stripe_config.block_width_multiplier.max,
        );
        let depth_loop = StripeShapeLoop::exclusive_clamped(
            self.output_tensor_shape.channels(),
            BRICK_GROUP_SHAPE.channels(),
            stripe_config.ofm_depth_multiplier.min,
            stripe_config.ofm_depth_multiplier.max,
        );

        if stripe_config.splits.none {
            self.add_plan_with_encoding(0, 0, 0, cascade_type, &mut plans);
        }
        if stripe_config.splits.width_only {
            for width in width_loop {
                self.add_plan_with_encoding(0, width, 0, cascade_type, &mut plans);
            }
        }
        if stripe_config.splits.mce_and_ple_output_height {
            for height in height_loop {
                self.add_plan_with_encoding(height, 0, 0, cascade_type, &mut plans);
            }
        }
        if stripe_config.splits.output_depth_input_depth {
            for depth in depth_loop {
                self.add_plan_with_encoding(0, 0, depth, cascade_type, &mut plans);
            }
        }

        if cascade_type == CascadeType::Lonely
            && stripe_config.splits.width_height_output_depth_input_depth
        {
            for height in height_loop {
                for width in width_loop {
                    for depth in depth_loop {
                        self.add_plan_with_encoding(
                            height,
                            width,
                            depth,
                            cascade_type,
                            &mut plans,
                        );
                    }
                }
            }
            // Pairs of dimensions as well, so two-way splits exist without
            // relying on inclusive loops (whose final covering candidate
            // breaks valid-padding 1D pooling).
            for width in width_loop {
                for depth in depth_loop {
                    self.add_plan_with_encoding(0, width, depth, cascade_type, &mut plans);
                }
            }
            for height in height_loop {
                for depth in depth_loop {
                    self.add_plan_with_encoding(height, 0, depth, cascade_type, &mut plans);
                }
            }
            for height in height_loop {
                for width in width_loop {
                    self.add_plan_with_encoding(height, width, 0, cascade_type, &mut plans);
                }
            }
        }

        plans
    }

    fn input_boundary_requirements(&self) -> Vec<BoundaryRequirements> {
        // Even the average pool needs no boundary data, as it never splits
        // in width or height.
        vec![BoundaryRequirements::default(); self.input_tensor_shapes.len()]
    }

    fn can_inputs_take_ple_input_sram(&self) -> Vec<bool> {
        vec![false; self.input_tensor_shapes.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ple_part(
        inputs: Vec<TensorShape>,
        output: TensorShape,
        kernel_operation: PleOperation,
        pooling_direction: Option<PoolingDirection>,
    ) -> StandalonePlePart {
        let quantizations = vec![QuantizationInfo::new(0, 1.0); inputs.len()];
        StandalonePlePart::new(StandalonePlePartParams {
            part_id: 0,
            operation_ids: BTreeSet::from([0]),
            input_tensor_shapes: inputs,
            output_tensor_shape: output,
            input_quantization_infos: quantizations,
            output_quantization_info: QuantizationInfo::new(0, 1.0),
            kernel_operation,
            data_type: DataType::UInt8Quantized,
            pooling_direction,
            capabilities: HardwareCapabilities::standard(),
            stripe_config: StripeConfig::default(),
        })
    }

    fn addition_part(shape: TensorShape) -> StandalonePlePart {
        ple_part(vec![shape, shape], shape, PleOperation::Addition, None)
    }

    fn sram_input(tensor: TensorShape, stripe: TensorShape) -> Buffer {
        Buffer::Sram(
            SramBuffer::build()
                .tensor_shape(tensor)
                .stripe_shape(stripe)
                .num_stripes(2)
                .slot_size(stripe.elements())
                .finish(),
        )
    }

    #[test]
    fn addition_lonely_plans_wire_both_inputs() {
        let part = addition_part(TensorShape::new(1, 32, 32, 16));
        let plans = part.get_plans(CascadeType::Lonely, BlockConfig::new(16, 16), &[], 1);
        assert!(!plans.is_empty());
        for plan in &plans {
            assert!(plan.op_graph.validate().is_ok());
            assert!(plan.block_config.is_none());
            assert_eq!(plan.input_mappings.len(), 2);
            // Standalone plans read from and write to DRAM.
            for id in plan.input_mappings.keys() {
                assert!(plan.op_graph.buffer(*id).dram().is_some());
            }
            for id in plan.output_mappings.keys() {
                assert!(plan.op_graph.buffer(*id).dram().is_some());
            }
            let ple = plan.op_graph.ops().find_map(|(_, op)| op.as_ple()).unwrap();
            assert_eq!(ple.input_stripe_shapes.len(), 2);
        }
    }

    #[test]
    fn middle_plans_inherit_the_resident_stripe() {
        let shape = TensorShape::new(1, 64, 64, 16);
        let stripe = TensorShape::new(1, 8, 64, 16);
        let part = addition_part(shape);
        let a = sram_input(shape, stripe);
        let b = sram_input(shape, stripe);
        let plans = part.get_plans(
            CascadeType::Middle,
            BlockConfig::new(16, 16),
            &[Some(&a), Some(&b)],
            1,
        );
        assert!(!plans.is_empty());
        for plan in &plans {
            assert!(plan.op_graph.validate().is_ok());
            let ple = plan.op_graph.ops().find_map(|(_, op)| op.as_ple()).unwrap();
            assert_eq!(ple.output_stripe_shape, stripe);
            for id in plan.output_mappings.keys() {
                assert!(plan.op_graph.buffer(*id).dram().is_none());
            }
        }
    }

    #[test]
    fn mismatched_resident_stripes_yield_nothing() {
        let shape = TensorShape::new(1, 64, 64, 16);
        let part = addition_part(shape);
        let a = sram_input(shape, TensorShape::new(1, 8, 64, 16));
        let b = sram_input(shape, TensorShape::new(1, 16, 64, 16));
        let plans = part.get_plans(
            CascadeType::Middle,
            BlockConfig::new(16, 16),
            &[Some(&a), Some(&b)],
            1,
        );
        assert!(plans.is_empty());
    }

    #[test]
    fn engine_resident_inputs_are_rejected() {
        let shape = TensorShape::new(1, 32, 32, 16);
        let part = addition_part(shape);
        let prev = Buffer::PleInputSram(crate::components::plan::PleInputSramBuffer {
            data_type: DataType::UInt8Quantized,
            tensor_shape: shape,
            quantization: QuantizationInfo::new(0, 1.0),
            stripe_shape: shape,
            num_stripes: 0,
        });
        let plans = part.get_plans(
            CascadeType::Middle,
            BlockConfig::new(16, 16),
            &[Some(&prev), Some(&prev)],
            1,
        );
        assert!(plans.is_empty());
    }

    #[test]
    fn avgpool_never_splits_the_plane() {
        let shape = TensorShape::new(1, 64, 64, 16);
        let part = ple_part(
            vec![shape],
            shape,
            PleOperation::AvgPool3x3_1_1Udma,
            None,
        );
        let plans = part.get_plans(CascadeType::Lonely, BlockConfig::new(16, 16), &[], 1);
        assert!(!plans.is_empty());
        for plan in &plans {
            let ple = plan.op_graph.ops().find_map(|(_, op)| op.as_ple()).unwrap();
            assert!(ple.input_stripe_shapes[0].height() >= shape.height());
            assert!(ple.input_stripe_shapes[0].width() >= shape.width());
        }
    }

    #[test]
    fn avgpool_mid_cascade_needs_a_full_tensor_predecessor() {
        let shape = TensorShape::new(1, 64, 64, 16);
        let part = ple_part(
            vec![shape],
            shape,
            PleOperation::AvgPool3x3_1_1Udma,
            None,
        );
        let split = sram_input(shape, TensorShape::new(1, 8, 64, 16));
        assert!(part
            .get_plans(
                CascadeType::Middle,
                BlockConfig::new(16, 16),
                &[Some(&split)],
                1
            )
            .is_empty());

        let full = sram_input(shape, shape);
        assert!(!part
            .get_plans(
                CascadeType::Middle,
                BlockConfig::new(16, 16),
                &[Some(&full)],
                1
            )
            .is_empty());
    }

    #[test]
    fn maxpool1d_is_lonely_only_and_never_splits_the_pooling_axis() {
        let shape = TensorShape::new(1, 64, 64, 16);
        let part = ple_part(
            vec![shape],
            shape,
            PleOperation::MaxPool1d,
            Some(PoolingDirection::X),
        );
        for cascade in [CascadeType::Beginning, CascadeType::Middle, CascadeType::End] {
            assert!(
                part.get_plans(cascade, BlockConfig::new(16, 16), &[], 1)
                    .is_empty()
            );
        }
        let plans = part.get_plans(CascadeType::Lonely, BlockConfig::new(16, 16), &[], 1);
        assert!(!plans.is_empty());
        for plan in &plans {
            let ple = plan.op_graph.ops().find_map(|(_, op)| op.as_ple()).unwrap();
            assert!(ple.input_stripe_shapes[0].width() >= shape.width());
        }
    }

    #[test]
    fn multiple_inputs_report_per_input_properties() {
        let part = addition_part(TensorShape::new(1, 16, 16, 16));
        assert_eq!(part.can_inputs_take_ple_input_sram(), vec![false, false]);
        assert_eq!(
            part.input_boundary_requirements(),
            vec![BoundaryRequirements::default(); 2]
        );
        assert!(!part.can_double_buffer_weights());
    }
}
