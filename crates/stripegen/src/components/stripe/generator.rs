//! Enumeration of legal stripe configurations for one compute node.
//!
//! For a requested cascade role the generator walks every enabled block
//! config and split strategy, derives the compute-stage and memory-tile
//! stripe shapes for each candidate size, applies the hardware alignment
//! and padding corrections, and collects the results de-duplicated in
//! ordered sets.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use stripegen_common::math::div_round_up;
use stripegen_common::{ShapeMultiplier, TensorShape};

use crate::components::caps::{BRICK_GROUP_SHAPE, HardwareCapabilities};
use crate::components::ple::PleOperation;
use crate::components::stripe::config::StripeConfig;
use crate::components::stripe::shape_loop::StripeShapeLoop;
use crate::components::{BlockConfig, CascadeType, MceOperation, PlanPriority};

/// Allowed buffering depth for one tile: how many stripes may be resident
/// at once.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NumStripes {
    pub min: u32,
    pub max: u32,
}

impl NumStripes {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

/// Halo data packed into the same tile slot as the main stripe, per edge.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PackedBoundaryThickness {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl PackedBoundaryThickness {
    pub const NONE: PackedBoundaryThickness = PackedBoundaryThickness {
        left: 0,
        top: 0,
        right: 0,
        bottom: 0,
    };

    pub fn any_nonzero(&self) -> bool {
        self.left != 0 || self.top != 0 || self.right != 0 || self.bottom != 0
    }
}

/// Whether a stripe needs neighbour data before/after it along one axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NeedBoundary {
    pub before: bool,
    pub after: bool,
}

/// Per-axis boundary needs of the *consumer* of this node's output, used to
/// size the output tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundaryRequirements {
    pub needs_before_x: bool,
    pub needs_after_x: bool,
    pub needs_before_y: bool,
    pub needs_after_y: bool,
}

impl BoundaryRequirements {
    pub fn any(&self) -> bool {
        self.needs_before_x || self.needs_after_x || self.needs_before_y || self.needs_after_y
    }

    fn before(&self) -> bool {
        self.needs_before_x || self.needs_before_y
    }

    fn after(&self) -> bool {
        self.needs_after_x || self.needs_after_y
    }
}

/// Convolution padding, per edge.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Padding {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl Padding {
    pub const fn new(top: u32, left: u32) -> Self {
        Self {
            top,
            bottom: 0,
            left,
            right: 0,
        }
    }

    /// Symmetric SAME padding for the given kernel size.
    pub const fn same(kernel_height: u32, kernel_width: u32) -> Self {
        Self {
            top: (kernel_height - 1) / 2,
            bottom: kernel_height / 2,
            left: (kernel_width - 1) / 2,
            right: kernel_width / 2,
        }
    }

    pub const fn vertical(&self) -> u32 {
        self.top + self.bottom
    }

    pub const fn horizontal(&self) -> u32 {
        self.left + self.right
    }
}

/// Compute-stage granularity of the main engine: the shapes processed per
/// iteration plus the block config used.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MceStripesInfo {
    pub input: TensorShape,
    pub output: TensorShape,
    pub weight: TensorShape,
    pub block_config: BlockConfig,
}

/// Compute-stage granularity of the post-process engine.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PleStripesInfo {
    pub input: TensorShape,
    pub output: TensorShape,
    pub block_config: BlockConfig,
}

/// A tile granularity: the stripe shape resident in SRAM plus the allowed
/// buffering-depth range.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MemoryStripeInfo {
    pub range: NumStripes,
    pub shape: TensorShape,
}

/// Input tile granularity, extended with halo packing and a reload count.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InputMemoryStripeInfo {
    pub stripe: MemoryStripeInfo,
    pub packed_boundary_thickness: PackedBoundaryThickness,
    pub num_loads: u32,
}

/// Weight tile granularity, extended with a reload count.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct WeightMemoryStripeInfo {
    pub stripe: MemoryStripeInfo,
    pub num_loads: u32,
}

/// The full set of tile granularities of one candidate tiling.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MemoryStripesInfo {
    pub input: InputMemoryStripeInfo,
    pub output: MemoryStripeInfo,
    pub weight: WeightMemoryStripeInfo,
    pub ple_input: MemoryStripeInfo,
}

/// A concrete buffering-depth choice, one value per tile.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NumMemoryStripes {
    pub input: u32,
    pub output: u32,
    pub weight: u32,
    pub ple_input: u32,
}

/// Candidate tiling where compute and post-process share one tile residency.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MceAndPleInfo {
    pub mce_compute: MceStripesInfo,
    pub ple_compute: PleStripesInfo,
    pub memory: MemoryStripesInfo,
}

/// Candidate tiling for the compute stage only (feeding a later fused
/// post-process).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MceOnlyInfo {
    pub mce_compute: MceStripesInfo,
    pub memory: MemoryStripesInfo,
}

/// Candidate tiling for the post-process stage only (consuming a previous
/// node's compute output).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PleOnlyInfo {
    pub ple_compute: PleStripesInfo,
    pub memory: MemoryStripesInfo,
}

/// Candidate tiling for pure data movement.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DmaOnlyInfo {
    pub input: MemoryStripeInfo,
    pub output: MemoryStripeInfo,
}

/// De-duplicated candidate tilings, one ordered set per fusion shape.
/// Identical tilings are never stored twice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StripeInfos {
    pub mce_and_ple_infos: BTreeSet<MceAndPleInfo>,
    pub mce_only_infos: BTreeSet<MceOnlyInfo>,
    pub ple_only_infos: BTreeSet<PleOnlyInfo>,
    pub dma_only_infos: BTreeSet<DmaOnlyInfo>,
}

/// Generates a stripe shape from an encoding: a 0 on an axis means "use the
/// full tensor extent". Height and width round up to the brick group, the
/// channels to `channel_rounding`.
pub fn create_stripe(
    tensor: TensorShape,
    encoding: TensorShape,
    channel_rounding: u32,
) -> TensorShape {
    let mut stripe = TensorShape::default();
    for i in 0..4 {
        stripe[i] = if encoding[i] != 0 { encoding[i] } else { tensor[i] };
        stripe[i] = stripe[i].min(tensor[i]);
    }
    stripe[1] = stripegen_common::math::round_up_to_multiple(stripe[1], BRICK_GROUP_SHAPE.height());
    stripe[2] = stripegen_common::math::round_up_to_multiple(stripe[2], BRICK_GROUP_SHAPE.width());
    stripe[3] = stripegen_common::math::round_up_to_multiple(stripe[3], channel_rounding);
    stripe
}

/// Whether a stripe needs neighbour data before/after it along one axis,
/// from the kernel overlap and the padding.
pub fn get_boundary_requirements(
    pad_before: u32,
    ifm_stripe_size: u32,
    ofm_stripe_size: u32,
    weight_size: u32,
    is_upscale: bool,
) -> NeedBoundary {
    NeedBoundary {
        before: pad_before > 0,
        // Upscaling always needs the next stripe's data to interpolate.
        after: is_upscale || (ofm_stripe_size + weight_size - pad_before - 1) > ifm_stripe_size,
    }
}

fn space_left(tensor_size: u32, stripe_size: u32) -> u32 {
    (stripe_size - (tensor_size % stripe_size)) % stripe_size
}

/// Padding-over-stripe-boundary correction: returns how much the stripe must
/// grow (by whole blocks, staying under twice the original) so the tensor's
/// edge remainder can hold the padding, or `None` if no such size exists.
fn check_for_posb(
    tensor_size: u32,
    stripe_size: u32,
    padding: u32,
    block_size: u32,
) -> Option<u32> {
    if space_left(tensor_size, stripe_size) >= padding {
        return Some(0);
    }

    let mut new_stripe_size = stripe_size;
    loop {
        new_stripe_size += block_size;
        if new_stripe_size >= 2 * stripe_size {
            return None;
        }
        if space_left(tensor_size, new_stripe_size) >= padding {
            return Some(new_stripe_size - stripe_size);
        }
    }
}

/// Stripe-candidate enumerator for one compute node.
#[derive(Clone, Debug)]
pub struct StripeGenerator {
    pub mce_input_tensor_shape: TensorShape,
    pub mce_output_tensor_shape: TensorShape,
    pub ple_output_tensor_shape: TensorShape,
    pub kernel_height: u32,
    pub kernel_width: u32,
    pub padding: Padding,
    pub upscale_factor: u32,
    pub operation: MceOperation,
    pub kernel_operation: PleOperation,
    pub mce_shape_multiplier: ShapeMultiplier,
    pub ple_shape_multiplier: ShapeMultiplier,
    pub capabilities: HardwareCapabilities,
    pub stripe_config: StripeConfig,
}

impl StripeGenerator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mce_input: TensorShape,
        mce_output: TensorShape,
        ple_output: TensorShape,
        kernel_height: u32,
        kernel_width: u32,
        padding: Padding,
        upscale_factor: u32,
        operation: MceOperation,
        kernel_operation: PleOperation,
        mce_shape_multiplier: ShapeMultiplier,
        ple_shape_multiplier: ShapeMultiplier,
        capabilities: HardwareCapabilities,
        stripe_config: StripeConfig,
    ) -> Self {
        Self {
            mce_input_tensor_shape: mce_input,
            mce_output_tensor_shape: mce_output,
            ple_output_tensor_shape: ple_output,
            kernel_height,
            kernel_width,
            padding,
            upscale_factor,
            operation,
            kernel_operation,
            mce_shape_multiplier,
            ple_shape_multiplier,
            capabilities,
            stripe_config,
        }
    }

    /// Produces the full de-duplicated candidate set for `cascade_type`,
    /// optionally filtered by search priority.
    pub fn generate_stripes(
        &self,
        cascade_type: CascadeType,
        output_boundary_requirements: BoundaryRequirements,
        priority_filter: Option<PlanPriority>,
    ) -> StripeInfos {
        let mut result = StripeInfos::default();
        let block_configs = crate::components::ple::filter_ple_block_configs(
            self.kernel_operation,
            self.stripe_config.block_configs.clone(),
        );
        for block_config in block_configs {
            self.generate_stripes_for_block(
                block_config,
                cascade_type,
                output_boundary_requirements,
                priority_filter,
                &mut result,
            );
        }
        log::debug!(
            "Generated {} mce+ple / {} mce-only / {} ple-only stripe candidates for {cascade_type:?}",
            result.mce_and_ple_infos.len(),
            result.mce_only_infos.len(),
            result.ple_only_infos.len(),
        );
        result
    }

    /// Buffering ranges for each tile at the start of a cascade. The input
    /// tile needs up to one stripe more than the boundary minimum for
    /// prefetching; weights can double buffer.
    fn create_num_stripes(
        &self,
        cascade_type: CascadeType,
        min_stripes_in_ifm_tile: u32,
        output_boundary: BoundaryRequirements,
    ) -> (NumStripes, NumStripes, NumStripes, NumStripes) {
        match cascade_type {
            CascadeType::Beginning => {
                let input = NumStripes::new(min_stripes_in_ifm_tile, min_stripes_in_ifm_tile + 1);
                // The following layer may need multiple output buffers for
                // its own boundary data.
                let output = if output_boundary.before() && output_boundary.after() {
                    NumStripes::new(3, 3)
                } else if output_boundary.any() {
                    NumStripes::new(2, 2)
                } else {
                    NumStripes::new(1, 1)
                };
                (input, output, NumStripes::new(1, 2), NumStripes::new(0, 0))
            }
            CascadeType::Lonely => (
                NumStripes::new(min_stripes_in_ifm_tile, min_stripes_in_ifm_tile + 1),
                NumStripes::new(1, 2),
                NumStripes::new(1, 2),
                NumStripes::new(0, 0),
            ),
            _ => unreachable!("continue-section roles do not use the stripe generator"),
        }
    }

    /// Kernel-specific split restrictions applied before the main loop.
    fn apply_ple_kernel_split_restrictions(&self, cascade_type: CascadeType) -> StripeConfig {
        let mut result = self.stripe_config.clone();

        // MaxPool_3x3_2_2 cannot start a cascade unless the stripe is the
        // full tensor: IFM streaming would corrupt the PLE's carried state.
        // Further Lonely restrictions need per-candidate shapes and are
        // applied during insertion.
        if matches!(
            self.kernel_operation,
            PleOperation::MaxPool3x3_2_2Even | PleOperation::MaxPool3x3_2_2Odd
        ) && cascade_type == CascadeType::Beginning
        {
            result.disable_split_height();
            result.disable_split_width();
            result.disable_split_input_depth();
            result.disable_split_output_depth();
        }

        // Transpose needs the full tensor present.
        if self.kernel_operation == PleOperation::TransposeXy {
            result.disable_all_splits();
            result.splits.none = true;
        }

        result
    }

    fn generate_stripes_for_block(
        &self,
        block_config: BlockConfig,
        cascade_type: CascadeType,
        output_boundary_requirements: BoundaryRequirements,
        priority_filter: Option<PlanPriority>,
        out: &mut StripeInfos,
    ) {
        let num_ogs = self.capabilities.num_ogs();
        let num_srams = self.capabilities.num_srams();

        let mut stripe_config = self.apply_ple_kernel_split_restrictions(cascade_type);

        let is_depthwise = self.operation == MceOperation::DepthwiseConvolution;
        let is_conv2d = self.operation == MceOperation::Convolution;
        let mce_output_shape = self.mce_output_tensor_shape;

        let is_height_increased = self.ple_output_tensor_shape.height()
            > self.mce_input_tensor_shape.height() * self.upscale_factor;
        let is_width_increased = self.ple_output_tensor_shape.width()
            > self.mce_input_tensor_shape.width() * self.upscale_factor;

        // Padding-over-stripe-boundary checks are needed when padding exists
        // and the output outgrows the input on that axis.
        let should_check_posb = (is_depthwise || is_conv2d)
            && ((self.padding.vertical() > 0 && is_height_increased)
                || (self.padding.horizontal() > 0 && is_width_increased));

        // Splitting input depth (for regular conv) is always worse, so those
        // are the low-priority plans. For depthwise it is all high priority.
        match priority_filter {
            Some(PlanPriority::High) if !is_depthwise => {
                stripe_config.disable_split_input_depth();
            }
            Some(PlanPriority::Low) if !is_depthwise => {
                stripe_config.disable_all_splits();
                stripe_config.splits.width_height_output_depth_input_depth = true;
                stripe_config.splits.output_depth_input_depth = true;
            }
            _ => {}
        }

        // Depthwise uses one OG per engine, so the base depth granularity is
        // the SRAM count instead of the OG count.
        let base_mce_ofm = if is_depthwise { num_srams } else { num_ogs };

        // Configs with few OGs/SRAMs can have stripes shallower than a brick
        // group.
        let channel_rounding = BRICK_GROUP_SHAPE.channels().min(base_mce_ofm);

        // The base stripe shape is one block, grown so that the PLE outputs
        // at least a brick group and the MCE consumes at least a brick group.
        let mce_and_ple_multiplier = ShapeMultiplier {
            h: stripegen_common::Fraction::new(
                self.mce_shape_multiplier.h.num * self.ple_shape_multiplier.h.num,
                self.mce_shape_multiplier.h.den * self.ple_shape_multiplier.h.den,
            ),
            w: stripegen_common::Fraction::new(
                self.mce_shape_multiplier.w.num * self.ple_shape_multiplier.w.num,
                self.mce_shape_multiplier.w.den * self.ple_shape_multiplier.w.den,
            ),
            c: stripegen_common::Fraction::new(
                self.mce_shape_multiplier.c.num * self.ple_shape_multiplier.c.num,
                self.mce_shape_multiplier.c.den * self.ple_shape_multiplier.c.den,
            ),
        };
        let base_mce_input_height = self
            .mce_shape_multiplier
            .h
            .inverse()
            .apply(block_config.height)
            .max(mce_and_ple_multiplier.h.inverse().apply(BRICK_GROUP_SHAPE.height()))
            .max(BRICK_GROUP_SHAPE.height());
        let base_mce_input_width = self
            .mce_shape_multiplier
            .w
            .inverse()
            .apply(block_config.width)
            .max(mce_and_ple_multiplier.w.inverse().apply(BRICK_GROUP_SHAPE.width()))
            .max(BRICK_GROUP_SHAPE.width());
        let base_mce_ifm = self.mce_shape_multiplier.c.inverse().apply(base_mce_ofm);

        let input_shape = self.mce_input_tensor_shape;
        let output_shape = self.ple_output_tensor_shape;

        let width_loop_excl = StripeShapeLoop::exclusive_clamped(
            input_shape.width(),
            base_mce_input_width,
            stripe_config.block_width_multiplier.min,
            stripe_config.block_width_multiplier.max,
        );
        let height_loop_excl = StripeShapeLoop::exclusive_clamped(
            input_shape.height(),
            base_mce_input_height,
            stripe_config.block_height_multiplier.min,
            stripe_config.block_height_multiplier.max,
        );
        let ifm_loop_excl = StripeShapeLoop::exclusive_clamped(
            input_shape.channels(),
            base_mce_ifm,
            stripe_config.ifm_depth_multiplier.min,
            stripe_config.ifm_depth_multiplier.max,
        );
        let ofm_loop_excl = StripeShapeLoop::exclusive_clamped(
            mce_output_shape.channels(),
            base_mce_ofm,
            stripe_config.ofm_depth_multiplier.min,
            stripe_config.ofm_depth_multiplier.max,
        );
        let width_loop_incl = StripeShapeLoop::inclusive_clamped(
            input_shape.width(),
            base_mce_input_width,
            stripe_config.block_width_multiplier.min,
            stripe_config.block_width_multiplier.max,
        );
        let height_loop_incl = StripeShapeLoop::inclusive_clamped(
            input_shape.height(),
            base_mce_input_height,
            stripe_config.block_height_multiplier.min,
            stripe_config.block_height_multiplier.max,
        );
        let ifm_loop_incl = StripeShapeLoop::inclusive_clamped(
            input_shape.channels(),
            base_mce_ifm,
            stripe_config.ifm_depth_multiplier.min,
            stripe_config.ifm_depth_multiplier.max,
        );

        let gen = Insertion {
            generator: self,
            block_config,
            cascade_type,
            output_boundary_requirements,
            stripe_config: &stripe_config,
            is_depthwise,
            base_mce_ofm,
        };

        let check_height = |stripe_height: u32| -> Option<u32> {
            if !should_check_posb {
                return Some(stripe_height);
            }
            check_for_posb(
                input_shape.height(),
                stripe_height,
                self.padding.vertical(),
                block_config.height,
            )
            .map(|delta| stripe_height + delta)
        };
        let check_width = |stripe_width: u32| -> Option<u32> {
            if !should_check_posb {
                return Some(stripe_width);
            }
            check_for_posb(
                input_shape.width(),
                stripe_width,
                self.padding.horizontal(),
                block_config.width,
            )
            .map(|delta| stripe_width + delta)
        };

        // Split both compute and memory in height.
        if stripe_config.splits.mce_and_ple_output_height {
            // Exclusive loop: the no-split plan is added separately.
            for stripe_height in height_loop_excl {
                let Some(input_height) = check_height(stripe_height) else {
                    continue;
                };
                let mce_input_encoding = TensorShape::new(0, input_height, 0, 0);
                let shapes = self.derive_shapes(mce_input_encoding, channel_rounding, channel_rounding);
                let memory_output_stripe =
                    create_stripe(output_shape, shapes.ple_output_encoding, channel_rounding);
                gen.add(
                    out,
                    &shapes,
                    shapes.mce_input_stripe,
                    memory_output_stripe,
                    shapes.mce_output_stripe,
                );
            }
        }

        // Split only the input in height while the output stays full.
        if stripe_config.splits.mce_output_height_only {
            for stripe_height in height_loop_excl {
                let Some(input_height) = check_height(stripe_height) else {
                    continue;
                };
                let mce_input_encoding = TensorShape::new(0, input_height, 0, 0);
                let shapes = self.derive_shapes(mce_input_encoding, channel_rounding, channel_rounding);
                // With POSB in play the final output stripe is irregular, so
                // the memory stripe must match the compute stripe.
                let memory_output_encoding = if should_check_posb {
                    shapes.ple_output_encoding
                } else {
                    TensorShape::default()
                };
                let memory_output_stripe =
                    create_stripe(output_shape, memory_output_encoding, channel_rounding);
                gen.add(
                    out,
                    &shapes,
                    shapes.mce_input_stripe,
                    memory_output_stripe,
                    shapes.mce_output_stripe,
                );
            }
        }

        // Split in width.
        if stripe_config.splits.width_only {
            for stripe_width in width_loop_excl {
                let Some(input_width) = check_width(stripe_width) else {
                    continue;
                };
                let mce_input_encoding = TensorShape::new(0, 0, input_width, 0);
                let shapes = self.derive_shapes(mce_input_encoding, channel_rounding, channel_rounding);
                let memory_output_stripe =
                    create_stripe(output_shape, shapes.ple_output_encoding, channel_rounding);
                gen.add(
                    out,
                    &shapes,
                    shapes.mce_input_stripe,
                    memory_output_stripe,
                    shapes.mce_output_stripe,
                );
            }
        }

        if cascade_type == CascadeType::Lonely && stripe_config.splits.width_height {
            // Inclusive loops: width-only or height-only plans with larger
            // stripes than the exclusive loops above are useful for Lonely.
            for stripe_height in height_loop_incl {
                for stripe_width in width_loop_incl {
                    let Some(input_width) = check_width(stripe_width) else {
                        continue;
                    };
                    let Some(input_height) = check_height(stripe_height) else {
                        continue;
                    };
                    let mce_input_encoding = TensorShape::new(0, input_height, input_width, 0);
                    let shapes =
                        self.derive_shapes(mce_input_encoding, channel_rounding, channel_rounding);
                    let memory_output_stripe =
                        create_stripe(output_shape, shapes.ple_output_encoding, channel_rounding);
                    gen.add(
                        out,
                        &shapes,
                        shapes.mce_input_stripe,
                        memory_output_stripe,
                        shapes.mce_output_stripe,
                    );
                }
            }
        }

        if is_depthwise {
            if cascade_type == CascadeType::Lonely {
                // Split output and input depth together: with depthwise each
                // OFM needs only one IFM.
                if stripe_config.splits.output_depth_input_depth {
                    for ifm_depth in ifm_loop_excl {
                        let mce_input_encoding = TensorShape::new(0, 0, 0, ifm_depth);
                        let shapes =
                            self.derive_shapes(mce_input_encoding, channel_rounding, base_mce_ofm);
                        let memory_output_stripe =
                            create_stripe(output_shape, shapes.ple_output_encoding, base_mce_ofm);
                        gen.add(
                            out,
                            &shapes,
                            shapes.mce_input_stripe,
                            memory_output_stripe,
                            shapes.mce_output_stripe,
                        );
                    }
                }

                // Split height, width and both depths.
                if stripe_config.splits.width_height_output_depth_input_depth {
                    for stripe_height in height_loop_incl {
                        for stripe_width in width_loop_incl {
                            for ifm_depth in ifm_loop_incl {
                                let Some(input_width) = check_width(stripe_width) else {
                                    continue;
                                };
                                let Some(input_height) = check_height(stripe_height) else {
                                    continue;
                                };
                                let mce_input_encoding =
                                    TensorShape::new(0, input_height, input_width, ifm_depth);
                                let shapes = self.derive_shapes(
                                    mce_input_encoding,
                                    channel_rounding,
                                    base_mce_ofm,
                                );
                                let memory_output_stripe = create_stripe(
                                    output_shape,
                                    shapes.ple_output_encoding,
                                    base_mce_ofm,
                                );
                                gen.add(
                                    out,
                                    &shapes,
                                    shapes.mce_input_stripe,
                                    memory_output_stripe,
                                    shapes.mce_output_stripe,
                                );
                            }
                        }
                    }
                }
            }

            // Split depth for compute while the memory buffer holds the full
            // tensor (mid-cascade full-plane strategies).
            if stripe_config.splits.output_depth_input_depth {
                for ifm_depth in ifm_loop_excl {
                    let mce_input_encoding = TensorShape::new(0, 0, 0, ifm_depth);
                    let mce_input_stripe =
                        create_stripe(input_shape, mce_input_encoding, channel_rounding);
                    let mce_output_encoding = mce_input_encoding * self.mce_shape_multiplier;
                    let mce_output_stripe =
                        create_stripe(mce_output_shape, mce_output_encoding, base_mce_ofm);

                    // The PLE accumulates the full output depth.
                    let ple_input_stripe =
                        create_stripe(mce_output_shape, TensorShape::default(), base_mce_ofm);
                    let ple_output_stripe =
                        create_stripe(output_shape, TensorShape::default(), base_mce_ofm);

                    let shapes = CandidateShapes {
                        mce_input_stripe,
                        mce_output_stripe,
                        ple_input_stripe,
                        ple_output_stripe,
                        ple_output_encoding: TensorShape::default(),
                    };
                    let memory_output_stripe =
                        create_stripe(output_shape, TensorShape::default(), base_mce_ofm);
                    gen.add(
                        out,
                        &shapes,
                        mce_input_stripe,
                        memory_output_stripe,
                        mce_output_stripe,
                    );
                }
            }
        } else {
            // Convolution or fully connected.
            if cascade_type == CascadeType::Lonely {
                // Split output depth.
                if stripe_config.splits.mce_and_ple_output_depth {
                    for ofm_depth in ofm_loop_excl {
                        let mce_input_stripe =
                            create_stripe(input_shape, TensorShape::default(), channel_rounding);
                        let mce_output_encoding = TensorShape::new(0, 0, 0, ofm_depth);
                        let mce_output_stripe =
                            create_stripe(mce_output_shape, mce_output_encoding, base_mce_ofm);
                        let ple_output_encoding = mce_output_encoding * self.ple_shape_multiplier;
                        let ple_output_stripe =
                            create_stripe(output_shape, ple_output_encoding, base_mce_ofm);
                        let shapes = CandidateShapes {
                            mce_input_stripe,
                            mce_output_stripe,
                            ple_input_stripe: mce_output_stripe,
                            ple_output_stripe,
                            ple_output_encoding,
                        };
                        let memory_output_stripe =
                            create_stripe(output_shape, ple_output_encoding, base_mce_ofm);
                        gen.add(
                            out,
                            &shapes,
                            mce_input_stripe,
                            memory_output_stripe,
                            mce_output_stripe,
                        );
                    }
                }

                // Split height, width and output depth.
                if stripe_config.splits.width_height_output_depth {
                    for stripe_height in height_loop_incl {
                        for stripe_width in width_loop_incl {
                            let Some(input_width) = check_width(stripe_width) else {
                                continue;
                            };
                            let Some(input_height) = check_height(stripe_height) else {
                                continue;
                            };
                            let mce_input_encoding =
                                TensorShape::new(0, input_height, input_width, 0);
                            let mce_input_stripe =
                                create_stripe(input_shape, mce_input_encoding, channel_rounding);
                            let mce_output_encoding = TensorShape::new(
                                0,
                                self.mce_shape_multiplier.h.apply(input_height),
                                self.mce_shape_multiplier.w.apply(input_width),
                                base_mce_ofm,
                            );
                            let mce_output_stripe =
                                create_stripe(mce_output_shape, mce_output_encoding, base_mce_ofm);
                            let ple_output_encoding =
                                mce_output_encoding * self.ple_shape_multiplier;
                            let ple_output_stripe =
                                create_stripe(output_shape, ple_output_encoding, base_mce_ofm);
                            let shapes = CandidateShapes {
                                mce_input_stripe,
                                mce_output_stripe,
                                ple_input_stripe: mce_output_stripe,
                                ple_output_stripe,
                                ple_output_encoding,
                            };
                            let memory_output_stripe =
                                create_stripe(output_shape, ple_output_encoding, base_mce_ofm);
                            gen.add(
                                out,
                                &shapes,
                                mce_input_stripe,
                                memory_output_stripe,
                                mce_output_stripe,
                            );
                        }
                    }
                }

                // Split input depth. Height and width are limited to one
                // block because the MCE must accumulate across IFM
                // iterations.
                if stripe_config.splits.width_height_output_depth_input_depth {
                    for ifm_depth in ifm_loop_excl {
                        let mce_input_encoding = TensorShape::new(
                            0,
                            base_mce_input_height,
                            base_mce_input_width,
                            ifm_depth,
                        );
                        let mce_input_stripe =
                            create_stripe(input_shape, mce_input_encoding, channel_rounding);
                        let mut mce_output_encoding =
                            mce_input_encoding * self.mce_shape_multiplier;

                        // With compounding shape multipliers the output
                        // encoding can span more than one block; no valid
                        // plan exists then for this block config.
                        if mce_output_encoding.width() != block_config.width
                            || mce_output_encoding.height() != block_config.height
                        {
                            continue;
                        }

                        // The MCE accumulates MAC results across IFM
                        // iterations, which it can only do across the OGs.
                        mce_output_encoding[3] = base_mce_ofm;
                        let mce_output_stripe =
                            create_stripe(mce_output_shape, mce_output_encoding, base_mce_ofm);
                        let ple_output_encoding = mce_output_encoding * self.ple_shape_multiplier;
                        let ple_output_stripe =
                            create_stripe(output_shape, ple_output_encoding, base_mce_ofm);
                        let shapes = CandidateShapes {
                            mce_input_stripe,
                            mce_output_stripe,
                            ple_input_stripe: mce_output_stripe,
                            ple_output_stripe,
                            ple_output_encoding,
                        };
                        let memory_output_stripe =
                            create_stripe(output_shape, ple_output_encoding, num_ogs);
                        gen.add(
                            out,
                            &shapes,
                            mce_input_stripe,
                            memory_output_stripe,
                            mce_output_stripe,
                        );
                    }
                }
            }

            // Split depth for compute while the memory buffer holds the full
            // tensor.
            if stripe_config.splits.mce_output_depth_only {
                for ofm_depth in ofm_loop_excl {
                    let mce_input_stripe =
                        create_stripe(input_shape, TensorShape::default(), channel_rounding);
                    let mce_output_encoding = TensorShape::new(0, 0, 0, ofm_depth);
                    let mce_output_stripe =
                        create_stripe(mce_output_shape, mce_output_encoding, base_mce_ofm);

                    // The PLE accumulates the full output depth.
                    let ple_input_stripe =
                        create_stripe(mce_output_shape, TensorShape::default(), base_mce_ofm);
                    let ple_output_stripe =
                        create_stripe(output_shape, TensorShape::default(), base_mce_ofm);
                    let shapes = CandidateShapes {
                        mce_input_stripe,
                        mce_output_stripe,
                        ple_input_stripe,
                        ple_output_stripe,
                        ple_output_encoding: TensorShape::default(),
                    };
                    let memory_output_stripe =
                        create_stripe(output_shape, TensorShape::default(), base_mce_ofm);
                    gen.add(
                        out,
                        &shapes,
                        mce_input_stripe,
                        memory_output_stripe,
                        mce_output_stripe,
                    );
                }
            }
        }

        // No split at all. Needed when every stripe above is larger than
        // the tensor and nothing was added.
        if stripe_config.splits.none {
            let shapes = self.derive_shapes(TensorShape::default(), channel_rounding, channel_rounding);
            gen.add(
                out,
                &shapes,
                shapes.mce_input_stripe,
                shapes.ple_output_stripe,
                shapes.mce_output_stripe,
            );
        }
    }

    /// Derives the compute-stage stripe chain from an input encoding, using
    /// the same channel rounding for input and output stages.
    fn derive_shapes(
        &self,
        mce_input_encoding: TensorShape,
        input_rounding: u32,
        output_rounding: u32,
    ) -> CandidateShapes {
        let mce_input_stripe =
            create_stripe(self.mce_input_tensor_shape, mce_input_encoding, input_rounding);
        let mce_output_encoding = mce_input_encoding * self.mce_shape_multiplier;
        let mce_output_stripe =
            create_stripe(self.mce_output_tensor_shape, mce_output_encoding, output_rounding);
        let ple_output_encoding = mce_output_encoding * self.ple_shape_multiplier;
        let ple_output_stripe =
            create_stripe(self.ple_output_tensor_shape, ple_output_encoding, output_rounding);
        CandidateShapes {
            mce_input_stripe,
            mce_output_stripe,
            ple_input_stripe: mce_output_stripe,
            ple_output_stripe,
            ple_output_encoding,
        }
    }
}

/// The compute-stage stripe chain of one candidate.
#[derive(Clone, Copy, Debug)]
struct CandidateShapes {
    mce_input_stripe: TensorShape,
    mce_output_stripe: TensorShape,
    ple_input_stripe: TensorShape,
    ple_output_stripe: TensorShape,
    ple_output_encoding: TensorShape,
}

/// Shared context for inserting candidates into the output sets.
struct Insertion<'a> {
    generator: &'a StripeGenerator,
    block_config: BlockConfig,
    cascade_type: CascadeType,
    output_boundary_requirements: BoundaryRequirements,
    stripe_config: &'a StripeConfig,
    is_depthwise: bool,
    base_mce_ofm: u32,
}

impl Insertion<'_> {
    fn add(
        &self,
        out: &mut StripeInfos,
        shapes: &CandidateShapes,
        memory_input_stripe: TensorShape,
        memory_output_stripe: TensorShape,
        memory_ple_input_stripe: TensorShape,
    ) {
        let g = self.generator;
        let input_shape = g.mce_input_tensor_shape;
        let output_shape = g.ple_output_tensor_shape;
        let is_upscale = g.upscale_factor > 1;

        let need_boundary_y = get_boundary_requirements(
            g.padding.top,
            shapes.mce_input_stripe.height(),
            shapes.mce_output_stripe.height(),
            g.kernel_height,
            is_upscale,
        );
        let need_boundary_x = get_boundary_requirements(
            g.padding.left,
            shapes.mce_input_stripe.width(),
            shapes.mce_output_stripe.width(),
            g.kernel_width,
            is_upscale,
        );

        // The IFM is traversed ZXY (XYZ for depthwise). If the first axis
        // with more than one stripe needs boundary data, the tile must hold
        // that many stripes at once.
        let mut min_stripes_in_tile = 1;
        if self.is_depthwise || shapes.mce_input_stripe.channels() >= input_shape.channels() {
            if shapes.mce_input_stripe.width() < input_shape.width() {
                min_stripes_in_tile = 1
                    + u32::from(need_boundary_x.before)
                    + u32::from(need_boundary_x.after);
                // With only two stripes in X there is no third neighbour.
                min_stripes_in_tile = min_stripes_in_tile.min(div_round_up(
                    input_shape.width(),
                    shapes.mce_input_stripe.width(),
                ));
            } else if shapes.mce_input_stripe.height() < input_shape.height() {
                min_stripes_in_tile = 1
                    + u32::from(need_boundary_y.before)
                    + u32::from(need_boundary_y.after);
                min_stripes_in_tile = min_stripes_in_tile.min(div_round_up(
                    input_shape.height(),
                    shapes.mce_input_stripe.height(),
                ));
            }
        }

        let (input_range, output_range, weight_range, ple_input_range) = g.create_num_stripes(
            self.cascade_type,
            min_stripes_in_tile,
            self.output_boundary_requirements,
        );

        // Never allocate more tile slots than the tensor has stripes.
        let mut input_range = input_range;
        input_range.max = input_range
            .max
            .min(input_shape.num_stripes_total(memory_input_stripe));
        input_range.min = input_range.min.min(input_range.max);
        input_range.min = input_range.min.max(self.stripe_config.num_stripes.input.min);
        input_range.max = input_range.max.min(self.stripe_config.num_stripes.input.max);

        let mut output_range = output_range;
        output_range.max = output_range
            .max
            .min(output_shape.num_stripes_total(memory_output_stripe));
        output_range.min = output_range.min.min(output_range.max);

        let is_maxpool_3x3_2_2 = matches!(
            g.kernel_operation,
            PleOperation::MaxPool3x3_2_2Even | PleOperation::MaxPool3x3_2_2Odd
        );

        // When split in height, maxpool cannot finish an output stripe until
        // it starts the next one (pooling windows straddle the boundary), so
        // the OFM tile needs at least two slots.
        if is_maxpool_3x3_2_2
            && shapes.ple_input_stripe.height() < g.mce_output_tensor_shape.height()
        {
            output_range.min = output_range.min.max(2);
        }

        output_range.min = output_range.min.max(self.stripe_config.num_stripes.output.min);
        output_range.max = output_range.max.min(self.stripe_config.num_stripes.output.max);

        if is_maxpool_3x3_2_2 {
            // The kernel cannot carry state across both a height split and
            // multiple channels per PLE.
            if shapes.ple_input_stripe.height() < g.mce_output_tensor_shape.height()
                && shapes.ple_input_stripe.channels() > self.base_mce_ofm
            {
                return;
            }
            // No width splitting at all. This can't be done via the config
            // because a height+depth split is only expressible through the
            // all-axes strategies.
            if shapes.ple_input_stripe.width() < g.mce_output_tensor_shape.width() {
                return;
            }
        }

        let mce_weight_stripe = TensorShape::new(
            g.kernel_height,
            g.kernel_width,
            shapes.mce_input_stripe.channels(),
            if self.is_depthwise {
                1
            } else {
                shapes.mce_output_stripe.channels()
            },
        );
        let memory_weight_stripe = mce_weight_stripe;

        let mut weight_range = weight_range;
        weight_range.max = weight_range.max.min(
            div_round_up(input_shape.channels(), memory_weight_stripe[2])
                * if self.is_depthwise {
                    1
                } else {
                    div_round_up(
                        g.mce_output_tensor_shape.channels(),
                        memory_weight_stripe[3],
                    )
                },
        );
        weight_range.min = weight_range.min.min(weight_range.max);
        let weights_cover_tensor = if self.is_depthwise {
            memory_weight_stripe[2] >= input_shape.channels()
        } else {
            memory_weight_stripe[3] >= g.mce_output_tensor_shape.channels()
        };
        if weights_cover_tensor {
            weight_range.max = 1;
        }
        weight_range.min = weight_range.min.max(self.stripe_config.num_stripes.weight.min);
        weight_range.max = weight_range.max.min(self.stripe_config.num_stripes.weight.max);

        let needs_multiple_ifm_depths =
            !self.is_depthwise && shapes.mce_input_stripe.channels() < input_shape.channels();
        // Boundary data is packed into the tile slot only when the axis is
        // not the fastest iterating one.
        let pack_boundary_vertical = shapes.mce_input_stripe.height() < input_shape.height()
            && (needs_multiple_ifm_depths
                || shapes.mce_input_stripe.width() < input_shape.width());
        let pack_boundary_horizontal =
            shapes.mce_input_stripe.width() < input_shape.width() && needs_multiple_ifm_depths;

        // Left/right packing is 16 wide so it can work with the wide
        // compressed DRAM format; the DRAM format is not known yet so this
        // is conservative and may be reduced to 8 later.
        let packed_boundary_thickness = PackedBoundaryThickness {
            left: if pack_boundary_horizontal && need_boundary_x.before { 16 } else { 0 },
            top: if pack_boundary_vertical && need_boundary_y.before { 8 } else { 0 },
            right: if pack_boundary_horizontal && need_boundary_x.after { 16 } else { 0 },
            bottom: if pack_boundary_vertical && need_boundary_y.after { 8 } else { 0 },
        };

        // The OFM is always traversed XYZ and the IFM ZXY, so IFM data is
        // reloaded once per OFM-depth stripe when the IFM is split at all.
        let input_is_split = shapes.mce_input_stripe.width() < input_shape.width()
            || shapes.mce_input_stripe.height() < input_shape.height()
            || shapes.mce_input_stripe.channels() < input_shape.channels();
        let num_ifm_loads = if !self.is_depthwise && input_is_split {
            div_round_up(
                g.mce_output_tensor_shape.channels(),
                shapes.mce_output_stripe.channels(),
            )
        } else {
            1
        };
        let num_weight_loads = if needs_multiple_ifm_depths {
            div_round_up(
                g.mce_output_tensor_shape.width(),
                shapes.mce_output_stripe.width(),
            ) * div_round_up(
                g.mce_output_tensor_shape.height(),
                shapes.mce_output_stripe.height(),
            )
        } else {
            1
        };

        let memory = MemoryStripesInfo {
            input: InputMemoryStripeInfo {
                stripe: MemoryStripeInfo {
                    range: input_range,
                    shape: memory_input_stripe,
                },
                packed_boundary_thickness,
                num_loads: num_ifm_loads,
            },
            output: MemoryStripeInfo {
                range: output_range,
                shape: memory_output_stripe,
            },
            weight: WeightMemoryStripeInfo {
                stripe: MemoryStripeInfo {
                    range: weight_range,
                    shape: memory_weight_stripe,
                },
                num_loads: num_weight_loads,
            },
            ple_input: MemoryStripeInfo {
                range: ple_input_range,
                shape: memory_ple_input_stripe,
            },
        };

        let mce_compute = MceStripesInfo {
            input: shapes.mce_input_stripe,
            output: shapes.mce_output_stripe,
            weight: mce_weight_stripe,
            block_config: self.block_config,
        };
        let ple_compute = PleStripesInfo {
            input: shapes.ple_input_stripe,
            output: shapes.ple_output_stripe,
            block_config: self.block_config,
        };

        out.mce_and_ple_infos.insert(MceAndPleInfo {
            mce_compute,
            ple_compute,
            memory,
        });

        let mut mce_only_memory = memory;
        mce_only_memory.output = MemoryStripeInfo::default();
        out.mce_only_infos.insert(MceOnlyInfo {
            mce_compute,
            memory: mce_only_memory,
        });

        let mut ple_only_memory = memory;
        ple_only_memory.input = InputMemoryStripeInfo::default();
        ple_only_memory.weight = WeightMemoryStripeInfo::default();
        out.ple_only_infos.insert(PleOnlyInfo {
            ple_compute,
            memory: ple_only_memory,
        });

        out.dma_only_infos.insert(DmaOnlyInfo {
            input: MemoryStripeInfo {
                range: input_range,
                shape: memory_input_stripe,
            },
            output: MemoryStripeInfo {
                range: output_range,
                shape: memory_output_stripe,
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stripegen_common::Fraction;

    fn conv_generator(
        input: TensorShape,
        output: TensorShape,
        kernel: u32,
        padding: Padding,
    ) -> StripeGenerator {
        StripeGenerator::new(
            input,
            output,
            output,
            kernel,
            kernel,
            padding,
            1,
            MceOperation::Convolution,
            PleOperation::Passthrough,
            ShapeMultiplier::IDENTITY,
            ShapeMultiplier::IDENTITY,
            HardwareCapabilities::standard(),
            StripeConfig::default(),
        )
    }

    #[test]
    fn create_stripe_rounds_and_honors_zero_encoding() {
        let tensor = TensorShape::new(1, 17, 16, 20);
        // Zero means full axis; height/width round to the brick group.
        assert_eq!(
            create_stripe(tensor, TensorShape::default(), 16),
            TensorShape::new(1, 24, 16, 32)
        );
        // Encodings clamp to the tensor before rounding.
        assert_eq!(
            create_stripe(tensor, TensorShape::new(0, 32, 0, 0), 16),
            TensorShape::new(1, 24, 16, 32)
        );
        assert_eq!(
            create_stripe(tensor, TensorShape::new(0, 8, 8, 16), 16),
            TensorShape::new(1, 8, 8, 16)
        );
    }

    #[test]
    fn boundary_requirements() {
        // 3x3 kernel, pad 1: needs data on both sides.
        let b = get_boundary_requirements(1, 16, 16, 3, false);
        assert_eq!(b, NeedBoundary { before: true, after: true });
        // 1x1 kernel, no pad: self contained.
        let b = get_boundary_requirements(0, 16, 16, 1, false);
        assert_eq!(b, NeedBoundary { before: false, after: false });
        // Upscale forces the after-boundary.
        let b = get_boundary_requirements(0, 16, 16, 1, true);
        assert_eq!(b, NeedBoundary { before: false, after: true });
    }

    #[test]
    fn posb_correction() {
        // Space already sufficient.
        assert_eq!(check_for_posb(64, 16, 0, 16), Some(0));
        // 70 % 16 = 6 left... space_left = 16 - 6 = 10 >= 2.
        assert_eq!(check_for_posb(70, 16, 2, 16), Some(0));
        // 64 % 16 = 0 so no slack; growing by one block gives slack 16.
        assert_eq!(check_for_posb(64, 16, 2, 8), Some(8));
        // No size below 2x works.
        assert_eq!(check_for_posb(16, 16, 17, 8), None);
    }

    #[test]
    fn determinism() {
        let generator = conv_generator(
            TensorShape::new(1, 64, 64, 32),
            TensorShape::new(1, 64, 64, 64),
            3,
            Padding::same(3, 3),
        );
        let a = generator.generate_stripes(CascadeType::Lonely, BoundaryRequirements::default(), None);
        let b = generator.generate_stripes(CascadeType::Lonely, BoundaryRequirements::default(), None);
        assert_eq!(a, b);
        assert!(!a.mce_and_ple_infos.is_empty());
    }

    #[test]
    fn stripes_are_aligned() {
        let generator = conv_generator(
            TensorShape::new(1, 60, 60, 35),
            TensorShape::new(1, 60, 60, 60),
            3,
            Padding::same(3, 3),
        );
        let infos =
            generator.generate_stripes(CascadeType::Lonely, BoundaryRequirements::default(), None);
        for info in &infos.mce_and_ple_infos {
            for shape in [info.mce_compute.input, info.mce_compute.output, info.memory.input.stripe.shape]
            {
                assert_eq!(shape.height() % 8, 0, "unaligned height in {shape:?}");
                assert_eq!(shape.width() % 8, 0, "unaligned width in {shape:?}");
                assert_eq!(shape.channels() % 16, 0, "unaligned channels in {shape:?}");
            }
        }
    }

    #[test]
    fn tiles_never_hold_more_stripes_than_the_tensor() {
        let generator = conv_generator(
            TensorShape::new(1, 16, 16, 16),
            TensorShape::new(1, 16, 16, 16),
            1,
            Padding::default(),
        );
        let infos =
            generator.generate_stripes(CascadeType::Lonely, BoundaryRequirements::default(), None);
        for info in &infos.mce_and_ple_infos {
            let input = &info.memory.input.stripe;
            assert!(
                input.range.max
                    <= generator
                        .mce_input_tensor_shape
                        .num_stripes_total(input.shape)
            );
            let output = &info.memory.output;
            assert!(
                output.range.max
                    <= generator
                        .ple_output_tensor_shape
                        .num_stripes_total(output.shape)
            );
        }
    }

    #[test]
    fn high_priority_skips_input_depth_splits() {
        let generator = conv_generator(
            TensorShape::new(1, 32, 32, 256),
            TensorShape::new(1, 32, 32, 256),
            1,
            Padding::default(),
        );
        let high = generator.generate_stripes(
            CascadeType::Lonely,
            BoundaryRequirements::default(),
            Some(PlanPriority::High),
        );
        for info in &high.mce_and_ple_infos {
            assert!(
                info.mce_compute.input.channels() >= 256,
                "input depth split in high-priority pass: {:?}",
                info.mce_compute.input
            );
        }
        let low = generator.generate_stripes(
            CascadeType::Lonely,
            BoundaryRequirements::default(),
            Some(PlanPriority::Low),
        );
        assert!(
            low.mce_and_ple_infos
                .iter()
                .any(|i| i.mce_compute.input.channels() < 256)
        );
    }

    #[test]
    fn maxpool_3x3_never_splits_width() {
        let generator = StripeGenerator::new(
            TensorShape::new(1, 64, 64, 16),
            TensorShape::new(1, 64, 64, 16),
            TensorShape::new(1, 32, 32, 16),
            1,
            1,
            Padding::default(),
            1,
            MceOperation::DepthwiseConvolution,
            PleOperation::MaxPool3x3_2_2Even,
            ShapeMultiplier::IDENTITY,
            ShapeMultiplier::new(Fraction::new(1, 2), Fraction::new(1, 2), Fraction::ONE),
            HardwareCapabilities::standard(),
            StripeConfig::default(),
        );
        let infos =
            generator.generate_stripes(CascadeType::Lonely, BoundaryRequirements::default(), None);
        for info in &infos.mce_and_ple_infos {
            assert!(info.ple_compute.input.width() >= 64);
        }
        // Beginning a cascade allows only the full-tensor stripe.
        let beginning = generator.generate_stripes(
            CascadeType::Beginning,
            BoundaryRequirements::default(),
            None,
        );
        for info in &beginning.mce_and_ple_infos {
            assert!(info.mce_compute.input.height() >= 64);
            assert!(info.mce_compute.input.width() >= 64);
        }
    }

    #[test]
    fn upscaling_requires_posb_slack() {
        // 2x upscale with padding: stripes that leave no room for the
        // padding at the boundary must be grown or dropped.
        let generator = StripeGenerator::new(
            TensorShape::new(1, 48, 48, 16),
            TensorShape::new(1, 96, 96, 16),
            TensorShape::new(1, 96, 96, 16),
            3,
            3,
            Padding::same(3, 3),
            2,
            MceOperation::Convolution,
            PleOperation::Passthrough,
            ShapeMultiplier::new(Fraction::new(2, 1), Fraction::new(2, 1), Fraction::ONE),
            ShapeMultiplier::IDENTITY,
            HardwareCapabilities::standard(),
            StripeConfig::default(),
        );
        let infos =
            generator.generate_stripes(CascadeType::Lonely, BoundaryRequirements::default(), None);
        assert!(!infos.mce_and_ple_infos.is_empty());
        for info in &infos.mce_and_ple_infos {
            let h = info.mce_compute.input.height();
            if h < 48 {
                let left = (h - (48 % h)) % h;
                assert!(left >= 2, "stripe height {h} leaves no room for padding");
            }
        }
    }
}
