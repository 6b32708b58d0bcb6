//! SRAM tile sizing and DRAM/SRAM transfer compatibility.
//!
//! A tile is the SRAM allocation backing one buffer: `num_stripes` slots of
//! one stripe each. The slot size must account for packed boundary data and
//! for the compressed-format cell granularity of the DRAM source, and the
//! last slot can shrink when the tensor's edge stripe is smaller.

use stripegen_common::math::round_up_to_multiple;
use stripegen_common::TensorShape;

use crate::components::caps::{
    FCAF_DEEP_CELL_SHAPE, FCAF_WIDE_CELL_SHAPE, BRICK_GROUP_SHAPE, HardwareCapabilities,
};
use crate::components::stripe::PackedBoundaryThickness;

/// Layout of a buffer resident in DRAM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DramFormat {
    Nhwc,
    Nchw,
    Nhwcb,
    FcafDeep,
    FcafWide,
    Weight,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressedFormat {
    FcafDeep,
    FcafWide,
}

impl CompressedFormat {
    pub const fn cell_shape(self) -> TensorShape {
        match self {
            CompressedFormat::FcafDeep => FCAF_DEEP_CELL_SHAPE,
            CompressedFormat::FcafWide => FCAF_WIDE_CELL_SHAPE,
        }
    }
}

/// Result of sizing one tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileSizeCalculation {
    /// Bytes per slot, boundary data and format rounding included.
    pub slot_size_in_bytes: u32,
    /// Total tile allocation in bytes.
    pub size_in_bytes: u32,
    /// Set when rounding the slot up for the wide compressed format would
    /// have grown the tile too much, so that format must not be used for
    /// this buffer's DRAM copies.
    pub forbid_fcaf_wide: bool,
}

/// The size of the edge (last) stripe along one axis.
fn edge_size(tensor_size: u32, stripe_size: u32) -> u32 {
    let remainder = tensor_size % stripe_size;
    if remainder != 0 { remainder } else { stripe_size }
}

/// Whether DMA transfers of `stripe` to/from a tensor compressed with
/// `format` are possible: each stripe axis must be a whole number of cells,
/// except where the stripe covers the whole tensor (the edge cell padding
/// handles the remainder there).
pub fn is_compression_format_compatible_with_stripe_shape(
    format: CompressedFormat,
    stripe_shape: TensorShape,
    dram_tensor_shape: TensorShape,
) -> bool {
    let cell = format.cell_shape();
    for axis in 1..4 {
        if stripe_shape[axis] % cell[axis] != 0 && stripe_shape[axis] < dram_tensor_shape[axis] {
            return false;
        }
    }
    true
}

/// Sizes the SRAM tile for a buffer of `num_stripes_in_tile` slots.
///
/// If the source could be compressed with the wide cell format, the slot
/// width must be a whole number of 16-wide cells because the DMA always
/// decompresses whole cells. When that rounding would grow the slot by more
/// than 10% it is cheaper to forbid the wide format instead.
pub fn calculate_tile_size(
    caps: &HardwareCapabilities,
    input_tensor_shape: TensorShape,
    input_stripe_shape: TensorShape,
    packed_boundary_thickness: PackedBoundaryThickness,
    num_stripes_in_tile: u32,
    could_source_be_fcaf: bool,
) -> TileSizeCalculation {
    let mut result = TileSizeCalculation::default();

    let stripe_shape_incl_boundary = TensorShape::new(
        1,
        input_stripe_shape.height()
            + packed_boundary_thickness.top
            + packed_boundary_thickness.bottom,
        input_stripe_shape.width()
            + packed_boundary_thickness.left
            + packed_boundary_thickness.right,
        input_stripe_shape.channels(),
    );

    let mut could_source_be_fcaf_wide = could_source_be_fcaf
        && !packed_boundary_thickness.any_nonzero()
        && is_compression_format_compatible_with_stripe_shape(
            CompressedFormat::FcafWide,
            input_stripe_shape,
            input_tensor_shape,
        );

    let mut slot_shape = stripe_shape_incl_boundary;
    if could_source_be_fcaf_wide
        && stripe_shape_incl_boundary.width() % FCAF_WIDE_CELL_SHAPE.width() != 0
    {
        let new_width = round_up_to_multiple(
            stripe_shape_incl_boundary.width(),
            FCAF_WIDE_CELL_SHAPE.width(),
        );
        if (new_width as f32) / (stripe_shape_incl_boundary.width() as f32) < 1.10 {
            slot_shape[2] = new_width;
        } else {
            result.forbid_fcaf_wide = true;
            could_source_be_fcaf_wide = false;
        }
    }

    result.slot_size_in_bytes = slot_shape.elements();
    result.size_in_bytes = result.slot_size_in_bytes * num_stripes_in_tile;

    // Packed boundary data is laid out after the main stripe and assumes the
    // full slot shape, so the edge optimisation below is not possible.
    if packed_boundary_thickness.any_nonzero() {
        return result;
    }

    // When the whole tensor fits in the tile, the last slot only needs to
    // hold the (possibly smaller) edge stripe.
    let num_stripes_in_tensor = input_tensor_shape.num_stripes_total(input_stripe_shape);
    if num_stripes_in_tensor <= num_stripes_in_tile {
        let mut width_multiple = BRICK_GROUP_SHAPE.width();
        let height_multiple = BRICK_GROUP_SHAPE.height();
        if could_source_be_fcaf_wide {
            width_multiple = width_multiple.max(FCAF_WIDE_CELL_SHAPE.width());
        }

        let last_stripe_shape = TensorShape::new(
            1,
            round_up_to_multiple(
                edge_size(input_tensor_shape.height(), input_stripe_shape.height()),
                height_multiple,
            ),
            round_up_to_multiple(
                edge_size(input_tensor_shape.width(), input_stripe_shape.width()),
                width_multiple,
            ),
            round_up_to_multiple(
                edge_size(input_tensor_shape.channels(), input_stripe_shape.channels()),
                caps.num_srams(),
            ),
        );

        let last_stripe_bytes = last_stripe_shape.elements();
        result.size_in_bytes =
            result.slot_size_in_bytes * (num_stripes_in_tensor - 1) + last_stripe_bytes;
    }

    result
}

/// Whether a DMA between an SRAM buffer and a DRAM buffer is expressible.
///
/// Covers reshapes (NHWC only), DRAM sub-tensor offset alignment, the
/// depth-split limits of the linear formats, the cell-granularity limits of
/// the compressed formats and packed-boundary support.
#[allow(clippy::too_many_arguments)]
pub fn is_sram_buffer_compatible_with_dram_buffer(
    sram_tensor_shape: TensorShape,
    stripe_shape: TensorShape,
    forbid_fcaf_wide: bool,
    packed_boundary_thickness: PackedBoundaryThickness,
    dram_format: DramFormat,
    dram_tensor_shape: TensorShape,
    dram_offset: TensorShape,
) -> bool {
    // A reshaping copy (same element count, different shape) is only
    // expressible with the plain row-major format. The remaining checks use
    // the SRAM shape because that is the shape the transfer is programmed
    // with.
    let mut dram_tensor_shape_no_reshape = dram_tensor_shape;
    if sram_tensor_shape != dram_tensor_shape
        && sram_tensor_shape.elements() == dram_tensor_shape.elements()
    {
        if dram_format != DramFormat::Nhwc {
            return false;
        }
        dram_tensor_shape_no_reshape = sram_tensor_shape;
    }

    let required_multiple = match dram_format {
        DramFormat::Nchw | DramFormat::Nhwc => {
            // Sub-tensor offsets in C only work when the width is 1; the
            // transfer degenerates to contiguous rows then.
            let channel_multiple = if dram_tensor_shape_no_reshape.width() == 1 {
                1
            } else {
                u32::MAX
            };
            TensorShape::new(1, 1, 1, channel_multiple)
        }
        DramFormat::Nhwcb => BRICK_GROUP_SHAPE,
        DramFormat::FcafWide => FCAF_WIDE_CELL_SHAPE,
        DramFormat::FcafDeep => FCAF_DEEP_CELL_SHAPE,
        DramFormat::Weight => return false,
    };
    for axis in 1..4 {
        if dram_offset[axis] % required_multiple[axis] != 0 {
            return false;
        }
    }

    // Splitting depth in the row-major format interleaves every pixel; only
    // expressible when the width is 1.
    if dram_format == DramFormat::Nhwc
        && stripe_shape.channels() < dram_tensor_shape_no_reshape.channels()
        && dram_tensor_shape_no_reshape.width() > 1
    {
        return false;
    }

    if dram_format == DramFormat::FcafDeep
        && !is_compression_format_compatible_with_stripe_shape(
            CompressedFormat::FcafDeep,
            stripe_shape,
            dram_tensor_shape_no_reshape,
        )
    {
        return false;
    }
    if dram_format == DramFormat::FcafWide
        && !is_compression_format_compatible_with_stripe_shape(
            CompressedFormat::FcafWide,
            stripe_shape,
            dram_tensor_shape_no_reshape,
        )
    {
        return false;
    }

    // Packed boundary data relies on the brick-group layout.
    if !matches!(
        dram_format,
        DramFormat::Nhwcb | DramFormat::FcafDeep | DramFormat::FcafWide
    ) && packed_boundary_thickness.any_nonzero()
    {
        return false;
    }

    if forbid_fcaf_wide && dram_format == DramFormat::FcafWide {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn last_slot_shrinks_to_the_edge_stripe() {
        // 17-high tensor with 16-high stripes: the second slot needs only
        // the 8-rounded single remaining row.
        let caps = HardwareCapabilities::standard();
        let result = calculate_tile_size(
            &caps,
            TensorShape::new(1, 17, 16, 16),
            TensorShape::new(1, 16, 16, 16),
            PackedBoundaryThickness::NONE,
            2,
            false,
        );
        assert_eq!(result.slot_size_in_bytes, 16 * 16 * 16);
        assert_eq!(result.size_in_bytes, 16 * 16 * 16 + 8 * 16 * 16);
        assert!(!result.forbid_fcaf_wide);
    }

    #[test]
    fn no_edge_shrink_when_the_tensor_overflows_the_tile() {
        let caps = HardwareCapabilities::standard();
        let result = calculate_tile_size(
            &caps,
            TensorShape::new(1, 64, 16, 16),
            TensorShape::new(1, 16, 16, 16),
            PackedBoundaryThickness::NONE,
            2,
            false,
        );
        assert_eq!(result.size_in_bytes, 2 * 16 * 16 * 16);
    }

    #[test]
    fn packed_boundary_grows_the_slot_and_disables_edge_shrink() {
        let caps = HardwareCapabilities::standard();
        let boundary = PackedBoundaryThickness {
            left: 0,
            top: 8,
            right: 0,
            bottom: 8,
        };
        let result = calculate_tile_size(
            &caps,
            TensorShape::new(1, 17, 16, 16),
            TensorShape::new(1, 16, 16, 16),
            boundary,
            2,
            false,
        );
        assert_eq!(result.slot_size_in_bytes, 32 * 16 * 16);
        assert_eq!(result.size_in_bytes, 2 * 32 * 16 * 16);
    }

    #[test]
    fn fcaf_wide_rounds_the_slot_width_within_threshold() {
        let caps = HardwareCapabilities::standard();
        // Full-tensor 152-wide stripe: rounding to a whole 16-wide cell
        // grows the slot by about 5%, acceptable.
        let result = calculate_tile_size(
            &caps,
            TensorShape::new(1, 8, 152, 16),
            TensorShape::new(1, 8, 152, 16),
            PackedBoundaryThickness::NONE,
            1,
            true,
        );
        assert!(!result.forbid_fcaf_wide);
        assert_eq!(result.slot_size_in_bytes, 8 * 160 * 16);

        // Full-tensor 24-wide stripe: rounding to 32 would grow the slot by
        // 33%, so the wide format is forbidden instead.
        let result = calculate_tile_size(
            &caps,
            TensorShape::new(1, 8, 24, 16),
            TensorShape::new(1, 8, 24, 16),
            PackedBoundaryThickness::NONE,
            1,
            true,
        );
        assert!(result.forbid_fcaf_wide);
        assert_eq!(result.slot_size_in_bytes, 8 * 24 * 16);

        // A 120-wide stripe inside a 240-wide tensor is not cell-compatible
        // to begin with, so nothing is rounded and nothing is forbidden.
        let result = calculate_tile_size(
            &caps,
            TensorShape::new(1, 8, 240, 16),
            TensorShape::new(1, 8, 120, 16),
            PackedBoundaryThickness::NONE,
            1,
            true,
        );
        assert!(!result.forbid_fcaf_wide);
        assert_eq!(result.slot_size_in_bytes, 8 * 120 * 16);
    }

    #[test]
    fn compressed_format_needs_whole_cells_or_full_coverage() {
        let tensor = TensorShape::new(1, 64, 64, 64);
        // Multiples of the deep cell: ok.
        assert!(is_compression_format_compatible_with_stripe_shape(
            CompressedFormat::FcafDeep,
            TensorShape::new(1, 16, 8, 32),
            tensor
        ));
        // 16-deep stripe is not a whole 32-deep cell.
        assert!(!is_compression_format_compatible_with_stripe_shape(
            CompressedFormat::FcafDeep,
            TensorShape::new(1, 16, 8, 16),
            tensor
        ));
        // Unless the stripe covers the whole axis.
        assert!(is_compression_format_compatible_with_stripe_shape(
            CompressedFormat::FcafDeep,
            TensorShape::new(1, 16, 8, 16),
            TensorShape::new(1, 64, 64, 16)
        ));
        // Wide cells are 16 wide.
        assert!(!is_compression_format_compatible_with_stripe_shape(
            CompressedFormat::FcafWide,
            TensorShape::new(1, 8, 8, 16),
            tensor
        ));
    }

    #[test]
    fn reshape_requires_nhwc() {
        let sram = TensorShape::new(1, 16, 16, 16);
        let dram = TensorShape::new(1, 8, 32, 16);
        assert!(is_sram_buffer_compatible_with_dram_buffer(
            sram,
            sram,
            false,
            PackedBoundaryThickness::NONE,
            DramFormat::Nhwc,
            dram,
            TensorShape::default(),
        ));
        assert!(!is_sram_buffer_compatible_with_dram_buffer(
            sram,
            sram,
            false,
            PackedBoundaryThickness::NONE,
            DramFormat::Nhwcb,
            dram,
            TensorShape::default(),
        ));
    }

    #[test]
    fn nhwc_depth_split_only_with_unit_width() {
        let dram = TensorShape::new(1, 16, 16, 64);
        let stripe = TensorShape::new(1, 16, 16, 16);
        assert!(!is_sram_buffer_compatible_with_dram_buffer(
            dram,
            stripe,
            false,
            PackedBoundaryThickness::NONE,
            DramFormat::Nhwc,
            dram,
            TensorShape::default(),
        ));
        let narrow = TensorShape::new(1, 16, 1, 64);
        assert!(is_sram_buffer_compatible_with_dram_buffer(
            narrow,
            TensorShape::new(1, 16, 8, 16),
            false,
            PackedBoundaryThickness::NONE,
            DramFormat::Nhwc,
            narrow,
            TensorShape::default(),
        ));
    }

    #[test]
    fn dram_offsets_align_to_the_format_granule() {
        let shape = TensorShape::new(1, 32, 32, 32);
        // Brick-group-aligned offset into an NHWCB tensor: fine.
        assert!(is_sram_buffer_compatible_with_dram_buffer(
            TensorShape::new(1, 16, 32, 32),
            TensorShape::new(1, 16, 32, 32),
            false,
            PackedBoundaryThickness::NONE,
            DramFormat::Nhwcb,
            shape,
            TensorShape::new(0, 16, 0, 0),
        ));
        // Misaligned height offset: rejected.
        assert!(!is_sram_buffer_compatible_with_dram_buffer(
            TensorShape::new(1, 16, 32, 32),
            TensorShape::new(1, 16, 32, 32),
            false,
            PackedBoundaryThickness::NONE,
            DramFormat::Nhwcb,
            shape,
            TensorShape::new(0, 4, 0, 0),
        ));
    }

    #[test]
    fn forbid_fcaf_wide_blocks_the_wide_format_only() {
        let shape = TensorShape::new(1, 32, 32, 32);
        assert!(!is_sram_buffer_compatible_with_dram_buffer(
            shape,
            TensorShape::new(1, 8, 16, 32),
            true,
            PackedBoundaryThickness::NONE,
            DramFormat::FcafWide,
            shape,
            TensorShape::default(),
        ));
        assert!(is_sram_buffer_compatible_with_dram_buffer(
            shape,
            TensorShape::new(1, 8, 8, 32),
            true,
            PackedBoundaryThickness::NONE,
            DramFormat::FcafDeep,
            shape,
            TensorShape::default(),
        ));
    }
}
