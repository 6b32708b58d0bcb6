//! Operations of the execution graph: DMA transfers, compute-engine passes
//! and post-process passes.

use std::collections::BTreeSet;

use crate::components::plan::buffer::TraversalOrder;
use crate::components::ple::PleOperation;
use crate::components::tile::DramFormat;
use crate::components::{BlockConfig, DataType, MceAlgorithm, MceOperation, Stride};
use stripegen_common::TensorShape;

/// A DMA transfer between DRAM and SRAM, in either direction.
#[derive(Clone, Debug)]
pub struct DmaOp {
    /// The DRAM-side format the transfer converts to or from; the SRAM side
    /// is always brick-grouped. May deliberately differ from the connected
    /// DRAM buffer's format when the data is reinterpreted.
    pub transfer_format: DramFormat,
    /// Offset into the DRAM tensor for sub-tensor transfers.
    pub offset: TensorShape,
}

impl DmaOp {
    pub fn new(transfer_format: DramFormat) -> Self {
        Self {
            transfer_format,
            offset: TensorShape::default(),
        }
    }
}

/// One pass of the matrix compute engine.
#[derive(Clone, Debug)]
pub struct MceOp {
    pub operation: MceOperation,
    pub algorithm: MceAlgorithm,
    pub block_config: BlockConfig,
    pub input_stripe_shape: TensorShape,
    pub output_stripe_shape: TensorShape,
    pub weights_stripe_shape: TensorShape,
    pub order: TraversalOrder,
    pub stride: Stride,
    pub pad_left: u32,
    pub pad_top: u32,
    pub upscale_factor: u32,
    /// Saturation bounds of the requantized output.
    pub lower_bound: i16,
    pub upper_bound: i16,
}

/// One pass of the post-process engine.
#[derive(Clone, Debug)]
pub struct PleOp {
    pub operation: PleOperation,
    pub block_config: BlockConfig,
    pub input_stripe_shapes: Vec<TensorShape>,
    pub output_stripe_shape: TensorShape,
    pub output_data_type: DataType,
    /// Whether this pass must DMA its kernel into the engine first, or can
    /// reuse the kernel already loaded by an earlier pass of the section.
    pub load_kernel: bool,
}

impl PleOp {
    pub fn new(
        operation: PleOperation,
        block_config: BlockConfig,
        input_stripe_shapes: Vec<TensorShape>,
        output_stripe_shape: TensorShape,
        output_data_type: DataType,
        load_kernel: bool,
    ) -> Self {
        Self {
            operation,
            block_config,
            input_stripe_shapes,
            output_stripe_shape,
            output_data_type,
            load_kernel,
        }
    }
}

#[derive(Clone, Debug)]
pub enum OpKind {
    Dma(DmaOp),
    Mce(MceOp),
    Ple(PleOp),
}

/// A node of the execution graph, tagged with the network-level operation
/// ids it implements (for attribution in diagnostics).
#[derive(Clone, Debug)]
pub struct Op {
    pub kind: OpKind,
    pub operation_ids: BTreeSet<u32>,
}

impl Op {
    pub fn dma(op: DmaOp) -> Self {
        Self {
            kind: OpKind::Dma(op),
            operation_ids: BTreeSet::new(),
        }
    }

    pub fn mce(op: MceOp) -> Self {
        Self {
            kind: OpKind::Mce(op),
            operation_ids: BTreeSet::new(),
        }
    }

    pub fn ple(op: PleOp) -> Self {
        Self {
            kind: OpKind::Ple(op),
            operation_ids: BTreeSet::new(),
        }
    }

    pub fn with_operation_ids(mut self, ids: &BTreeSet<u32>) -> Self {
        self.operation_ids = ids.clone();
        self
    }

    pub fn block_config(&self) -> Option<BlockConfig> {
        match &self.kind {
            OpKind::Dma(_) => None,
            OpKind::Mce(op) => Some(op.block_config),
            OpKind::Ple(op) => Some(op.block_config),
        }
    }

    pub fn as_ple(&self) -> Option<&PleOp> {
        match &self.kind {
            OpKind::Ple(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_mce(&self) -> Option<&MceOp> {
        match &self.kind {
            OpKind::Mce(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_dma(&self) -> Option<&DmaOp> {
        match &self.kind {
            OpKind::Dma(op) => Some(op),
            _ => None,
        }
    }
}
