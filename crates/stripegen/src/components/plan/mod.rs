//! A plan: one candidate execution graph for a part, with its boundary
//! buffers mapped to the part's input and output slots.

pub mod buffer;
pub mod graph;
pub mod op;

pub use buffer::{
    Buffer, BufferType, DramBuffer, PleInputSramBuffer, SramBuffer, TraversalOrder,
};
pub use graph::{BufferId, OpGraph, OpId};
pub use op::{DmaOp, MceOp, Op, OpKind, PleOp};

use hashbrown::HashMap;

use crate::components::BlockConfig;

/// Identifier of a part within the graph of parts.
pub type PartId = u32;

/// One input of a part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartInputSlot {
    pub part_id: PartId,
    pub input_index: u32,
}

/// One output of a part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartOutputSlot {
    pub part_id: PartId,
    pub output_index: u32,
}

pub type PartInputMapping = HashMap<BufferId, PartInputSlot>;
pub type PartOutputMapping = HashMap<BufferId, PartOutputSlot>;

/// A candidate execution of one part.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub op_graph: OpGraph,
    /// Which buffers of the graph are the part's inputs, and which input
    /// slot each corresponds to.
    pub input_mappings: PartInputMapping,
    /// Which buffers of the graph are the part's outputs, and which output
    /// slot each corresponds to.
    pub output_mappings: PartOutputMapping,
    /// For plans built around a specific compute block size; the search
    /// keeps the block config consistent across a fused section.
    pub block_config: Option<BlockConfig>,
}

impl Plan {
    pub fn new(input_mappings: PartInputMapping, output_mappings: PartOutputMapping) -> Self {
        Self {
            op_graph: OpGraph::new(),
            input_mappings,
            output_mappings,
            block_config: None,
        }
    }

    /// The buffer mapped to the given input slot, if any.
    pub fn input_buffer(&self, slot: PartInputSlot) -> Option<BufferId> {
        self.input_mappings
            .iter()
            .find(|(_, s)| **s == slot)
            .map(|(b, _)| *b)
    }

    /// The buffer mapped to the given output slot, if any.
    pub fn output_buffer(&self, slot: PartOutputSlot) -> Option<BufferId> {
        self.output_mappings
            .iter()
            .find(|(_, s)| **s == slot)
            .map(|(b, _)| *b)
    }

    /// Total SRAM the plan's buffers occupy.
    pub fn sram_size_in_bytes(&self) -> u32 {
        self.op_graph.buffers().map(|(_, b)| b.size_in_bytes()).sum()
    }
}
