//! Arena-owned graph of operations and buffers.
//!
//! Each op consumes zero or more buffers (numbered inputs) and produces at
//! most one. A buffer can be produced and consumed by several ops, e.g. a
//! DRAM tensor filled by two DMA writes and later read twice. Ops and
//! buffers are owned by the graph and addressed by index handles, so plans
//! stay cheap to move and clone.

use hashbrown::HashMap;

use crate::components::plan::buffer::Buffer;
use crate::components::plan::op::Op;

/// Handle to an op in an [`OpGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(pub u32);

/// Handle to a buffer in an [`OpGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub u32);

#[derive(Clone, Debug, Default)]
pub struct OpGraph {
    ops: Vec<Op>,
    buffers: Vec<Buffer>,
    buffer_producers: HashMap<BufferId, Vec<OpId>>,
    buffer_consumers: HashMap<BufferId, Vec<(OpId, u32)>>,
    op_outputs: HashMap<OpId, BufferId>,
    op_inputs: HashMap<OpId, Vec<Option<BufferId>>>,
}

impl OpGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_op(&mut self, op: Op) -> OpId {
        let id = OpId(self.ops.len() as u32);
        self.ops.push(op);
        id
    }

    pub fn add_buffer(&mut self, buffer: Buffer) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(buffer);
        id
    }

    pub fn op(&self, id: OpId) -> &Op {
        &self.ops[id.0 as usize]
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut Op {
        &mut self.ops[id.0 as usize]
    }

    pub fn buffer(&self, id: BufferId) -> &Buffer {
        &self.buffers[id.0 as usize]
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> &mut Buffer {
        &mut self.buffers[id.0 as usize]
    }

    pub fn ops(&self) -> impl Iterator<Item = (OpId, &Op)> {
        self.ops
            .iter()
            .enumerate()
            .map(|(i, op)| (OpId(i as u32), op))
    }

    pub fn buffers(&self) -> impl Iterator<Item = (BufferId, &Buffer)> {
        self.buffers
            .iter()
            .enumerate()
            .map(|(i, b)| (BufferId(i as u32), b))
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Makes `producer` the sole producer of `buffer`. The buffer must not
    /// already have one; use [`OpGraph::add_producer`] for multi-producer
    /// buffers.
    pub fn set_producer(&mut self, buffer: BufferId, producer: OpId) {
        let producers = self.buffer_producers.entry(buffer).or_default();
        debug_assert!(producers.is_empty(), "buffer already has a producer");
        producers.push(producer);
        self.op_outputs.insert(producer, buffer);
    }

    pub fn add_producer(&mut self, buffer: BufferId, producer: OpId) {
        self.buffer_producers.entry(buffer).or_default().push(producer);
        self.op_outputs.insert(producer, buffer);
    }

    /// Connects `buffer` as input number `input_index` of `consumer`.
    pub fn add_consumer(&mut self, buffer: BufferId, consumer: OpId, input_index: u32) {
        self.buffer_consumers
            .entry(buffer)
            .or_default()
            .push((consumer, input_index));
        let inputs = self.op_inputs.entry(consumer).or_default();
        let index = input_index as usize;
        if inputs.len() <= index {
            inputs.resize(index + 1, None);
        }
        inputs[index] = Some(buffer);
    }

    /// The sole producer of `buffer`. Panics if there are several; use
    /// [`OpGraph::producers`] for buffers that may have more.
    pub fn single_producer(&self, buffer: BufferId) -> Option<OpId> {
        match self.producers(buffer) {
            [] => None,
            [op] => Some(*op),
            _ => panic!("buffer has multiple producers"),
        }
    }

    pub fn producers(&self, buffer: BufferId) -> &[OpId] {
        self.buffer_producers
            .get(&buffer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn consumers(&self, buffer: BufferId) -> &[(OpId, u32)] {
        self.buffer_consumers
            .get(&buffer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn inputs(&self, op: OpId) -> Vec<BufferId> {
        self.op_inputs
            .get(&op)
            .map(|inputs| inputs.iter().filter_map(|b| *b).collect())
            .unwrap_or_default()
    }

    pub fn output(&self, op: OpId) -> Option<BufferId> {
        self.op_outputs.get(&op).copied()
    }

    /// Appends all of `other`'s ops and buffers to this graph, preserving
    /// connectivity. Returns the handle offsets applied to the merged ops
    /// and buffers.
    pub fn merge(&mut self, other: OpGraph) -> (u32, u32) {
        let op_offset = self.ops.len() as u32;
        let buffer_offset = self.buffers.len() as u32;
        self.ops.extend(other.ops);
        self.buffers.extend(other.buffers);
        for (buffer, producers) in other.buffer_producers {
            let buffer = BufferId(buffer.0 + buffer_offset);
            let entry = self.buffer_producers.entry(buffer).or_default();
            for op in producers {
                entry.push(OpId(op.0 + op_offset));
            }
        }
        for (buffer, consumers) in other.buffer_consumers {
            let buffer = BufferId(buffer.0 + buffer_offset);
            let entry = self.buffer_consumers.entry(buffer).or_default();
            for (op, index) in consumers {
                entry.push((OpId(op.0 + op_offset), index));
            }
        }
        for (op, buffer) in other.op_outputs {
            self.op_outputs
                .insert(OpId(op.0 + op_offset), BufferId(buffer.0 + buffer_offset));
        }
        for (op, inputs) in other.op_inputs {
            self.op_inputs.insert(
                OpId(op.0 + op_offset),
                inputs
                    .into_iter()
                    .map(|b| b.map(|b| BufferId(b.0 + buffer_offset)))
                    .collect(),
            );
        }
        (op_offset, buffer_offset)
    }

    /// Structural sanity checks: every op input slot is connected and every
    /// handle stored in the connectivity maps points into the arenas.
    pub fn validate(&self) -> Result<(), String> {
        for (op, inputs) in &self.op_inputs {
            if op.0 as usize >= self.ops.len() {
                return Err(format!("op handle {op:?} out of range"));
            }
            for (index, input) in inputs.iter().enumerate() {
                match input {
                    None => {
                        return Err(format!("op {op:?} input {index} is unconnected"));
                    }
                    Some(buffer) if buffer.0 as usize >= self.buffers.len() => {
                        return Err(format!("op {op:?} input {index} points outside the graph"));
                    }
                    Some(_) => {}
                }
            }
        }
        for (buffer, producers) in &self.buffer_producers {
            if buffer.0 as usize >= self.buffers.len() {
                return Err(format!("buffer handle {buffer:?} out of range"));
            }
            for op in producers {
                if op.0 as usize >= self.ops.len() {
                    return Err(format!("producer handle {op:?} out of range"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::plan::buffer::{DramBuffer, SramBuffer};
    use crate::components::plan::op::{DmaOp, Op};
    use crate::components::tile::DramFormat;
    use pretty_assertions::assert_eq;

    fn dma_graph() -> (OpGraph, BufferId, OpId, BufferId) {
        let mut graph = OpGraph::new();
        let dram = graph.add_buffer(Buffer::Dram(DramBuffer::build().finish()));
        let dma = graph.add_op(Op::dma(DmaOp::new(DramFormat::Nhwcb)));
        let sram = graph.add_buffer(Buffer::Sram(SramBuffer::build().finish()));
        graph.add_consumer(dram, dma, 0);
        graph.set_producer(sram, dma);
        (graph, dram, dma, sram)
    }

    #[test]
    fn connectivity_round_trip() {
        let (graph, dram, dma, sram) = dma_graph();
        assert_eq!(graph.inputs(dma), vec![dram]);
        assert_eq!(graph.output(dma), Some(sram));
        assert_eq!(graph.single_producer(sram), Some(dma));
        assert_eq!(graph.single_producer(dram), None);
        assert_eq!(graph.consumers(dram), &[(dma, 0)]);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn merge_offsets_handles() {
        let (mut graph, _, _, sram_a) = dma_graph();
        let (other, ..) = dma_graph();
        let (op_offset, buffer_offset) = graph.merge(other);
        assert_eq!(op_offset, 1);
        assert_eq!(buffer_offset, 2);
        assert_eq!(graph.num_ops(), 2);
        assert_eq!(graph.num_buffers(), 4);
        // Merged-in connectivity refers to the shifted handles.
        let merged_sram = BufferId(sram_a.0 + buffer_offset);
        assert_eq!(graph.single_producer(merged_sram), Some(OpId(op_offset)));
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn validate_catches_unconnected_inputs() {
        let mut graph = OpGraph::new();
        let dma = graph.add_op(Op::dma(DmaOp::new(DramFormat::Nhwc)));
        let sram = graph.add_buffer(Buffer::Sram(SramBuffer::build().finish()));
        // Connect input 1 but never input 0.
        graph.add_consumer(sram, dma, 1);
        assert!(graph.validate().is_err());
    }
}
