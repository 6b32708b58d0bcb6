//! Scheduling core for a compiler lowering neural-network graphs onto a
//! fixed-capacity, tile-based accelerator.
//!
//! For every computation node ("Part") the crate enumerates legal ways of
//! splitting the node's tensors into stripes that fit the on-chip memory
//! budget, and lowers each surviving candidate into a concrete [`Plan`]: a
//! graph of buffers and DMA/compute/post-process operations annotated with
//! tile sizes. A higher-level search (not part of this crate) scores and
//! combines the plans across the whole graph.
//!
//! Entry points are the part builders in [`components::parts`], which share
//! the [`components::parts::Part`] contract:
//!
//! - [`components::parts::McePart`] — convolution/depthwise compute nodes.
//! - [`components::parts::FusedPlePart`] — post-process kernels fused behind
//!   an identity compute pass.
//! - [`components::parts::FullyConnectedPart`] — fully-connected nodes.
//! - [`components::parts::StandalonePlePart`] — post-process-only nodes.
//!
//! [`Plan`]: components::plan::Plan

pub mod components;

pub use components::error::StripeConfigError;
