// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! End-to-end transfers.

use shunt_topology::{NodeId, Tick};

/// Identifier of a flow, unique across the workload.
pub type FlowId = u64;

/// One end-to-end transfer.
///
/// A flow is owned by its source node's pending queue until its start tick
/// elapses, sits in the source's active set while frames remain, and is
/// archived on completion. The `credit` balance (fair-sending-rate) and the
/// `budget` (receiver-driven transport) independently gate frame generation.
#[derive(Clone, Debug)]
pub struct Flow {
    pub flow_id: FlowId,
    pub source: NodeId,
    pub dest: NodeId,
    /// Total frames this flow transfers.
    pub num_frames: u32,
    /// `num_frames` rounded onto the quantization table, used as the priority
    /// metric under quantized prioritization.
    pub quantized_num_frames: u32,
    pub remain_frames: u32,
    /// The flow may not send before this tick.
    pub start_tick: Tick,
    /// Fair-sending-rate allowance; generation requires at least 1.0.
    pub credit: f64,
    /// Receiver-driven allowance; generation requires at least 1.
    pub budget: i64,
}

impl Flow {
    /// A flow that has not been admitted yet: zero credit and budget until
    /// the source node activates it.
    #[must_use]
    pub fn new(
        flow_id: FlowId,
        source: NodeId,
        dest: NodeId,
        num_frames: u32,
        quantized_num_frames: u32,
        start_tick: Tick,
    ) -> Self {
        Self {
            flow_id,
            source,
            dest,
            num_frames,
            quantized_num_frames,
            remain_frames: num_frames,
            start_tick,
            credit: 0.0,
            budget: 0,
        }
    }

    /// Frames already handed to the transport.
    #[must_use]
    pub fn frames_sent(&self) -> u32 {
        self.num_frames - self.remain_frames
    }
}
