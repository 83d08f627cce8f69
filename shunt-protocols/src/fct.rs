// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Flow-completion records.

use shunt_topology::Tick;

use crate::flow::FlowId;

/// Emitted exactly once per completed flow, in delivery order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FctRecord {
    pub flow_id: FlowId,
    pub num_frames: u32,
    /// Completion duration in ticks, including the final propagation delay.
    pub duration: Tick,
    pub start_tick: Tick,
}
