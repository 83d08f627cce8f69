// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Data frames.

use std::fmt;

use shunt_topology::{MAX_PHASES, NodeId, Tick};

use crate::flow::FlowId;

/// Per-hop timestamp capacity: a frame can cross at most `MAX_PHASES` spray
/// hops plus a deterministic pass over every phase.
pub const MAX_TIMESTAMPS: usize = MAX_PHASES * 2;

/// One fixed-size unit of a flow.
///
/// Created at the source when the flow's gates allow it, destroyed on
/// delivery, on being superseded by a retransmission, or when trimmed under
/// receiver-driven queue caps (after a DROP control message is emitted in its
/// place).
#[derive(Clone, Debug)]
pub struct Frame {
    pub src: NodeId,
    pub dest: NodeId,
    /// Hops consumed so far, counting skipped (already-matching) phases.
    pub hops: usize,
    pub generated_tick: Tick,
    /// `frames_sent` of the flow at generation time.
    pub sequence_num: u32,
    pub flow_id: FlowId,
    /// Tick at which the frame was transmitted on each hop; skipped phases
    /// duplicate the previous hop's stamp.
    pub timestamps: [Tick; MAX_TIMESTAMPS],
    /// Priority metric: the flow's (possibly quantized) frame count. Zero for
    /// retransmitted frames.
    pub flow_length: u32,
}

impl Frame {
    /// A frame freshly generated at `src` (hop zero, stamped with `tick`).
    #[must_use]
    pub fn generate(
        src: NodeId,
        dest: NodeId,
        flow_id: FlowId,
        sequence_num: u32,
        flow_length: u32,
        tick: Tick,
    ) -> Self {
        let mut timestamps = [0; MAX_TIMESTAMPS];
        timestamps[0] = tick;
        Self {
            src,
            dest,
            hops: 0,
            generated_tick: tick,
            sequence_num,
            flow_id,
            timestamps,
            flow_length,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "(f-{} #{} {}->{} h{})",
            self.flow_id, self.sequence_num, self.src, self.dest, self.hops
        )
    }
}
