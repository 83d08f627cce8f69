// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Receiver-driven transport control messages.
//!
//! Control messages travel the same spray-then-deterministic path as data
//! frames but through a parallel, never-gated queue set. "No message this
//! tick" is expressed at the transport boundary as `Option<RdControl>`, not
//! as a message variant.

use std::fmt;

use shunt_topology::NodeId;

use crate::flow::FlowId;

/// What a control message asks for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RdControlKind {
    /// Receiver grants the sender budget for another batch of frames.
    Pull,
    /// A queue-capped node discarded a frame; tells the destination.
    Drop,
    /// The destination asks the source to regenerate a trimmed frame.
    Nack,
}

/// A receiver-driven control message.
#[derive(Clone, Debug)]
pub struct RdControl {
    pub kind: RdControlKind,
    pub src: NodeId,
    pub dest: NodeId,
    pub hops: usize,
    /// Sequence of the frame to regenerate; unused for PULL messages.
    pub sequence_num: u32,
    pub flow_id: FlowId,
}

impl fmt::Display for RdControl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            RdControlKind::Pull => "PULL",
            RdControlKind::Drop => "DROP",
            RdControlKind::Nack => "NACK",
        };
        write!(f, "({}|{}->{}|f-{})", kind, self.src, self.dest, self.flow_id)
    }
}
