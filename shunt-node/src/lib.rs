// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The per-node protocol state machine of the SHUNT fabric.
//!
//! A [`Node`] owns, per adjacency direction, a [priority link
//! queue](link_queue), a [token-bucket table](buckets), a control-plane queue
//! and a token-return queue, and exposes the ordered per-tick operations the
//! [scheduler](../shunt_fabric/index.html) drives:
//!
//! 1. [`adjust_credit`](Node::adjust_credit)
//! 2. [`send_frame`](Node::send_frame)
//! 3. [`send_control`](Node::send_control)
//! 4. [`send_token_batch`](Node::send_token_batch)
//! 5. [`receive_frame`](Node::receive_frame)
//! 6. [`receive_control`](Node::receive_control)
//! 7. [`receive_token_batch`](Node::receive_token_batch)
//!
//! Every operation is node-local: a node mutates only its own state, reads
//! the shared [context](ctx) handles, and produces the payload the fabric
//! delivers into the downstream neighbour's delay line.

pub mod buckets;
pub mod config;
pub mod ctx;
pub mod link_queue;
pub mod node;
pub mod rd;
pub mod spray;

pub use config::{MAX_FLOW_CREDIT, SimConfig};
pub use ctx::{FctSink, MemorySink, NodeCtx, NullSink, SharedCounters};
pub use link_queue::{Priority, PriorityLinkQueue};
pub use node::{FlowProgress, Node};
pub use spray::SprayPolicy;
