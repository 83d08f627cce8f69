// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Message and record types passed between SHUNT fabric nodes.
//!
//! Everything here is an immutable-shape plain record: nodes exchange these
//! through the fabric's delay-line wires and never through shared mutable
//! state. All of them are `Clone` because delivery along a wire hands each
//! receiver its own copy.

pub mod control;
pub mod fct;
pub mod flow;
pub mod frame;
pub mod token;
pub mod types;

pub use control::{RdControl, RdControlKind};
pub use fct::FctRecord;
pub use flow::{Flow, FlowId};
pub use frame::{Frame, MAX_TIMESTAMPS};
pub use token::{TOKENS_PER_PACKET, TokenBatch};
pub use types::{SimError, SimResult};
