// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Addressing and timeslot arithmetic for the SHUNT fabric.
//!
//! The fabric is a multi-dimensional topology in which every node is a member
//! of one complete graph per *phase* (dimension). A node address is therefore
//! a tuple of `num_phases` coordinates, each in `[0, nodes_per_phase)`, packed
//! positionally into a single integer. [`Shape`] owns the radix parameters and
//! provides the coordinate arithmetic; everything is modular per phase.
//!
//! Time is slotted: every tick activates exactly one `(phase, link)` pair
//! network-wide, and one full rotation through all pairs is an *epoch*.

pub mod id;
pub mod shape;

pub use id::{BucketId, NodeId};
pub use shape::{Shape, Slot};

/// Upper bound on the number of phases, fixed at compile time so that per-hop
/// state in messages can live in fixed-size arrays.
pub const MAX_PHASES: usize = 4;

/// Simulated time, in ticks.
pub type Tick = u64;
