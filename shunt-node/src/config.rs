// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Run parameters, immutable for the duration of a simulation.

use shunt_protocols::types::SimError;
use shunt_protocols::sim_error;
use shunt_topology::Shape;

use crate::spray::SprayPolicy;

/// Cap on the fair-sending-rate credit a flow can accumulate.
pub const MAX_FLOW_CREDIT: f64 = 4.0;

/// Everything a node needs to know about the run.
///
/// Constructed once (usually by the CLI), validated with
/// [`finalize`](SimConfig::finalize), then shared by reference with every
/// node through the [`NodeCtx`](crate::ctx::NodeCtx).
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub shape: Shape,
    /// Propagation delay of every wire, in ticks.
    pub prop_delay_ts: usize,

    /// Outstanding-token cap for interior buckets.
    pub max_tokens_per_bucket: u32,
    /// Outstanding-token cap for first-hop buckets; clamped up to at least
    /// `max_tokens_per_bucket`.
    pub max_tokens_firsthop_bucket: u32,

    /// Hop-by-hop token backpressure.
    pub use_hbh: bool,
    /// Receiver-driven pull/drop/NACK transport.
    pub use_rd: bool,
    /// Shortest-flow-first link scheduling.
    pub use_prio: bool,
    /// Use the quantized frame count as the priority metric.
    pub quantized_prio: bool,
    /// Use log2 of the frame count as the priority metric.
    pub prio_log: bool,
    /// Scale applied to the priority metric against arrival tick.
    pub prio_factor: f64,

    /// Aggregate fair sending rate shared by flows into one destination;
    /// zero disables FSR crediting.
    pub total_fsr: f64,

    /// How spraying picks among a hop's candidate links.
    pub spray: SprayPolicy,

    /// Frames granted per PULL.
    pub rd_cells_per_pull: u32,
    /// Frames a sender may emit before the first PULL arrives; zero means
    /// derive from the round-trip estimate in [`finalize`](Self::finalize).
    pub rd_starting_budget: i64,
    /// Control-plane pacing as a fraction of line rate.
    pub rd_target_bw_factor: f64,
    /// Per-link enqueued-frame cap before trimming; zero disables the cap.
    pub rd_max_queue_length: u32,

    /// Base seed from which every node derives its spray RNG.
    pub seed: u64,
}

impl SimConfig {
    /// Defaults mirroring a plain run: no congestion control, no
    /// prioritization, pure random spraying.
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            prop_delay_ts: 0,
            max_tokens_per_bucket: 1,
            max_tokens_firsthop_bucket: 1,
            use_hbh: false,
            use_rd: false,
            use_prio: false,
            quantized_prio: false,
            prio_log: false,
            prio_factor: 1.0,
            total_fsr: 0.0,
            spray: SprayPolicy::FirstViable,
            rd_cells_per_pull: 10,
            rd_starting_budget: 0,
            rd_target_bw_factor: 1.0,
            rd_max_queue_length: 0,
            seed: 0,
        }
    }

    /// FSR crediting is implied by a non-zero aggregate rate.
    #[must_use]
    pub fn use_fsr(&self) -> bool {
        self.total_fsr > 0.0
    }

    /// Validate and resolve derived parameters.
    ///
    /// The first-hop token cap is clamped up to the interior cap, and a zero
    /// receiver-driven starting budget is replaced by a round-trip estimate:
    /// four epochs' worth of slots scaled by the pacing fraction.
    pub fn finalize(mut self) -> Result<Self, SimError> {
        if self.max_tokens_per_bucket == 0 {
            return sim_error!("must have at least one token per bucket");
        }
        if self.max_tokens_firsthop_bucket < self.max_tokens_per_bucket {
            self.max_tokens_firsthop_bucket = self.max_tokens_per_bucket;
        }
        if self.prio_factor <= 0.0 {
            return sim_error!("prioritization factor must be positive");
        }
        if self.total_fsr < 0.0 {
            return sim_error!("fair sending rate cannot be negative");
        }
        if self.rd_target_bw_factor <= 0.0 {
            return sim_error!("receiver-driven bandwidth fraction must be positive");
        }
        if self.rd_cells_per_pull == 0 {
            return sim_error!("receiver-driven transport needs at least one cell per pull");
        }
        if self.rd_starting_budget == 0 {
            let slots = (self.prop_delay_ts + self.shape.links_per_phase())
                * self.shape.num_phases();
            self.rd_starting_budget = (4.0 * slots as f64 * self.rd_target_bw_factor) as i64;
        }
        Ok(self)
    }
}
