// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Next-link selection: randomized spraying followed by deterministic
//! dimension-order routing.
//!
//! A message is sprayed while it still has spray budget (`num_phases - 1`
//! randomized hops diversify link usage), then routed deterministically one
//! phase at a time toward its destination. Phases where the coordinates
//! already match are skipped without consuming a timeslot. Both regimes
//! converge on the common admission step in [`buckets`](crate::buckets).

use log::trace;
use rand::seq::SliceRandom;
use shunt_topology::{NodeId, Slot};

use crate::buckets::QueuedFrame;
use crate::ctx::NodeCtx;
use crate::node::Node;

/// How spraying picks among a hop's viable candidate links.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SprayPolicy {
    /// First viable link in a fresh random permutation.
    FirstViable,
    /// Evaluate every viable link and pick the least-occupied one, ties
    /// broken by permutation order.
    ShortestQueue {
        /// Rank primarily by the occupancy (queued frames plus outstanding
        /// tokens) of the bucket this message would join, with total link
        /// occupancy as the tiebreaker.
        bucket_aware: bool,
    },
}

impl Node {
    /// Route a frame that has exhausted its spray budget.
    ///
    /// Scans phases in order starting after the current one; the first phase
    /// where the destination coordinate differs decides the link. Matching
    /// phases are skipped, duplicating the previous hop's timestamp.
    pub(crate) fn forward_deterministic(
        &mut self,
        slot: Slot,
        ctx: &NodeCtx,
        mut queued: QueuedFrame,
    ) {
        let shape = ctx.config.shape;
        for phase_offset in 1..=shape.num_phases() {
            let sending_phase = (slot.phase + phase_offset) % shape.num_phases();
            let dest_coord = shape.extract_coord(queued.frame.dest, sending_phase);
            let my_coord = shape.extract_coord(self.id(), sending_phase);
            let offset =
                (dest_coord + shape.nodes_per_phase() - my_coord) % shape.nodes_per_phase();
            if offset == 0 {
                // Already aligned on this phase; move on without spending a
                // timeslot.
                queued.frame.hops += 1;
                let hops = queued.frame.hops;
                queued.frame.timestamps[hops - 1] = queued.frame.timestamps[hops - 2];
                continue;
            }

            let sending_link = offset - 1;
            assert!(
                !self.link_failed[sending_phase][sending_link],
                "node {}: deterministic route onto failed link",
                self.id()
            );
            self.await_token(queued, sending_phase, sending_link, ctx);
            return;
        }
        unreachable!("deterministic routing found no differing phase");
    }

    /// Spray a frame onto a randomly chosen viable link of the next phase.
    pub(crate) fn forward_sprayed(&mut self, slot: Slot, ctx: &NodeCtx, queued: QueuedFrame) {
        let shape = ctx.config.shape;
        let spray_phase = (slot.phase + 1) % shape.num_phases();
        let rem_spray = shape.num_phases().saturating_sub(queued.frame.hops + 1);

        let selected = self.select_spray_link(spray_phase, rem_spray, queued.frame.dest, ctx);
        trace!(
            "node {}: spray {} via ({spray_phase},{selected})",
            self.id(),
            queued.frame
        );
        self.await_token(queued, spray_phase, selected, ctx);
    }

    /// Pick the spray link for a message with `rem_spray` hops left after
    /// this one.
    ///
    /// A candidate is rejected if its link has failed or — on the final
    /// spray hop only — if the deterministic remainder of the path from it
    /// crosses a failed node. No viable candidate means the failure
    /// placement left the destination unreachable, which is fatal.
    pub(crate) fn select_spray_link(
        &mut self,
        spray_phase: usize,
        rem_spray: usize,
        dest: NodeId,
        ctx: &NodeCtx,
    ) -> usize {
        let config = ctx.config;
        self.spray_order.shuffle(&mut self.rng);

        match config.spray {
            SprayPolicy::FirstViable => {
                for &link in &self.spray_order {
                    if self.link_failed[spray_phase][link] {
                        continue;
                    }
                    if rem_spray == 0
                        && self.direct_path_has_failed_node(spray_phase, link, dest, ctx)
                    {
                        continue;
                    }
                    return link;
                }
            }
            SprayPolicy::ShortestQueue { bucket_aware } => {
                let relevant = config.shape.bucket_of(dest, rem_spray);
                let mut selected = None;
                let mut selected_total = u32::MAX;
                let mut selected_bucket = u64::MAX;

                for &link in &self.spray_order {
                    if self.link_failed[spray_phase][link] {
                        continue;
                    }
                    if rem_spray == 0
                        && self.direct_path_has_failed_node(spray_phase, link, dest, ctx)
                    {
                        continue;
                    }

                    let total = self.cur_enqueued[spray_phase][link];
                    let better = if bucket_aware {
                        let awaiting = self.buckets[spray_phase][link]
                            .get(&relevant)
                            .map(|bucket| {
                                bucket.queue.len() as u64 + u64::from(bucket.outstanding_tokens)
                            })
                            .unwrap_or(0);
                        if awaiting < selected_bucket
                            || (awaiting == selected_bucket && total < selected_total)
                        {
                            selected_bucket = awaiting;
                            true
                        } else {
                            false
                        }
                    } else {
                        total < selected_total
                    };

                    if better {
                        selected = Some(link);
                        selected_total = total;
                    }
                }
                if let Some(link) = selected {
                    return link;
                }
            }
        }
        panic!(
            "node {}: no viable spray link on phase {spray_phase} toward {dest}",
            self.id()
        );
    }

    /// Walk the deterministic remainder of the path from the `(phase, link)`
    /// neighbour to `dest`, one phase at a time, and report whether it
    /// crosses a currently-failed node.
    #[must_use]
    pub fn direct_path_has_failed_node(
        &self,
        phase: usize,
        link: usize,
        dest: NodeId,
        ctx: &NodeCtx,
    ) -> bool {
        let shape = ctx.config.shape;
        let mut current = shape.neighbour(self.id(), phase, link);
        let mut current_phase = phase;

        while current != dest {
            current_phase = (current_phase + 1) % shape.num_phases();
            current = shape.set_coord(current, current_phase, shape.extract_coord(dest, current_phase));
            if ctx.failed[current.index()] {
                return true;
            }
        }
        false
    }
}
