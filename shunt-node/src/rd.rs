// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The receiver-driven control plane.
//!
//! PULL, DROP and NACK messages regulate the sender's budget independently
//! of hop-by-hop tokens. They traverse the same spray-then-deterministic
//! path as data frames, but through a parallel per-link queue set that is
//! never token-gated or depth-capped. Locally originated messages are
//! rate-paced so the control plane stays within its configured fraction of
//! line rate; messages merely being forwarded are not.

use log::trace;
use rand::seq::SliceRandom;
use shunt_protocols::{Frame, RdControl, RdControlKind};
use shunt_topology::{Slot, Tick};

use crate::ctx::NodeCtx;
use crate::node::Node;

/// A locally queued control message is held until the pacing accumulator
/// decays below this threshold.
const PACING_HOLD: f64 = 10.0;

impl Node {
    /// Produce this tick's control message for the active link: a forwarded
    /// message first, else a locally originated one if pacing allows.
    pub fn send_control(&mut self, tick: Tick, ctx: &NodeCtx) -> Option<RdControl> {
        let config = ctx.config;
        let slot = config.shape.slot(tick);

        if self.rd_pacing_delay > 0.0 {
            self.rd_pacing_delay = (self.rd_pacing_delay - 1.0).max(0.0);
        }

        if self.is_failed() {
            return None;
        }
        if self.link_failed[slot.phase][slot.link] {
            assert!(self.rdc_send_queue[slot.phase][slot.link].is_empty());
            return None;
        }

        if let Some(control) = self.rdc_send_queue[slot.phase][slot.link].pop_front() {
            return Some(control);
        }

        if self.rd_pacing_delay < PACING_HOLD {
            if let Some(control) = self.local_rdc_queue.pop_front() {
                // Charge the accumulator for the bandwidth each kind
                // represents.
                match control.kind {
                    RdControlKind::Pull => {
                        self.rd_pacing_delay +=
                            f64::from(config.rd_cells_per_pull) / config.rd_target_bw_factor;
                    }
                    RdControlKind::Nack => {
                        self.rd_pacing_delay += 1.0 / config.rd_target_bw_factor;
                    }
                    RdControlKind::Drop => {}
                }
                return Some(control);
            }
        }
        None
    }

    /// Consume the control message (if any) arriving on the active link.
    pub fn receive_control(&mut self, tick: Tick, ctx: &NodeCtx, received: Option<RdControl>) {
        if self.is_failed() {
            return;
        }
        let Some(mut control) = received else {
            return;
        };
        let config = ctx.config;
        let slot = config.shape.slot(tick);

        control.hops += 1;

        if control.dest == self.id() {
            self.receive_control_destined(tick, ctx, control);
        } else if control.hops >= config.shape.num_phases() {
            self.forward_control_deterministic(slot, ctx, control);
        } else {
            self.forward_control_sprayed(slot, ctx, control);
        }
    }

    /// Act on a control message addressed to this node.
    fn receive_control_destined(&mut self, tick: Tick, ctx: &NodeCtx, control: RdControl) {
        trace!("node {}: {control}", self.id());
        match control.kind {
            RdControlKind::Pull => {
                // The flow may already have finished sending; a late PULL is
                // then simply dropped.
                if let Some(flow) = self
                    .active_flows
                    .iter_mut()
                    .find(|flow| flow.flow_id == control.flow_id)
                {
                    flow.budget += i64::from(ctx.config.rd_cells_per_pull);
                }
            }
            RdControlKind::Drop => {
                // This node is the frame's destination: ask the source to
                // send it again.
                self.local_rdc_queue.push_back(RdControl {
                    kind: RdControlKind::Nack,
                    src: self.id(),
                    dest: control.src,
                    hops: 0,
                    sequence_num: control.sequence_num,
                    flow_id: control.flow_id,
                });
            }
            RdControlKind::Nack => {
                // Regenerate the trimmed frame; retransmissions take strict
                // priority over fresh generation.
                let frame = Frame::generate(
                    self.id(),
                    control.src,
                    control.flow_id,
                    control.sequence_num,
                    0,
                    tick,
                );
                self.retransmit_queue.push_back(frame);
            }
        }
    }

    /// Deterministic routing for control messages; identical scan to the
    /// data plane but with no token or depth accounting.
    fn forward_control_deterministic(&mut self, slot: Slot, ctx: &NodeCtx, mut control: RdControl) {
        let shape = ctx.config.shape;
        for phase_offset in 1..=shape.num_phases() {
            let sending_phase = (slot.phase + phase_offset) % shape.num_phases();
            let dest_coord = shape.extract_coord(control.dest, sending_phase);
            let my_coord = shape.extract_coord(self.id(), sending_phase);
            let offset =
                (dest_coord + shape.nodes_per_phase() - my_coord) % shape.nodes_per_phase();
            if offset == 0 {
                control.hops += 1;
                continue;
            }

            let sending_link = offset - 1;
            assert!(
                !self.link_failed[sending_phase][sending_link],
                "node {}: control route onto failed link",
                self.id()
            );
            self.rdc_send_queue[sending_phase][sending_link].push_back(control);
            return;
        }
        unreachable!("control routing found no differing phase");
    }

    /// Spray a control message; always first-viable, regardless of the data
    /// plane's spray policy.
    fn forward_control_sprayed(&mut self, slot: Slot, ctx: &NodeCtx, control: RdControl) {
        let shape = ctx.config.shape;
        let spray_phase = (slot.phase + 1) % shape.num_phases();
        let rem_spray = shape.num_phases().saturating_sub(control.hops + 1);

        self.spray_order.shuffle(&mut self.rng);
        let mut selected = None;
        for &link in &self.spray_order {
            if self.link_failed[spray_phase][link] {
                continue;
            }
            if rem_spray == 0
                && self.direct_path_has_failed_node(spray_phase, link, control.dest, ctx)
            {
                continue;
            }
            selected = Some(link);
            break;
        }

        let selected = selected.unwrap_or_else(|| {
            panic!(
                "node {}: no viable spray link for control toward {}",
                self.id(),
                control.dest
            )
        });
        self.rdc_send_queue[spray_phase][selected].push_back(control);
    }
}
