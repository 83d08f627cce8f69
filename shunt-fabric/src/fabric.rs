// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The node arena and the per-tick phase driver.

use log::{debug, info};
use rayon::prelude::*;
use shunt_node::node::FlowProgress;
use shunt_node::{FctSink, Node, NodeCtx, SharedCounters, SimConfig};
use shunt_protocols::types::SimError;
use shunt_protocols::{Flow, Frame, RdControl, TokenBatch};
use shunt_topology::{NodeId, Tick};

use crate::delay_line::DelayLine;
use crate::failures;

/// Interval between delivered-frame checkpoints in the run report.
const CHECKPOINT_TICKS: Tick = 1_000_000;

/// Termination bounds for [`Fabric::run`].
#[derive(Copy, Clone, Debug)]
pub struct RunLimits {
    /// Stop after this many send ticks (plus the propagation drain).
    pub max_ticks: Tick,
    /// Stop once this many flows have completed.
    pub max_flows: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_ticks: Tick::MAX,
            max_flows: usize::MAX,
        }
    }
}

/// Summary of a finished run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// The last receive tick that completed.
    pub last_tick: Tick,
    pub frames_delivered: u64,
    pub completed_flows: usize,
    /// Delivered-frame totals sampled every [`CHECKPOINT_TICKS`].
    pub checkpoints: Vec<(Tick, u64)>,
}

/// Queue statistics of one `(node, phase, link)`.
#[derive(Copy, Clone, Debug)]
pub struct LinkStat {
    pub node: NodeId,
    pub phase: usize,
    pub link: usize,
    pub cur_enqueued: u32,
    pub max_enqueued: u32,
    pub max_send_queue: usize,
}

/// The whole simulated network.
///
/// A central arena owns every node; neighbour references are resolved by
/// index through the topology arithmetic, and all inter-node traffic flows
/// through the per-receiver [`DelayLine`] planes.
pub struct Fabric {
    config: SimConfig,
    nodes: Vec<Node>,
    frame_wires: Vec<DelayLine<Option<Frame>>>,
    ctrl_wires: Vec<DelayLine<Option<RdControl>>>,
    token_wires: Vec<DelayLine<TokenBatch>>,
    counters: SharedCounters,
    fct: Box<dyn FctSink>,
    failed: Vec<bool>,
    flows_loaded: usize,
}

impl Fabric {
    /// Build an idle fabric. Finalizes (and so validates) the configuration.
    pub fn new(config: SimConfig, fct: Box<dyn FctSink>) -> Result<Self, SimError> {
        let config = config.finalize()?;
        let node_count = config.shape.max_node_id();
        let delay = config.prop_delay_ts;
        Ok(Self {
            nodes: (0..node_count)
                .map(|index| Node::new(NodeId::from(index), &config))
                .collect(),
            frame_wires: (0..node_count).map(|_| DelayLine::new(delay)).collect(),
            ctrl_wires: (0..node_count).map(|_| DelayLine::new(delay)).collect(),
            token_wires: (0..node_count).map(|_| DelayLine::new(delay)).collect(),
            counters: SharedCounters::new(node_count),
            fct,
            failed: vec![false; node_count],
            flows_loaded: 0,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[must_use]
    pub fn counters(&self) -> &SharedCounters {
        &self.counters
    }

    #[must_use]
    pub fn flows_loaded(&self) -> usize {
        self.flows_loaded
    }

    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Register a flow with its source and destination nodes.
    pub fn add_flow(&mut self, flow: Flow) {
        debug_assert!(!self.failed[flow.source.index()], "flow from failed node");
        debug_assert!(!self.failed[flow.dest.index()], "flow to failed node");
        self.nodes[flow.source.index()].add_send_flow(flow.clone());
        self.nodes[flow.dest.index()].add_recv_flow(flow);
        self.flows_loaded += 1;
    }

    /// Mark a node failed before the run starts: it will emit nothing and
    /// drop everything, and every neighbour's link toward it is flagged so
    /// routing never selects it.
    pub fn fail(&mut self, id: NodeId) {
        let shape = self.config.shape;
        self.nodes[id.index()].mark_failed();
        self.failed[id.index()] = true;
        for phase in 0..shape.num_phases() {
            for link in 0..shape.links_per_phase() {
                let neighbour = shape.neighbour(id, phase, link);
                let mirrored = shape.mirror_link(link);
                self.nodes[neighbour.index()].mark_link_failed(phase, mirrored);
            }
        }
    }

    /// Fail `count` nodes spread evenly across the topology.
    pub fn fail_evenly(&mut self, count: usize) {
        for id in failures::evenly_spread(self.config.shape, count) {
            self.fail(id);
        }
        info!("failed {count} nodes");
    }

    /// Execute one tick: the ordered phases, each a fork-join parallel pass
    /// over every node, with delivery of the send phases' payloads into the
    /// receiving nodes' delay lines in between.
    pub fn tick(&mut self, tick: Tick) {
        let config = &self.config;
        let nodes = &mut self.nodes;
        let frame_wires = &mut self.frame_wires;
        let ctrl_wires = &mut self.ctrl_wires;
        let token_wires = &mut self.token_wires;
        let ctx = NodeCtx {
            config,
            counters: &self.counters,
            failed: &self.failed,
            fct: self.fct.as_ref(),
        };
        let shape = config.shape;
        let slot = shape.slot(tick);
        let receive_tick = tick as i64 - config.prop_delay_ts as i64;

        if config.use_fsr() {
            nodes
                .par_iter_mut()
                .for_each(|node| node.adjust_credit(tick, &ctx));
        }

        // The active slot's neighbour map is a bijection, so each delivery
        // pass is itself a parallel-for over receivers.
        let outbound: Vec<Option<Frame>> = nodes
            .par_iter_mut()
            .map(|node| node.send_frame(tick, &ctx))
            .collect();
        frame_wires.par_iter_mut().enumerate().for_each(|(dst, wire)| {
            let upstream = shape.upstream(NodeId::from(dst), slot);
            wire.push(outbound[upstream.index()].clone());
        });

        if config.use_rd {
            let outbound: Vec<Option<RdControl>> = nodes
                .par_iter_mut()
                .map(|node| node.send_control(tick, &ctx))
                .collect();
            ctrl_wires.par_iter_mut().enumerate().for_each(|(dst, wire)| {
                let upstream = shape.upstream(NodeId::from(dst), slot);
                wire.push(outbound[upstream.index()].clone());
            });
        }

        if config.use_hbh {
            let outbound: Vec<TokenBatch> = nodes
                .par_iter_mut()
                .map(|node| node.send_token_batch(tick, &ctx))
                .collect();
            token_wires.par_iter_mut().enumerate().for_each(|(dst, wire)| {
                let upstream = shape.upstream(NodeId::from(dst), slot);
                wire.push(outbound[upstream.index()]);
            });
        }

        if receive_tick >= 0 {
            let receive_tick = receive_tick as Tick;
            nodes
                .par_iter_mut()
                .zip(frame_wires.par_iter_mut())
                .for_each(|(node, wire)| node.receive_frame(receive_tick, &ctx, wire.pop()));

            if config.use_rd {
                nodes
                    .par_iter_mut()
                    .zip(ctrl_wires.par_iter_mut())
                    .for_each(|(node, wire)| node.receive_control(receive_tick, &ctx, wire.pop()));
            }

            if config.use_hbh {
                nodes
                    .par_iter_mut()
                    .zip(token_wires.par_iter_mut())
                    .for_each(|(node, wire)| {
                        node.receive_token_batch(receive_tick, &ctx, wire.pop());
                    });
            }
        }
    }

    /// Drive ticks until every loaded flow completes or a limit is reached.
    pub fn run(&mut self, limits: RunLimits) -> RunReport {
        let prop = self.config.prop_delay_ts as Tick;
        let horizon = limits.max_ticks.saturating_add(prop);
        let mut checkpoints = Vec::new();
        let mut send_tick: Tick = 0;

        while self.counters.completed_flows() < self.flows_loaded
            && self.counters.completed_flows() < limits.max_flows
            && send_tick < horizon
        {
            let receive_tick = send_tick as i64 - prop as i64;
            if receive_tick >= 0 {
                let receive_tick = receive_tick as Tick;
                if receive_tick % 100 == 0 {
                    debug!(
                        "starting tick {receive_tick}    completed flows: {}",
                        self.counters.completed_flows()
                    );
                }
                if receive_tick > 0 && receive_tick % CHECKPOINT_TICKS == 0 {
                    checkpoints.push((receive_tick, self.counters.frames_delivered()));
                }
            }
            self.tick(send_tick);
            send_tick += 1;
        }

        let last_tick = send_tick.saturating_sub(prop);
        info!(
            "simulation complete, total timeslots: {last_tick}, flows: {}/{}",
            self.counters.completed_flows(),
            self.flows_loaded
        );
        RunReport {
            last_tick,
            frames_delivered: self.counters.frames_delivered(),
            completed_flows: self.counters.completed_flows(),
            checkpoints,
        }
    }

    // Snapshot surface for reporting.

    /// Queue statistics for every link of every non-failed node.
    #[must_use]
    pub fn link_stats(&self) -> Vec<LinkStat> {
        let shape = self.config.shape;
        let mut stats = Vec::new();
        for node in self.nodes.iter().filter(|node| !node.is_failed()) {
            for phase in 0..shape.num_phases() {
                for link in 0..shape.links_per_phase() {
                    stats.push(LinkStat {
                        node: node.id(),
                        phase,
                        link,
                        cur_enqueued: node.cur_enqueued_frames(phase, link),
                        max_enqueued: node.max_enqueued_frames(phase, link),
                        max_send_queue: node.max_send_queue_length(phase, link),
                    });
                }
            }
        }
        stats
    }

    #[must_use]
    pub fn max_queue_length(&self) -> u32 {
        self.link_stats()
            .iter()
            .map(|stat| stat.max_enqueued)
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn max_buffer_occupancy(&self) -> u32 {
        self.nodes
            .iter()
            .filter(|node| !node.is_failed())
            .map(Node::max_buffer_occupancy)
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn max_buckets_in_use(&self) -> u32 {
        self.nodes
            .iter()
            .filter(|node| !node.is_failed())
            .map(Node::max_buckets_in_use)
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn total_trimmed_frames(&self) -> u64 {
        self.nodes.iter().map(Node::trimmed_frames).sum()
    }

    #[must_use]
    pub fn total_tokens_issued(&self) -> u64 {
        self.nodes.iter().map(Node::tokens_issued).sum()
    }

    #[must_use]
    pub fn total_tokens_returned(&self) -> u64 {
        self.nodes.iter().map(Node::tokens_returned).sum()
    }

    /// True once every bucket on every node has been torn down.
    #[must_use]
    pub fn buckets_drained(&self) -> bool {
        self.nodes.iter().all(Node::buckets_drained)
    }

    /// Flows that started but did not finish, across all destinations.
    #[must_use]
    pub fn incomplete_flows(&self, last_tick: Tick) -> Vec<FlowProgress> {
        self.nodes
            .iter()
            .flat_map(|node| node.incomplete_recv_flows(last_tick, self.config.prop_delay_ts))
            .collect()
    }
}
