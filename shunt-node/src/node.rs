// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The node itself: flow bookkeeping and the data-plane tick operations.

use std::collections::{BTreeMap, VecDeque};

use log::{debug, trace};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use shunt_protocols::{FctRecord, Flow, FlowId, Frame, RdControl, RdControlKind};
use shunt_topology::{BucketId, NodeId, Tick};

use crate::buckets::{Bucket, QueuedFrame};
use crate::config::SimConfig;
use crate::ctx::NodeCtx;
use crate::link_queue::{PriorityLinkQueue, priority_key};

/// Partial progress of a receive-side flow, for end-of-run reporting.
#[derive(Clone, Debug)]
pub struct FlowProgress {
    pub flow_id: FlowId,
    pub frames_delivered: u32,
    pub elapsed: Tick,
    pub num_frames: u32,
}

/// One fabric endpoint.
///
/// Owns every queue, bucket, cursor and counter it touches; the scheduler
/// drives the per-tick operations and moves the returned payloads into the
/// neighbours' delay lines. A failed node emits nothing and drops everything
/// it receives.
pub struct Node {
    id: NodeId,
    failed: bool,

    pub(crate) rng: SmallRng,
    /// Scratch permutation reshuffled for every spray decision.
    pub(crate) spray_order: Vec<usize>,

    pub(crate) link_failed: Vec<Vec<bool>>,

    /// Flows waiting for their start tick, in workload order.
    pending_flows: VecDeque<Flow>,
    /// Flows currently generating frames. Round-robin cursors index into
    /// this vector, so removal adjusts every cursor (see
    /// [`retire_cursor_slot`](Self::retire_cursor_slot)).
    pub(crate) active_flows: Vec<Flow>,
    finished_flows: Vec<Flow>,
    /// Per-(phase, link) round-robin position into `active_flows`.
    cursors: Vec<Vec<usize>>,

    /// Flows this node is the destination of, by flow id.
    recv_flows: BTreeMap<FlowId, Flow>,

    pub(crate) send_queue: Vec<Vec<PriorityLinkQueue>>,
    pub(crate) buckets: Vec<Vec<BTreeMap<BucketId, Bucket>>>,
    /// Tokens owed upstream, per (phase, link) pointing back at the feeder.
    pub(crate) token_queue: Vec<Vec<VecDeque<BucketId>>>,

    pub(crate) rdc_send_queue: Vec<Vec<VecDeque<RdControl>>>,
    pub(crate) local_rdc_queue: VecDeque<RdControl>,
    pub(crate) rd_pacing_delay: f64,
    pub(crate) retransmit_queue: VecDeque<Frame>,

    // Occupancy statistics.
    pub(crate) cur_enqueued: Vec<Vec<u32>>,
    pub(crate) max_enqueued: Vec<Vec<u32>>,
    pub(crate) max_send_queue_len: Vec<Vec<usize>>,
    pub(crate) cur_buffer_occupancy: u32,
    pub(crate) max_buffer_occupancy: u32,
    pub(crate) buckets_in_use: BTreeMap<BucketId, u32>,
    pub(crate) cur_buckets_in_use: u32,
    pub(crate) max_buckets_in_use: u32,
    pub(crate) sent_frames: u64,
    pub(crate) trimmed_frames: u64,
    pub(crate) tokens_issued: u64,
    pub(crate) tokens_returned: u64,
}

fn grid<T: Clone>(config: &SimConfig, value: T) -> Vec<Vec<T>> {
    vec![vec![value; config.shape.links_per_phase()]; config.shape.num_phases()]
}

fn grid_with<T>(config: &SimConfig, mut value: impl FnMut() -> T) -> Vec<Vec<T>> {
    (0..config.shape.num_phases())
        .map(|_| (0..config.shape.links_per_phase()).map(|_| value()).collect())
        .collect()
}

impl Node {
    #[must_use]
    pub fn new(id: NodeId, config: &SimConfig) -> Self {
        // Each node gets its own reproducible stream: splitmix the id into
        // the base seed.
        let seed = config
            .seed
            .wrapping_add((id.index() as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        Self {
            id,
            failed: false,
            rng: SmallRng::seed_from_u64(seed),
            spray_order: (0..config.shape.links_per_phase()).collect(),
            link_failed: grid(config, false),
            pending_flows: VecDeque::new(),
            active_flows: Vec::new(),
            finished_flows: Vec::new(),
            cursors: grid(config, 0),
            recv_flows: BTreeMap::new(),
            send_queue: grid_with(config, PriorityLinkQueue::new),
            buckets: grid_with(config, BTreeMap::new),
            token_queue: grid_with(config, VecDeque::new),
            rdc_send_queue: grid_with(config, VecDeque::new),
            local_rdc_queue: VecDeque::new(),
            rd_pacing_delay: 0.0,
            retransmit_queue: VecDeque::new(),
            cur_enqueued: grid(config, 0),
            max_enqueued: grid(config, 0),
            max_send_queue_len: grid(config, 0),
            cur_buffer_occupancy: 0,
            max_buffer_occupancy: 0,
            buckets_in_use: BTreeMap::new(),
            cur_buckets_in_use: 0,
            max_buckets_in_use: 0,
            sent_frames: 0,
            trimmed_frames: 0,
            tokens_issued: 0,
            tokens_returned: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Queue a flow this node originates.
    pub fn add_send_flow(&mut self, flow: Flow) {
        self.pending_flows.push_back(flow);
    }

    /// Register a flow this node terminates.
    pub fn add_recv_flow(&mut self, flow: Flow) {
        self.recv_flows.insert(flow.flow_id, flow);
    }

    /// Mark this node failed. The fabric is responsible for flagging the
    /// mirrored link on every neighbour.
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Flag the link toward a failed neighbour.
    pub fn mark_link_failed(&mut self, phase: usize, link: usize) {
        self.link_failed[phase][link] = true;
    }

    #[must_use]
    pub fn link_failed(&self, phase: usize, link: usize) -> bool {
        self.link_failed[phase][link]
    }

    /// Accrue fair-sending-rate credit for every active flow: an equal share
    /// of the aggregate rate per flow contending for the same destination,
    /// capped at [`MAX_FLOW_CREDIT`](crate::config::MAX_FLOW_CREDIT).
    pub fn adjust_credit(&mut self, _tick: Tick, ctx: &NodeCtx) {
        if self.failed {
            return;
        }
        for flow in &mut self.active_flows {
            let sharing = ctx.counters.active_with_dest(flow.dest).max(1);
            flow.credit += ctx.config.total_fsr / f64::from(sharing);
            if flow.credit > crate::config::MAX_FLOW_CREDIT {
                flow.credit = crate::config::MAX_FLOW_CREDIT;
            }
        }
    }

    /// Produce this tick's transmission for the active link: the head of the
    /// link's priority queue, else a retransmission, else a freshly
    /// generated frame from the active flows — or nothing.
    pub fn send_frame(&mut self, tick: Tick, ctx: &NodeCtx) -> Option<Frame> {
        let config = ctx.config;
        let slot = config.shape.slot(tick);

        // Start the next flow, if due.
        if !self.failed {
            let due = self
                .pending_flows
                .front()
                .is_some_and(|flow| flow.start_tick <= tick);
            if due {
                let mut flow = self.pending_flows.pop_front().unwrap();
                ctx.counters.flow_activated(flow.dest);
                flow.credit = 1.0;
                flow.budget = config.rd_starting_budget;
                debug!("node {}: flow f-{} active", self.id, flow.flow_id);
                self.active_flows.push(flow);
            }
        }

        if self.failed {
            return None;
        }
        if self.link_failed[slot.phase][slot.link] {
            // Nodes do not fail mid-run, so nothing can be parked here.
            assert!(self.send_queue[slot.phase][slot.link].is_empty());
            return None;
        }

        if let Some((_priority, bucket)) = self.send_queue[slot.phase][slot.link].pop() {
            return Some(self.transmit_queued(bucket, slot.phase, slot.link, tick, ctx));
        }

        if let Some(frame) = self.retransmit_queue.pop_front() {
            trace!("node {}: retransmit {frame}", self.id);
            return Some(frame);
        }

        self.generate_frame(slot.phase, slot.link, tick, ctx)
    }

    /// Serve the head frame of the bucket just popped from the link queue.
    fn transmit_queued(
        &mut self,
        bucket: BucketId,
        phase: usize,
        link: usize,
        tick: Tick,
        ctx: &NodeCtx,
    ) -> Frame {
        let config = ctx.config;
        self.cur_enqueued[phase][link] -= 1;
        self.cur_buffer_occupancy -= 1;

        let direct = config.shape.direct_bucket();
        let entry = self.buckets[phase][link]
            .get_mut(&bucket)
            .expect("scheduled bucket missing");
        let queued = entry
            .queue
            .pop_front()
            .expect("scheduled bucket has an empty queue");

        if config.use_hbh && bucket != direct {
            assert!(
                entry.outstanding_tokens < config.max_tokens_per_bucket,
                "bucket {bucket} over its token cap"
            );
            entry.outstanding_tokens += 1;
            self.tokens_issued += 1;
        }

        let reschedule =
            entry.outstanding_tokens < config.max_tokens_per_bucket && !entry.queue.is_empty();
        // Torn down the moment nothing is queued and no tokens are out; with
        // tokens outstanding the teardown happens when the last one returns.
        let torn_down = entry.queue.is_empty() && entry.outstanding_tokens == 0;

        // Return the token to whoever fed us this frame, via the link it
        // arrived on.
        if config.use_hbh {
            if let Some(owed) = queued.return_bucket {
                self.token_queue[queued.sender_phase][queued.sender_link].push_back(owed);
            }
        }

        if reschedule {
            self.enqueue_bucket_for_sending(bucket, phase, link);
        }
        if torn_down {
            self.buckets[phase][link].remove(&bucket);
        }

        let mut frame = queued.frame;
        frame.timestamps[frame.hops] = tick;
        frame
    }

    /// Round-robin the active flows for one that can emit a frame, honouring
    /// the credit, budget and first-hop token gates.
    fn generate_frame(
        &mut self,
        phase: usize,
        link: usize,
        tick: Tick,
        ctx: &NodeCtx,
    ) -> Option<Frame> {
        let config = ctx.config;
        let count = self.active_flows.len();
        if count == 0 {
            return None;
        }

        let mut cursor = self.cursors[phase][link];
        if cursor >= count {
            cursor = 0;
        }

        for _ in 0..count {
            let (dest, credit, budget) = {
                let flow = &self.active_flows[cursor];
                (flow.dest, flow.credit, flow.budget)
            };

            if config.use_fsr() && credit < 1.0 {
                cursor = (cursor + 1) % count;
                continue;
            }
            if config.use_rd && budget < 1 {
                cursor = (cursor + 1) % count;
                continue;
            }

            // First-hop token accounting; sending straight to the
            // destination needs no token.
            if config.use_hbh && config.shape.neighbour(self.id, phase, link) != dest {
                let key = config.shape.bucket_of(dest, config.shape.num_phases() - 1);
                if !self.buckets[phase][link].contains_key(&key) {
                    self.note_bucket_allocated(key);
                }
                let entry = self.buckets[phase][link].entry(key).or_default();
                if entry.outstanding_tokens == config.max_tokens_firsthop_bucket {
                    cursor = (cursor + 1) % count;
                    continue;
                }
                entry.outstanding_tokens += 1;
                self.tokens_issued += 1;
            }

            let flow = &mut self.active_flows[cursor];
            let flow_length = if config.quantized_prio {
                flow.quantized_num_frames
            } else {
                flow.num_frames
            };
            let frame = Frame::generate(
                self.id,
                dest,
                flow.flow_id,
                flow.frames_sent(),
                flow_length,
                tick,
            );

            self.sent_frames += 1;
            flow.remain_frames -= 1;
            if config.use_fsr() {
                flow.credit -= 1.0;
            }
            if config.use_rd {
                flow.budget -= 1;
            }

            if flow.remain_frames == 0 {
                ctx.counters.flow_deactivated(dest);
                let finished = self.active_flows.remove(cursor);
                debug!("node {}: flow f-{} fully sent", self.id, finished.flow_id);
                self.finished_flows.push(finished);
                self.cursors[phase][link] = cursor;
                self.retire_cursor_slot(cursor);
            } else {
                self.cursors[phase][link] = cursor + 1;
            }
            return Some(frame);
        }
        None
    }

    /// Adjust every round-robin cursor for the removal of the active flow at
    /// `removed`: cursors past it slide down one; a cursor on it now points
    /// at its successor.
    fn retire_cursor_slot(&mut self, removed: usize) {
        for row in &mut self.cursors {
            for cursor in row.iter_mut() {
                if *cursor > removed {
                    *cursor -= 1;
                }
            }
        }
    }

    /// Consume the frame (if any) arriving on the active link this tick.
    pub fn receive_frame(&mut self, tick: Tick, ctx: &NodeCtx, received: Option<Frame>) {
        if self.failed {
            return;
        }
        let Some(mut frame) = received else {
            return;
        };
        let config = ctx.config;
        let slot = config.shape.slot(tick);

        frame.hops += 1;

        if frame.dest == self.id {
            self.receive_frame_destined(tick, ctx, &frame);
            return;
        }

        let rem_spray = config.shape.num_phases().saturating_sub(frame.hops);
        let queued = QueuedFrame {
            return_bucket: Some(config.shape.bucket_of(frame.dest, rem_spray)),
            sender_phase: slot.phase,
            sender_link: config.shape.mirror_link(slot.link),
            priority: priority_key(config, frame.flow_length, tick),
            frame,
        };

        if queued.frame.hops >= config.shape.num_phases() {
            self.forward_deterministic(slot, ctx, queued);
        } else {
            self.forward_sprayed(slot, ctx, queued);
        }
    }

    /// A frame for this node: account delivery, complete the flow or ask for
    /// more under receiver-driven transport.
    fn receive_frame_destined(&mut self, tick: Tick, ctx: &NodeCtx, frame: &Frame) {
        let config = ctx.config;
        ctx.counters.note_frame_delivered();

        let flow = self
            .recv_flows
            .get_mut(&frame.flow_id)
            .unwrap_or_else(|| panic!("node {}: frame for unknown flow {frame}", self.id));
        flow.remain_frames -= 1;

        if flow.remain_frames == 0 {
            let duration = tick - flow.start_tick + config.prop_delay_ts as Tick + 1;
            ctx.counters.note_flow_completed();
            ctx.fct.record(FctRecord {
                flow_id: flow.flow_id,
                num_frames: flow.num_frames,
                duration,
                start_tick: flow.start_tick,
            });
            debug!(
                "node {}: flow f-{} complete in {duration} ticks",
                self.id, flow.flow_id
            );
        } else if config.use_rd && flow.frames_sent() % config.rd_cells_per_pull == 0 {
            // `frames_sent` counts deliveries on the receive side.
            let pull = RdControl {
                kind: RdControlKind::Pull,
                src: self.id,
                dest: flow.source,
                hops: 0,
                sequence_num: 0,
                flow_id: flow.flow_id,
            };
            self.local_rdc_queue.push_back(pull);
        }
    }

    // Statistics accessors, consumed by the fabric's snapshot surface.

    #[must_use]
    pub fn cur_enqueued_frames(&self, phase: usize, link: usize) -> u32 {
        self.cur_enqueued[phase][link]
    }

    #[must_use]
    pub fn max_enqueued_frames(&self, phase: usize, link: usize) -> u32 {
        self.max_enqueued[phase][link]
    }

    #[must_use]
    pub fn max_send_queue_length(&self, phase: usize, link: usize) -> usize {
        self.max_send_queue_len[phase][link]
    }

    #[must_use]
    pub fn cur_send_queue_length(&self, phase: usize, link: usize) -> usize {
        self.send_queue[phase][link].len()
    }

    #[must_use]
    pub fn cur_buffer_occupancy(&self) -> u32 {
        self.cur_buffer_occupancy
    }

    #[must_use]
    pub fn max_buffer_occupancy(&self) -> u32 {
        self.max_buffer_occupancy
    }

    #[must_use]
    pub fn cur_buckets_in_use(&self) -> u32 {
        self.cur_buckets_in_use
    }

    #[must_use]
    pub fn max_buckets_in_use(&self) -> u32 {
        self.max_buckets_in_use
    }

    #[must_use]
    pub fn sent_frames(&self) -> u64 {
        self.sent_frames
    }

    #[must_use]
    pub fn trimmed_frames(&self) -> u64 {
        self.trimmed_frames
    }

    #[must_use]
    pub fn tokens_issued(&self) -> u64 {
        self.tokens_issued
    }

    #[must_use]
    pub fn tokens_returned(&self) -> u64 {
        self.tokens_returned
    }

    /// True once every bucket on every link has been torn down.
    #[must_use]
    pub fn buckets_drained(&self) -> bool {
        self.buckets.iter().all(|row| row.iter().all(BTreeMap::is_empty))
    }

    /// Receive-side flows that started but did not finish, as of `tick`.
    #[must_use]
    pub fn incomplete_recv_flows(&self, tick: Tick, prop_delay_ts: usize) -> Vec<FlowProgress> {
        if self.failed {
            return Vec::new();
        }
        self.recv_flows
            .values()
            .filter(|flow| flow.remain_frames > 0 && flow.remain_frames < flow.num_frames)
            .map(|flow| FlowProgress {
                flow_id: flow.flow_id,
                frames_delivered: flow.num_frames - flow.remain_frames,
                elapsed: tick.saturating_sub(flow.start_tick) + prop_delay_ts as Tick + 1,
                num_frames: flow.num_frames,
            })
            .collect()
    }
}
