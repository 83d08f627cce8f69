// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The token-bucket flow-control engine.
//!
//! Each link keeps a map from [`BucketId`] to a [`Bucket`]: an
//! outstanding-token counter plus a FIFO of frames awaiting transmission on
//! that link. A frame can always be appended (subject only to the
//! receiver-driven depth cap); the bucket is *sendable* — present in the
//! link's [`PriorityLinkQueue`](crate::link_queue::PriorityLinkQueue) — only
//! while it has token headroom. The reserved direct-to-destination bucket
//! needs no tokens and is always sendable.
//!
//! Invariants, fatal on violation:
//! - a bucket's outstanding-token count never exceeds its class cap;
//! - a sendable bucket with queued frames appears exactly once in the link
//!   queue;
//! - a token is only ever returned for a bucket with tokens outstanding.

use std::collections::VecDeque;

use log::trace;
use shunt_protocols::{Frame, RdControl, RdControlKind, TokenBatch};
use shunt_topology::{BucketId, Tick};

use crate::ctx::NodeCtx;
use crate::link_queue::Priority;
use crate::node::Node;

/// A frame parked on a link, with everything needed to schedule it and to
/// return a token upstream once it leaves.
#[derive(Clone, Debug)]
pub struct QueuedFrame {
    pub frame: Frame,
    /// The (phase, link) pointing back at whoever delivered the frame.
    pub sender_phase: usize,
    pub sender_link: usize,
    /// Token owed upstream when this frame is transmitted; `None` only for
    /// frames that never consumed an upstream token.
    pub return_bucket: Option<BucketId>,
    pub priority: Priority,
}

/// Per-(link, bucket) flow-control state.
#[derive(Clone, Debug, Default)]
pub struct Bucket {
    pub outstanding_tokens: u32,
    pub queue: VecDeque<QueuedFrame>,
}

impl Node {
    /// Admit a routed frame onto the chosen link, or trim it under the
    /// receiver-driven depth cap.
    ///
    /// This is the common admission step both routing regimes converge on.
    /// Token *spending* happens at transmission time, so the path is the
    /// same whether or not hop-by-hop flow control is enabled.
    pub(crate) fn await_token(
        &mut self,
        queued: QueuedFrame,
        send_phase: usize,
        send_link: usize,
        ctx: &NodeCtx,
    ) {
        let config = ctx.config;
        assert!(
            !self.link_failed[send_phase][send_link],
            "node {}: admission to failed link ({send_phase},{send_link})",
            self.id()
        );

        if config.use_rd
            && config.rd_max_queue_length > 0
            && self.cur_enqueued[send_phase][send_link] >= config.rd_max_queue_length
        {
            let frame = &queued.frame;
            trace!("node {}: trim {frame}, queue ({send_phase},{send_link}) full", self.id());
            self.trimmed_frames += 1;
            self.rdc_send_queue[send_phase][send_link].push_back(RdControl {
                kind: RdControlKind::Drop,
                src: frame.src,
                dest: frame.dest,
                hops: frame.hops,
                sequence_num: frame.sequence_num,
                flow_id: frame.flow_id,
            });
            return;
        }

        self.cur_enqueued[send_phase][send_link] += 1;
        if self.cur_enqueued[send_phase][send_link] > self.max_enqueued[send_phase][send_link] {
            self.max_enqueued[send_phase][send_link] = self.cur_enqueued[send_phase][send_link];
        }
        self.cur_buffer_occupancy += 1;
        if self.cur_buffer_occupancy > self.max_buffer_occupancy {
            self.max_buffer_occupancy = self.cur_buffer_occupancy;
        }

        let rem_spray = config.shape.num_phases().saturating_sub(queued.frame.hops + 1);
        let mut bucket = config.shape.bucket_of(queued.frame.dest, rem_spray);
        if config.shape.neighbour(self.id(), send_phase, send_link) == queued.frame.dest {
            // No token is needed to reach the destination itself.
            bucket = config.shape.direct_bucket();
        } else if config.use_hbh && !self.buckets[send_phase][send_link].contains_key(&bucket) {
            self.note_bucket_allocated(bucket);
        }

        let entry = self.buckets[send_phase][send_link]
            .entry(bucket)
            .or_default();
        entry.queue.push_back(queued);

        // A pushed frame only becomes the bucket head when the queue was
        // empty, so an existing link-queue entry never needs re-keying here.
        let sendable = bucket == config.shape.direct_bucket()
            || entry.outstanding_tokens < config.max_tokens_per_bucket;
        if sendable && entry.queue.len() == 1 {
            self.enqueue_bucket_for_sending(bucket, send_phase, send_link);
        }
    }

    /// Put a bucket (back) into the link's priority queue, keyed by its head
    /// frame.
    pub(crate) fn enqueue_bucket_for_sending(
        &mut self,
        bucket: BucketId,
        send_phase: usize,
        send_link: usize,
    ) {
        let priority = self.buckets[send_phase][send_link][&bucket]
            .queue
            .front()
            .expect("bucket scheduled with an empty queue")
            .priority;
        self.send_queue[send_phase][send_link].push(priority, bucket);

        let len = self.send_queue[send_phase][send_link].len();
        if len > self.max_send_queue_len[send_phase][send_link] {
            self.max_send_queue_len[send_phase][send_link] = len;
        }
    }

    /// Account a bucket key gaining its first queue residency on some link.
    pub(crate) fn note_bucket_allocated(&mut self, bucket: BucketId) {
        let count = self.buckets_in_use.entry(bucket).or_insert(0);
        if *count == 0 {
            self.cur_buckets_in_use += 1;
            if self.cur_buckets_in_use > self.max_buckets_in_use {
                self.max_buckets_in_use = self.cur_buckets_in_use;
            }
        }
        *count += 1;
    }

    /// Account a bucket being torn down on some link.
    pub(crate) fn note_bucket_released(&mut self, bucket: BucketId) {
        let count = self
            .buckets_in_use
            .get_mut(&bucket)
            .expect("released bucket was never allocated");
        *count -= 1;
        if *count == 0 {
            self.buckets_in_use.remove(&bucket);
            self.cur_buckets_in_use -= 1;
        }
    }

    /// Emit the tick's token-return batch for the active link, padded with
    /// empty slots when fewer tokens are owed.
    pub fn send_token_batch(&mut self, tick: Tick, ctx: &NodeCtx) -> TokenBatch {
        let slot = ctx.config.shape.slot(tick);
        let mut batch = TokenBatch::empty();
        if self.is_failed() {
            return batch;
        }
        for token in batch.tokens.iter_mut() {
            *token = self.token_queue[slot.phase][slot.link].pop_front();
        }
        batch
    }

    /// Apply a batch of returned tokens.
    ///
    /// Tokens arriving on the active link concern buckets of the *mirrored*
    /// link (the one this node sends to the batch's sender on). A returned
    /// token can make its bucket newly sendable, and a bucket with no queue
    /// and no outstanding tokens is torn down.
    pub fn receive_token_batch(&mut self, tick: Tick, ctx: &NodeCtx, batch: TokenBatch) {
        if self.is_failed() {
            return;
        }
        let config = ctx.config;
        let slot = config.shape.slot(tick);
        let corr_link = config.shape.mirror_link(slot.link);

        for bucket in batch.tokens.into_iter().flatten() {
            let entry = self.buckets[slot.phase][corr_link]
                .get_mut(&bucket)
                .unwrap_or_else(|| panic!("token returned for unknown bucket {bucket}"));
            assert!(
                entry.outstanding_tokens > 0,
                "token return underflow for bucket {bucket}"
            );
            entry.outstanding_tokens -= 1;
            self.tokens_returned += 1;

            let newly_sendable = entry.outstanding_tokens == config.max_tokens_per_bucket - 1
                && !entry.queue.is_empty();
            let torn_down = entry.outstanding_tokens == 0 && entry.queue.is_empty();

            if newly_sendable {
                self.enqueue_bucket_for_sending(bucket, slot.phase, corr_link);
            }
            if torn_down {
                self.buckets[slot.phase][corr_link].remove(&bucket);
                self.note_bucket_released(bucket);
            }
        }
    }
}
