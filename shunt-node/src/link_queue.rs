// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The priority-ordered send queue of one link.
//!
//! Holds at most one entry per bucket currently eligible to send on the
//! link. The entry with the numerically largest key is served first; keys
//! are encoded (see [`priority_key`]) so that "smallest flow, oldest
//! arrival" wins, realising shortest-flow-first scheduling with a FIFO
//! fallback.

use std::collections::BinaryHeap;

use shunt_topology::{BucketId, Tick};

use crate::config::SimConfig;

/// Scheduling key; larger is served sooner.
pub type Priority = i64;

/// Encode the scheduling key for a frame arriving at `tick`.
///
/// Without prioritization the key is `-tick` (pure arrival order). With it,
/// the flow-length metric is scaled by an epoch so that flow size dominates
/// tick within an epoch and smaller flows win ties deterministically.
#[must_use]
pub fn priority_key(config: &SimConfig, flow_length: u32, tick: Tick) -> Priority {
    if !config.use_prio {
        return -(tick as Priority);
    }
    let metric = if config.prio_log {
        // Retransmitted frames carry a zero length; treat them as the
        // smallest schedulable flow rather than taking log2(0).
        f64::from(flow_length.max(1)).log2()
    } else {
        f64::from(flow_length)
    };
    -((metric * config.shape.epoch_length() as f64 * config.prio_factor) + tick as f64) as Priority
}

/// Priority queue of `(key, bucket)` entries for one `(phase, link)`.
#[derive(Default)]
pub struct PriorityLinkQueue {
    heap: BinaryHeap<(Priority, BucketId)>,
}

impl PriorityLinkQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a bucket. The bucket must not already have a live entry.
    pub fn push(&mut self, priority: Priority, bucket: BucketId) {
        debug_assert!(
            !self.contains(bucket),
            "bucket {bucket} enqueued twice on one link"
        );
        self.heap.push((priority, bucket));
    }

    /// Serve the entry with the largest key.
    pub fn pop(&mut self) -> Option<(Priority, BucketId)> {
        self.heap.pop()
    }

    /// Re-key an existing entry in place; the bucket stays enqueued, only
    /// its priority changes. Rebuilds the heap, which is fine at tick
    /// granularity.
    pub fn update(&mut self, new_priority: Priority, bucket: BucketId) {
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        let entry = entries
            .iter_mut()
            .find(|(_, candidate)| *candidate == bucket)
            .unwrap_or_else(|| panic!("bucket {bucket} re-keyed while not enqueued"));
        entry.0 = new_priority;
        self.heap = BinaryHeap::from(entries);
    }

    #[must_use]
    pub fn contains(&self, bucket: BucketId) -> bool {
        self.heap.iter().any(|(_, candidate)| *candidate == bucket)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shunt_topology::Shape;

    #[test]
    fn largest_key_is_served_first() {
        let mut queue = PriorityLinkQueue::new();
        queue.push(-30, BucketId(1));
        queue.push(-10, BucketId(2));
        queue.push(-20, BucketId(3));
        assert_eq!(queue.pop(), Some((-10, BucketId(2))));
        assert_eq!(queue.pop(), Some((-20, BucketId(3))));
        assert_eq!(queue.pop(), Some((-30, BucketId(1))));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn update_rekeys_in_place() {
        let mut queue = PriorityLinkQueue::new();
        queue.push(-10, BucketId(1));
        queue.push(-20, BucketId(2));
        queue.update(-5, BucketId(2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some((-5, BucketId(2))));
        assert_eq!(queue.pop(), Some((-10, BucketId(1))));
    }

    #[test]
    #[should_panic(expected = "enqueued twice")]
    fn double_enqueue_is_a_programming_error() {
        let mut queue = PriorityLinkQueue::new();
        queue.push(-10, BucketId(1));
        queue.push(-5, BucketId(1));
    }

    #[test]
    #[should_panic(expected = "re-keyed while not enqueued")]
    fn update_of_absent_bucket_is_a_programming_error() {
        let mut queue = PriorityLinkQueue::new();
        queue.update(-5, BucketId(1));
    }

    #[test]
    fn arrival_order_without_prioritization() {
        let config = SimConfig::new(Shape::new(2, 4));
        assert!(priority_key(&config, 1000, 5) > priority_key(&config, 1, 6));
    }

    #[test]
    fn smaller_flows_win_within_an_epoch() {
        let mut config = SimConfig::new(Shape::new(2, 4));
        config.use_prio = true;
        let epoch = config.shape.epoch_length() as Tick;
        // A smaller flow arriving later in the same epoch still wins.
        assert!(priority_key(&config, 2, epoch - 1) > priority_key(&config, 3, 0));
        // Same length: oldest arrival wins.
        assert!(priority_key(&config, 2, 3) > priority_key(&config, 2, 4));
    }

    #[test]
    fn log_metric_compresses_large_flows() {
        let mut config = SimConfig::new(Shape::new(2, 4));
        config.use_prio = true;
        config.prio_log = true;
        // log2(1024) = 10 and log2(2048) = 11: one epoch apart.
        let epoch = config.shape.epoch_length() as Tick;
        assert_eq!(
            priority_key(&config, 1024, 0) - priority_key(&config, 2048, 0),
            epoch as Priority
        );
        // Retransmitted frames (length zero) outrank everything.
        assert!(priority_key(&config, 0, 0) >= priority_key(&config, 1, 0));
    }
}
