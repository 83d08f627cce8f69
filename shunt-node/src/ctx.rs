// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The shared context handed to every per-tick node operation.
//!
//! Nodes own all their mutable state; the only cross-node state is the
//! monotonic counter set in [`SharedCounters`] and the append-only
//! flow-completion sink behind [`FctSink`]. Both are updated with plain
//! atomic/mutex operations and require no ordering beyond atomicity, so
//! every access uses `Relaxed`.

use std::sync::Mutex;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize};

use shunt_protocols::FctRecord;
use shunt_topology::NodeId;

use crate::config::SimConfig;

/// Process-wide monotonic counters.
pub struct SharedCounters {
    completed_flows: AtomicUsize,
    frames_delivered: AtomicU64,
    /// Flows currently active per destination; drives fair-sending-rate
    /// credit division.
    active_flows_with_dest: Vec<AtomicU32>,
}

impl SharedCounters {
    #[must_use]
    pub fn new(max_node_id: usize) -> Self {
        Self {
            completed_flows: AtomicUsize::new(0),
            frames_delivered: AtomicU64::new(0),
            active_flows_with_dest: (0..max_node_id).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn note_flow_completed(&self) {
        self.completed_flows.fetch_add(1, Relaxed);
    }

    #[must_use]
    pub fn completed_flows(&self) -> usize {
        self.completed_flows.load(Relaxed)
    }

    pub fn note_frame_delivered(&self) {
        self.frames_delivered.fetch_add(1, Relaxed);
    }

    #[must_use]
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Relaxed)
    }

    pub fn flow_activated(&self, dest: NodeId) {
        self.active_flows_with_dest[dest.index()].fetch_add(1, Relaxed);
    }

    pub fn flow_deactivated(&self, dest: NodeId) {
        let previous = self.active_flows_with_dest[dest.index()].fetch_sub(1, Relaxed);
        debug_assert!(previous > 0, "active-flow count underflow for {dest}");
    }

    #[must_use]
    pub fn active_with_dest(&self, dest: NodeId) -> u32 {
        self.active_flows_with_dest[dest.index()].load(Relaxed)
    }
}

/// Receives the flow-completion event stream, exactly one record per
/// completed flow, in delivery order.
pub trait FctSink: Send + Sync {
    fn record(&self, record: FctRecord);
}

impl<T: FctSink + ?Sized> FctSink for std::sync::Arc<T> {
    fn record(&self, record: FctRecord) {
        (**self).record(record);
    }
}

/// A sink that does nothing.
///
/// This can be useful for runs that only want the aggregate counters.
pub struct NullSink;

impl FctSink for NullSink {
    fn record(&self, _record: FctRecord) {}
}

/// A sink that keeps every record in memory, for tests and reports.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<FctRecord>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<FctRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl FctSink for MemorySink {
    fn record(&self, record: FctRecord) {
        self.records.lock().unwrap().push(record);
    }
}

/// Borrowed handles a node needs while executing one phase of one tick.
#[derive(Copy, Clone)]
pub struct NodeCtx<'a> {
    pub config: &'a SimConfig,
    pub counters: &'a SharedCounters,
    /// Which nodes are failed, fixed before the run starts.
    pub failed: &'a [bool],
    pub fct: &'a dyn FctSink,
}
