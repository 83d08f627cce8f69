// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use shunt_node::{MemorySink, SimConfig};
use shunt_protocols::Flow;
use shunt_topology::{NodeId, Shape, Tick};

pub fn config(num_phases: usize, nodes_per_phase: usize) -> SimConfig {
    let mut config = SimConfig::new(Shape::new(num_phases, nodes_per_phase));
    config.seed = 42;
    config
}

pub fn flow(id: u64, source: usize, dest: usize, frames: u32, start_tick: Tick) -> Flow {
    Flow::new(
        id,
        NodeId::from(source),
        NodeId::from(dest),
        frames,
        frames,
        start_tick,
    )
}

/// A spread of flows between distinct healthy pairs, with staggered starts.
pub fn spread_flows(node_count: usize, count: usize, frames: u32) -> Vec<Flow> {
    (0..count)
        .map(|index| {
            let source = (index * 5 + 1) % node_count;
            let mut dest = (index * 11 + 7) % node_count;
            if dest == source {
                dest = (dest + 1) % node_count;
            }
            flow(
                index as u64,
                source,
                dest,
                frames + (index % 3) as u32,
                (index * 2) as Tick,
            )
        })
        .collect()
}

/// A shared in-memory sink: hand the clone to the fabric, keep the original
/// to inspect the records afterwards.
pub fn memory_sink() -> std::sync::Arc<MemorySink> {
    std::sync::Arc::new(MemorySink::new())
}
