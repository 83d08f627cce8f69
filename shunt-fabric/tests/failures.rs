// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Failure isolation: a failed node is unreachable by construction, and
//! traffic between healthy nodes still flows and conserves.

mod common;

use shunt_fabric::{Fabric, RunLimits};
use shunt_topology::NodeId;

#[test]
fn failing_a_node_flags_every_neighbour_link() {
    let mut fabric = Fabric::new(common::config(3, 3), Box::new(shunt_node::NullSink)).unwrap();
    let shape = fabric.config().shape;
    let victim = NodeId(13);

    fabric.fail(victim);

    assert!(fabric.node(victim).is_failed());
    for phase in 0..shape.num_phases() {
        for link in 0..shape.links_per_phase() {
            let neighbour = shape.neighbour(victim, phase, link);
            let mirrored = shape.mirror_link(link);
            assert!(
                fabric.node(neighbour).link_failed(phase, mirrored),
                "link ({phase},{mirrored}) of {neighbour} should point at the failed node"
            );
        }
    }
}

#[test]
fn healthy_traffic_routes_around_the_failure() {
    let sink = common::memory_sink();
    let mut fabric = Fabric::new(common::config(3, 4), Box::new(sink.clone())).unwrap();
    let node_count = fabric.config().shape.max_node_id();
    let victim = NodeId(13);
    fabric.fail(victim);

    // Flows between every healthy pair in a sample, never naming the victim.
    let mut id = 0;
    for index in 0..16 {
        let source = (index * 3 + 2) % node_count;
        let dest = (index * 7 + 5) % node_count;
        if source == dest || source == victim.index() || dest == victim.index() {
            continue;
        }
        fabric.add_flow(common::flow(id, source, dest, 2, (index * 3) as u64));
        id += 1;
    }
    let loaded = fabric.flows_loaded();
    assert!(loaded > 8);

    let report = fabric.run(RunLimits {
        max_ticks: 100_000,
        ..RunLimits::default()
    });

    // Every flow completes: spraying skips links into the victim, and the
    // final spray hop refuses candidates whose deterministic remainder
    // crosses it. Delivery is conserved despite the failure.
    assert_eq!(report.completed_flows, loaded);
    assert_eq!(sink.records().len(), loaded);

    // The victim took part in nothing.
    assert_eq!(fabric.node(victim).sent_frames(), 0);
    assert_eq!(fabric.node(victim).cur_buffer_occupancy(), 0);
}

#[test]
fn evenly_spread_failures_still_leave_a_working_fabric() {
    let sink = common::memory_sink();
    let mut fabric = Fabric::new(common::config(2, 4), Box::new(sink.clone())).unwrap();
    fabric.fail_evenly(3);

    let failed: Vec<usize> = fabric
        .nodes()
        .iter()
        .filter(|node| node.is_failed())
        .map(|node| node.id().index())
        .collect();
    assert_eq!(failed.len(), 3);

    let node_count = fabric.config().shape.max_node_id();
    let mut id = 0;
    for source in 0..node_count {
        if failed.contains(&source) {
            continue;
        }
        let dest = (source + 5) % node_count;
        if dest == source || failed.contains(&dest) {
            continue;
        }
        fabric.add_flow(common::flow(id, source, dest, 1, 0));
        id += 1;
    }
    let loaded = fabric.flows_loaded();

    let report = fabric.run(RunLimits {
        max_ticks: 100_000,
        ..RunLimits::default()
    });
    assert_eq!(report.completed_flows, loaded);
}
