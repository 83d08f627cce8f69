// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Delivery conservation: with no congestion control and no failures, every
//! generated frame is delivered and every flow completes.

mod common;

use shunt_fabric::{Fabric, RunLimits};

#[test]
fn every_frame_is_delivered() {
    let sink = common::memory_sink();
    let mut fabric = Fabric::new(common::config(3, 3), Box::new(sink.clone())).unwrap();

    let flows = common::spread_flows(fabric.config().shape.max_node_id(), 20, 3);
    let total_frames: u64 = flows.iter().map(|flow| u64::from(flow.num_frames)).sum();
    for flow in flows {
        fabric.add_flow(flow);
    }

    let report = fabric.run(RunLimits {
        max_ticks: 100_000,
        ..RunLimits::default()
    });

    assert_eq!(report.completed_flows, 20);
    assert_eq!(report.frames_delivered, total_frames);

    // Exactly one completion record per flow.
    let mut records = sink.records();
    assert_eq!(records.len(), 20);
    records.sort_by_key(|record| record.flow_id);
    for (id, record) in records.iter().enumerate() {
        assert_eq!(record.flow_id, id as u64);
        assert!(record.duration > 0);
    }

    // Nothing left parked anywhere.
    assert!(fabric.incomplete_flows(report.last_tick).is_empty());
    assert_eq!(fabric.total_trimmed_frames(), 0);
}

#[test]
fn shortest_queue_spraying_also_conserves() {
    let mut config = common::config(2, 4);
    config.spray = shunt_node::SprayPolicy::ShortestQueue { bucket_aware: false };
    let sink = common::memory_sink();
    let mut fabric = Fabric::new(config, Box::new(sink.clone())).unwrap();

    let flows = common::spread_flows(fabric.config().shape.max_node_id(), 12, 4);
    let total_frames: u64 = flows.iter().map(|flow| u64::from(flow.num_frames)).sum();
    for flow in flows {
        fabric.add_flow(flow);
    }

    let report = fabric.run(RunLimits {
        max_ticks: 100_000,
        ..RunLimits::default()
    });

    assert_eq!(report.completed_flows, 12);
    assert_eq!(report.frames_delivered, total_frames);
    assert_eq!(sink.records().len(), 12);
}

#[test]
fn propagation_delay_shows_up_in_the_completion_time() {
    let mut config = common::config(2, 4);
    config.prop_delay_ts = 3;
    let sink = common::memory_sink();
    let mut fabric = Fabric::new(config, Box::new(sink.clone())).unwrap();

    fabric.add_flow(common::flow(0, 0, 5, 1, 0));
    let report = fabric.run(RunLimits::default());

    assert_eq!(report.completed_flows, 1);
    let records = sink.records();
    assert_eq!(records.len(), 1);
    // Duration includes the final propagation delay plus one.
    assert!(records[0].duration >= 3 + 1);
}
