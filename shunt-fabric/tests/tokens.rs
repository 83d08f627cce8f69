// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Token conservation under hop-by-hop flow control: caps are honoured
//! throughout the run (asserted inline by the engine), every issued token is
//! eventually returned, and drained buckets are torn down.

mod common;

use shunt_fabric::{Fabric, RunLimits};
use shunt_topology::Tick;

fn run_hbh(prop_delay_ts: usize, firsthop_tokens: u32) {
    let mut config = common::config(2, 4);
    config.use_hbh = true;
    config.max_tokens_per_bucket = 1;
    config.max_tokens_firsthop_bucket = firsthop_tokens;
    config.prop_delay_ts = prop_delay_ts;

    let sink = common::memory_sink();
    let mut fabric = Fabric::new(config, Box::new(sink.clone())).unwrap();

    let flows = common::spread_flows(fabric.config().shape.max_node_id(), 10, 6);
    let total_frames: u64 = flows.iter().map(|flow| u64::from(flow.num_frames)).sum();
    for flow in flows {
        fabric.add_flow(flow);
    }

    let report = fabric.run(RunLimits {
        max_ticks: 200_000,
        ..RunLimits::default()
    });
    assert_eq!(report.completed_flows, 10);
    assert_eq!(report.frames_delivered, total_frames);

    // The run stops the moment the last flow completes; keep ticking so the
    // token returns still in flight can land and tear their buckets down.
    let mut tick = report.last_tick + prop_delay_ts as Tick;
    let mut budget = 10_000;
    while !fabric.buckets_drained() && budget > 0 {
        fabric.tick(tick);
        tick += 1;
        budget -= 1;
    }

    assert!(fabric.buckets_drained(), "buckets left after drain");
    assert_eq!(
        fabric.total_tokens_issued(),
        fabric.total_tokens_returned(),
        "issued tokens not all returned"
    );
    for node in fabric.nodes() {
        assert_eq!(node.cur_buckets_in_use(), 0);
        assert_eq!(node.cur_buffer_occupancy(), 0);
    }
}

#[test]
fn tokens_all_come_home_with_zero_delay() {
    run_hbh(0, 2);
}

#[test]
fn tokens_all_come_home_with_propagation_delay() {
    run_hbh(2, 4);
}

#[test]
fn bucket_aware_spraying_composes_with_tokens() {
    let mut config = common::config(2, 4);
    config.use_hbh = true;
    config.max_tokens_per_bucket = 2;
    config.max_tokens_firsthop_bucket = 4;
    config.spray = shunt_node::SprayPolicy::ShortestQueue { bucket_aware: true };

    let sink = common::memory_sink();
    let mut fabric = Fabric::new(config, Box::new(sink.clone())).unwrap();

    let flows = common::spread_flows(fabric.config().shape.max_node_id(), 8, 5);
    let total_frames: u64 = flows.iter().map(|flow| u64::from(flow.num_frames)).sum();
    for flow in flows {
        fabric.add_flow(flow);
    }

    let report = fabric.run(RunLimits {
        max_ticks: 200_000,
        ..RunLimits::default()
    });
    assert_eq!(report.completed_flows, 8);
    assert_eq!(report.frames_delivered, total_frames);
}
