// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Receiver-driven transport under a tight queue cap: trimmed frames go
//! through the DROP -> NACK -> retransmit cycle and every frame is still
//! delivered exactly once.

mod common;

use shunt_fabric::{Fabric, RunLimits};

#[test]
fn trimmed_frames_are_retransmitted_exactly_once() {
    let mut config = common::config(2, 4);
    config.use_rd = true;
    config.rd_max_queue_length = 1;
    config.rd_cells_per_pull = 4;

    let sink = common::memory_sink();
    let mut fabric = Fabric::new(config, Box::new(sink.clone())).unwrap();

    // A three-way incast saturating the links toward node 0.
    for (id, source) in [1usize, 2, 6].into_iter().enumerate() {
        fabric.add_flow(common::flow(id as u64, source, 0, 30, 0));
    }

    let report = fabric.run(RunLimits {
        max_ticks: 500_000,
        ..RunLimits::default()
    });

    // Trimming must actually have happened for this test to mean anything.
    assert!(
        fabric.total_trimmed_frames() > 0,
        "queue cap of one never trimmed a frame"
    );

    // Every trimmed frame was regenerated and delivered exactly once: the
    // delivered total is exactly the workload size, with no duplicates and
    // no losses.
    assert_eq!(report.completed_flows, 3);
    assert_eq!(report.frames_delivered, 90);

    let mut records = sink.records();
    records.sort_by_key(|record| record.flow_id);
    assert_eq!(records.len(), 3);
    for record in records {
        assert_eq!(record.num_frames, 30);
    }
}

#[test]
fn pulls_replenish_the_budget_end_to_end() {
    let mut config = common::config(2, 4);
    config.use_rd = true;
    // A starting budget smaller than the flow forces at least one PULL
    // round trip before the flow can finish.
    config.rd_starting_budget = 5;
    config.rd_cells_per_pull = 5;

    let sink = common::memory_sink();
    let mut fabric = Fabric::new(config, Box::new(sink.clone())).unwrap();
    fabric.add_flow(common::flow(0, 3, 12, 25, 0));

    let report = fabric.run(RunLimits {
        max_ticks: 500_000,
        ..RunLimits::default()
    });

    assert_eq!(report.completed_flows, 1);
    assert_eq!(report.frames_delivered, 25);
}
