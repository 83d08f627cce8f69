// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! `signalbox` — run a SHUNT simulation from a workload file.
//!
//! Reads a flow list, builds the fabric with the requested transport and
//! congestion-control features, runs it to completion (or to a tick/flow
//! limit), and writes the flow-completion stream plus queue and buffer
//! statistics into the output directory.

mod options;
mod output;

use std::fs::File;
use std::io::BufReader;
use std::time::Instant;

use color_eyre::Result;
use color_eyre::eyre::eyre;
use log::{info, warn};
use shunt_fabric::{Fabric, RunLimits};
use shunt_node::{NullSink, SimConfig, SprayPolicy};
use shunt_topology::Shape;
use shunt_workload::{Quantizer, WorkloadConfig, read_flows, translation_table};

use crate::options::Settings;
use crate::output::CsvSink;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::parse_all_sources()?;
    run(settings)
}

fn run(settings: Settings) -> Result<()> {
    let input = settings
        .input
        .as_ref()
        .ok_or_else(|| eyre!("no workload given; pass --input"))?;

    if settings.timeslot_fraction <= 0.0 || settings.timeslot_fraction > 1.0 {
        return Err(eyre!("timeslot fraction must be in (0, 1]"));
    }
    let slot_length = settings.slot_length / settings.timeslot_fraction;

    let mut propagation_delay = settings.propagation_delay;
    if propagation_delay < 0.0 {
        warn!("negative propagation delay given, using 0 instead");
        propagation_delay = 0.0;
    }
    let prop_delay_ts = (propagation_delay / slot_length).ceil() as usize;

    if settings.num_phases == 0 || settings.num_phases > shunt_topology::MAX_PHASES {
        return Err(eyre!(
            "number of phases must be between 1 and {}",
            shunt_topology::MAX_PHASES
        ));
    }
    let shape = Shape::for_node_count(settings.num_phases, settings.num_nodes);
    info!(
        "fabric: {} phases of {} nodes ({} total), propagation {prop_delay_ts} ticks",
        shape.num_phases(),
        shape.nodes_per_phase(),
        shape.max_node_id()
    );

    let mut config = SimConfig::new(shape);
    config.prop_delay_ts = prop_delay_ts;
    config.use_hbh = settings.hop_by_hop;
    config.max_tokens_per_bucket = settings.tokens_per_bucket;
    config.max_tokens_firsthop_bucket = settings.tokens_per_firsthop_bucket;
    config.total_fsr = settings.fair_sending_rate;
    config.use_rd = settings.receiver_driven;
    config.rd_cells_per_pull = settings.rd_cells_per_pull;
    config.rd_starting_budget = settings.rd_starting_budget;
    config.rd_target_bw_factor = settings.rd_target_bw_fraction;
    config.rd_max_queue_length = settings.rd_max_queue_length;
    config.use_prio = settings.prioritization;
    config.quantized_prio = settings.quantized_prioritization;
    config.prio_factor = settings.prio_factor;
    config.prio_log = settings.prio_log;
    config.spray = if settings.spray_via_shortest {
        SprayPolicy::ShortestQueue {
            bucket_aware: settings.spray_via_shortest_bucket,
        }
    } else {
        SprayPolicy::FirstViable
    };
    config.seed = settings.seed;

    let sink: Box<dyn shunt_node::FctSink> = match &settings.output {
        Some(dir) => {
            output::prepare_output_dir(dir)?;
            Box::new(CsvSink::create(&dir.join("fct.csv"))?)
        }
        None => {
            warn!("no output directory given; no output will be saved");
            Box::new(NullSink)
        }
    };

    let mut fabric = Fabric::new(config, sink).map_err(|err| eyre!(err.to_string()))?;
    if fabric.config().use_rd {
        info!(
            "receiver-driven transport: cells-per-pull = {}, starting-budget = {}, \
             target-bw-fraction = {}, max-queue-length = {}",
            fabric.config().rd_cells_per_pull,
            fabric.config().rd_starting_budget,
            fabric.config().rd_target_bw_factor,
            fabric.config().rd_max_queue_length,
        );
    }

    fabric.fail_evenly(settings.num_failed_nodes);

    let workload_config = WorkloadConfig {
        payload_length: settings.payload_length,
        slot_length,
        load_factor: settings.load_factor_adjust,
        flow_size_multiplier: settings.flow_size_multiplier,
        min_flow_size: settings.min_flow_size,
        max_flow_size: settings.max_flow_size,
        max_flows_read: settings.max_flows_read,
    };
    let table = translation_table(
        shape,
        &fabric
            .nodes()
            .iter()
            .map(shunt_node::Node::is_failed)
            .collect::<Vec<_>>(),
    );
    info!("workload: {input:?}, {} healthy nodes", table.len());

    let reader = BufReader::new(
        File::open(input).map_err(|err| eyre!("could not open {}: {err}", input.display()))?,
    );
    let flows = read_flows(reader, &workload_config, &Quantizer::default(), &table)
        .map_err(|err| eyre!(err.to_string()))?;
    let flow_count = flows.len();
    for flow in flows {
        fabric.add_flow(flow);
    }
    info!("loaded {flow_count} flows");

    let limits = RunLimits {
        max_ticks: match (settings.max_ticks as f64 * settings.timeslot_fraction) as u64 {
            0 => u64::MAX,
            ticks => ticks,
        },
        max_flows: match settings.max_flows {
            0 => usize::MAX,
            flows => flows,
        },
    };

    let started = Instant::now();
    let report = fabric.run(limits);
    let elapsed = started.elapsed().as_secs_f64();

    info!(
        "simulation complete: {} timeslots, {}/{flow_count} flows, {} frames, {elapsed:.3} s",
        report.last_tick, report.completed_flows, report.frames_delivered
    );
    info!("max queue length: {}", fabric.max_queue_length());
    info!("max buffer occupancy: {}", fabric.max_buffer_occupancy());
    if fabric.config().use_hbh {
        info!("max buckets in use: {}", fabric.max_buckets_in_use());
    }

    if let Some(dir) = &settings.output {
        output::write_reports(
            dir,
            &fabric,
            &report,
            settings.payload_length,
            settings.timeslot_fraction,
            elapsed,
        )?;
        info!("reports written to {}", dir.display());
    }
    Ok(())
}
