// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Parsing and unit conversion of workload files.

use std::io::BufRead;

use log::{debug, warn};
use shunt_protocols::types::SimError;
use shunt_protocols::{Flow, sim_error};
use shunt_topology::{NodeId, Shape, Tick};

use crate::quantize::Quantizer;

/// Unit conversions and filters applied while reading a workload.
#[derive(Clone, Debug)]
pub struct WorkloadConfig {
    /// Frame payload, in bytes.
    pub payload_length: u32,
    /// Timeslot length, in seconds (including guard band).
    pub slot_length: f64,
    /// Start times are divided by this to adjust offered load.
    pub load_factor: f64,
    /// Byte lengths are multiplied by this before framing.
    pub flow_size_multiplier: f64,
    /// Ignore flows shorter than this many bytes; zero disables.
    pub min_flow_size: u64,
    /// Ignore flows longer than this many bytes; zero disables.
    pub max_flow_size: u64,
    /// Stop after reading this many flows; zero disables.
    pub max_flows_read: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            payload_length: 52,
            slot_length: 5.632e-9,
            load_factor: 1.0,
            flow_size_multiplier: 1.0,
            min_flow_size: 0,
            max_flow_size: 0,
            max_flows_read: 0,
        }
    }
}

/// Map workload node indices onto the physical ids of healthy nodes.
///
/// Workloads are generated against a contiguous index space; failed nodes
/// must not appear in them, so index `i` resolves to the `i`-th non-failed
/// physical node.
#[must_use]
pub fn translation_table(shape: Shape, failed: &[bool]) -> Vec<NodeId> {
    (0..shape.max_node_id())
        .filter(|&index| !failed[index])
        .map(NodeId::from)
        .collect()
}

/// Read flow records, resolving node indices through `table` and converting
/// bytes and seconds into frames and ticks.
///
/// Reading stops at end of input, at the configured flow cap, or at the
/// first record with a negative start time.
pub fn read_flows(
    input: impl BufRead,
    config: &WorkloadConfig,
    quantizer: &Quantizer,
    table: &[NodeId],
) -> Result<Vec<Flow>, SimError> {
    let mut flows = Vec::new();

    for (line_number, line) in input.lines().enumerate() {
        if config.max_flows_read > 0 && flows.len() >= config.max_flows_read {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record = parse_line(&line, line_number + 1)?;

        if record.byte_length < config.min_flow_size {
            continue;
        }
        if config.max_flow_size > 0 && record.byte_length > config.max_flow_size {
            continue;
        }

        let source = *table.get(record.source_index).ok_or_else(|| {
            SimError(format!(
                "line {}: source index {} outside the healthy-node table",
                line_number + 1,
                record.source_index
            ))
        })?;
        let dest = *table.get(record.dest_index).ok_or_else(|| {
            SimError(format!(
                "line {}: dest index {} outside the healthy-node table",
                line_number + 1,
                record.dest_index
            ))
        })?;

        let scaled_bytes = (record.byte_length as f64 * config.flow_size_multiplier) as u64;
        let num_frames = scaled_bytes.div_ceil(u64::from(config.payload_length)) as u32;

        let start_seconds = record.start_time / config.load_factor;
        let start_tick = start_seconds / config.slot_length;
        if start_tick < 0.0 {
            warn!(
                "line {}: negative start time, ignoring the rest of the workload",
                line_number + 1
            );
            break;
        }

        flows.push(Flow::new(
            record.flow_id,
            source,
            dest,
            num_frames,
            quantizer.quantize(num_frames),
            start_tick as Tick,
        ));
    }

    debug!("workload: {} flows read", flows.len());
    Ok(flows)
}

struct Record {
    flow_id: u64,
    source_index: usize,
    dest_index: usize,
    byte_length: u64,
    start_time: f64,
}

fn parse_line(line: &str, line_number: usize) -> Result<Record, SimError> {
    let cleaned = line.replace(',', " ");
    let mut fields = cleaned.split_whitespace();

    Ok(Record {
        flow_id: parse(next_field(&mut fields, "flow_id", line_number)?, "flow_id", line_number)?,
        source_index: parse(next_field(&mut fields, "source", line_number)?, "source", line_number)?,
        dest_index: parse(next_field(&mut fields, "dest", line_number)?, "dest", line_number)?,
        byte_length: parse(next_field(&mut fields, "length", line_number)?, "length", line_number)?,
        start_time: parse(
            next_field(&mut fields, "start_time", line_number)?,
            "start_time",
            line_number,
        )?,
    })
}

fn next_field<'a>(
    fields: &mut std::str::SplitWhitespace<'a>,
    name: &str,
    line_number: usize,
) -> Result<&'a str, SimError> {
    match fields.next() {
        Some(field) => Ok(field),
        None => sim_error!(format!("line {line_number}: missing field '{name}'")),
    }
}

fn parse<T: std::str::FromStr>(
    field: &str,
    name: &str,
    line_number: usize,
) -> Result<T, SimError> {
    match field.parse() {
        Ok(value) => Ok(value),
        Err(_) => sim_error!(format!("line {line_number}: bad {name} '{field}'")),
    }
}
