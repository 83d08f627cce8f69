// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Command-line and configuration-file options.
//!
//! Options can come from the CLI, from `SHUNT_`-prefixed environment
//! variables, or from a TOML file given with `--conf-file`; where the same
//! option is set in several sources the priority is CLI, then environment,
//! then file, then the built-in default. The merge is done by stacking the
//! sources in a figment, with unset CLI fields skipped during
//! serialization so they never mask a lower-priority source.

use std::path::PathBuf;

use clap::ArgAction;
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Raw CLI arguments; every field optional so the figment merge can tell
/// "not given" from "given the default".
#[derive(Debug, Parser, Serialize)]
#[command(
    name = "signalbox",
    about = "Discrete-time simulator of a slotted multi-phase interconnect"
)]
pub struct Options {
    /// Filename of the workload (test case)
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<PathBuf>,

    /// Path to an additional TOML configuration file
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    conf_file: Option<PathBuf>,

    /// Payload length in bytes
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_length: Option<u32>,

    /// Timeslot length in seconds
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    slot_length: Option<f64>,

    /// Propagation delay in seconds
    #[arg(short = 'd', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    propagation_delay: Option<f64>,

    /// Number of phases (the tuning parameter h)
    #[arg(short = 'l', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    num_phases: Option<usize>,

    /// Total number of nodes to simulate (including failed nodes)
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    num_nodes: Option<usize>,

    /// Maximum number of timeslots to simulate. 0 = unlimited
    #[arg(short = 't', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    max_ticks: Option<u64>,

    /// Maximum number of flows to finish before terminating. 0 = unlimited
    #[arg(short = 'f', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    max_flows: Option<usize>,

    /// Maximum number of flows to read from the input file. 0 = unlimited
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    max_flows_read: Option<usize>,

    /// Number of failed nodes to simulate. The workload must not address
    /// them
    #[arg(short = 'F', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    num_failed_nodes: Option<usize>,

    /// Multiplier by which to adjust flow sizes
    #[arg(short = 'X', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    flow_size_multiplier: Option<f64>,

    /// Value by which to divide flow start times (thus adjusting load)
    #[arg(short = 'L', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    load_factor_adjust: Option<f64>,

    /// Ignore flows with size above this argument. 0 = disabled
    #[arg(short = 'm', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    max_flow_size: Option<u64>,

    /// Ignore flows with size below this argument. 0 = disabled
    #[arg(short = 'M', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    min_flow_size: Option<u64>,

    /// Use hop-by-hop congestion control
    #[arg(short = 'H', long, action = ArgAction::SetTrue)]
    #[serde(skip_serializing_if = "Option::is_none")]
    hop_by_hop: Option<bool>,

    /// Token cap per bucket for hop-by-hop congestion control
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens_per_bucket: Option<u32>,

    /// Token cap for first-hop buckets; clamped up to tokens-per-bucket
    #[arg(short = 'T', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens_per_firsthop_bucket: Option<u32>,

    /// Aggregate fair sending rate limiting incast. 0 = disabled
    #[arg(short = 'R', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    fair_sending_rate: Option<f64>,

    /// Use receiver-driven transport
    #[arg(short = 'N', long, action = ArgAction::SetTrue)]
    #[serde(skip_serializing_if = "Option::is_none")]
    receiver_driven: Option<bool>,

    /// Cells requested each time the receiver sends a PULL
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    rd_cells_per_pull: Option<u32>,

    /// Cells the sender can send before the first PULL. 0 = derive from the
    /// propagation delay and h
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    rd_starting_budget: Option<i64>,

    /// Control-plane request rate as a fraction of line rate
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    rd_target_bw_fraction: Option<f64>,

    /// Maximum queue length before packet trimming. 0 = disabled
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    rd_max_queue_length: Option<u32>,

    /// Use prioritization
    #[arg(short = 'P', long, action = ArgAction::SetTrue)]
    #[serde(skip_serializing_if = "Option::is_none")]
    prioritization: Option<bool>,

    /// Use quantized prioritization
    #[arg(short = 'Q', long, action = ArgAction::SetTrue)]
    #[serde(skip_serializing_if = "Option::is_none")]
    quantized_prioritization: Option<bool>,

    /// Factor by which to multiply flow sizes for prioritization
    #[arg(short = 'x', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    prio_factor: Option<f64>,

    /// Use the log of the flow size for prioritization
    #[arg(long, action = ArgAction::SetTrue)]
    #[serde(skip_serializing_if = "Option::is_none")]
    prio_log: Option<bool>,

    /// Spray via the shortest outgoing queue
    #[arg(short = 'S', long, action = ArgAction::SetTrue)]
    #[serde(skip_serializing_if = "Option::is_none")]
    spray_via_shortest: Option<bool>,

    /// Spray via the queue with the fewest frames waiting in the relevant
    /// bucket, ties broken by overall length (requires -S)
    #[arg(short = 'B', long, action = ArgAction::SetTrue)]
    #[serde(skip_serializing_if = "Option::is_none")]
    spray_via_shortest_bucket: Option<bool>,

    /// For interleaving, fraction of timeslots allocated to this schedule
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    timeslot_fraction: Option<f64>,

    /// Base seed for the per-node spray generators
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

/// Fully resolved settings after the source merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub conf_file: Option<PathBuf>,
    pub payload_length: u32,
    pub slot_length: f64,
    pub propagation_delay: f64,
    pub num_phases: usize,
    pub num_nodes: usize,
    pub max_ticks: u64,
    pub max_flows: usize,
    pub max_flows_read: usize,
    pub num_failed_nodes: usize,
    pub flow_size_multiplier: f64,
    pub load_factor_adjust: f64,
    pub max_flow_size: u64,
    pub min_flow_size: u64,
    pub hop_by_hop: bool,
    pub tokens_per_bucket: u32,
    pub tokens_per_firsthop_bucket: u32,
    pub fair_sending_rate: f64,
    pub receiver_driven: bool,
    pub rd_cells_per_pull: u32,
    pub rd_starting_budget: i64,
    pub rd_target_bw_fraction: f64,
    pub rd_max_queue_length: u32,
    pub prioritization: bool,
    pub quantized_prioritization: bool,
    pub prio_factor: f64,
    pub prio_log: bool,
    pub spray_via_shortest: bool,
    pub spray_via_shortest_bucket: bool,
    pub timeslot_fraction: f64,
    pub seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            conf_file: None,
            payload_length: 52,
            slot_length: 5.632e-9,
            propagation_delay: 0.0,
            num_phases: 3,
            num_nodes: 4096,
            max_ticks: 0,
            max_flows: 0,
            max_flows_read: 0,
            num_failed_nodes: 0,
            flow_size_multiplier: 1.0,
            load_factor_adjust: 1.0,
            max_flow_size: 0,
            min_flow_size: 0,
            hop_by_hop: false,
            tokens_per_bucket: 1,
            tokens_per_firsthop_bucket: 1,
            fair_sending_rate: 0.0,
            receiver_driven: false,
            rd_cells_per_pull: 10,
            rd_starting_budget: 0,
            rd_target_bw_fraction: 1.0,
            rd_max_queue_length: 0,
            prioritization: false,
            quantized_prioritization: false,
            prio_factor: 1.0,
            prio_log: false,
            spray_via_shortest: false,
            spray_via_shortest_bucket: false,
            timeslot_fraction: 1.0,
            seed: 0,
        }
    }
}

impl Settings {
    /// Parse the CLI and merge all configuration sources.
    pub fn parse_all_sources() -> Result<Self, figment::Error> {
        Self::merge_sources(Options::parse())
    }

    fn merge_sources(options: Options) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(conf_file) = &options.conf_file {
            figment = figment.merge(Toml::file(conf_file));
        }
        figment
            .merge(Env::prefixed("SHUNT_"))
            .merge(Serialized::defaults(options))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_from(args: &[&str]) -> Options {
        Options::parse_from(std::iter::once("signalbox").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_apply_when_nothing_is_given() {
        let settings = Settings::merge_sources(options_from(&[])).unwrap();
        assert_eq!(settings.num_phases, 3);
        assert_eq!(settings.payload_length, 52);
        assert!(!settings.hop_by_hop);
    }

    #[test]
    fn cli_wins_over_defaults() {
        let settings =
            Settings::merge_sources(options_from(&["-l", "2", "-H", "--seed", "7"])).unwrap();
        assert_eq!(settings.num_phases, 2);
        assert!(settings.hop_by_hop);
        assert_eq!(settings.seed, 7);
    }

    #[test]
    fn unset_switches_do_not_mask_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("run.toml");
        std::fs::write(&conf, "receiver_driven = true\nrd_cells_per_pull = 4\n").unwrap();
        let settings = Settings::merge_sources(options_from(&[
            "--conf-file",
            conf.to_str().unwrap(),
        ]))
        .unwrap();
        assert!(settings.receiver_driven);
        assert_eq!(settings.rd_cells_per_pull, 4);
    }
}
