// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Flow-list ingestion for SHUNT runs.
//!
//! A workload is an ordered text file of flow records, one per line:
//!
//! ```text
//! flow_id, source_index, dest_index, byte_length, start_time_seconds
//! ```
//!
//! Fields may be comma- or whitespace-separated. The indices address the
//! *healthy* nodes of the fabric, so a [`translation_table`] maps them onto
//! physical node ids with failed nodes skipped. Byte lengths become frame
//! counts via the configured payload size, and start times become ticks via
//! the slot length and load factor.

pub mod quantize;
pub mod reader;

pub use quantize::{DEFAULT_TABLE, Quantizer};
pub use reader::{WorkloadConfig, read_flows, translation_table};
