// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Output-directory management and CSV/stats writers.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use color_eyre::Result;
use color_eyre::eyre::eyre;
use shunt_fabric::{Fabric, RunReport};
use shunt_node::FctSink;
use shunt_protocols::FctRecord;

/// Writes the flow-completion stream to `fct.csv` as it happens.
pub struct CsvSink {
    writer: Mutex<BufWriter<File>>,
}

impl CsvSink {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            writer: Mutex::new(BufWriter::new(File::create(path)?)),
        })
    }
}

impl FctSink for CsvSink {
    fn record(&self, record: FctRecord) {
        let mut writer = self.writer.lock().unwrap();
        writeln!(
            writer,
            "{},{},{},{}",
            record.flow_id, record.num_frames, record.duration, record.start_tick
        )
        .expect("write to fct.csv");
    }
}

/// Prepare the output directory: refuse to clobber a completed run, create
/// the directory, and rotate any `fct.csv` left by an interrupted one.
pub fn prepare_output_dir(dir: &Path) -> Result<()> {
    if dir.join("stats").exists() {
        return Err(eyre!(
            "output directory {} appears to contain a completed run",
            dir.display()
        ));
    }
    fs::create_dir_all(dir)?;

    let fct = dir.join("fct.csv");
    if fct.exists() {
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        fs::rename(&fct, dir.join(format!("fct.csv-{stamp}")))?;
    }
    Ok(())
}

/// Per-link CSVs: `node,phase,link,value` with zero rows elided.
fn write_link_csv(
    path: &Path,
    fabric: &Fabric,
    value: impl Fn(&shunt_fabric::LinkStat) -> u64,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for stat in fabric.link_stats() {
        let v = value(&stat);
        if v > 0 {
            writeln!(writer, "{},{},{},{v}", stat.node, stat.phase, stat.link)?;
        }
    }
    Ok(())
}

/// Per-node CSVs: `node,value` with failed nodes skipped.
fn write_node_csv(path: &Path, fabric: &Fabric, value: impl Fn(&shunt_node::Node) -> u64) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for node in fabric.nodes().iter().filter(|node| !node.is_failed()) {
        writeln!(writer, "{},{}", node.id(), value(node))?;
    }
    Ok(())
}

/// Write every end-of-run report file into the output directory.
pub fn write_reports(
    dir: &Path,
    fabric: &Fabric,
    report: &RunReport,
    payload_length: u32,
    timeslot_fraction: f64,
    elapsed_seconds: f64,
) -> Result<()> {
    let use_hbh = fabric.config().use_hbh;

    write_link_csv(&dir.join("max-queue-lengths.csv"), fabric, |stat| {
        u64::from(stat.max_enqueued)
    })?;
    write_link_csv(&dir.join("queue-lengths-final.csv"), fabric, |stat| {
        u64::from(stat.cur_enqueued)
    })?;
    write_node_csv(&dir.join("max-buffer-occupancy.csv"), fabric, |node| {
        u64::from(node.max_buffer_occupancy())
    })?;
    write_node_csv(&dir.join("buffer-occupancy-final.csv"), fabric, |node| {
        u64::from(node.cur_buffer_occupancy())
    })?;
    if use_hbh {
        write_node_csv(&dir.join("max-active-buckets.csv"), fabric, |node| {
            u64::from(node.max_buckets_in_use())
        })?;
        write_node_csv(&dir.join("active-buckets-final.csv"), fabric, |node| {
            u64::from(node.cur_buckets_in_use())
        })?;
    }

    {
        let mut writer = BufWriter::new(File::create(dir.join("incomplete-flows.csv"))?);
        for flow in fabric.incomplete_flows(report.last_tick) {
            writeln!(
                writer,
                "{},{},{},{}",
                flow.flow_id, flow.frames_delivered, flow.elapsed, flow.num_frames
            )?;
        }
    }

    {
        let mut writer = BufWriter::new(File::create(dir.join("recvd_frames.csv"))?);
        writeln!(writer, "0,0")?;
        for (tick, frames) in &report.checkpoints {
            writeln!(writer, "{tick},{frames}")?;
        }
        writeln!(writer, "{},{}", report.last_tick, report.frames_delivered)?;
    }

    write_stats(
        &dir.join("stats"),
        fabric,
        report,
        payload_length,
        timeslot_fraction,
        elapsed_seconds,
    )
}

fn write_stats(
    path: &Path,
    fabric: &Fabric,
    report: &RunReport,
    payload_length: u32,
    timeslot_fraction: f64,
    elapsed_seconds: f64,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    let node_count = fabric.config().shape.max_node_id() as f64;
    let adjusted_ticks = report.last_tick as f64 / timeslot_fraction;

    if fabric.config().use_hbh {
        writeln!(writer, "max_buckets_in_use {}", fabric.max_buckets_in_use())?;
    }
    let max_queue = u64::from(fabric.max_queue_length());
    writeln!(writer, "max_queue_length_frames {max_queue}")?;
    writeln!(
        writer,
        "max_queue_length_bytes {}",
        max_queue * u64::from(payload_length)
    )?;
    let max_buffer = u64::from(fabric.max_buffer_occupancy());
    writeln!(writer, "max_buffer_occupancy_frames {max_buffer}")?;
    writeln!(
        writer,
        "max_buffer_occupancy_bytes {}",
        max_buffer * u64::from(payload_length)
    )?;
    writeln!(writer, "total_frames_recvd {}", report.frames_delivered)?;
    writeln!(writer, "completed_flows {}", report.completed_flows)?;
    writeln!(
        writer,
        "total_system_throughput {}",
        report.frames_delivered as f64 / node_count / adjusted_ticks
    )?;
    for (index, (_tick, frames)) in report.checkpoints.iter().enumerate() {
        let m = index + 1;
        writeln!(writer, "total_frames_recvd_by_t={m}M {frames}")?;
        writeln!(
            writer,
            "total_frames_recvd_after_t={m}M {}",
            report.frames_delivered - frames
        )?;
    }
    writeln!(writer, "elapsed_time_sec {elapsed_seconds}")?;
    Ok(())
}
