//! # Results Reporting
//!
//! Turns the drained per-CPU [`WorkerState`]s into report rows and writes
//! them either as the fixed-width table on stdout or as a JSON document.
//! Every duration in a row has been converted from ticks to nanoseconds with
//! the run's [`CalibrationFactors`](crate::calibration::CalibrationFactors).

use crate::calibration::CalibrationFactors;
use crate::cli::SchedPolicy;
use crate::config::MeasurementConfig;
use crate::error::{JitterError, Result};
use crate::stats;
use crate::worker::WorkerState;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Column header of the text report
pub const TABLE_HEADER: &str = concat!(
    " CPU  TSC_khz  #intr  #delta  ovfl_ns  invol_ctx  sum_intr_ns  iratio  rt_s",
    "  loop_ns  median_ns  p20_ns  p80_ns  p90_ns  p99_ns  p99.9_ns   max_ns  mad_ns"
);

/// One report line, all durations in nanoseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuRow {
    pub cpu: usize,
    pub tsc_khz: u32,
    /// Detected interruptions, retained or not
    pub interruptions: u64,
    /// Interruptions retained for the percentiles
    pub samples: usize,
    /// Time from the start until the buffer overflowed, 0 if it never did
    pub overflow_ns: u64,
    pub involuntary_switches: u64,
    pub sum_interrupt_ns: u64,
    /// Fraction of the run spent interrupted
    pub interrupt_ratio: f64,
    pub runtime_s: f64,
    pub loop_ns: u64,
    pub median_ns: u64,
    pub p20_ns: u64,
    pub p80_ns: u64,
    pub p90_ns: u64,
    pub p99_ns: u64,
    pub p999_ns: u64,
    pub max_ns: u64,
    pub mad_ns: u64,
}

impl CpuRow {
    /// Summarize one worker, reusing `scratch` for the MAD computation
    pub fn from_state(
        state: &WorkerState,
        config: &MeasurementConfig,
        scratch: &mut Vec<u32>,
    ) -> Self {
        let cal = &config.calibration;
        let xs = state.samples.as_slice();
        let ns = |ticks: u32| cal.to_target(u64::from(ticks));

        let sum_interrupt_ns = cal.to_target(state.interrupt_ticks);
        let run_ns = config.run_ns() as f64;

        CpuRow {
            cpu: state.cpu,
            tsc_khz: config.tsc_khz,
            interruptions: state.detections,
            samples: xs.len(),
            overflow_ns: state.overflow_offset().map_or(0, |t| cal.to_target(t)),
            involuntary_switches: state.involuntary_switches,
            sum_interrupt_ns,
            interrupt_ratio: if run_ns > 0.0 { sum_interrupt_ns as f64 / run_ns } else { 0.0 },
            runtime_s: config.duration.as_secs_f64(),
            loop_ns: cal.to_target(state.baseline_ticks),
            median_ns: ns(stats::percentile(xs, 1, 2)),
            p20_ns: ns(stats::percentile(xs, 1, 5)),
            p80_ns: ns(stats::percentile(xs, 4, 5)),
            p90_ns: ns(stats::percentile(xs, 90, 100)),
            p99_ns: ns(stats::percentile(xs, 99, 100)),
            p999_ns: ns(stats::percentile(xs, 999, 1000)),
            max_ns: ns(xs.last().copied().unwrap_or(0)),
            mad_ns: ns(stats::mad_with(xs, scratch)),
        }
    }
}

/// Build the report rows for all workers
pub fn summarize(states: &[WorkerState], config: &MeasurementConfig) -> Vec<CpuRow> {
    let mut scratch = Vec::new();
    states
        .iter()
        .map(|st| CpuRow::from_state(st, config, &mut scratch))
        .collect()
}

/// Write the fixed-width table
pub fn write_table<W: Write>(out: &mut W, rows: &[CpuRow]) -> std::io::Result<()> {
    writeln!(out, "{}", TABLE_HEADER)?;
    for r in rows {
        writeln!(
            out,
            concat!(
                "{:4} {:8} {:6} {:7} {:8} {:10} {:12} {:7.3} {:5.1}",
                " {:8} {:10} {:7} {:7} {:7} {:7} {:9} {:8} {:7}"
            ),
            r.cpu,
            r.tsc_khz,
            r.interruptions,
            r.samples,
            r.overflow_ns,
            r.involuntary_switches,
            r.sum_interrupt_ns,
            r.interrupt_ratio,
            r.runtime_s,
            r.loop_ns,
            r.median_ns,
            r.p20_ns,
            r.p80_ns,
            r.p90_ns,
            r.p99_ns,
            r.p999_ns,
            r.max_ns,
            r.mad_ns,
        )?;
    }
    Ok(())
}

/// Conditions the measurement ran under
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub hostname: Option<String>,
    pub online_cpus: usize,
    pub tsc_khz: u32,
    pub threshold_ns: u32,
    pub threshold_ticks: u64,
    pub duration: Duration,
    pub sched_policy: SchedPolicy,
    pub sched_priority: i32,
    pub sample_capacity: usize,
    pub calibration: CalibrationFactors,
}

impl RunMetadata {
    pub fn new(config: &MeasurementConfig, online_cpus: usize) -> Self {
        Self {
            version: crate::VERSION.to_string(),
            timestamp: chrono::Utc::now(),
            hostname: hostname(),
            online_cpus,
            tsc_khz: config.tsc_khz,
            threshold_ns: config.threshold_ns,
            threshold_ticks: config.threshold_ticks,
            duration: config.duration,
            sched_policy: config.sched_policy,
            sched_priority: config.sched_priority,
            sample_capacity: config.sample_capacity,
            calibration: config.calibration,
        }
    }
}

/// Complete results of one run, as written to the JSON output file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitterResults {
    pub metadata: RunMetadata,
    pub rows: Vec<CpuRow>,
}

impl JitterResults {
    pub fn new(metadata: RunMetadata, rows: Vec<CpuRow>) -> Self {
        Self { metadata, rows }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| JitterError::Io {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        std::fs::write(path, json).map_err(|source| JitterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Results written to: {:?}", path);
        Ok(())
    }
}

fn hostname() -> Option<String> {
    let name = std::fs::read_to_string("/proc/sys/kernel/hostname").ok()?;
    let name = name.trim();
    if name.is_empty() {
        debug!("empty hostname");
        None
    } else {
        Some(name.to_string())
    }
}
