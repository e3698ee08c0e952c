use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// OS Jitter - measure involuntary program interruptions per CPU
///
/// A measurement thread is pinned on each selected CPU where it loops without
/// making system calls and periodically reads the TSC to detect external
/// interruptions, i.e. latency introduced by the OS and possibly even by SMM.
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Measurement period (e.g. "10s", "500ms", "1m"; plain numbers are seconds)
    #[clap(
        short = 't',
        long,
        value_parser = parse_duration,
        default_value = "10s",
        help_heading = "Core Options"
    )]
    pub duration: Duration,

    /// Threshold for an interruption in nanoseconds
    #[clap(
        short = 'd',
        long,
        default_value_t = crate::defaults::THRESHOLD_NS,
        help_heading = "Core Options"
    )]
    pub threshold_ns: u32,

    /// CPUs to measure, counting from zero: single core, range or list
    /// (e.g. "3", "2-5", "0,4-7"); may be repeated. Default: all online CPUs
    #[clap(long = "cpu", value_parser = parse_cpu_list, help_heading = "Core Options")]
    pub cpus: Vec<CpuList>,

    /// Scheduling policy for the measurement threads. WARNING: only select a
    /// subset of CPUs with --cpu when using a realtime policy
    #[clap(long, value_enum, default_value_t = SchedPolicy::Other, help_heading = "Scheduling")]
    pub sched: SchedPolicy,

    /// Realtime priority used with --sched fifo|rr
    #[clap(long, default_value_t = crate::defaults::SCHED_PRIORITY, help_heading = "Scheduling")]
    pub prio: i32,

    /// Frequency of the TSC in kHz (default: read from sysfs, the journal or dmesg)
    #[clap(long = "khz", help_heading = "Advanced")]
    pub tsc_khz: Option<u32>,

    /// Capacity of the per-CPU interruption buffer
    /// (default: 105000 per second of measurement)
    #[clap(long, help_heading = "Advanced")]
    pub samples: Option<usize>,

    /// Skip the constant_tsc/nonstop_tsc capability check
    #[clap(long, default_value_t = false, help_heading = "Advanced")]
    pub skip_tsc_check: bool,

    /// Additionally write the results as JSON to this file
    #[clap(short = 'o', long, help_heading = "Output")]
    pub output_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = clap::ArgAction::Count, help_heading = "Output")]
    pub verbose: u8,

    /// Only log errors
    #[clap(short = 'q', long, default_value_t = false, help_heading = "Output")]
    pub quiet: bool,
}

impl Args {
    /// The explicitly requested CPUs, sorted and de-duplicated
    pub fn selected_cpus(&self) -> Vec<usize> {
        let mut cpus: Vec<usize> = self
            .cpus
            .iter()
            .flat_map(|l| l.0.iter().copied())
            .collect();
        cpus.sort_unstable();
        cpus.dedup();
        cpus
    }
}

/// Scheduling policy of the measurement threads
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum SchedPolicy {
    /// SCHED_OTHER, the default time-sharing policy
    #[clap(name = "other")]
    Other,

    /// SCHED_FIFO realtime policy
    #[clap(name = "fifo")]
    Fifo,

    /// SCHED_RR realtime policy
    #[clap(name = "rr")]
    RoundRobin,
}

impl SchedPolicy {
    pub fn is_realtime(&self) -> bool {
        !matches!(self, SchedPolicy::Other)
    }

    /// The libc policy constant
    pub fn as_raw(&self) -> libc::c_int {
        match self {
            SchedPolicy::Other => libc::SCHED_OTHER,
            SchedPolicy::Fifo => libc::SCHED_FIFO,
            SchedPolicy::RoundRobin => libc::SCHED_RR,
        }
    }
}

impl std::fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedPolicy::Other => write!(f, "SCHED_OTHER"),
            SchedPolicy::Fifo => write!(f, "SCHED_FIFO"),
            SchedPolicy::RoundRobin => write!(f, "SCHED_RR"),
        }
    }
}

/// Parse duration from string (e.g., "10s", "500ms", "5m", "1h")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Invalid duration: {}", s));
    }

    let duration = match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_millis((num * 1_000.0) as u64),
        "m" => Duration::from_secs((num * 60.0) as u64),
        "h" => Duration::from_secs((num * 3600.0) as u64),
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(duration)
}

/// One `--cpu` argument: a list of CPU numbers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuList(pub Vec<usize>);

/// Parse a CPU list such as "3", "2-5" or "0,4-7"
fn parse_cpu_list(s: &str) -> Result<CpuList, String> {
    let mut cpus = Vec::new();
    for part in s.split(',').map(str::trim) {
        if part.is_empty() {
            return Err(format!("Empty CPU entry in '{}'", s));
        }
        if let Some((b, e)) = part.split_once('-') {
            let b = parse_cpu(b)?;
            let e = parse_cpu(e)?;
            if b > e {
                return Err(format!("CPU range {} is reversed", part));
            }
            cpus.extend(b..=e);
        } else {
            cpus.push(parse_cpu(part)?);
        }
    }
    Ok(CpuList(cpus))
}

fn parse_cpu(s: &str) -> Result<usize, String> {
    let cpu: usize = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid CPU number: {}", s))?;
    if cpu >= crate::defaults::MAX_CPUS {
        return Err(format!(
            "CPU {} out of range (max {})",
            cpu,
            crate::defaults::MAX_CPUS - 1
        ));
    }
    Ok(cpu)
}
