//! # OS Jitter Measurement Library
//!
//! Measures involuntary interruptions ("jitter") that the operating system
//! and the platform firmware impose on a CPU. A worker thread is pinned to
//! every selected CPU where it loops without making system calls, reading
//! the time stamp counter. Any gap between two reads that is longer than a
//! threshold is recorded as an interruption.
//!
//! ## Architecture Overview
//!
//! - `calibration`: fixed-point tick to nanosecond conversion
//! - `tick`: the counter read abstraction and the x86_64 TSC
//! - `barrier`: start/stop flags shared by the control thread and workers
//! - `worker`: the per-CPU sampling state machine
//! - `orchestrator`: spawns, starts, paces, stops and joins the workers
//! - `stats`: percentiles and median absolute deviation
//! - `results`: report rows, text table and JSON output
//! - `system`: `/proc` and `/sys` queries, pinning and scheduling policy
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! # #[cfg(target_arch = "x86_64")]
//! # fn main() -> os_jitter::error::Result<()> {
//! use os_jitter::{results, JitterRunner, MeasurementConfig, Tsc};
//! use std::time::Duration;
//!
//! let config = MeasurementConfig::new(Duration::from_secs(1), 100, 2_600_000, vec![0, 1])?;
//! let runner = JitterRunner::new(config, Tsc);
//! let states = runner.run()?;
//!
//! let rows = results::summarize(&states, runner.config());
//! results::write_table(&mut std::io::stdout(), &rows).ok();
//! # Ok(())
//! # }
//! # #[cfg(not(target_arch = "x86_64"))]
//! # fn main() {}
//! ```
//!
//! ## Measurement Characteristics
//!
//! - No floating point, allocation, locking or system call inside the
//!   sampling loop
//! - Run length is counted on the TSC itself, not on a timer
//! - Scheduler context-switch counters are read while the workers are
//!   still alive, because `/proc/<pid>/task/<tid>` disappears on exit

pub mod barrier;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod results;
pub mod stats;
pub mod system;
pub mod tick;
pub mod utils;
pub mod worker;

pub use calibration::CalibrationFactors;
pub use cli::{Args, SchedPolicy};
pub use config::MeasurementConfig;
pub use error::{JitterError, Result};
pub use orchestrator::JitterRunner;
pub use results::{CpuRow, JitterResults};
#[cfg(target_arch = "x86_64")]
pub use tick::Tsc;
pub use tick::TickSource;
pub use worker::WorkerState;

/// The current version of the measurement tool, recorded in JSON results
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default measurement period
    pub const DURATION: Duration = Duration::from_secs(10);

    /// Default interruption threshold in nanoseconds
    ///
    /// An undisturbed loop iteration costs a few tens of nanoseconds on
    /// current x86 parts, so 100 ns separates noise from interruptions.
    pub const THRESHOLD_NS: u32 = 100;

    /// Default realtime priority for `--sched fifo|rr`
    pub const SCHED_PRIORITY: i32 = 1;

    /// Upper bound (exclusive) for CPU numbers accepted on the command line
    pub const MAX_CPUS: usize = 1024;

    /// Retained samples per CPU and second of measurement
    pub const SAMPLES_PER_SEC: usize = 105_000;

    /// Spin-hint cycles between the start flag and the first timestamp
    pub const WARMUP_SPINS: u32 = 1000;

    /// Added to the control thread's sleep so that all workers have left
    /// their sampling loop before their counters are read
    pub const PACING_SLACK: Duration = Duration::from_micros(100);
}
