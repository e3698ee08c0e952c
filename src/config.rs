//! # Measurement Configuration
//!
//! [`MeasurementConfig`] is built once, before any worker is spawned, and is
//! only read afterwards: every worker borrows it for the whole run. All
//! nanosecond inputs are converted into the tick domain here so the sampling
//! loop compares raw counter deltas only.

use crate::calibration::{CalibrationFactors, DEFAULT_MAX_SECS};
use crate::cli::{Args, SchedPolicy};
use crate::error::{JitterError, Result};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Immutable parameters of one measurement run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Wall-clock length of the run
    pub duration: Duration,

    /// Interruption threshold as given by the user
    pub threshold_ns: u32,

    /// Interruption threshold in TSC ticks; a loop delta must exceed it
    pub threshold_ticks: u64,

    /// CPUs with one pinned worker each, ascending
    pub cpus: Vec<usize>,

    pub sched_policy: SchedPolicy,
    pub sched_priority: i32,

    /// Retained samples per worker; further detections are only counted
    pub sample_capacity: usize,

    /// Run length in TSC ticks, each worker stops on its own after this many
    pub run_ticks: u64,

    /// Spin-hint cycles between the start flag and the first timestamp
    pub warmup_spins: u32,

    pub tsc_khz: u32,
    pub calibration: CalibrationFactors,
}

impl MeasurementConfig {
    /// Derive the tick-domain configuration for a TSC running at `tsc_khz`
    pub fn new(
        duration: Duration,
        threshold_ns: u32,
        tsc_khz: u32,
        cpus: Vec<usize>,
    ) -> Result<Self> {
        utils::validate_duration(duration)?;
        utils::validate_threshold_ns(threshold_ns)?;
        if tsc_khz == 0 {
            return Err(JitterError::config("TSC frequency cannot be zero"));
        }
        if cpus.is_empty() {
            return Err(JitterError::config("No CPU selected for measurement"));
        }

        let threshold_ticks = u64::from(threshold_ns) * u64::from(tsc_khz) / 1_000_000;
        if threshold_ticks == 0 {
            return Err(JitterError::config(format!(
                "Threshold of {} ns is below one tick at {} kHz",
                threshold_ns, tsc_khz
            )));
        }

        let run_ticks = u64::try_from(u128::from(tsc_khz) * duration.as_nanos() / 1_000_000)
            .map_err(|_| JitterError::config("Run length overflows the tick counter"))?;

        // the conversion range has to cover the whole run
        let maxsec = u32::try_from(duration.as_secs() + 1)
            .map_err(|_| JitterError::config("Duration too long"))?
            .max(DEFAULT_MAX_SECS);
        let calibration = CalibrationFactors::for_tsc_khz(tsc_khz, maxsec)?;

        Ok(Self {
            duration,
            threshold_ns,
            threshold_ticks,
            cpus,
            sched_policy: SchedPolicy::Other,
            sched_priority: crate::defaults::SCHED_PRIORITY,
            sample_capacity: default_sample_capacity(duration),
            run_ticks,
            warmup_spins: crate::defaults::WARMUP_SPINS,
            tsc_khz,
            calibration,
        })
    }

    /// Create the configuration from CLI arguments and resolved platform facts
    ///
    /// ## Parameters
    /// - `args`: Parsed command-line arguments
    /// - `tsc_khz`: TSC frequency, either from `--khz` or discovered
    /// - `cpus`: the resolved CPU set (explicit or all online)
    pub fn from_args(args: &Args, tsc_khz: u32, cpus: Vec<usize>) -> Result<Self> {
        let mut config = Self::new(args.duration, args.threshold_ns, tsc_khz, cpus)?;
        config = config.with_sched(args.sched, args.prio)?;
        if let Some(samples) = args.samples {
            config = config.with_sample_capacity(samples)?;
        }
        Ok(config)
    }

    pub fn with_sched(mut self, policy: SchedPolicy, priority: i32) -> Result<Self> {
        utils::validate_priority(policy, priority)?;
        self.sched_policy = policy;
        self.sched_priority = priority;
        Ok(self)
    }

    pub fn with_sample_capacity(mut self, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(JitterError::config("Sample capacity cannot be zero"));
        }
        self.sample_capacity = capacity;
        Ok(self)
    }

    /// Run length in nanoseconds as converted by the calibration factors
    pub fn run_ns(&self) -> u64 {
        self.calibration.to_target(self.run_ticks)
    }

    /// A realtime policy on every online CPU leaves nothing for the rest of
    /// the system until the run ends
    pub fn starves_system(&self, online: &[usize]) -> bool {
        self.sched_policy.is_realtime() && online.iter().all(|cpu| self.cpus.contains(cpu))
    }
}

impl fmt::Display for MeasurementConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-----------------------------------------------------------------")?;
        writeln!(f, "Starting jitter measurement")?;
        writeln!(f, "  Duration:           {}", utils::format_duration(self.duration))?;
        writeln!(
            f,
            "  Threshold:          {} ns ({} ticks)",
            self.threshold_ns, self.threshold_ticks
        )?;
        writeln!(f, "  TSC:                {} kHz", self.tsc_khz)?;
        writeln!(f, "  CPUs:               {:?}", self.cpus)?;
        if self.sched_policy.is_realtime() {
            writeln!(
                f,
                "  Scheduling:         {} prio {}",
                self.sched_policy, self.sched_priority
            )?;
        } else {
            writeln!(f, "  Scheduling:         {}", self.sched_policy)?;
        }
        writeln!(f, "  Sample Capacity:    {} per CPU", self.sample_capacity)?;
        write!(f, "-----------------------------------------------------------------")
    }
}

fn default_sample_capacity(duration: Duration) -> usize {
    let per_sec = crate::defaults::SAMPLES_PER_SEC as u128;
    let capacity = per_sec * duration.as_millis() / 1000;
    usize::try_from(capacity).unwrap_or(usize::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_tick_domain_conversion() {
        let config =
            MeasurementConfig::new(Duration::from_secs(10), 100, 2_600_000, vec![0]).unwrap();
        // 100 ns at 2.6 GHz
        assert_eq!(config.threshold_ticks, 260);
        assert_eq!(config.run_ticks, 26_000_000_000);
        assert_eq!(config.sample_capacity, 1_050_000);
        assert!(config.run_ns().abs_diff(10_000_000_000) <= 1_000);
    }

    #[test]
    fn test_sub_second_duration() {
        let config =
            MeasurementConfig::new(Duration::from_millis(250), 100, 3_000_000, vec![1]).unwrap();
        assert_eq!(config.run_ticks, 750_000_000);
        assert_eq!(config.sample_capacity, 26_250);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let d = Duration::from_secs(1);
        assert!(MeasurementConfig::new(d, 0, 2_600_000, vec![0]).is_err());
        assert!(MeasurementConfig::new(d, 100, 0, vec![0]).is_err());
        assert!(MeasurementConfig::new(d, 100, 2_600_000, vec![]).is_err());
        assert!(MeasurementConfig::new(Duration::ZERO, 100, 2_600_000, vec![0]).is_err());
        // 1 ns at 100 MHz is a tenth of a tick
        assert!(MeasurementConfig::new(d, 1, 100_000, vec![0]).is_err());
    }

    #[test]
    fn test_from_args() {
        let args = Args::parse_from(["os-jitter", "-t", "2s", "-d", "500", "--samples", "64"]);
        let config = MeasurementConfig::from_args(&args, 1_000_000, vec![0, 2]).unwrap();
        assert_eq!(config.duration, Duration::from_secs(2));
        assert_eq!(config.threshold_ticks, 500);
        assert_eq!(config.sample_capacity, 64);
        assert_eq!(config.cpus, vec![0, 2]);
        assert_eq!(config.sched_policy, SchedPolicy::Other);

        let args = Args::parse_from(["os-jitter", "--samples", "0"]);
        assert!(MeasurementConfig::from_args(&args, 1_000_000, vec![0]).is_err());
    }

    #[test]
    fn test_starves_system_only_with_realtime_on_all_online() {
        let d = Duration::from_secs(1);
        let all = MeasurementConfig::new(d, 100, 2_600_000, vec![0, 1, 2, 3]).unwrap();
        assert!(!all.starves_system(&[0, 1, 2, 3]));

        let all = all.with_sched(SchedPolicy::Fifo, 1).unwrap();
        assert!(all.starves_system(&[0, 1, 2, 3]));
        // a CPU that went offline since selection changes nothing
        assert!(all.starves_system(&[0, 1, 3]));

        let some = MeasurementConfig::new(d, 100, 2_600_000, vec![1, 2])
            .unwrap()
            .with_sched(SchedPolicy::RoundRobin, 1)
            .unwrap();
        assert!(!some.starves_system(&[0, 1, 2, 3]));
    }

    #[test]
    fn test_display_mentions_threshold() {
        let config =
            MeasurementConfig::new(Duration::from_secs(1), 100, 2_600_000, vec![0]).unwrap();
        let text = config.to_string();
        assert!(text.contains("100 ns (260 ticks)"));
        assert!(text.contains("2600000 kHz"));
    }
}
