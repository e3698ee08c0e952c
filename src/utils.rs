//! # Utility Functions and Helper Module
//!
//! This module provides the validation and formatting helpers used while the
//! measurement is being configured and reported. None of these functions are
//! called from a worker thread once sampling has begun.
//!
//! ## Key Functionality Categories
//!
//! - **Validation**: Input parameter validation with clear error messages
//! - **CPU Selection**: Resolving the requested CPU set against online CPUs
//! - **Formatting**: Human-readable display of durations for log output
//!
//! ## Usage Examples
//!
//! ```rust
//! use os_jitter::utils::*;
//! use std::time::Duration;
//!
//! # fn main() -> os_jitter::error::Result<()> {
//! // Format durations for display
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//!
//! // Validate configuration parameters
//! validate_threshold_ns(100)?; // OK
//! # Ok(())
//! # }
//! ```

use crate::cli::SchedPolicy;
use crate::error::{JitterError, Result};
use std::time::Duration;

/// Shortest measurement period accepted
pub const MIN_DURATION: Duration = Duration::from_millis(1);

/// Longest measurement period accepted (one day)
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 3600);

/// Format a duration in a human-readable way
///
/// Converts a Duration to a human-readable string, automatically selecting
/// the most appropriate unit based on the magnitude.
///
/// ## Unit Selection Logic
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s", "2h 15m 30s")
///
/// ## Examples
///
/// ```rust
/// # use os_jitter::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Validate the measurement period
///
/// ## Validation Rules
///
/// - **Minimum**: 1 ms, shorter runs cannot collect a meaningful baseline
/// - **Maximum**: 24 hours, keeps the tick-domain run length and the sample
///   buffer within practical bounds
pub fn validate_duration(duration: Duration) -> Result<()> {
    if duration < MIN_DURATION {
        return Err(JitterError::config(format!(
            "Duration {:?} is too short (minimum {:?})",
            duration, MIN_DURATION
        )));
    }
    if duration > MAX_DURATION {
        return Err(JitterError::config(format!(
            "Duration {:?} is too long (maximum {:?})",
            duration, MAX_DURATION
        )));
    }
    Ok(())
}

/// Validate the interruption threshold in nanoseconds
///
/// A zero threshold would classify every loop iteration as an interruption.
pub fn validate_threshold_ns(threshold_ns: u32) -> Result<()> {
    if threshold_ns == 0 {
        return Err(JitterError::config("Threshold cannot be zero"));
    }
    Ok(())
}

/// Validate a scheduling priority for the selected policy
///
/// ## Validation Rules
///
/// - `SCHED_OTHER` ignores the priority
/// - Realtime policies accept the range reported by
///   `sched_get_priority_min`/`sched_get_priority_max` (1..=99 on Linux)
pub fn validate_priority(policy: SchedPolicy, priority: i32) -> Result<()> {
    if !policy.is_realtime() {
        return Ok(());
    }
    // SAFETY: both calls only inspect their integer argument.
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(policy.as_raw()),
            libc::sched_get_priority_max(policy.as_raw()),
        )
    };
    if min < 0 || max < 0 {
        return Err(JitterError::config(format!(
            "Scheduling policy {} is not supported",
            policy
        )));
    }
    if priority < min || priority > max {
        return Err(JitterError::config(format!(
            "Priority {} out of range {}..={} for {}",
            priority, min, max, policy
        )));
    }
    Ok(())
}

/// Resolve the CPUs to measure
///
/// An empty request selects every online CPU. Explicitly requested CPUs must
/// all be online.
///
/// ## Returns
/// - `Ok(Vec<usize>)`: ascending, de-duplicated CPU ids
/// - `Err(JitterError::Config)`: a requested CPU is offline or absent, or no
///   CPU remains
pub fn resolve_cpus(requested: &[usize], online: &[usize]) -> Result<Vec<usize>> {
    let mut cpus: Vec<usize> = if requested.is_empty() {
        online.to_vec()
    } else {
        requested.to_vec()
    };
    cpus.sort_unstable();
    cpus.dedup();

    if let Some(cpu) = cpus.iter().find(|c| !online.contains(c)) {
        return Err(JitterError::config(format!("CPU {} is not online", cpu)));
    }
    if cpus.is_empty() {
        return Err(JitterError::config("No CPU selected for measurement"));
    }
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test duration formatting with various time scales
    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
        assert_eq!(format_duration(Duration::from_nanos(1500)), "1.50μs");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250.00ms");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_validate_duration() {
        assert!(validate_duration(Duration::from_secs(10)).is_ok());
        assert!(validate_duration(MIN_DURATION).is_ok());
        assert!(validate_duration(Duration::ZERO).is_err());
        assert!(validate_duration(MAX_DURATION + Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_validate_threshold() {
        assert!(validate_threshold_ns(1).is_ok());
        assert!(validate_threshold_ns(100).is_ok());
        assert!(validate_threshold_ns(0).is_err());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_validate_priority() {
        assert!(validate_priority(SchedPolicy::Other, 0).is_ok());
        assert!(validate_priority(SchedPolicy::Other, -5).is_ok());
        assert!(validate_priority(SchedPolicy::Fifo, 1).is_ok());
        assert!(validate_priority(SchedPolicy::RoundRobin, 99).is_ok());
        assert!(validate_priority(SchedPolicy::Fifo, 0).is_err());
        assert!(validate_priority(SchedPolicy::Fifo, 100).is_err());
    }

    #[test]
    fn test_resolve_cpus() {
        let online = [0, 1, 2, 3];
        assert_eq!(resolve_cpus(&[], &online).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(resolve_cpus(&[3, 1, 3], &online).unwrap(), vec![1, 3]);
        assert!(resolve_cpus(&[4], &online).is_err());
        assert!(resolve_cpus(&[], &[]).is_err());
    }
}
