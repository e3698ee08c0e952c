//! # Platform Queries
//!
//! Everything the measurement needs to learn from, or apply to, the running
//! Linux system:
//!
//! - **Capability check**: the TSC must tick at a constant rate and keep
//!   ticking in sleep states (`constant_tsc`, `nonstop_tsc`), and `rdtscp`
//!   must be available
//! - **TSC frequency**: sysfs `tsc_freq_khz` (only present with an extra
//!   kernel module), then the kernel's boot message via `journalctl --boot`,
//!   then `dmesg`
//! - **CPU discovery**: configured CPUs filtered by their hot-plug status,
//!   read once at startup
//! - **Scheduling records**: `nr_involuntary_switches` from
//!   `/proc/<pid>/task/<tid>/sched`, falling back to
//!   `nonvoluntary_ctxt_switches` from `.../status` on kernels built without
//!   scheduler debug support
//! - **Thread placement**: CPU pinning and scheduling policy for the calling
//!   thread
//!
//! The parsers are split from the I/O so they can be tested against captured
//! file contents.

use crate::cli::SchedPolicy;
use crate::error::{JitterError, Result};
use nix::unistd::{gettid, sysconf, SysconfVar};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

const CPUINFO_PATH: &str = "/proc/cpuinfo";
const TSC_FREQ_KHZ_PATH: &str = "/sys/devices/system/cpu/cpu0/tsc_freq_khz";
const REQUIRED_TSC_FLAGS: [&str; 3] = ["constant_tsc", "nonstop_tsc", "rdtscp"];

/// Fail unless the CPU provides an invariant, syscall-free tick counter
pub fn check_tsc_capability() -> Result<()> {
    if !cfg!(target_arch = "x86_64") {
        return Err(JitterError::Capability(format!(
            "TSC sampling is only implemented for x86_64, not {}",
            std::env::consts::ARCH
        )));
    }
    let cpuinfo = fs::read_to_string(CPUINFO_PATH).map_err(|e| JitterError::Io {
        path: PathBuf::from(CPUINFO_PATH),
        source: e,
    })?;
    let missing = missing_tsc_flags(&cpuinfo);
    if missing.is_empty() {
        debug!("TSC capability flags present: {:?}", REQUIRED_TSC_FLAGS);
        Ok(())
    } else {
        Err(JitterError::Capability(format!(
            "CPU lacks required TSC features: {}",
            missing.join(", ")
        )))
    }
}

/// The required flags absent from the first `flags` line of `/proc/cpuinfo`
pub fn missing_tsc_flags(cpuinfo: &str) -> Vec<&'static str> {
    let flags: Vec<&str> = cpuinfo
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim() == "flags").then_some(value)
        })
        .map(|v| v.split_whitespace().collect())
        .unwrap_or_default();

    REQUIRED_TSC_FLAGS
        .iter()
        .copied()
        .filter(|f| !flags.contains(f))
        .collect()
}

/// Determine the TSC frequency in kHz via the lookup chain
pub fn discover_tsc_khz() -> Result<u32> {
    if let Some(khz) = read_tsc_khz_sysfs(Path::new(TSC_FREQ_KHZ_PATH))? {
        debug!("TSC frequency from {}: {} kHz", TSC_FREQ_KHZ_PATH, khz);
        return Ok(khz);
    }

    // Permissions or a missing journal only mean this source is unavailable.
    let sources: [(&str, &[&str]); 2] = [("journalctl", &["--boot", "--dmesg"]), ("dmesg", &[])];
    for (program, args) in sources {
        let Some(log) = command_output(program, args) else {
            continue;
        };
        if let Some(khz) = parse_tsc_khz_from_log(&log) {
            debug!("TSC frequency from {}: {} kHz", program, khz);
            return Ok(khz);
        }
        debug!("{} did not report a TSC frequency", program);
    }

    Err(JitterError::Capability(
        "couldn't determine the TSC rate, pass it with --khz".to_string(),
    ))
}

/// Read a `tsc_freq_khz` style file; `Ok(None)` when it doesn't exist
pub fn read_tsc_khz_sysfs(path: &Path) -> Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(s) => {
            let khz: u32 = s.trim().parse().map_err(|_| {
                JitterError::Capability(format!("unparsable TSC frequency in {:?}: {:?}", path, s))
            })?;
            Ok((khz != 0).then_some(khz))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(JitterError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Extract the last reported TSC frequency from kernel log text.
///
/// Matches messages like `tsc: Refined TSC clocksource calibration:
/// 2591.998 MHz` or `tsc: Detected 2600.000 MHz processor`.
pub fn parse_tsc_khz_from_log(log: &str) -> Option<u32> {
    log.lines()
        .filter(|line| line.to_ascii_lowercase().contains("tsc:"))
        .filter_map(parse_mhz_in_line)
        .last()
}

fn parse_mhz_in_line(line: &str) -> Option<u32> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    tokens.windows(2).rev().find_map(|w| {
        if w[1] != "MHz" {
            return None;
        }
        let (int, frac) = w[0].split_once('.')?;
        if frac.len() != 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let int: u32 = int.parse().ok()?;
        let frac: u32 = frac.parse().ok()?;
        int.checked_mul(1000)?.checked_add(frac)
    })
}

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).output() {
        Ok(out) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(out) => {
            debug!("{} exited with {}", program, out.status);
            None
        }
        Err(e) => {
            debug!("failed to run {}: {}", program, e);
            None
        }
    }
}

/// All configured CPUs that are currently online, in ascending order
pub fn online_cpus() -> Result<Vec<usize>> {
    let configured = sysconf(SysconfVar::_NPROCESSORS_CONF)
        .ok()
        .flatten()
        .and_then(|n| usize::try_from(n).ok())
        .filter(|&n| n > 0)
        .ok_or_else(|| {
            JitterError::Capability("sysconf(_SC_NPROCESSORS_CONF) failed".to_string())
        })?;
    let mut cpus = Vec::with_capacity(configured);
    for cpu in 0..configured {
        if is_cpu_online(cpu)? {
            cpus.push(cpu);
        }
    }
    debug!("{} of {} configured CPUs online", cpus.len(), configured);
    Ok(cpus)
}

fn is_cpu_online(cpu: usize) -> Result<bool> {
    let path = PathBuf::from(format!("/sys/devices/system/cpu/cpu{}/online", cpu));
    match fs::read_to_string(&path) {
        Ok(s) => Ok(parse_online_flag(&s)),
        // not hot-pluggable, always online
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(JitterError::Io { path, source: e }),
    }
}

pub fn parse_online_flag(contents: &str) -> bool {
    contents.trim() == "1"
}

/// Kernel thread id of the calling thread
pub fn current_tid() -> libc::pid_t {
    gettid().as_raw()
}

/// Read the involuntary context switch count of a live thread.
///
/// The `/proc` entry disappears as soon as the thread returns from its main
/// function, so a missing task directory is reported as an error.
pub fn read_involuntary_switches(pid: u32, tid: libc::pid_t) -> Result<u64> {
    let task_dir = PathBuf::from(format!("/proc/{}/task/{}", pid, tid));
    let sched_path = task_dir.join("sched");
    match fs::read_to_string(&sched_path) {
        Ok(s) => {
            return parse_sched_field(&s, "nr_involuntary_switches").ok_or_else(|| {
                JitterError::SchedRecord {
                    path: sched_path,
                    reason: "nr_involuntary_switches not found".to_string(),
                }
            })
        }
        Err(e) if e.kind() == ErrorKind::NotFound && task_dir.exists() => {
            debug!("{:?} unavailable, falling back to status", sched_path);
        }
        Err(e) => {
            return Err(JitterError::SchedRecord {
                path: sched_path,
                reason: e.to_string(),
            })
        }
    }

    let status_path = task_dir.join("status");
    let s = fs::read_to_string(&status_path).map_err(|e| JitterError::SchedRecord {
        path: status_path.clone(),
        reason: e.to_string(),
    })?;
    parse_sched_field(&s, "nonvoluntary_ctxt_switches").ok_or_else(|| JitterError::SchedRecord {
        path: status_path,
        reason: "nonvoluntary_ctxt_switches not found".to_string(),
    })
}

/// Parse `key : value` style lines as found in `sched` and `status` files
pub fn parse_sched_field(contents: &str, key: &str) -> Option<u64> {
    contents.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        if k.trim() != key {
            return None;
        }
        v.trim().parse().ok()
    })
}

/// Pin the calling thread to a single CPU
pub fn pin_current_thread(cpu: usize) -> Result<()> {
    if core_affinity::set_for_current(core_affinity::CoreId { id: cpu }) {
        Ok(())
    } else {
        Err(JitterError::resource(cpu, "failed to set CPU affinity"))
    }
}

/// Apply a scheduling policy and priority to the calling thread
pub fn set_current_thread_sched(cpu: usize, policy: SchedPolicy, priority: i32) -> Result<()> {
    if !policy.is_realtime() {
        return Ok(());
    }
    // SAFETY: sched_param is plain data; zeroing covers platform-specific
    // padding fields.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = priority;
    // SAFETY: pthread_self() is always a valid handle for the calling thread
    // and `param` outlives the call.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), policy.as_raw(), &param) };
    if rc != 0 {
        let err = std::io::Error::from_raw_os_error(rc);
        warn!("pthread_setschedparam({}, {}) failed: {}", policy, priority, err);
        return Err(JitterError::resource(
            cpu,
            format!("failed to set {} priority {}: {}", policy, priority, err),
        ));
    }
    Ok(())
}
