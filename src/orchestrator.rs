//! # Measurement Orchestrator
//!
//! [`JitterRunner`] drives one measurement run from the control thread.
//!
//! ## Run Lifecycle
//!
//! 1. **Spawn**: one named worker per CPU inside a thread scope, so workers
//!    borrow the configuration, the tick source and the barrier
//! 2. **Readiness**: every worker sends its kernel tid once setup is done;
//!    if one fails, the barrier is aborted and the run fails as a whole
//! 3. **Start**: the start flag is released and the control thread sleeps
//!    for the run duration plus a small slack
//! 4. **Scheduler counters**: read from `/proc` while every worker is still
//!    alive, spinning on the stop flag
//! 5. **Stop and join**: the stop flag is released and the per-worker
//!    results are collected from the join handles
//!
//! The control thread sleeps with `clock_nanosleep` on `CLOCK_MONOTONIC`.
//! The workers do not depend on that sleep for their run length; it only
//! makes sure they have finished sampling before their counters are read.

use crate::barrier::StartStopBarrier;
use crate::config::MeasurementConfig;
use crate::error::{JitterError, Result};
use crate::system;
use crate::tick::TickSource;
use crate::worker::{self, Readiness, WorkerState};
use crossbeam::channel;
use nix::sys::time::TimeSpec;
use nix::time::{clock_nanosleep, ClockId, ClockNanosleepFlags};
use std::collections::HashMap;
use std::io;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Runs one measurement across all configured CPUs
pub struct JitterRunner<T> {
    config: MeasurementConfig,
    source: T,
    pacing_slack: Duration,
}

impl<T: TickSource + Sync> JitterRunner<T> {
    /// Create a runner reading time from `source`
    ///
    /// ## Parameters
    /// - `config`: validated configuration, shared read-only with all workers
    /// - `source`: the counter every worker samples; its frequency must match
    ///   `config.tsc_khz`
    pub fn new(config: MeasurementConfig, source: T) -> Self {
        Self {
            config,
            source,
            pacing_slack: crate::defaults::PACING_SLACK,
        }
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    /// Run the measurement and return one state per CPU, ordered by CPU id
    ///
    /// ## Error Handling
    ///
    /// Every failure is fatal for the whole run: a partial table would
    /// misrepresent the system. The error of the first failing worker is
    /// returned; workers that were merely withdrawn report
    /// `JitterError::Aborted` and are only used if nothing better is known.
    pub fn run(&self) -> Result<Vec<WorkerState>> {
        let config = &self.config;
        info!("{}", config);

        let barrier = StartStopBarrier::new();
        let pid = std::process::id();

        thread::scope(|s| {
            let barrier = &barrier;
            let source = &self.source;
            let (ready_tx, ready_rx) = channel::bounded::<Readiness>(config.cpus.len());

            let mut handles = Vec::with_capacity(config.cpus.len());
            let mut spawn_error = None;
            for &cpu in &config.cpus {
                let ready = ready_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("jitter-cpu{}", cpu))
                    .spawn_scoped(s, move || worker::run(source, cpu, config, barrier, ready));
                match spawned {
                    Ok(handle) => handles.push((cpu, handle)),
                    Err(e) => {
                        let reason = format!("cannot spawn thread: {}", e);
                        spawn_error = Some(JitterError::resource(cpu, reason));
                        break;
                    }
                }
            }
            drop(ready_tx);

            let mut ready = Vec::with_capacity(handles.len());
            if spawn_error.is_none() {
                // ends early once every sender is gone, i.e. a worker failed
                while ready.len() < handles.len() {
                    match ready_rx.recv() {
                        Ok(r) => ready.push(r),
                        Err(_) => break,
                    }
                }
            }

            if spawn_error.is_some() || ready.len() < handles.len() {
                barrier.abort();
                let joined = join_all(handles);
                return Err(spawn_error.unwrap_or_else(|| first_error(joined)));
            }

            debug!("{} workers ready, releasing start", ready.len());
            barrier.release_start();

            let paced = pace(config.duration + self.pacing_slack);

            // workers are now parked on the stop flag with their /proc entries intact
            let switches = match paced {
                Ok(()) => read_switches(pid, &ready),
                Err(e) => Err(e),
            };

            barrier.release_stop();
            let joined = join_all(handles);
            let states = merge_switches(joined, &switches?)?;
            info!("Measurement completed on {} CPUs", states.len());
            Ok(states)
        })
    }
}

/// Sleep for `duration` on the monotonic clock; an interruption is fatal
fn pace(duration: Duration) -> Result<()> {
    clock_nanosleep(
        ClockId::CLOCK_MONOTONIC,
        ClockNanosleepFlags::empty(),
        &TimeSpec::from(duration),
    )
    .map(|_| ())
    .map_err(|errno| JitterError::Interrupted(io::Error::from(errno)))
}

fn read_switches(pid: u32, ready: &[Readiness]) -> Result<HashMap<usize, u64>> {
    let mut switches = HashMap::with_capacity(ready.len());
    for r in ready {
        let n = system::read_involuntary_switches(pid, r.tid)?;
        debug!("CPU {}: {} involuntary context switches", r.cpu, n);
        switches.insert(r.cpu, n);
    }
    Ok(switches)
}

/// Attach each worker's switch count by CPU; any failed worker fails the run
fn merge_switches(
    joined: Vec<Result<WorkerState>>,
    switches: &HashMap<usize, u64>,
) -> Result<Vec<WorkerState>> {
    let mut states = Vec::with_capacity(joined.len());
    for result in joined {
        let mut state = result?;
        state.involuntary_switches = switches.get(&state.cpu).copied().unwrap_or(0);
        states.push(state);
    }
    states.sort_by_key(|st| st.cpu);
    Ok(states)
}

fn join_all(
    handles: Vec<(usize, thread::ScopedJoinHandle<'_, Result<WorkerState>>)>,
) -> Vec<Result<WorkerState>> {
    handles
        .into_iter()
        .map(|(cpu, h)| {
            h.join()
                .unwrap_or_else(|_| Err(JitterError::resource(cpu, "worker thread panicked")))
        })
        .collect()
}

/// Prefer a real failure over the workers that were only withdrawn
fn first_error(joined: Vec<Result<WorkerState>>) -> JitterError {
    let mut aborted = None;
    for result in joined {
        match result {
            Err(JitterError::Aborted(cpu)) => {
                aborted.get_or_insert(cpu);
            }
            Err(e) => return e,
            Ok(_) => {}
        }
    }
    JitterError::Aborted(aborted.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pace_sleeps_at_least_duration() {
        let start = std::time::Instant::now();
        pace(Duration::from_millis(20)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_first_error_prefers_real_failure() {
        let joined = vec![
            Err(JitterError::Aborted(0)),
            Err(JitterError::resource(1, "pinning failed")),
            Err(JitterError::Aborted(2)),
        ];
        assert!(matches!(first_error(joined), JitterError::Resource { cpu: 1, .. }));

        let joined = vec![Err(JitterError::Aborted(4)), Err(JitterError::Aborted(5))];
        assert!(matches!(first_error(joined), JitterError::Aborted(4)));
    }

    #[test]
    fn test_read_switches_for_live_thread() {
        let ready = [Readiness {
            cpu: 0,
            tid: system::current_tid(),
        }];
        let switches = read_switches(std::process::id(), &ready).unwrap();
        assert!(switches.contains_key(&0));
    }

    #[test]
    fn test_read_switches_for_exited_thread_fails() {
        let tid = thread::spawn(system::current_tid).join().unwrap();
        let ready = [Readiness { cpu: 2, tid }];
        // join can return a moment before the kernel reaps the task entry
        let mut result = read_switches(std::process::id(), &ready);
        for _ in 0..100 {
            if result.is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
            result = read_switches(std::process::id(), &ready);
        }
        assert!(matches!(result, Err(JitterError::SchedRecord { .. })));
    }

    extern "C" fn ignore_signal(_: libc::c_int) {}

    #[test]
    fn test_pace_interrupted_by_signal() {
        use nix::sys::pthread::{pthread_kill, pthread_self};
        use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

        let action = SigAction::new(
            SigHandler::Handler(ignore_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: the handler does nothing and is async-signal-safe.
        unsafe { sigaction(Signal::SIGUSR1, &action) }.unwrap();

        let target = pthread_self();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            pthread_kill(target, Signal::SIGUSR1).unwrap();
        });

        let result = pace(Duration::from_secs(5));
        sender.join().unwrap();
        match result {
            Err(JitterError::Interrupted(e)) => {
                assert_eq!(e.raw_os_error(), Some(libc::EINTR));
            }
            other => panic!("expected an interrupted sleep, got {:?}", other),
        }
    }

    fn state(cpu: usize) -> WorkerState {
        WorkerState {
            cpu,
            samples: vec![10, 20],
            detections: 2,
            overflow_tsc: None,
            start_tsc: 1_000,
            baseline_ticks: 30,
            interrupt_ticks: 30,
            involuntary_switches: 0,
        }
    }

    #[test]
    fn test_merge_switches_keys_by_cpu() {
        let joined = vec![Ok(state(5)), Ok(state(3))];
        let switches = HashMap::from([(3, 7), (5, 11)]);
        let states = merge_switches(joined, &switches).unwrap();

        assert_eq!(states.len(), 2);
        assert_eq!((states[0].cpu, states[0].involuntary_switches), (3, 7));
        assert_eq!((states[1].cpu, states[1].involuntary_switches), (5, 11));
    }

    #[test]
    fn test_merge_switches_fails_on_worker_error() {
        let joined = vec![Ok(state(3)), Err(JitterError::resource(4, "worker thread panicked"))];
        let switches = HashMap::from([(3, 7)]);
        let err = merge_switches(joined, &switches).unwrap_err();
        assert!(matches!(err, JitterError::Resource { cpu: 4, .. }));
    }
}
