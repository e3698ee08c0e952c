//! # Measurement Worker
//!
//! One worker runs pinned on each measured CPU. It moves through
//!
//! ```text
//! setup -> WAIT_START -> WARMUP -> SAMPLING -> WAIT_STOP -> DONE
//! ```
//!
//! Setup (pinning, scheduling policy, buffer allocation) happens before the
//! worker reports ready, so none of it overlaps the measurement. While
//! SAMPLING the loop reads the tick source, compares the delta with the
//! threshold and writes into the preallocated [`SampleBuffer`]. It makes no
//! system calls, takes no locks and never allocates.
//!
//! The loop is self-clocked: it ends after `run_ticks` on its own counter.
//! The stop flag only releases the drained result, which gives the
//! orchestrator a window to read the scheduler counters of the still-living
//! thread.

use crate::barrier::{StartSignal, StartStopBarrier};
use crate::config::MeasurementConfig;
use crate::error::{JitterError, Result};
use crate::system;
use crate::tick::TickSource;
use crossbeam::channel::Sender;
use serde::Serialize;
use std::hint;
use tracing::debug;

/// Sent by a worker once its setup is complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub cpu: usize,
    /// Kernel thread id, used to locate the scheduling record
    pub tid: libc::pid_t,
}

/// Fixed-capacity store for interruption durations
///
/// All slots are allocated and written once up front so that page faults
/// happen during setup and not on the first recorded interruption.
#[derive(Debug)]
pub struct SampleBuffer {
    slots: Vec<u32>,
    len: usize,
}

impl SampleBuffer {
    pub fn allocate(
        capacity: usize,
    ) -> std::result::Result<Self, std::collections::TryReserveError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.resize(capacity, 0);
        Ok(Self { slots, len: 0 })
    }

    /// Store a sample; returns false once the buffer is full
    #[inline(always)]
    pub fn push(&mut self, sample: u32) -> bool {
        match self.slots.get_mut(self.len) {
            Some(slot) => {
                *slot = sample;
                self.len += 1;
                true
            }
            None => false,
        }
    }

    fn into_samples(mut self) -> Vec<u32> {
        self.slots.truncate(self.len);
        self.slots
    }
}

/// What a worker hands back after the stop flag
#[derive(Debug, Clone, Serialize)]
pub struct WorkerState {
    pub cpu: usize,
    /// Interruption durations minus the baseline, ascending, in ticks
    pub samples: Vec<u32>,
    /// All detected interruptions, including those past the buffer capacity
    pub detections: u64,
    /// Tick value of the first detection that did not fit into the buffer
    pub overflow_tsc: Option<u64>,
    pub start_tsc: u64,
    /// Smallest loop delta, the cost of one undisturbed iteration
    pub baseline_ticks: u64,
    /// Sum of all detected interruptions minus their baseline share
    pub interrupt_ticks: u64,
    /// Filled in by the orchestrator after the run
    pub involuntary_switches: u64,
}

impl WorkerState {
    /// Ticks between the start of the run and the first overflow
    pub fn overflow_offset(&self) -> Option<u64> {
        self.overflow_tsc.map(|t| t.saturating_sub(self.start_tsc))
    }
}

/// Undrained result of the sampling loop
#[derive(Debug)]
pub struct RawRun {
    buffer: SampleBuffer,
    detections: u64,
    overflow_tsc: u64,
    start_tsc: u64,
    min_delta: u64,
    sum_ticks: u64,
}

impl RawRun {
    /// Remove the loop's own cost from every measurement and sort the samples
    pub fn drain(self, cpu: usize) -> WorkerState {
        // no main-loop iteration ran: nothing to subtract
        let baseline = if self.min_delta == u64::MAX { 0 } else { self.min_delta };
        let baseline32 = u32::try_from(baseline).unwrap_or(u32::MAX);

        let mut samples = self.buffer.into_samples();
        for s in samples.iter_mut() {
            *s = s.saturating_sub(baseline32);
        }
        samples.sort_unstable();

        WorkerState {
            cpu,
            samples,
            detections: self.detections,
            overflow_tsc: (self.overflow_tsc != 0).then_some(self.overflow_tsc),
            start_tsc: self.start_tsc,
            baseline_ticks: baseline,
            interrupt_ticks: self
                .sum_ticks
                .saturating_sub(baseline.saturating_mul(self.detections)),
            involuntary_switches: 0,
        }
    }
}

struct Sampler {
    buffer: SampleBuffer,
    threshold: u64,
    prev: u64,
    min_delta: u64,
    sum_ticks: u64,
    detections: u64,
    // 0 until the first overflow; a detection can never happen at tick 0
    overflow_tsc: u64,
}

impl Sampler {
    #[inline(always)]
    fn observe(&mut self, now: u64) {
        let delta = now.saturating_sub(self.prev);
        self.prev = now;
        if delta > self.threshold {
            self.sum_ticks = self.sum_ticks.saturating_add(delta);
            let sample = u32::try_from(delta).unwrap_or(u32::MAX);
            if !self.buffer.push(sample) && self.overflow_tsc == 0 {
                self.overflow_tsc = now;
            }
            self.detections += 1;
        }
        if delta < self.min_delta {
            self.min_delta = delta;
        }
    }
}

/// WARMUP and SAMPLING: spin, take the start timestamp, then sample until
/// `run_ticks` have elapsed on `source`.
pub fn sample<T: TickSource>(
    source: &T,
    config: &MeasurementConfig,
    buffer: SampleBuffer,
) -> RawRun {
    for _ in 0..config.warmup_spins {
        hint::spin_loop();
    }

    let start = source.read_serialized();
    let end = start.saturating_add(config.run_ticks);
    let mut sampler = Sampler {
        buffer,
        threshold: config.threshold_ticks,
        prev: start,
        min_delta: u64::MAX,
        sum_ticks: 0,
        detections: 0,
        overflow_tsc: 0,
    };

    // The first iteration pays for cold caches and branch predictors; it
    // still counts as a detection but does not set the baseline.
    sampler.observe(source.read_exit_fenced());
    sampler.min_delta = u64::MAX;

    while sampler.prev < end {
        sampler.observe(source.read_exit_fenced());
    }

    RawRun {
        buffer: sampler.buffer,
        detections: sampler.detections,
        overflow_tsc: sampler.overflow_tsc,
        start_tsc: start,
        min_delta: sampler.min_delta,
        sum_ticks: sampler.sum_ticks,
    }
}

/// Everything after setup: wait for start, sample, wait for stop, drain
pub fn measure<T: TickSource>(
    source: &T,
    cpu: usize,
    config: &MeasurementConfig,
    barrier: &StartStopBarrier,
    buffer: SampleBuffer,
) -> Result<WorkerState> {
    if barrier.wait_for_start() == StartSignal::Aborted {
        return Err(JitterError::Aborted(cpu));
    }
    let raw = sample(source, config, buffer);
    barrier.wait_for_stop();
    Ok(raw.drain(cpu))
}

/// Thread body of a measurement worker
///
/// Pins the calling thread to `cpu`, applies the scheduling policy and
/// allocates the sample buffer, then reports readiness on `ready`. A setup
/// failure returns before readiness is sent; dropping `ready` lets the
/// orchestrator notice.
pub fn run<T: TickSource>(
    source: &T,
    cpu: usize,
    config: &MeasurementConfig,
    barrier: &StartStopBarrier,
    ready: Sender<Readiness>,
) -> Result<WorkerState> {
    system::pin_current_thread(cpu)?;
    system::set_current_thread_sched(cpu, config.sched_policy, config.sched_priority)?;
    let buffer = SampleBuffer::allocate(config.sample_capacity).map_err(|e| {
        JitterError::resource(
            cpu,
            format!("cannot allocate {} samples: {}", config.sample_capacity, e),
        )
    })?;

    let tid = system::current_tid();
    debug!("worker on CPU {} ready (tid {})", cpu, tid);
    ready
        .send(Readiness { cpu, tid })
        .map_err(|_| JitterError::Aborted(cpu))?;
    drop(ready);

    measure(source, cpu, config, barrier, buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    /// Replays a fixed list of counter values
    struct Scripted {
        ticks: Vec<u64>,
        next: Cell<usize>,
    }

    impl Scripted {
        fn new(ticks: Vec<u64>) -> Self {
            Self { ticks, next: Cell::new(0) }
        }

        fn take(&self) -> u64 {
            let i = self.next.get();
            self.next.set(i + 1);
            *self.ticks.get(i).expect("script exhausted")
        }

        fn consumed(&self) -> usize {
            self.next.get()
        }
    }

    impl TickSource for Scripted {
        fn read_serialized(&self) -> u64 {
            self.take()
        }

        fn read_exit_fenced(&self) -> u64 {
            self.take()
        }
    }

    /// 1 tick = 1 ns, threshold 100 ticks
    fn config(run_ticks: u64, capacity: usize) -> MeasurementConfig {
        let mut config = MeasurementConfig::new(Duration::from_secs(1), 100, 1_000_000, vec![0])
            .unwrap()
            .with_sample_capacity(capacity)
            .unwrap();
        config.warmup_spins = 0;
        config.run_ticks = run_ticks;
        config
    }

    fn run_script(ticks: Vec<u64>, run_ticks: u64, capacity: usize) -> (WorkerState, usize) {
        let source = Scripted::new(ticks);
        let config = config(run_ticks, capacity);
        let raw = sample(&source, &config, SampleBuffer::allocate(capacity).unwrap());
        (raw.drain(0), source.consumed())
    }

    #[test]
    fn test_sample_buffer_capacity() {
        let mut buf = SampleBuffer::allocate(2).unwrap();
        assert_eq!(buf.len, 0);
        assert!(buf.push(7));
        assert!(buf.push(9));
        assert!(!buf.push(11));
        assert_eq!(buf.len, 2);
        assert_eq!(buf.slots.len(), 2);
        assert_eq!(buf.into_samples(), vec![7, 9]);
    }

    #[test]
    fn test_quiet_run_has_no_detections() {
        // start 1000, steady 20-tick loop until 1000 + 200
        let ticks: Vec<u64> = (0..=10).map(|i| 1000 + i * 20).collect();
        let (state, consumed) = run_script(ticks, 200, 16);
        assert_eq!(consumed, 11);
        assert_eq!(state.detections, 0);
        assert!(state.samples.is_empty());
        assert_eq!(state.baseline_ticks, 20);
        assert_eq!(state.interrupt_ticks, 0);
        assert_eq!(state.start_tsc, 1000);
        assert_eq!(state.overflow_tsc, None);
    }

    #[test]
    fn test_interruptions_are_recorded_minus_baseline() {
        // loop costs 10 ticks, two gaps of 500 and 300
        let ticks = vec![0, 10, 20, 520, 530, 830, 840, 850, 1000];
        let (state, _) = run_script(ticks, 1000, 16);
        assert_eq!(state.baseline_ticks, 10);
        assert_eq!(state.detections, 3);
        // 500, 300, 150 minus the 10-tick baseline, sorted
        assert_eq!(state.samples, vec![140, 290, 490]);
        assert_eq!(state.interrupt_ticks, 950 - 30);
        assert_eq!(state.overflow_offset(), None);
    }

    #[test]
    fn test_first_iteration_excluded_from_baseline() {
        // first delta is 2 ticks, every later one is 10
        let ticks = vec![0, 2, 12, 22, 32];
        let (state, _) = run_script(ticks, 30, 4);
        assert_eq!(state.baseline_ticks, 10);
    }

    #[test]
    fn test_first_iteration_counts_as_detection() {
        let ticks = vec![0, 400, 410, 420];
        let (state, _) = run_script(ticks, 415, 4);
        assert_eq!(state.detections, 1);
        assert_eq!(state.samples, vec![390]);
    }

    #[test]
    fn test_overflow_recorded_once() {
        // four gaps of 200 ticks but room for two samples only
        let ticks = vec![0, 10, 210, 410, 610, 810, 820];
        let (state, _) = run_script(ticks, 815, 2);
        assert_eq!(state.detections, 4);
        assert_eq!(state.samples.len(), 2);
        assert_eq!(state.overflow_tsc, Some(610));
        assert_eq!(state.overflow_offset(), Some(610));
        // the counted-only gaps still contribute to the sum
        assert_eq!(state.interrupt_ticks, 800 - 4 * 10);
    }

    #[test]
    fn test_no_main_loop_iteration_means_zero_baseline() {
        let ticks = vec![5, 500];
        let (state, consumed) = run_script(ticks, 100, 4);
        assert_eq!(consumed, 2);
        assert_eq!(state.baseline_ticks, 0);
        assert_eq!(state.detections, 1);
        assert_eq!(state.samples, vec![495]);
        assert_eq!(state.interrupt_ticks, 495);
    }

    #[test]
    fn test_samples_saturate_at_u32() {
        let big = u64::from(u32::MAX) + 1000;
        let ticks = vec![0, 10, 20, 20 + big, 30 + big];
        let (state, _) = run_script(ticks, 25 + big, 4);
        assert_eq!(state.samples, vec![u32::MAX - 10]);
        assert_eq!(state.interrupt_ticks, big - 10);
    }

    #[test]
    fn test_samples_strictly_above_threshold() {
        // a delta equal to the threshold is not an interruption
        let ticks = vec![0, 10, 110, 211, 221];
        let (state, _) = run_script(ticks, 215, 4);
        assert_eq!(state.detections, 1);
        assert_eq!(state.samples, vec![101 - 10]);
    }

    #[test]
    fn test_measure_aborted_before_start() {
        let barrier = StartStopBarrier::new();
        barrier.abort();
        let source = Scripted::new(vec![]);
        let config = config(100, 1);
        let err = measure(&source, 3, &config, &barrier, SampleBuffer::allocate(1).unwrap())
            .unwrap_err();
        assert!(matches!(err, JitterError::Aborted(3)));
        assert_eq!(source.consumed(), 0);
    }
}
