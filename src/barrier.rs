//! # Start/Stop Barrier
//!
//! Two one-shot flags shared between the orchestrator (single writer) and the
//! workers (spinning readers). Each flag goes from `false` to `true` exactly
//! once and carries no payload, so release/acquire ordering is all that is
//! needed. Waiting never blocks in the kernel: a blocking wait would itself
//! show up as an interruption on the measured CPU.

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of waiting for the start flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSignal {
    /// Measurement may begin
    Go,
    /// The run was withdrawn before it started
    Aborted,
}

#[derive(Debug, Default)]
pub struct StartStopBarrier {
    start: AtomicBool,
    stop: AtomicBool,
}

impl StartStopBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let every waiting worker begin sampling
    pub fn release_start(&self) {
        self.start.store(true, Ordering::Release);
    }

    /// Let every worker that finished sampling deliver its results
    pub fn release_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Withdraw a run that has not started yet.
    ///
    /// The stop flag is raised before the start flag so that a worker leaving
    /// its start wait always sees the abort.
    pub fn abort(&self) {
        self.stop.store(true, Ordering::Release);
        self.start.store(true, Ordering::Release);
    }

    /// Spin until the start flag is raised
    pub fn wait_for_start(&self) -> StartSignal {
        while !self.start.load(Ordering::Acquire) {
            hint::spin_loop();
        }
        if self.stop.load(Ordering::Acquire) {
            StartSignal::Aborted
        } else {
            StartSignal::Go
        }
    }

    /// Spin until the stop flag is raised
    pub fn wait_for_stop(&self) {
        while !self.stop.load(Ordering::Acquire) {
            hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_flags_start_lowered() {
        let barrier = StartStopBarrier::new();
        assert!(!barrier.start.load(Ordering::Acquire));
        assert!(!barrier.stop.load(Ordering::Acquire));
    }

    #[test]
    fn test_release_start_wakes_waiters() {
        let barrier = StartStopBarrier::new();
        thread::scope(|s| {
            let waiters: Vec<_> = (0..4)
                .map(|_| s.spawn(|| barrier.wait_for_start()))
                .collect();
            thread::sleep(Duration::from_millis(10));
            barrier.release_start();
            for w in waiters {
                assert_eq!(w.join().unwrap(), StartSignal::Go);
            }
        });
        assert!(barrier.start.load(Ordering::Acquire));
        assert!(!barrier.stop.load(Ordering::Acquire));
    }

    #[test]
    fn test_stop_after_start() {
        let barrier = StartStopBarrier::new();
        thread::scope(|s| {
            let w = s.spawn(|| {
                assert_eq!(barrier.wait_for_start(), StartSignal::Go);
                barrier.wait_for_stop();
            });
            barrier.release_start();
            thread::sleep(Duration::from_millis(5));
            barrier.release_stop();
            w.join().unwrap();
        });
    }

    #[test]
    fn test_abort_is_seen_by_start_waiters() {
        let barrier = StartStopBarrier::new();
        thread::scope(|s| {
            let w = s.spawn(|| barrier.wait_for_start());
            barrier.abort();
            assert_eq!(w.join().unwrap(), StartSignal::Aborted);
        });
    }
}
