//! # Tick Sources
//!
//! The sampling loop reads a free-running hardware counter twice per
//! iteration, so the read must not be a syscall. [`TickSource`] abstracts the
//! two read flavours the worker needs:
//!
//! - `read_serialized`: all earlier loads and stores are globally visible
//!   before the counter is read; used for the absolute start timestamp
//! - `read_exit_fenced`: later instructions wait for the read; cheaper and
//!   used inside the hot loop
//!
//! On x86_64 [`Tsc`] implements this with `mfence; lfence; rdtsc` and
//! `rdtscp; lfence` respectively.

/// Monotonic counter readable without entering the kernel
pub trait TickSource {
    /// Fully fenced read for absolute timestamps
    fn read_serialized(&self) -> u64;

    /// Read fenced on exit only, for the sampling loop
    fn read_exit_fenced(&self) -> u64;
}

/// The x86 Time Stamp Counter
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Tsc;

#[cfg(target_arch = "x86_64")]
impl TickSource for Tsc {
    #[inline(always)]
    fn read_serialized(&self) -> u64 {
        use core::arch::x86_64::{_mm_lfence, _mm_mfence, _rdtsc};
        // SAFETY: the fences and rdtsc are part of the x86_64 baseline
        // (SSE2) and have no memory-safety preconditions.
        unsafe {
            _mm_mfence();
            _mm_lfence();
            _rdtsc()
        }
    }

    #[inline(always)]
    fn read_exit_fenced(&self) -> u64 {
        use core::arch::x86_64::{__rdtscp, _mm_lfence};
        let mut aux: u32 = 0;
        // SAFETY: rdtscp is available wherever an invariant TSC is (checked
        // before any worker is spawned); `aux` is a valid out pointer.
        unsafe {
            let t = __rdtscp(&mut aux);
            _mm_lfence();
            t
        }
    }
}
