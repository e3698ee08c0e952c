//! # Frequency Calibration
//!
//! Converts counter ticks into another time base (nanoseconds, in practice)
//! with a single multiply and shift instead of a division or floating point.
//! The factors are computed the way the Linux clocksource code computes its
//! `mult`/`shift` pairs: the largest shift whose multiplier still leaves enough
//! headroom so that `ticks * mult` fits in 64 bits for every tick count within
//! the requested range.
//!
//! ```rust
//! use os_jitter::calibration::{CalibrationFactors, NSEC_PER_SEC};
//!
//! // a 2.6 GHz TSC
//! let cal = CalibrationFactors::new(2_600_000_000, NSEC_PER_SEC, 0).unwrap();
//! let ns = cal.to_target(2_600_000_000);
//! // within a tenth of a ppm
//! assert!(ns.abs_diff(NSEC_PER_SEC) <= 100);
//! ```

use crate::error::{JitterError, Result};
use serde::{Deserialize, Serialize};

/// Nanoseconds per second, the target frequency for tick to ns conversion
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Range bound used when the caller passes `maxsec == 0`
pub const DEFAULT_MAX_SECS: u32 = 600;

/// Fixed-point conversion factors: `target = (ticks * multiplier) >> shift`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationFactors {
    multiplier: u32,
    shift: u32,
}

impl CalibrationFactors {
    /// Compute the factors for converting `from` Hz ticks into `to` Hz units.
    ///
    /// `maxsec` is the conversion range in seconds for which the 64-bit
    /// product `ticks * multiplier` must not overflow (0 selects
    /// [`DEFAULT_MAX_SECS`]). Larger ranges trade away precision.
    pub fn new(from: u64, to: u64, maxsec: u32) -> Result<Self> {
        if from == 0 || to == 0 {
            return Err(JitterError::config(format!(
                "calibration frequencies must be non-zero (from={} to={})",
                from, to
            )));
        }
        let maxsec = if maxsec == 0 { DEFAULT_MAX_SECS } else { maxsec };

        // Every significant bit of the range above 32 bits costs one bit of
        // multiplier headroom.
        let mut range = (u128::from(maxsec) * u128::from(from)) >> 32;
        let mut sftacc: u32 = 32;
        while range != 0 {
            range >>= 1;
            sftacc = sftacc.checked_sub(1).ok_or_else(|| {
                JitterError::config(format!(
                    "conversion range of {} s at {} Hz exceeds 64 bits",
                    maxsec, from
                ))
            })?;
        }

        let from = u128::from(from);
        let to = u128::from(to);
        let mut shift: u32 = 32;
        let mult = loop {
            let mult = ((to << shift) + from / 2) / from;
            if (mult >> sftacc) == 0 || shift == 0 {
                break mult;
            }
            shift -= 1;
        };

        let multiplier = u32::try_from(mult)
            .ok()
            .filter(|m| (u64::from(*m) >> sftacc) == 0)
            .ok_or_else(|| {
                JitterError::config(format!(
                    "target frequency {} is too large relative to {} Hz",
                    to, from
                ))
            })?;
        if multiplier == 0 {
            return Err(JitterError::config(format!(
                "source frequency {} Hz is too large to resolve target frequency {}",
                from, to
            )));
        }

        Ok(Self { multiplier, shift })
    }

    /// Calibrate for tick to nanosecond conversion given a TSC rate in kHz
    pub fn for_tsc_khz(tsc_khz: u32, maxsec: u32) -> Result<Self> {
        Self::new(u64::from(tsc_khz) * 1000, NSEC_PER_SEC, maxsec)
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// Convert a tick count into the target time base.
    ///
    /// The product is widened, so values beyond the calibrated range still
    /// convert correctly, just without the 64-bit guarantee.
    #[inline]
    pub fn to_target(&self, ticks: u64) -> u64 {
        ((u128::from(ticks) * u128::from(self.multiplier)) >> self.shift) as u64
    }
}
