//! # Statistics Engine
//!
//! Nearest-rank percentiles and the median absolute deviation (MAD) over the
//! sorted interruption samples of one worker. Everything stays in the tick
//! domain; conversion to nanoseconds happens only when a report row is built.

/// Nearest-rank percentile `a/b` of an ascending slice.
///
/// The rank is `floor(n * a / b)`, clamped to the last element. For an even
/// number of samples and a non-zero rank the element is averaged with its
/// predecessor. An empty slice yields 0.
pub fn percentile(sorted: &[u32], a: usize, b: usize) -> u32 {
    debug_assert!(b > 0);
    debug_assert!(is_ascending(sorted));

    let n = sorted.len();
    if n == 0 {
        return 0;
    }
    let i = (n * a / b).min(n - 1);
    if n % 2 == 1 || i == 0 {
        sorted[i]
    } else {
        ((u64::from(sorted[i]) + u64::from(sorted[i - 1])) / 2) as u32
    }
}

/// Median of an ascending slice
pub fn median(sorted: &[u32]) -> u32 {
    percentile(sorted, 1, 2)
}

/// Median absolute deviation of an ascending slice
pub fn mad(sorted: &[u32]) -> u32 {
    let mut scratch = Vec::with_capacity(sorted.len());
    mad_with(sorted, &mut scratch)
}

/// Median absolute deviation, reusing `scratch` for the deviations
pub fn mad_with(sorted: &[u32], scratch: &mut Vec<u32>) -> u32 {
    if sorted.is_empty() {
        return 0;
    }
    let m = median(sorted);
    scratch.clear();
    scratch.extend(sorted.iter().map(|&x| x.abs_diff(m)));
    scratch.sort_unstable();
    median(scratch)
}

fn is_ascending(xs: &[u32]) -> bool {
    xs.windows(2).all(|w| w[0] <= w[1])
}
