use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use os_jitter::calibration::{CalibrationFactors, NSEC_PER_SEC};
use os_jitter::stats;

// Interruption-like samples: mostly short, with a long tail.
fn make_samples(count: usize, seed: u64) -> Vec<u32> {
    let mut state = seed;
    let mut xs: Vec<u32> = (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let r = (state % 1000) as u32;
            if r < 990 {
                200 + r
            } else {
                20_000 + r * 50
            }
        })
        .collect();
    xs.sort_unstable();
    xs
}

fn bench_percentiles(c: &mut Criterion) {
    let mut group = c.benchmark_group("stats/report_row");
    for &n in &[1_000usize, 100_000, 1_050_000] {
        let xs = make_samples(n, 0x5eed);
        let mut scratch = Vec::with_capacity(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("percentiles", n), &xs, |b, xs| {
            b.iter(|| {
                for (a, d) in [(1, 2), (1, 5), (4, 5), (90, 100), (99, 100), (999, 1000)] {
                    black_box(stats::percentile(black_box(xs), a, d));
                }
            })
        });
        group.bench_with_input(BenchmarkId::new("mad", n), &xs, |b, xs| {
            b.iter(|| black_box(stats::mad_with(black_box(xs), &mut scratch)))
        });
    }
    group.finish();
}

fn bench_conversion(c: &mut Criterion) {
    let cal = CalibrationFactors::new(2_600_000_000, NSEC_PER_SEC, 0).unwrap();
    let xs = make_samples(10_000, 0xfeed);

    let mut group = c.benchmark_group("calibration");
    group.throughput(Throughput::Elements(xs.len() as u64));
    group.bench_function("to_target", |b| {
        b.iter(|| {
            xs.iter()
                .map(|&t| cal.to_target(u64::from(t)))
                .fold(0u64, u64::wrapping_add)
        })
    });
    group.bench_function("factors", |b| {
        b.iter(|| CalibrationFactors::new(black_box(2_600_000_000), NSEC_PER_SEC, black_box(600)))
    });
    group.finish();
}

criterion_group!(benches, bench_percentiles, bench_conversion);
criterion_main!(benches);
