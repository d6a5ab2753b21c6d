use camera_viewfinder::fps::{FrameRateEstimator, RollingHistory};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const PERIOD_NS: u64 = 33_333_333;

fn bench_ingest_and_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimator");

    for target in [30.0, 60.0, 240.0] {
        group.bench_with_input(BenchmarkId::new("sample", target), &target, |b, &target| {
            let estimator = FrameRateEstimator::new(target, "bench").unwrap();
            let mut timestamp = 0u64;
            b.iter(|| {
                timestamp += PERIOD_NS;
                estimator.add_timestamp(black_box(timestamp));
                black_box(estimator.try_compute().unwrap());
            });
        });
    }

    group.finish();
}

fn bench_history(c: &mut Criterion) {
    c.bench_function("history_push_average", |b| {
        let mut history = RollingHistory::new(30);
        let mut fps = 29.0;
        b.iter(|| {
            fps += 0.01;
            history.push(black_box(fps));
            black_box(history.average());
        });
    });
}

criterion_group!(benches, bench_ingest_and_compute, bench_history);
criterion_main!(benches);
