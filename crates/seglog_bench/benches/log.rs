//! Log engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use seglog_bench::{bench_config, populated_log, random_data, temp_log};

/// Benchmark single appends with different payload sizes.
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (_dir, log) = temp_log(bench_config(1 << 16));
            let data = random_data(size);

            b.iter(|| {
                let seq = log.append(black_box(&data)).unwrap();
                black_box(seq);
            });
        });
    }

    group.finish();
}

/// Benchmark checkpoints, which sync before writing.
fn bench_checkpoint(c: &mut Criterion) {
    c.bench_function("checkpoint", |b| {
        let (_dir, log) = temp_log(bench_config(1 << 16));
        let data = random_data(64);

        b.iter(|| {
            log.append(&data).unwrap();
            let seq = log.checkpoint(black_box(&data)).unwrap();
            black_box(seq);
        });
    });
}

/// Benchmark appends that rotate every few records.
fn bench_append_with_rotation(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_rotating");

    for per_segment in [16u64, 256].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(per_segment),
            per_segment,
            |b, &per_segment| {
                let (_dir, log) = temp_log(bench_config(per_segment).max_segments(8));
                let data = random_data(128);

                b.iter(|| {
                    let seq = log.append(black_box(&data)).unwrap();
                    black_box(seq);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark random reads across sealed and active segments.
fn bench_random_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_read");

    for count in [1_000usize, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let (_dir, log) = populated_log(count, 256, bench_config(1024));
            let mut rng = rand::thread_rng();

            b.iter(|| {
                let id = rng.gen_range(1..=count as u64);
                let payload = log.read(black_box(id)).unwrap();
                black_box(payload);
            });
        });
    }

    group.finish();
}

/// Benchmark full replay from the start and from the last checkpoint.
fn bench_read_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_all");
    group.sample_size(20);

    let (_dir, log) = populated_log(5_000, 128, bench_config(512));
    log.checkpoint(b"checkpoint").unwrap();
    for _ in 0..500 {
        log.append(&random_data(128)).unwrap();
    }

    group.bench_function("from_start", |b| {
        b.iter(|| black_box(log.read_all(false).unwrap()));
    });
    group.bench_function("from_checkpoint", |b| {
        b.iter(|| black_box(log.read_all(true).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_append,
    bench_checkpoint,
    bench_append_with_rotation,
    bench_random_read,
    bench_read_all,
);

criterion_main!(benches);
