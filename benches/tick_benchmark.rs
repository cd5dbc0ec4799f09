/*!
 * Tick Loop Benchmarks
 *
 * Cost of one host tick over many live processes, and of the submit/complete cycle
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use tickflow::{
    BatchPolicy, Context, FrameTime, Poll, Scheduler, SchedulerConfig, UnitConfig,
};

fn scheduler(capacity: usize) -> Scheduler {
    let config = SchedulerConfig::minimal()
        .with_default_unit(
            UnitConfig::new(capacity)
                .with_queue_capacity(capacity)
                .with_add_batch(BatchPolicy::All),
        );
    Scheduler::new(config).unwrap()
}

const FRAME: FrameTime = FrameTime::new(Duration::from_micros(16_667));

fn bench_update_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_tick");

    for live in [100, 1000, 10_000] {
        let scheduler = scheduler(live);
        for _ in 0..live {
            scheduler
                .run(Context::Update, |tick| {
                    black_box(tick.delta);
                    Poll::Continue
                })
                .unwrap();
        }
        scheduler.update(FRAME);

        group.bench_with_input(BenchmarkId::from_parameter(live), &live, |b, _| {
            b.iter(|| black_box(scheduler.update(FRAME)));
        });
    }

    group.finish();
}

fn bench_submit_complete(c: &mut Criterion) {
    let scheduler = scheduler(1024);
    c.bench_function("submit_and_complete", |b| {
        b.iter(|| {
            let handle = scheduler.run(Context::Update, |_| Poll::Done).unwrap();
            scheduler.update(FRAME);
            black_box(handle.state())
        });
    });
}

fn bench_idle_tick(c: &mut Criterion) {
    let scheduler = scheduler(16);
    c.bench_function("idle_tick", |b| {
        b.iter(|| black_box(scheduler.update(FRAME)));
    });
}

criterion_group!(benches, bench_update_tick, bench_submit_complete, bench_idle_tick);
criterion_main!(benches);
