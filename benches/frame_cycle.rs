//! Submission cycle benchmarks.
//!
//! CPU-side only: the cycle runs against the GPU-timeline simulator, so the
//! numbers measure the state machine and bookkeeping, not a driver.

use cadence_renderer::{SimulatedGpu, SubmissionCycle};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

const TICKS_PER_BATCH: usize = 16;

fn tick_batch(cycle: &mut SubmissionCycle, gpu: &mut SimulatedGpu) {
    for _ in 0..TICKS_PER_BATCH {
        cycle
            .tick(gpu)
            .expect("simulated tick failed during benchmark");
    }
}

/// Cycle throughput when the simulated GPU retires work instantly.
fn instant_gpu(c: &mut Criterion) {
    c.bench_function("submission_cycle/instant_gpu", |b| {
        b.iter_batched(
            || (SubmissionCycle::new(), SimulatedGpu::new(3, 0)),
            |(mut cycle, mut gpu)| tick_batch(&mut cycle, &mut gpu),
            BatchSize::SmallInput,
        )
    });
}

/// Cycle throughput when every submission lingers and the fence gate has to
/// wait out the previous use of each slot.
fn lagging_gpu(c: &mut Criterion) {
    c.bench_function("submission_cycle/lagging_gpu", |b| {
        b.iter_batched(
            || {
                (
                    SubmissionCycle::new(),
                    SimulatedGpu::new(3, 2_000_000), // 2ms simulated latency
                )
            },
            |(mut cycle, mut gpu)| tick_batch(&mut cycle, &mut gpu),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, instant_gpu, lagging_gpu);
criterion_main!(benches);
