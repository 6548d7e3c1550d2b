use channels::rate_limiter::{NullRateLimiter, RateLimiter, TokenBucketRateLimiter};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::sync::atomic::AtomicBool;

fn bench_null_limiter(c: &mut Criterion) {
    let limiter = NullRateLimiter;
    let stopping = AtomicBool::new(false);

    let mut group = c.benchmark_group("rate_limiter/null");
    group.throughput(Throughput::Bytes(1));
    group.bench_function("acquire_send", |b| {
        b.iter(|| limiter.acquire_send(std::hint::black_box(1), &stopping).unwrap());
    });
    group.finish();
}

fn bench_token_bucket_within_budget(c: &mut Criterion) {
    // A generous per-call budget so every `acquire_send` call in the
    // benchmark loop is satisfied from the refill the call itself
    // triggers, never blocking on `thread::sleep`.
    let limiter = TokenBucketRateLimiter::new(1_000_000_000, 1_000_000_000);
    let stopping = AtomicBool::new(false);

    let mut group = c.benchmark_group("rate_limiter/token_bucket");
    group.throughput(Throughput::Bytes(1));
    group.bench_function("acquire_send_small_chunk", |b| {
        b.iter(|| limiter.acquire_send(std::hint::black_box(1), &stopping).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_null_limiter, bench_token_bucket_within_budget);
criterion_main!(benches);
