use channels::provider::{Provider, RingProducer};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::sync::atomic::AtomicBool;

fn bench_single_producer_publish(c: &mut Criterion) {
    let provider: Provider<u64, u64> = Provider::new(1 << 16, 1 << 16).unwrap();
    let producer = provider.input_producer();
    let mut consumer = provider.input_consumer();
    let stopping = AtomicBool::new(false);

    let mut group = c.benchmark_group("sequencer/single_producer");
    group.throughput(Throughput::Elements(1));
    group.bench_function("acquire_publish", |b| {
        b.iter(|| {
            let seq = producer.acquire(&stopping).unwrap();
            *producer.slot_mut(seq) = std::hint::black_box(seq as u64);
            producer.release(seq);
            consumer.release_through(seq);
        });
    });
    group.finish();
}

fn bench_multi_producer_publish(c: &mut Criterion) {
    let provider: Provider<u64, u64> = Provider::new(1 << 16, 1 << 16).unwrap();
    let p1 = provider.output_producer();
    let p2 = provider.output_producer();
    let mut consumer = provider.output_consumer();
    let stopping = AtomicBool::new(false);

    let mut group = c.benchmark_group("sequencer/multi_producer");
    group.throughput(Throughput::Elements(2));
    group.bench_function("two_threads_acquire_publish", |b| {
        b.iter(|| {
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    let seq = p1.acquire(&stopping).unwrap();
                    *p1.slot_mut(seq) = std::hint::black_box(seq as u64);
                    p1.release(seq);
                });
                scope.spawn(|| {
                    let seq = p2.acquire(&stopping).unwrap();
                    *p2.slot_mut(seq) = std::hint::black_box(seq as u64);
                    p2.release(seq);
                });
            });
            if let Some((_, high)) = consumer.poll() {
                consumer.release_through(high);
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_single_producer_publish, bench_multi_producer_publish);
criterion_main!(benches);
