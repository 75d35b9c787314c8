use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use wardrobe_offline::rehydrate::{encode_snapshot, validate_snapshot};
use wardrobe_offline::{
    EventSource, InMemoryStore, NewWearEvent, PendingEventQueue, QueueConfig, MAX_QUEUE_SIZE,
};

fn wear(n: usize) -> NewWearEvent {
    NewWearEvent::new(
        format!("outfit-{n}"),
        ["top-1", "bottom-2", "shoes-3"],
        format!("2024-01-{:02}", n % 28 + 1),
        EventSource::RecommendationEngine,
    )
}

fn full_queue(rt: &tokio::runtime::Runtime) -> PendingEventQueue {
    rt.block_on(async {
        let queue = PendingEventQueue::new(InMemoryStore::arc(), QueueConfig::default());
        queue.rehydrate().await.unwrap();
        for n in 0..MAX_QUEUE_SIZE {
            queue.add(wear(n)).unwrap();
        }
        queue
    })
}

fn bench_add(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("add");

    group.bench_function("with_eviction", |b| {
        let queue = full_queue(&rt);
        let mut n = MAX_QUEUE_SIZE;
        b.iter(|| {
            n += 1;
            black_box(queue.add(wear(n)).unwrap());
        });
    });

    group.bench_function("replace_same_key", |b| {
        let queue = full_queue(&rt);
        b.iter(|| {
            black_box(queue.add(wear(7)).unwrap());
        });
    });

    group.finish();
}

fn bench_reads(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let queue = full_queue(&rt);

    c.bench_function("get_retryable_full_queue", |b| {
        b.iter(|| black_box(queue.get_retryable()));
    });
}

fn bench_snapshot_validation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("validate_snapshot");

    for size in [1usize, 10, MAX_QUEUE_SIZE] {
        let queue = full_queue(&rt);
        let events: Vec<_> = queue.events().into_iter().take(size).collect();
        let raw = encode_snapshot(&events).unwrap();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &raw, |b, raw| {
            b.iter(|| black_box(validate_snapshot(Some(raw))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add, bench_reads, bench_snapshot_validation);
criterion_main!(benches);
