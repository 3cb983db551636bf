//! Benchmarks for the relay fan-out path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use parley::websocket::{
    ChatMessage, OutboundFormat, Registry, SessionId, SlowConsumerPolicy,
};
use std::sync::Arc;
use tokio::sync::mpsc;

type Inboxes = Vec<mpsc::Receiver<Arc<ChatMessage>>>;

fn create_registry(sessions: usize, capacity: usize) -> (Registry, Inboxes) {
    let mut registry = Registry::new(SlowConsumerPolicy::Drop);
    let mut inboxes = Vec::with_capacity(sessions);

    for _ in 0..sessions {
        let (tx, rx) = mpsc::channel(capacity);
        registry.register(SessionId::new(), tx);
        inboxes.push(rx);
    }

    (registry, inboxes)
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    let message = Arc::new(ChatMessage::new(SessionId::new().to_string(), "hello, world"));

    for sessions in [10, 100, 1000] {
        group.throughput(Throughput::Elements(sessions as u64));

        group.bench_function(format!("fan_out_{}", sessions), |b| {
            b.iter_batched(
                || create_registry(sessions, 1),
                |(mut registry, inboxes)| {
                    let outcome = registry.broadcast(black_box(Arc::clone(&message)));
                    (outcome, inboxes)
                },
                BatchSize::SmallInput,
            )
        });

        // Every mailbox already full: measures the drop path
        group.bench_function(format!("fan_out_full_{}", sessions), |b| {
            let (mut registry, _inboxes) = create_registry(sessions, 1);
            registry.broadcast(Arc::clone(&message));

            b.iter(|| registry.broadcast(black_box(Arc::clone(&message))));
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let sender = SessionId::new().to_string();
    let viewer = SessionId::new().to_string();
    let message = ChatMessage::new(sender, "<b>hello</b> & welcome to the room");

    group.bench_function("json", |b| {
        b.iter(|| OutboundFormat::Json.encode(black_box(&message), &viewer))
    });

    group.bench_function("htmx", |b| {
        b.iter(|| OutboundFormat::Htmx.encode(black_box(&message), &viewer))
    });

    group.finish();
}

criterion_group!(benches, bench_broadcast, bench_encode);
criterion_main!(benches);
