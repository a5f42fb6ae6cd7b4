//! Performance benchmarks for the sync layer.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use planning_poker::{
    ClientConfig, Estimate, MemoryStore, PokerClient, SessionApi, Target,
};
use std::sync::Arc;

fn create_client() -> PokerClient {
    PokerClient::init(Arc::new(MemoryStore::new()), ClientConfig::default())
}

/// Benchmark attach/detach churn on a single key
fn bench_attach_detach(c: &mut Criterion) {
    let client = create_client();
    let id = client.sessions().create_session("Bench", "u0").unwrap();
    let target = Target::from(SessionApi::session_ref(&id));

    c.bench_function("attach_detach_last_observer", |b| {
        b.iter(|| {
            let observer = client.bridge().attach(target.clone()).unwrap();
            black_box(observer.state());
        });
    });

    let _anchor = client.bridge().attach(target.clone()).unwrap();
    c.bench_function("attach_detach_shared_key", |b| {
        b.iter(|| {
            let observer = client.bridge().attach(target.clone()).unwrap();
            black_box(observer.state());
        });
    });
}

/// Benchmark a vote reaching N observers of the session
fn bench_vote_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("vote_fan_out");

    for observers in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("observers", observers),
            &observers,
            |b, &count| {
                let client = create_client();
                let id = client.sessions().create_session("Bench", "u0").unwrap();
                for i in 1..8 {
                    client.sessions().join_session(&id, &format!("u{}", i)).unwrap();
                }
                let watches: Vec<_> = (0..count)
                    .map(|_| client.watch_session(&id).unwrap())
                    .collect();

                let mut i = 0usize;
                b.iter(|| {
                    let vote = Estimate::ALL[i % Estimate::ALL.len()];
                    i += 1;
                    client
                        .sessions()
                        .update_participant_number(&id, "u1", vote)
                        .unwrap();
                    // Keep observer buffers from filling up
                    for watch in &watches {
                        while watch.observer().try_recv().is_ok() {}
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_attach_detach, bench_vote_fan_out);
criterion_main!(benches);
