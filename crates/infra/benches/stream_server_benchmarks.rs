use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use telstar_infra::{FakeStreamServer, StreamServer};
use uuid::Uuid;

fn bench_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_throughput");

    for batch_size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(BenchmarkId::new("xadd_pipeline", batch_size), batch_size, |b, &size| {
            let server = FakeStreamServer::new();
            b.iter(|| {
                let rows: Vec<(String, Uuid, serde_json::Value)> = (0..size)
                    .map(|i| ("orders".to_string(), Uuid::new_v4(), serde_json::json!({"n": i})))
                    .collect();
                black_box(server.xadd_pipeline(&rows, Duration::ZERO).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_read_then_ack_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_then_ack_latency");
    group.sample_size(200);

    group.bench_function("single_message_round_trip", |b| {
        let server = FakeStreamServer::new();
        server.xgroup_create("orders", "billing", "0").unwrap();

        b.iter(|| {
            let ids = server
                .xadd_pipeline(&[("orders".to_string(), Uuid::new_v4(), serde_json::json!({}))], Duration::ZERO)
                .unwrap();
            let records = server
                .xreadgroup_new(&["orders".to_string()], "billing", "c1", 0)
                .unwrap();
            black_box(&records);
            server.xack("orders", "billing", &ids).unwrap();
        });
    });

    group.finish();
}

fn bench_pending_scan_with_backlog(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending_scan_with_backlog");

    for backlog in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("xpending_summary", backlog), backlog, |b, &size| {
            let server = FakeStreamServer::new();
            server.xgroup_create("orders", "billing", "0").unwrap();
            let rows: Vec<(String, Uuid, serde_json::Value)> = (0..size)
                .map(|i| ("orders".to_string(), Uuid::new_v4(), serde_json::json!({"n": i})))
                .collect();
            server.xadd_pipeline(&rows, Duration::ZERO).unwrap();
            server.xreadgroup_new(&["orders".to_string()], "billing", "c1", 0).unwrap();

            b.iter(|| {
                black_box(server.xpending_summary("orders", "billing").unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_append_throughput,
    bench_read_then_ack_latency,
    bench_pending_scan_with_backlog
);
criterion_main!(benches);
