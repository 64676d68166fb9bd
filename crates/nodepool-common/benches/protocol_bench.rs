// Criterion benchmarks for nodepool-common framing
//
// Run benchmarks with:
//   cargo bench -p nodepool-common

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nodepool_common::transport::{JsonLineCodec, LineAccumulator};
use nodepool_common::{Request, Response};
use serde_json::json;

fn bench_request_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_encoding");

    group.bench_function("node_list", |b| {
        let req = Request::new(1, "Node.List", json!({"Start": null, "Count": 100}));
        b.iter(|| JsonLineCodec::encode_request(black_box(&req)));
    });

    group.bench_function("issue_batch_100", |b| {
        let issues: Vec<_> = (0..100)
            .map(|i| json!({"asset": "a".repeat(64), "owner": "o".repeat(44), "nonce": i}))
            .collect();
        let req = Request::new(1, "Bitmarks.Issue", json!({"issues": issues}));
        b.iter(|| JsonLineCodec::encode_request(black_box(&req)));
    });

    group.finish();
}

fn bench_response_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_decoding");

    let addresses: Vec<_> = (0..100).map(|i| format!("10.0.0.{}:2130", i)).collect();
    let line = JsonLineCodec::encode_response(&Response::success(7, json!({"addresses": addresses})))
        .unwrap();
    let body = &line[..line.len() - 1];

    group.bench_function("peer_list_100", |b| {
        b.iter(|| JsonLineCodec::decode_response(black_box(body)));
    });

    group.finish();
}

fn bench_accumulator(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_accumulator");

    let mut stream = Vec::new();
    for id in 0..64 {
        stream.extend(JsonLineCodec::encode_response(&Response::success(id, json!({"ok": true}))).unwrap());
    }

    group.bench_function("whole_batch", |b| {
        b.iter(|| {
            let mut acc = LineAccumulator::new();
            acc.push(black_box(&stream))
        });
    });

    group.bench_function("split_reads_16b", |b| {
        b.iter(|| {
            let mut acc = LineAccumulator::new();
            let mut count = 0;
            for chunk in black_box(&stream).chunks(16) {
                count += acc.push(chunk).map_or(0, |segments| segments.len());
            }
            count
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_request_encoding,
    bench_response_decoding,
    bench_accumulator
);
criterion_main!(benches);
