/// Benchmarks for the receive path: frame parsing and history insertion.
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use debate_ws_client::ws::history::MessageHistory;
use debate_ws_client::ws::{JsonParser, MessageParser as _};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[expect(dead_code, reason = "Fields are only deserialized for the benchmark")]
struct RoundUpdate {
    debate_id: String,
    round: u32,
    speaker: String,
    scores: Vec<f64>,
    cache_hit_rate: f64,
}

const ROUND_UPDATE: &str = r#"{
    "debate_id": "d-1842",
    "round": 3,
    "speaker": "affirmative",
    "scores": [7.5, 8.0, 6.5],
    "cache_hit_rate": 0.93
}"#;

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest/parse");
    group.throughput(Throughput::Bytes(ROUND_UPDATE.len() as u64));

    let generic = JsonParser::<Value>::new();
    group.bench_function("JsonParser<Value>", |b| {
        b.iter(|| {
            generic
                .parse(std::hint::black_box(ROUND_UPDATE.as_bytes()))
                .expect("Deserialization should succeed")
        });
    });

    let typed = JsonParser::<RoundUpdate>::new();
    group.bench_function("JsonParser<RoundUpdate>", |b| {
        b.iter(|| {
            typed
                .parse(std::hint::black_box(ROUND_UPDATE.as_bytes()))
                .expect("Deserialization should succeed")
        });
    });

    group.finish();
}

fn bench_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest/history");
    let message: Value = serde_json::from_str(ROUND_UPDATE).expect("valid JSON");

    group.bench_function("push_at_capacity", |b| {
        let mut history = MessageHistory::with_capacity(1000);
        for _ in 0..1000 {
            history.push(message.clone());
        }
        b.iter(|| history.push(std::hint::black_box(message.clone())));
    });

    group.finish();
}

criterion_group!(benches, bench_parse, bench_history);
criterion_main!(benches);
