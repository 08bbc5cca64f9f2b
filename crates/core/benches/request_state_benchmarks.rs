use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};

use chrono::{TimeZone, Utc};
use oagr_core::{Identifier, LookupResult, RequestState, StateDefaults, StateParams};
use serde_json::json;

fn identifiers(n: usize) -> Vec<Identifier> {
    (0..n)
        .map(|i| Identifier::parse(format!("10.1000/{i:08}")).unwrap())
        .collect()
}

fn fresh_state(n: usize) -> RequestState {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    RequestState::new(
        identifiers(n),
        StateParams::default().starting_at(start),
        &StateDefaults::default(),
    )
    .unwrap()
}

fn bench_get_due(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_due");

    for size in [1_000usize, 100_000] {
        let state = fresh_state(size);
        let now = state.start();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(state.get_due(now)).len());
        });
    }

    group.finish();
}

fn bench_record_result(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_result");

    // One full batch answered: a third each of results, errors, processing.
    for batch in [100usize, 1_000] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter_batched(
                || {
                    let state = fresh_state(100_000);
                    let due = state.get_due(state.start());
                    let mut result = LookupResult::default();
                    for (i, id) in due.iter().take(batch).enumerate() {
                        match i % 3 {
                            0 => result.results.push(json!({"identifier": [{"id": id.as_str()}]})),
                            1 => result.errors.push(json!({"identifier": {"id": id.as_str()}})),
                            _ => result.processing.push(json!({"identifier": {"id": id.as_str()}})),
                        }
                    }
                    (state, result)
                },
                |(mut state, result)| black_box(state.record_result(result)),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_document_round_trip(c: &mut Criterion) {
    let state = fresh_state(10_000);

    c.bench_function("document_round_trip_10k", |b| {
        b.iter(|| {
            let json = state.to_json().unwrap();
            black_box(RequestState::from_json(&json).unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_get_due,
    bench_record_result,
    bench_document_round_trip
);
criterion_main!(benches);
