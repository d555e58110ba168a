use criterion::{criterion_group, criterion_main, Criterion};
use time::{Duration, OffsetDateTime};
use visit_ledger_core::{
    append_record, reconstruct_history, register_subject, FixedClock, MemoryLedger,
};

fn seeded_ledger(records: i64) -> MemoryLedger {
    let mut ledger = MemoryLedger::new();
    if let Err(err) = register_subject(&mut ledger, "bench-patient", br#"{"name":"bench"}"#) {
        panic!("benchmark registration failed: {err}");
    }
    for minute in 0..records {
        let clock = FixedClock(OffsetDateTime::UNIX_EPOCH + Duration::minutes(minute));
        let payload = format!("visit {minute}: follow-up, vitals stable");
        if let Err(err) = append_record(&mut ledger, &clock, "bench-patient", payload.as_bytes()) {
            panic!("benchmark append failed: {err}");
        }
    }
    ledger
}

fn bench_reconstruct(c: &mut Criterion) {
    let ledger = seeded_ledger(1_000);

    c.bench_function("reconstruct_history_1000_records", |b| {
        b.iter(|| {
            if let Err(err) = reconstruct_history(&ledger, "bench-patient") {
                panic!("reconstruct benchmark failed: {err}");
            }
        });
    });
}

fn bench_append(c: &mut Criterion) {
    c.bench_function("append_record_onto_500_records", |b| {
        b.iter_batched(
            || seeded_ledger(500),
            |mut ledger| {
                let clock = FixedClock(OffsetDateTime::UNIX_EPOCH + Duration::days(30));
                if let Err(err) = append_record(&mut ledger, &clock, "bench-patient", b"discharge") {
                    panic!("append benchmark failed: {err}");
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(history_benches, bench_reconstruct, bench_append);
criterion_main!(history_benches);
