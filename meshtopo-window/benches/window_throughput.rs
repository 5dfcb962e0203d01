use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meshtopo_types::Span;
use meshtopo_window::{Event, EventTimeScheduler, SessionWindow, TraceGroupWindow};

/// Admission into a single hot key (append path)
fn bench_admit_single_key(c: &mut Criterion) {
    let scheduler = Arc::new(EventTimeScheduler::new());
    let window = SessionWindow::new(Duration::from_secs(3600), scheduler).unwrap();
    let mut ts = 0i64;

    c.bench_function("admit_single_key", |b| {
        b.iter(|| {
            ts += 1;
            window.admit(black_box("hot"), black_box(ts), black_box(1u64));
        });
    });
}

/// Admission spread across many keys
fn bench_admit_many_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("admit_many_keys");

    for keys in [10usize, 1_000, 10_000].iter() {
        let names: Vec<String> = (0..*keys).map(|i| format!("key-{}", i)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(keys), keys, |b, _| {
            let scheduler = Arc::new(EventTimeScheduler::new());
            let window = SessionWindow::new(Duration::from_secs(3600), scheduler).unwrap();
            let mut i = 0usize;
            b.iter(|| {
                i += 1;
                window.admit(names[i % names.len()].as_str(), black_box(i as i64), 0u8);
            });
        });
    }
    group.finish();
}

/// Expiring a full window of traces
fn bench_expire_traces(c: &mut Criterion) {
    let mut group = c.benchmark_group("expire_traces");

    for traces in [100usize, 1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(traces), traces, |b, &traces| {
            b.iter_with_setup(
                || {
                    let scheduler = Arc::new(EventTimeScheduler::new());
                    let window =
                        TraceGroupWindow::without_passthrough(Duration::from_millis(100), scheduler)
                            .unwrap();
                    for t in 0..traces {
                        let trace = format!("trace-{}", t);
                        window.admit(Span::new(trace.as_str(), "root", None, "gateway", t as i64));
                        window.admit(Span::new(trace.as_str(), "child", Some("root"), "svc", t as i64 + 1));
                    }
                    window
                },
                |window| black_box(window.on_timer(i64::MAX).len()),
            );
        });
    }
    group.finish();
}

/// Snapshot of a populated window
fn bench_snapshot(c: &mut Criterion) {
    let scheduler = Arc::new(EventTimeScheduler::new());
    let window = meshtopo_window::GroupingWindow::new(
        "bench",
        meshtopo_window::WindowConfig::session(Duration::from_secs(60)),
        scheduler,
    )
    .unwrap();
    for i in 0..1_000i64 {
        window.admit(Event::new(format!("k{}", i % 100), i, i));
    }

    c.bench_function("snapshot_1000_events", |b| {
        b.iter(|| black_box(window.snapshot().runs.len()));
    });
}

criterion_group!(
    benches,
    bench_admit_single_key,
    bench_admit_many_keys,
    bench_expire_traces,
    bench_snapshot,
);
criterion_main!(benches);
