//! Token registry and trampoline dispatch overhead.
//!
//! Prints one `REGISTRY_BENCH` percentile line per benchmark next to
//! criterion's own output.

use std::cell::RefCell;
use std::hint::black_box;
use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sdl3_bridge_abi::callback_abi::{Registration, TimerCallback, timer_trampoline};
use sdl3_bridge_membrane::UserDataStore;

/// Per-sample ns/op, reported as p50/p99 once criterion is done.
#[derive(Default)]
struct OpSamples(Vec<f64>);

impl OpSamples {
    fn record(&mut self, iters: u64, dur: Duration) {
        self.0.push(dur.as_nanos() as f64 / iters as f64);
    }

    fn report(&mut self, label: &str) {
        if self.0.is_empty() {
            return;
        }
        self.0.sort_by(f64::total_cmp);
        let at = |p: f64| self.0[((self.0.len() - 1) as f64 * p).round() as usize];
        println!(
            "REGISTRY_BENCH bench={label} samples={} p50_ns_op={:.3} p99_ns_op={:.3}",
            self.0.len(),
            at(0.50),
            at(0.99),
        );
    }
}

fn timed(
    group: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>,
    label: &str,
    mut op: impl FnMut(),
) {
    for _ in 0..10_000 {
        op();
    }
    let samples = RefCell::new(OpSamples::default());
    group.bench_function(BenchmarkId::new(label, "global"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                op();
            }
            let dur = start.elapsed().max(Duration::from_nanos(1));
            samples.borrow_mut().record(iters, dur);
            dur
        });
    });
    samples.borrow_mut().report(label);
}

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    group.throughput(Throughput::Elements(1));

    let store = UserDataStore::new();
    timed(&mut group, "add_remove", || {
        let token = store.add(black_box(7_u64));
        black_box(store.remove(token));
    });

    let token = store.add(42_u64);
    timed(&mut group, "get_hit", || {
        black_box(store.get::<u64>(black_box(token)));
    });

    let stale = store.add(0_u64);
    store.remove(stale);
    timed(&mut group, "get_stale", || {
        black_box(store.get::<u64>(black_box(stale)));
    });

    let registration = Registration::new(TimerCallback::new(|_, interval| interval));
    let userdata = registration.userdata();
    timed(&mut group, "timer_dispatch", || {
        // SAFETY: userdata is a live token.
        black_box(unsafe { timer_trampoline(black_box(userdata), 1, 16) });
    });

    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(1))
        .measurement_time(Duration::from_secs(2))
        .sample_size(100);
    targets = bench_registry
);
criterion_main!(benches);
