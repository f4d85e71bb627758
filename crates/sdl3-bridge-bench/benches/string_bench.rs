//! Native string conversion benchmarks.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sdl3_bridge_abi::ScopedCStr;
use sdl3_bridge_abi::string_abi::{from_native, with_c_str};

fn bench_scoped_c_str(c: &mut Criterion) {
    // 255 is the last inline size; the rest spill to the heap.
    let sizes: &[usize] = &[16, 64, 255, 256, 1024, 4096];
    let mut group = c.benchmark_group("scoped_c_str");

    for &size in sizes {
        let text = "A".repeat(size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &text, |b, text| {
            b.iter(|| {
                black_box(ScopedCStr::new(black_box(text)).map(|s| s.as_ptr()).is_ok());
            });
        });
        group.bench_with_input(BenchmarkId::new("std_cstring", size), &text, |b, text| {
            b.iter(|| {
                black_box(std::ffi::CString::new(black_box(text.as_str())).is_ok());
            });
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 256, 4096];
    let mut group = c.benchmark_group("from_native");

    for &size in sizes {
        let text = "B".repeat(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("lossy", size), &text, |b, text| {
            let _ = with_c_str(text, |ptr| {
                b.iter(|| {
                    // SAFETY: `ptr` stays valid for the closure.
                    black_box(unsafe { from_native(black_box(ptr)) });
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scoped_c_str, bench_decode);
criterion_main!(benches);
