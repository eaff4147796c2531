//! Allocation benchmarks
//!
//! Measures the bump fast path for each object kind and the id search used
//! by every field and method lookup.

use cellheap::{find_global_index, Core, HeapConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_raw_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_raw");

    for size in [8usize, 64, 256, 1024].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut core = Core::new(0, HeapConfig::default()).unwrap();
            b.iter(|| black_box(core.allocate_raw(black_box(size)).unwrap()));
        });
    }

    group.finish();
}

fn bench_typed_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_typed");
    let mut core = Core::new(0, HeapConfig::default()).unwrap();

    group.bench_function("struct_8_fields", |b| {
        b.iter(|| black_box(core.allocate_struct(8, 64).unwrap()));
    });
    group.bench_function("class_4_methods", |b| {
        b.iter(|| black_box(core.allocate_class(4, 4, 32, 1).unwrap()));
    });
    group.bench_function("pointer_array_32", |b| {
        b.iter(|| black_box(core.allocate_array(true, 32, 8).unwrap()));
    });
    group.bench_function("closure_4_upvalues", |b| {
        b.iter(|| black_box(core.allocate_closure(0x1000, 0, 4).unwrap()));
    });

    group.finish();
}

fn bench_find_global_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_global_index");

    for len in [4usize, 16, 64, 256].iter() {
        let table: Vec<u32> = (0..*len as u32).map(|i| i * 7 + 3).collect();
        group.bench_with_input(BenchmarkId::new("hit", len), &table, |b, table| {
            let target = table[table.len() / 2];
            b.iter(|| find_global_index(black_box(table), black_box(target)));
        });
        group.bench_with_input(BenchmarkId::new("miss", len), &table, |b, table| {
            b.iter(|| find_global_index(black_box(table), black_box(5)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_raw_allocation, bench_typed_allocation, bench_find_global_index);
criterion_main!(benches);
