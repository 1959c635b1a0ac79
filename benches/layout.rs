//! Benchmarks for layout computation and session staging.
//!
//! Tests the cost of:
//! - Building a packed layout over many mixed-alignment entities
//! - Materializing a full session into simulated process memory
//! - A complete materialize/dematerialize round trip

extern crate procstage;

use std::hint::black_box;
use std::sync::{Arc, RwLock};

use criterion::{criterion_group, criterion_main, Criterion};
use procstage::prelude::*;

const ENTITY_COUNT: usize = 256;

fn build_layout() -> Materializer {
    let mut materializer = Materializer::new();
    for i in 0..ENTITY_COUNT {
        let size = 1u64 << (i % 4); // 1, 2, 4, 8 bytes
        let variable = Variable::with_host_value(
            &format!("v{i}"),
            ValueType::new(size, size),
            vec![i as u8; size as usize],
        );
        materializer.add_variable(variable).unwrap();
    }
    materializer
}

/// Benchmark laying out many mixed-alignment members.
fn bench_layout_build(c: &mut Criterion) {
    c.bench_function("layout_build_256_members", |b| {
        b.iter(|| black_box(build_layout().struct_byte_size()));
    });
}

/// Benchmark staging a full session into simulated process memory.
fn bench_materialize(c: &mut Criterion) {
    c.bench_function("materialize_256_members", |b| {
        b.iter(|| {
            let map: MemoryMapRef = Arc::new(RwLock::new(ProcessMemory::new(1024 * 1024)));
            let mut materializer = build_layout();
            let base = map
                .write()
                .unwrap()
                .allocate(materializer.struct_byte_size(), materializer.struct_alignment())
                .unwrap();
            let session = materializer.materialize(None, &map, base).unwrap();
            black_box(session)
        });
    });
}

/// Benchmark a complete materialize/dematerialize round trip.
fn bench_round_trip(c: &mut Criterion) {
    c.bench_function("round_trip_256_members", |b| {
        b.iter(|| {
            let map: MemoryMapRef = Arc::new(RwLock::new(ProcessMemory::new(1024 * 1024)));
            let frames = FrameTable::new();
            let mut materializer = build_layout();
            let base = map
                .write()
                .unwrap()
                .allocate(materializer.struct_byte_size(), materializer.struct_alignment())
                .unwrap();
            let mut session = materializer.materialize(None, &map, base).unwrap();
            session.dematerialize(&frames, None).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_layout_build,
    bench_materialize,
    bench_round_trip
);
criterion_main!(benches);
