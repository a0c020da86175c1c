//! Backend micro-benchmarks: raw write/read, conditional writes, and the
//! JSONL append path over the in-memory and local-filesystem backends.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use serde_json::json;

use loam_core::backend::{LocalBackend, MemoryBackend, Precondition, StorageBackend};
use loam_core::jsonl::JsonlWriter;

fn bench_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory");
    let payload = vec![7u8; 1024];

    group.bench_function("write_1k", |b| {
        let backend = MemoryBackend::new();
        let mut n = 0u64;
        b.iter(|| {
            backend.write(&format!("bench/{n}"), &payload).unwrap();
            n += 1;
        });
    });

    group.bench_function("read_1k", |b| {
        let backend = MemoryBackend::new();
        backend.write("bench/file", &payload).unwrap();
        b.iter(|| backend.read("bench/file").unwrap());
    });

    group.bench_function("conditional_create", |b| {
        let backend = MemoryBackend::new();
        let mut n = 0u64;
        b.iter(|| {
            backend
                .write_conditional(&format!("lock/{n}"), &payload, &Precondition::Absent)
                .unwrap();
            n += 1;
        });
    });

    group.finish();
}

fn bench_local(c: &mut Criterion) {
    let mut group = c.benchmark_group("local");
    group.sample_size(20);
    let payload = vec![7u8; 1024];

    group.bench_function("write_1k", |b| {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path().join("store")).unwrap();
        let mut n = 0u64;
        b.iter(|| {
            backend.write(&format!("bench/{n}"), &payload).unwrap();
            n += 1;
        });
    });

    group.bench_function("append_jsonl", |b| {
        let dir = tempfile::TempDir::new().unwrap();
        let backend: Arc<LocalBackend> =
            Arc::new(LocalBackend::new(dir.path().join("store")).unwrap());
        b.iter_batched(
            || JsonlWriter::open(backend.clone(), "bench/log.jsonl").unwrap(),
            |writer| {
                for i in 0..16 {
                    writer.append(&json!({"seq": i, "title": "benchmark row"})).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_memory, bench_local);
criterion_main!(benches);
