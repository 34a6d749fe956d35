//! Transaction staging and commit throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pipestore_bench::{batch, block_stream};
use pipestore_core::{Context, Transactable, Transaction};
use pipestore_memory::MemoryEngine;

/// Stage rows one `add` at a time, then flush.
fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("txn_add");

    for size in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let engine = MemoryEngine::new();
            let ctx = Context::background();
            b.iter(|| {
                engine
                    .in_transaction(&ctx, |txn| {
                        for mut block in batch(size) {
                            txn.add(&ctx, &mut block)?;
                        }
                        Ok(())
                    })
                    .unwrap();
            });
        });
    }

    group.finish();
}

/// Stage rows with one `bulk_save`, then flush.
fn bench_bulk_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("txn_bulk_save");

    for size in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let engine = MemoryEngine::new();
            let ctx = Context::background();
            b.iter(|| {
                engine
                    .in_transaction(&ctx, |txn| txn.bulk_save(&ctx, &mut batch(size)))
                    .unwrap();
            });
        });
    }

    group.finish();
}

/// Ingest an encoded stream with `copy_from`, then flush.
fn bench_copy_from(c: &mut Criterion) {
    let mut group = c.benchmark_group("txn_copy_from");

    for size in [10u64, 100, 1_000] {
        let stream = block_stream(size);
        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &stream, |b, stream| {
            let engine = MemoryEngine::new();
            let ctx = Context::background();
            b.iter(|| {
                let rows = engine
                    .in_transaction(&ctx, |txn| {
                        txn.copy_from(&ctx, &mut stream.as_slice(), "COPY blocks FROM STDIN", &[])
                    })
                    .unwrap();
                black_box(rows);
            });
        });
    }

    group.finish();
}

/// Begin and roll back an empty transaction.
fn bench_transaction_overhead(c: &mut Criterion) {
    let engine = MemoryEngine::new();
    let ctx = Context::background();

    c.bench_function("txn_begin_rollback", |b| {
        b.iter(|| {
            let mut txn = engine.begin_transaction(&ctx).unwrap();
            txn.rollback(&ctx).unwrap();
            txn.close(&ctx).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_add,
    bench_bulk_save,
    bench_copy_from,
    bench_transaction_overhead,
);
criterion_main!(benches);
