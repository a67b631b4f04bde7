//! Exchange throughput benchmarks.
//!
//! Measures queue enqueue/dequeue cost and end-to-end page movement through
//! a client backed by in-process producers.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use exchange_client::cli::{run_sim, SimOptions};
use exchange_client::{ExchangeQueue, SerializedPage};

fn bench_queue_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_roundtrip");

    for (name, page_bytes) in [("1k", 1024usize), ("64k", 64 * 1024)] {
        group.throughput(Throughput::Bytes((page_bytes * 16) as u64));
        group.bench_function(BenchmarkId::new("enqueue_dequeue", name), |b| {
            let queue = ExchangeQueue::new(1, 0);
            queue.add_source();
            b.iter(|| {
                let pages = (0..16)
                    .map(|_| SerializedPage::new(vec![0u8; page_bytes]))
                    .collect();
                queue.enqueue(pages);
                while let Ok(batch) = queue.dequeue(0, black_box(4 * page_bytes as u64)) {
                    if batch.pages.is_empty() {
                        break;
                    }
                    black_box(batch.pages.len());
                }
            })
        });
    }

    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("end_to_end");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    for producers in [1usize, 4, 16] {
        let options = SimOptions {
            producers,
            pages_per_producer: 64,
            max_page_bytes: 16 * 1024,
            ..SimOptions::default()
        };
        group.throughput(Throughput::Elements((producers * 64) as u64));
        group.bench_function(BenchmarkId::new("producers", producers), |b| {
            b.iter(|| {
                let report = runtime.block_on(run_sim(options.clone())).unwrap();
                black_box(report.consumed_bytes);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_queue_roundtrip, bench_end_to_end);
criterion_main!(benches);
