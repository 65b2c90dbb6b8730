/*!
 * Synchronization Benchmarks
 *
 * Uncontended wait/release on each object kind, LIFO semaphore hand-off
 * latency and pool throughput
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kernel_sync::{EventMode, LifoSemaphore, PoolConfig, ThreadPool, WaitSubsystem};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended");
    let waits = WaitSubsystem::new();

    let mutex = waits.create_mutex(false).unwrap();
    group.bench_function("mutex_acquire_release", |b| {
        b.iter(|| {
            black_box(waits.wait(mutex, 0).unwrap());
            waits.release_mutex(mutex).unwrap();
        })
    });

    let sem = waits.create_semaphore(0, 1).unwrap();
    group.bench_function("semaphore_release_wait", |b| {
        b.iter(|| {
            waits.release_semaphore(sem, 1).unwrap();
            black_box(waits.wait(sem, 0).unwrap());
        })
    });

    let event = waits.create_event(false, EventMode::AutoReset).unwrap();
    group.bench_function("auto_event_set_wait", |b| {
        b.iter(|| {
            waits.set_event(event).unwrap();
            black_box(waits.wait(event, 0).unwrap());
        })
    });

    group.finish();
}

fn bench_wait_any_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("wait_any_width");
    let waits = WaitSubsystem::new();

    for width in [1usize, 8, 64] {
        let handles: Vec<_> = (0..width)
            .map(|_| waits.create_semaphore(0, 1).unwrap())
            .collect();
        let last = handles[width - 1];

        group.bench_with_input(BenchmarkId::from_parameter(width), &handles, |b, handles| {
            b.iter(|| {
                waits.release_semaphore(last, 1).unwrap();
                black_box(waits.wait_any(handles, 0).unwrap());
            })
        });
    }

    group.finish();
}

fn bench_lifo_handoff(c: &mut Criterion) {
    c.bench_function("lifo_handoff", |b| {
        b.iter(|| {
            let sem = Arc::new(LifoSemaphore::new(0, 1).unwrap());
            let sem_clone = sem.clone();
            let waiter = thread::spawn(move || sem_clone.wait(Some(Duration::from_secs(1))));

            while sem.waiter_count() == 0 {
                thread::yield_now();
            }
            sem.release(1).unwrap();
            black_box(waiter.join().unwrap());
        })
    });
}

fn bench_pool_throughput(c: &mut Criterion) {
    let pool = ThreadPool::new(PoolConfig::default()).unwrap();
    let mut group = c.benchmark_group("pool_throughput");
    group.sample_size(20);

    for items in [100usize, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(items), &items, |b, &items| {
            b.iter(|| {
                let (tx, rx) = mpsc::channel();
                for _ in 0..items {
                    let tx = tx.clone();
                    pool.queue_work_item(move || {
                        let _ = tx.send(());
                    });
                }
                for _ in 0..items {
                    rx.recv().unwrap();
                }
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_uncontended,
    bench_wait_any_width,
    bench_lifo_handoff,
    bench_pool_throughput
);
criterion_main!(benches);
