use std::sync::{Arc, Barrier};
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion};

use conqueue::{BoundedMutexQueue, Channel, LinkedQueue, MutexQueue, RingQueue};

// NOTE: queue setup is not free, so the timed section only covers the
// enqueue/dequeue storm. See
// https://github.com/bheisler/criterion.rs/issues/475
// for why iter_custom is used instead of iter_batched here.

pub const PARAM_CONFIGS: &[(usize, usize)] = &[(1, 10_000), (4, 10_000), (8, 10_000)];

fn run_multithread_storm<Q>(queue: Arc<Q>, threads: usize, ops: usize)
where
    Q: Channel<usize> + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(threads));
    let mut handles = vec![];
    for _ in 0..threads {
        handles.push(std::thread::spawn({
            let queue = queue.clone();
            let barrier = barrier.clone();
            move || {
                barrier.wait();
                for i in 0..ops {
                    let _ = queue.try_enqueue(std::hint::black_box(i));
                }
                for _ in 0..ops {
                    std::hint::black_box(queue.try_dequeue());
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

fn configure_benchmark<Q, R>(c: &mut Criterion, name: &str, mut routine: R)
where
    Q: Channel<usize> + Send + Sync + 'static,
    R: FnMut() -> Q + Copy,
{
    for (threads, ops) in PARAM_CONFIGS {
        c.bench_function(
            &format!("{name} enqueue-dequeue | threads={threads}, ops={ops}"),
            |b| {
                b.iter_custom(move |iters| {
                    let queue = Arc::new(routine());
                    let instant = Instant::now();
                    for _ in 0..iters {
                        run_multithread_storm(queue.clone(), *threads, *ops);
                    }
                    instant.elapsed()
                });
            },
        );
    }
}

fn bench_mutex_queue(c: &mut Criterion) {
    configure_benchmark(c, "mutex", MutexQueue::new);
}

fn bench_bounded_mutex_queue(c: &mut Criterion) {
    configure_benchmark(c, "bounded-mutex", || BoundedMutexQueue::new(1 << 14));
}

fn bench_ring_queue(c: &mut Criterion) {
    configure_benchmark(c, "ring", || RingQueue::new(1 << 14));
}

fn bench_linked_queue(c: &mut Criterion) {
    configure_benchmark(c, "linked", LinkedQueue::new);
}

criterion_group!(
    queues,
    bench_mutex_queue,
    bench_bounded_mutex_queue,
    bench_ring_queue,
    bench_linked_queue
);
criterion_main!(queues);
