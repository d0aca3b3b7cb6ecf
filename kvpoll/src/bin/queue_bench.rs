//! Action queue throughput and poll round-trip benchmark.
//!
//! Usage:
//!     cargo run --release --bin queue_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin the first producer to CPU 0, others follow (default: 0)
//!     CONSUMER_CPU=2  Pin the consumer to CPU 2 (default: 2)
//!     PRODUCERS=4     Number of producer threads (default: 4)

use std::cell::Cell;
use std::env;
use std::hint;
use std::num::NonZeroUsize;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use minstant::Instant;

use kvpoll::sync::mpsc;
use kvpoll::{Callback, Client, Command, ConnectOptions, LoopbackServer};

const QUEUE_SIZE: usize = 1 << 16;
const ITERATIONS: u64 = 1 << 22;
const ROUND_TRIPS: u32 = 10_000;

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn bench_throughput(producers: usize, producer_cpu: usize, consumer_cpu: usize) {
    let capacity = NonZeroUsize::new(QUEUE_SIZE).unwrap();
    let (producer, consumer) = mpsc::channel::<(usize, u64)>(capacity);
    let ready = Arc::new(AtomicUsize::new(0));
    let per_producer = ITERATIONS / producers as u64;

    let threads: Vec<_> = (0..producers)
        .map(|id| {
            let producer = producer.clone();
            let ready = Arc::clone(&ready);
            std::thread::spawn(move || {
                pin_to_cpu(Some(producer_cpu + id));
                ready.fetch_add(1, Ordering::Release);
                while ready.load(Ordering::Acquire) <= producers {
                    hint::spin_loop();
                }
                for seq in 0..per_producer {
                    let mut item = (id, seq);
                    while let Err(back) = producer.push(item) {
                        item = back;
                        hint::spin_loop();
                    }
                }
            })
        })
        .collect();
    drop(producer);

    pin_to_cpu(Some(consumer_cpu));
    while ready.load(Ordering::Acquire) < producers {
        hint::spin_loop();
    }
    let start = Instant::now();
    ready.fetch_add(1, Ordering::Release);

    let mut next = vec![0u64; producers];
    let total = per_producer * producers as u64;
    let mut received = 0;
    while received < total {
        if let Some((id, seq)) = consumer.pop() {
            assert_eq!(seq, next[id], "producer {id} reordered");
            next[id] += 1;
            received += 1;
        } else {
            hint::spin_loop();
        }
    }
    let elapsed = start.elapsed();

    for thread in threads {
        thread.join().unwrap();
    }

    let ops_per_ms = u128::from(total) * 1_000_000 / elapsed.as_nanos().max(1);
    println!("{ops_per_ms} ops/ms ({producers} producers)");
}

/// Time from `send` until the reply callback runs inside `poll`.
fn bench_poll_rtt() {
    let server = LoopbackServer::new();
    let mut client = Client::new(server.client());
    client.connect(ConnectOptions::default()).unwrap();
    while !client.is_connected() {
        client.poll().unwrap();
        hint::spin_loop();
    }

    let done = Rc::new(Cell::new(0u32));
    let start = Instant::now();
    for _ in 0..ROUND_TRIPS {
        let before = done.get();
        let counter = Rc::clone(&done);
        client
            .send(
                Command::new("PING"),
                Some(Callback::infallible(move |_| counter.set(counter.get() + 1))),
            )
            .unwrap();
        client.commit().unwrap();
        while done.get() == before {
            client.poll().unwrap();
            hint::spin_loop();
        }
    }
    let elapsed = start.elapsed();

    println!("{} ns poll RTT", elapsed.as_nanos() / u128::from(ROUND_TRIPS));
}

fn main() {
    kvpoll::init_tracing();

    let producers = env_usize("PRODUCERS", 4).max(1);
    let producer_cpu = env_usize("PRODUCER_CPU", 0);
    let consumer_cpu = env_usize("CONSUMER_CPU", 2);

    println!("kvpoll MPSC (size={QUEUE_SIZE}, iters={ITERATIONS}):");
    bench_throughput(1, producer_cpu, consumer_cpu);
    bench_throughput(producers, producer_cpu, consumer_cpu);
    bench_poll_rtt();
}
