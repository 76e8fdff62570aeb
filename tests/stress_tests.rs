//! Concurrent stress: contended producers, draining consumers, loss accounting

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Barrier,
};
use std::thread;
use std::time::Duration;

use btlm::{Context, Filter};

const MAGIC: u32 = 0xB7E1_E77A;

#[repr(C)]
#[derive(Clone, Copy)]
struct StressRecord {
    magic: u32,
    thread_id: u32,
    counter: u64,
}

/// Four producers each log 100k records into a 64-slot ring while two
/// consumers drain with a 1 ms pause between calls. Every record either
/// reaches each consumer or is accounted in its drop counter; per-thread
/// counters arrive strictly increasing.
#[test]
fn stress_4p_2c() {
    const PRODUCERS: u32 = 4;
    const PER_PRODUCER: u64 = 100_000;

    let ctx = Arc::new(Context::new(64).unwrap());
    let consumer_ids = [
        ctx.consumer_open(Filter::all()).unwrap(),
        ctx.consumer_open(Filter::all()).unwrap(),
    ];

    let producers_done = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(PRODUCERS as usize + 2));

    let producer_handles: Vec<_> = (0..PRODUCERS)
        .map(|thread_id| {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for counter in 0..PER_PRODUCER {
                    ctx.log(
                        0,
                        &StressRecord {
                            magic: MAGIC,
                            thread_id,
                            counter,
                        },
                    );
                }
            })
        })
        .collect();

    let consumer_handles: Vec<_> = consumer_ids
        .iter()
        .map(|&id| {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            let done = Arc::clone(&producers_done);
            thread::spawn(move || {
                barrier.wait();

                let mut emitted = 0u64;
                let mut last_counter = [None::<u64>; PRODUCERS as usize];
                loop {
                    let n = ctx
                        .drain(id, |e| {
                            let rec = e.payload_as::<StressRecord>().expect("record payload");
                            assert_eq!(rec.magic, MAGIC, "corrupt record reached a consumer");
                            let slot = &mut last_counter[rec.thread_id as usize];
                            if let Some(prev) = *slot {
                                assert!(
                                    rec.counter > prev,
                                    "thread {} went backwards: {} after {}",
                                    rec.thread_id,
                                    rec.counter,
                                    prev
                                );
                            }
                            *slot = Some(rec.counter);
                            true
                        })
                        .unwrap();
                    emitted += n as u64;

                    if n == 0 {
                        if done.load(Ordering::Acquire) {
                            break;
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                }
                emitted
            })
        })
        .collect();

    for h in producer_handles {
        h.join().unwrap();
    }
    producers_done.store(true, Ordering::Release);

    let totals: Vec<u64> = consumer_handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    for (&id, &emitted) in consumer_ids.iter().zip(totals.iter()) {
        let dropped = ctx.consumer_dropped(id).unwrap();
        assert_eq!(
            emitted + dropped,
            PRODUCERS as u64 * PER_PRODUCER,
            "consumer {} lost entries without accounting",
            id
        );
    }
}

/// Overwrite-during-copy is converted into an accounted drop, never into
/// corrupt data: a consumer hammering a tiny ring while a producer spins
/// must still see only intact records.
#[test]
fn torn_reads_become_drops() {
    const TOTAL: u64 = 200_000;

    let ctx = Arc::new(Context::new(4).unwrap());
    let id = ctx.consumer_open(Filter::all()).unwrap();

    let producer = {
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || {
            for counter in 0..TOTAL {
                ctx.log(
                    0,
                    &StressRecord {
                        magic: MAGIC,
                        thread_id: 0,
                        counter,
                    },
                );
            }
        })
    };

    let mut emitted = 0u64;
    loop {
        let n = ctx
            .drain(id, |e| {
                let rec = e.payload_as::<StressRecord>().expect("record payload");
                assert_eq!(rec.magic, MAGIC);
                true
            })
            .unwrap();
        emitted += n as u64;
        if n == 0 && producer.is_finished() {
            break;
        }
    }
    producer.join().unwrap();

    // One final drain in case the producer published between the last
    // drain and the join.
    emitted += ctx.drain(id, |_| true).unwrap() as u64;

    assert_eq!(emitted + ctx.consumer_dropped(id).unwrap(), TOTAL);
}

/// Concurrent open/close from several threads never hands out the same
/// slot twice.
#[test]
fn concurrent_consumer_open_close() {
    let ctx = Arc::new(Context::new(16).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                for _ in 0..500 {
                    if let Ok(id) = ctx.consumer_open(Filter::all()) {
                        ctx.log(0, &1u32);
                        let _ = ctx.drain(id, |_| true);
                        ctx.consumer_close(id);
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    // All slots must be free again
    let mut ids = Vec::new();
    for _ in 0..btlm::config::MAX_CLIENTS {
        ids.push(ctx.consumer_open(Filter::all()).unwrap());
    }
    assert_eq!(ids.len(), btlm::config::MAX_CLIENTS);
}
