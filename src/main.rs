use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use rand::Rng;
use rsafepoint::{
    base::utils::read_uint_from_env, formatted_duration, safepoint, CleanupTaskRunner,
    SafepointOptions,
};

static STOP: AtomicBool = AtomicBool::new(false);
static TABLE_REHASHES: AtomicUsize = AtomicUsize::new(0);
static MONITORS_DEFLATED: AtomicUsize = AtomicUsize::new(0);

fn cleanup_menu() -> CleanupTaskRunner {
    let mut runner = CleanupTaskRunner::new();
    runner
        .register_job("rehash-symbol-table", || {
            TABLE_REHASHES.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
        .register_job("rehash-string-table", || {
            TABLE_REHASHES.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
        .register_job("deflate-idle-monitors", || {
            MONITORS_DEFLATED.fetch_add(rand::thread_rng().gen_range(0..16), Ordering::Relaxed);
            Ok(())
        })
        .register_job("update-inline-caches", || Ok(()))
        .register_job("request-storage-cleanup", || Ok(()));
    runner
}

fn mutator_loop(index: usize) -> usize {
    let mutator = safepoint().register_named(Some(format!("mutator-{}", index)));
    let mut rng = rand::thread_rng();
    let mut work = 0usize;

    while !STOP.load(Ordering::Relaxed) {
        match rng.gen_range(0..16) {
            0 => {
                // Pins managed memory for a short while.
                let _region = mutator.critical();
                for _ in 0..rng.gen_range(100..1000) {
                    work = work.wrapping_add(1);
                }
            }
            1 => {
                let _native = mutator.safe_scope();
                std::thread::sleep(Duration::from_micros(rng.gen_range(10..200)));
            }
            _ => {
                for _ in 0..rng.gen_range(100..10_000) {
                    work = work.wrapping_add(1);
                }
            }
        }

        mutator.poll();
    }

    work
}

fn main() {
    env_logger::init();

    let threads = read_uint_from_env("MUTATORS").unwrap_or(8);
    let pauses = read_uint_from_env("PAUSES").unwrap_or(100);

    rsafepoint::init(SafepointOptions::from_env(), cleanup_menu());

    let handles = (0..threads)
        .map(|i| std::thread::spawn(move || mutator_loop(i)))
        .collect::<Vec<_>>();

    let start = Instant::now();
    for _ in 0..pauses {
        std::thread::sleep(Duration::from_millis(2));

        let stopped = safepoint().stop_the_world(|threads| {
            let parked = threads.iter().filter(|t| t.is_parked()).count();
            (threads.len(), parked)
        });

        match stopped {
            Ok((n, parked)) => {
                log::trace!(target: "gc-safepoint", "paused {} mutator(s), {} parked", n, parked)
            }
            Err(err) => {
                eprintln!("{}", err);
                break;
            }
        }
    }

    STOP.store(true, Ordering::Relaxed);
    for handle in handles {
        let _ = handle.join();
    }

    let summary = safepoint().statistics();
    safepoint().shutdown();

    println!(
        "{} pauses ({} deferred) in {}: sync avg {:.3}ms max {:.3}ms, pause avg {:.3}ms max {:.3}ms",
        summary.pauses,
        summary.deferred,
        formatted_duration(start.elapsed()),
        summary.avg_sync_ms,
        summary.max_sync_ms,
        summary.avg_pause_ms,
        summary.max_pause_ms
    );
    println!(
        "table rehashes: {}, monitors deflated: {}",
        TABLE_REHASHES.load(Ordering::Relaxed),
        MONITORS_DEFLATED.load(Ordering::Relaxed)
    );
}
