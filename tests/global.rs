use std::sync::atomic::{AtomicUsize, Ordering};

use rsafepoint::{safepoint, try_safepoint, CleanupTaskRunner, SafepointOptions};

static REHASHES: AtomicUsize = AtomicUsize::new(0);

#[test]
fn test_process_wide_safepoint() {
    let _ = env_logger::builder().is_test(true).try_init();
    assert!(try_safepoint().is_none());

    let mut runner = CleanupTaskRunner::new();
    runner.register_job("rehash-symbol-table", || {
        REHASHES.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });

    assert!(rsafepoint::init(SafepointOptions::default(), runner));
    assert!(!rsafepoint::init(SafepointOptions::default(), CleanupTaskRunner::new()));
    assert_eq!(safepoint().cleanup().len(), 1);

    let handle = std::thread::spawn(|| {
        let mutator = safepoint().register_mutator();
        for _ in 0..3 {
            mutator
                .stop_the_world(|threads| threads.len())
                .unwrap();
        }
    });
    handle.join().unwrap();

    assert_eq!(safepoint().safepoint_counter(), 6);
    assert_eq!(REHASHES.load(Ordering::Relaxed), 3);
    assert!(safepoint().threads().is_empty());
    safepoint().shutdown();
}
