use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot_core::{park, unpark_all, ParkResult, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

/// Blocking primitive mutators park on while a pause is in effect.
///
/// Futex-style: waiters park in the `parking_lot` bucket keyed by the
/// barrier's address, and `disarm` publishes the released epoch before
/// unparking the bucket. `park` re-validates the released epoch under the
/// bucket lock, so a waiter that arrives just before `disarm` either sees the
/// release or is already queued when `unpark_all` runs.
pub struct WaitBarrier {
    /// Epoch currently armed, 0 when disarmed.
    armed: AtomicU64,
    /// Highest epoch ever released. Only grows.
    released: AtomicU64,
}

impl WaitBarrier {
    pub const fn new() -> Self {
        Self {
            armed: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    #[inline]
    fn key(&self) -> usize {
        &self.released as *const AtomicU64 as usize
    }

    pub fn armed(&self) -> u64 {
        self.armed.load(Ordering::Acquire)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    pub fn arm(&self, epoch: u64) {
        assert_ne!(epoch, 0, "epoch 0 is reserved for a disarmed barrier");
        debug_assert!(
            epoch > self.released(),
            "arming already released epoch {}",
            epoch
        );
        let prev = self.armed.swap(epoch, Ordering::AcqRel);
        debug_assert_eq!(prev, 0, "barrier armed twice");
    }

    /// Releases the armed epoch and wakes every waiter. Returns the number of
    /// threads woken.
    pub fn disarm(&self) -> usize {
        let epoch = self.armed.swap(0, Ordering::AcqRel);
        assert_ne!(epoch, 0, "disarming a barrier that is not armed");

        // Published before the unpark so a waiter validating under the bucket
        // lock sees it.
        let prev = self.released.swap(epoch, Ordering::AcqRel);
        assert!(prev < epoch, "released epoch went backwards");

        unsafe { unpark_all(self.key(), DEFAULT_UNPARK_TOKEN) }
    }

    /// Blocks until `epoch` has been released. Returns immediately when it
    /// already is; keeps waiting through releases of older epochs.
    pub fn wait(&self, epoch: u64) {
        debug_assert_ne!(epoch, 0);
        loop {
            if self.released.load(Ordering::Acquire) >= epoch {
                return;
            }

            let result = unsafe {
                park(
                    self.key(),
                    || self.released.load(Ordering::Acquire) < epoch,
                    || {},
                    |_, _| {},
                    DEFAULT_PARK_TOKEN,
                    None,
                )
            };

            if let ParkResult::Invalid = result {
                return;
            }
        }
    }
}

impl Default for WaitBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Barrier,
        },
        time::Duration,
    };

    use super::WaitBarrier;

    #[test]
    fn test_wait_returns_for_released_epoch() {
        let barrier = WaitBarrier::new();
        barrier.arm(1);
        barrier.disarm();
        barrier.wait(1);
        assert_eq!(barrier.released(), 1);
        assert_eq!(barrier.armed(), 0);
    }

    #[test]
    fn test_disarm_wakes_all_waiters() {
        let barrier = WaitBarrier::new();
        let woke = AtomicUsize::new(0);
        barrier.arm(3);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait(3);
                    woke.fetch_add(1, Ordering::Relaxed);
                });
            }

            std::thread::sleep(Duration::from_millis(20));
            assert_eq!(woke.load(Ordering::Relaxed), 0);
            barrier.disarm();
        });

        assert_eq!(woke.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn test_waiter_for_later_epoch_keeps_waiting() {
        let barrier = WaitBarrier::new();
        let woke = AtomicUsize::new(0);

        std::thread::scope(|s| {
            barrier.arm(1);
            s.spawn(|| {
                barrier.wait(3);
                woke.fetch_add(1, Ordering::Release);
            });

            std::thread::sleep(Duration::from_millis(10));
            barrier.disarm();
            std::thread::sleep(Duration::from_millis(10));
            assert_eq!(woke.load(Ordering::Acquire), 0);

            barrier.arm(3);
            barrier.disarm();
        });

        assert_eq!(woke.load(Ordering::Acquire), 1);
    }

    #[test]
    fn test_disarm_racing_with_wait_wakes_everyone() {
        const WAITERS: usize = 4;
        let barrier = WaitBarrier::new();

        for cycle in 0..500u64 {
            let epoch = cycle * 2 + 1;
            let woke = AtomicUsize::new(0);
            let start = Barrier::new(WAITERS + 1);
            barrier.arm(epoch);

            std::thread::scope(|s| {
                for _ in 0..WAITERS {
                    s.spawn(|| {
                        start.wait();
                        barrier.wait(epoch);
                        woke.fetch_add(1, Ordering::Relaxed);
                    });
                }

                start.wait();
                barrier.disarm();
            });

            assert_eq!(woke.load(Ordering::Relaxed), WAITERS, "cycle {}", cycle);
            assert_eq!(barrier.released(), epoch);
        }
    }
}
