use std::{
    sync::{
        atomic::{fence, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use super::{
    error::{SafepointError, StuckMutator},
    state::{is_synchronizing_epoch, PauseState},
    thread::{ParkedGuard, ThreadPauseState},
    Safepoint,
};
use crate::base::utils::formatted_duration;

/// Parked at this epoch, in a safe state, or pinned by a critical region. The
/// last group is settled by the gate once the scan is over.
fn is_accounted_for(thread: &ThreadPauseState, epoch: u64) -> bool {
    thread.is_parked_at(epoch) || thread.state().is_safe() || thread.critical_depth() > 0
}

impl Safepoint {
    /// Brings every registered mutator to a stop and returns once the pause is
    /// active. The registration lock stays held until [`Safepoint::end_pause`].
    ///
    /// `timeout` bounds the wait for mutators to respond, not the wait for
    /// critical regions to close.
    pub fn begin_pause(&self, timeout: Option<Duration>) -> Result<(), SafepointError> {
        let start = Instant::now();
        let epoch = self.state.arm().map_err(SafepointError::NotIdle)?;

        // SAFETY: released by `end_pause` or by the timeout rollback below.
        let threads: Vec<Arc<ThreadPauseState>> = unsafe { self.threads.lock_for_pause() }.to_vec();
        debug_assert!(
            threads
                .iter()
                .all(|t| t.thread_id() != std::thread::current().id() || t.state().is_safe()),
            "a registered coordinator must begin the pause from a safe state"
        );

        self.stats.begin(epoch, start);
        self.barrier.arm(epoch);
        log::debug!(target: "gc-safepoint", "arming safepoint {} for {} thread(s)", epoch, threads.len());

        for thread in threads.iter() {
            thread.arm_poll();
        }
        // Pairs with the fence in `Mutator::transition`: either the mutator sees
        // its poll armed after leaving a safe state, or the scan below sees it
        // still in the safe state.
        fence(Ordering::SeqCst);
        self.state.begin_waiting(threads.len());

        let mut pending = threads.clone();
        let mut iterations = 0;
        let mut initially_running = 0;

        loop {
            pending.retain(|thread| {
                if is_accounted_for(thread, epoch) {
                    self.state.retire_one();
                    false
                } else {
                    true
                }
            });

            if iterations == 0 {
                initially_running = pending.len();
            }
            iterations += 1;

            if pending.is_empty() {
                break;
            }

            let elapsed = start.elapsed();
            if let Some(timeout) = timeout {
                if elapsed >= timeout {
                    return Err(self.handle_timeout(epoch, elapsed, &threads, &pending));
                }
            }

            self.back_off(iterations, elapsed);
        }

        let deferred = self.gate.defer_if_active();
        self.stats
            .synchronized(threads.len(), initially_running, iterations, deferred);

        if deferred {
            // The mutator closing the last critical region declares the pause
            // active on our behalf.
            let mut completed = self.completion.lock();
            completed.wait_while(|completed| *completed != epoch);
        } else {
            self.declare_active(epoch);
        }

        log::debug!(
            target: "gc-safepoint",
            "stopped the world ({} thread(s)) in {}",
            threads.len(),
            formatted_duration(start.elapsed())
        );
        Ok(())
    }

    /// Arming -> Active plus the cleanup menu. Runs on the coordinator, or on
    /// the mutator that closed the last critical region.
    fn declare_active(&self, epoch: u64) {
        self.state.activate();

        let summary = self.cleanup.run(self.options.cleanup_worker_count());
        self.stats.cleanup_done(summary.elapsed);

        let mut completed = self.completion.lock();
        *completed = epoch;
        completed.notify_all();
    }

    pub(crate) fn complete_deferred_pause(&self) {
        let epoch = self.state.counter();
        debug_assert!(is_synchronizing_epoch(epoch));
        debug_assert_eq!(self.state.state(), PauseState::Arming);
        log::debug!(target: "gc-safepoint", "completing deferred safepoint {}", epoch);
        self.declare_active(epoch);
    }

    /// Resumes every mutator and releases the registration lock.
    pub fn end_pause(&self) {
        assert_eq!(
            self.state.state(),
            PauseState::Active,
            "end_pause without an active pause"
        );

        // SAFETY: the lock is held since `begin_pause`.
        for thread in unsafe { self.threads.locked() } {
            thread.disarm_poll();
        }

        let epoch = self.state.disarm();
        let woken = self.barrier.disarm();

        unsafe {
            self.threads.unlock_after_pause();
        }

        self.stats.end();
        log::trace!(target: "gc-safepoint", "safepoint over at epoch {}, woke {} thread(s)", epoch, woken);
    }

    /// Parks `thread` until the pause it observed is over. Returns right away
    /// when no pause is armed.
    pub(crate) fn block(&self, thread: &ThreadPauseState) {
        debug_assert_eq!(
            thread.critical_depth(),
            0,
            "blocking inside a critical region deadlocks the pause"
        );

        loop {
            let epoch = self.state.counter();
            if !is_synchronizing_epoch(epoch) {
                return;
            }

            let _parked = ParkedGuard::park(thread, epoch);
            self.barrier.wait(epoch);
            // A newer pause may already be armed; stop for that one too.
        }
    }

    fn back_off(&self, iteration: usize, elapsed: Duration) {
        let opts = &self.options;
        if iteration <= opts.spin_iterations {
            for _ in 0..(1 << iteration.min(6)) {
                std::hint::spin_loop();
            }
        } else if elapsed < opts.short_sleep_window {
            std::thread::sleep(opts.short_sleep);
        } else {
            std::thread::sleep(opts.long_sleep);
        }
    }

    #[cold]
    fn handle_timeout(
        &self,
        epoch: u64,
        waited: Duration,
        threads: &[Arc<ThreadPauseState>],
        pending: &[Arc<ThreadPauseState>],
    ) -> SafepointError {
        let unresponsive: Vec<StuckMutator> = pending.iter().map(|t| t.snapshot()).collect();

        log::error!(
            target: "gc-safepoint",
            "safepoint {} timed out after {}, {} of {} thread(s) not responding",
            epoch,
            formatted_duration(waited),
            unresponsive.len(),
            threads.len()
        );
        for stuck in unresponsive.iter() {
            log::error!(target: "gc-safepoint", "  {}", stuck);
        }

        if self.options.abort_on_timeout {
            eprintln!("fatal: safepoint {} timed out after {}", epoch, formatted_duration(waited));
            for stuck in unresponsive.iter() {
                eprintln!("  {}", stuck);
            }
            std::process::abort();
        }

        // Roll back: mutators already parked wake up and the epoch still
        // advances to the next even value.
        for thread in threads {
            thread.disarm_poll();
        }
        self.state.disarm();
        self.barrier.disarm();
        unsafe {
            self.threads.unlock_after_pause();
        }
        self.stats.timed_out();

        SafepointError::Timeout {
            epoch,
            waited,
            unresponsive,
        }
    }
}
