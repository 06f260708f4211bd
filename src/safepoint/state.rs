use std::sync::atomic::{AtomicU64, AtomicUsize};

use atomic::{Atomic, Ordering};

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PauseState {
    /// No pause requested, mutators run freely.
    Idle,
    /// Pause requested, the coordinator is waiting for mutators.
    Arming,
    /// Every mutator is parked or in a safe state.
    Active,
}

/// Epoch counter and pause state. Only the coordinator (or a critical-region
/// exit acting for it) writes here; everybody else reads with acquire loads.
///
/// The counter is odd while a pause is armed or active and even otherwise,
/// and advances by exactly 2 per pause.
pub struct SafepointState {
    counter: AtomicU64,
    state: Atomic<PauseState>,
    waiting: AtomicUsize,
}

#[inline]
pub const fn is_synchronizing_epoch(epoch: u64) -> bool {
    epoch & 1 == 1
}

impl SafepointState {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            state: Atomic::new(PauseState::Idle),
            waiting: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    #[inline]
    pub fn state(&self) -> PauseState {
        self.state.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_at_safepoint(&self) -> bool {
        self.state() == PauseState::Active
    }

    #[inline]
    pub fn is_synchronizing(&self) -> bool {
        self.state() == PauseState::Arming
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Idle -> Arming. Returns the new odd epoch.
    pub(crate) fn arm(&self) -> Result<u64, PauseState> {
        self.state
            .compare_exchange(
                PauseState::Idle,
                PauseState::Arming,
                Ordering::AcqRel,
                Ordering::Acquire,
            )?;

        // The Arming state must be visible no later than the odd epoch that
        // mutators poll on.
        let prev = self.counter.fetch_add(1, Ordering::AcqRel);
        assert!(
            !is_synchronizing_epoch(prev),
            "safepoint counter {} odd while idle",
            prev
        );
        Ok(prev + 1)
    }

    pub(crate) fn begin_waiting(&self, count: usize) {
        debug_assert_eq!(self.waiting.load(Ordering::Relaxed), 0);
        self.waiting.store(count, Ordering::Release);
    }

    /// Accounts for one more mutator. Returns how many are still outstanding.
    pub(crate) fn retire_one(&self) -> usize {
        let prev = self.waiting.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "waiting-count underflow");
        prev - 1
    }

    /// Arming -> Active. Requires every mutator to be accounted for.
    pub(crate) fn activate(&self) {
        assert_eq!(
            self.waiting.load(Ordering::Acquire),
            0,
            "pause declared active with mutators outstanding"
        );
        let prev = self.state.swap(PauseState::Active, Ordering::AcqRel);
        debug_assert_eq!(prev, PauseState::Arming);
    }

    /// Arming or Active -> Idle. Returns the new even epoch.
    ///
    /// Cleanup results are published by this release increment: a mutator
    /// that reads the even epoch also sees everything done during the pause.
    pub(crate) fn disarm(&self) -> u64 {
        let prev_state = self.state.swap(PauseState::Idle, Ordering::AcqRel);
        debug_assert_ne!(prev_state, PauseState::Idle);
        self.waiting.store(0, Ordering::Release);

        let prev = self.counter.fetch_add(1, Ordering::Release);
        assert!(
            is_synchronizing_epoch(prev),
            "safepoint counter {} even while paused",
            prev
        );
        prev + 1
    }
}

impl Default for SafepointState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_parity_over_cycles() {
        let state = SafepointState::new();
        assert_eq!(state.counter(), 0);

        for cycle in 0..3u64 {
            let epoch = state.arm().unwrap();
            assert_eq!(epoch, cycle * 2 + 1);
            assert!(is_synchronizing_epoch(state.counter()));
            assert!(state.is_synchronizing());

            state.begin_waiting(2);
            assert_eq!(state.retire_one(), 1);
            assert_eq!(state.retire_one(), 0);
            state.activate();
            assert!(state.is_at_safepoint());

            let even = state.disarm();
            assert_eq!(even, cycle * 2 + 2);
            assert_eq!(state.state(), PauseState::Idle);
        }
    }

    #[test]
    fn test_second_arm_rejected() {
        let state = SafepointState::new();
        state.arm().unwrap();
        assert_eq!(state.arm(), Err(PauseState::Arming));
    }
}
