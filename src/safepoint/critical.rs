//! Critical regions: intervals in which a mutator forbids a pause from being
//! declared active.
//!
//! A pause that finds regions open is deferred: the gate records it as
//! pending and the mutator whose exit closes the last region completes it on
//! its own stack before parking like everybody else.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::thread::{Mutator, ThreadState};
use crate::{base::monitor::Monitor, sync::shared_vars::SharedFlag};

struct GateState {
    /// Mutators currently inside a critical region.
    count: usize,
    /// A pause is waiting for `count` to drop to zero.
    pending: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum EnterOutcome {
    Entered,
    Nested,
    /// A deferred pause is pending; the caller must stall and retry.
    MustStall,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ExitOutcome {
    Nested,
    Left,
    /// This exit closed the last region while a pause was pending. The caller
    /// now owns completing that pause.
    CompletesPause,
}

pub struct CriticalGate {
    monitor: Monitor<GateState>,
    // Lock-free mirrors of the monitor state for queries.
    active: AtomicUsize,
    needs_pause: SharedFlag,
}

impl CriticalGate {
    pub fn new() -> Self {
        Self {
            monitor: Monitor::new(GateState {
                count: 0,
                pending: false,
            }),
            active: AtomicUsize::new(0),
            needs_pause: SharedFlag::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_count() > 0
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// A pause is deferred until the open critical regions close.
    pub fn needs_pause(&self) -> bool {
        self.needs_pause.is_set()
    }

    pub(crate) fn try_enter(&self, depth: &AtomicUsize) -> EnterOutcome {
        let current = depth.load(Ordering::Relaxed);
        if current > 0 {
            depth.store(current + 1, Ordering::Release);
            return EnterOutcome::Nested;
        }

        let mut ml = self.monitor.lock();
        if ml.pending {
            return EnterOutcome::MustStall;
        }

        ml.count += 1;
        self.active.store(ml.count, Ordering::Release);
        depth.store(1, Ordering::Release);
        EnterOutcome::Entered
    }

    pub(crate) fn exit(&self, depth: &AtomicUsize) -> ExitOutcome {
        let current = depth.load(Ordering::Relaxed);
        debug_assert!(current > 0, "critical region exit without matching enter");
        if current == 0 {
            return ExitOutcome::Nested;
        }

        if current > 1 {
            depth.store(current - 1, Ordering::Release);
            return ExitOutcome::Nested;
        }

        let mut ml = self.monitor.lock();
        debug_assert!(ml.count > 0, "critical region count underflow");
        ml.count = ml.count.saturating_sub(1);
        self.active.store(ml.count, Ordering::Release);
        depth.store(0, Ordering::Release);

        if ml.count == 0 && ml.pending {
            ml.pending = false;
            self.needs_pause.unset();
            ml.notify_all();
            log::debug!(target: "gc-locker", "last critical region closed, completing deferred pause");
            ExitOutcome::CompletesPause
        } else {
            ExitOutcome::Left
        }
    }

    /// Called by the coordinator once every mutator is accounted for. Marks the
    /// pause pending and returns true when regions are still open.
    pub(crate) fn defer_if_active(&self) -> bool {
        let mut ml = self.monitor.lock();
        if ml.count == 0 {
            return false;
        }

        debug_assert!(!ml.pending);
        ml.pending = true;
        self.needs_pause.set();
        log::debug!(
            target: "gc-locker",
            "pause deferred, {} critical region(s) open",
            ml.count
        );
        true
    }

    /// Blocks until no pause is pending on this gate.
    pub fn stall_until_clear(&self) {
        let mut ml = self.monitor.lock();
        if ml.pending {
            log::trace!(target: "gc-locker", "{:?} stalling until deferred pause clears", std::thread::current().id());
        }
        ml.wait_while(|state| state.pending);
    }
}

impl Default for CriticalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Mutator<'a> {
    /// Opens a critical region. Regions nest; only the outermost one is
    /// visible to the gate. Every call must be matched by
    /// [`Mutator::exit_critical`].
    pub fn enter_critical(&self) {
        debug_assert!(
            !self.record.state().is_safe(),
            "critical regions are entered from managed or VM state"
        );
        let gate = &self.safepoint.gate;

        loop {
            if self.record.critical_depth() == 0 {
                // Stop for a pause that is already armed before pinning anything.
                self.poll();
            }

            match gate.try_enter(self.record.critical_depth_cell()) {
                EnterOutcome::Entered | EnterOutcome::Nested => return,
                EnterOutcome::MustStall => self.stall_until_clear(),
            }
        }
    }

    /// Closes a critical region. Closing the last open region while a pause is
    /// pending completes that pause here, then parks until it ends.
    pub fn exit_critical(&self) {
        let depth = self.record.critical_depth_cell();
        if depth.load(Ordering::Relaxed) > 1 {
            self.safepoint.gate.exit(depth);
            return;
        }

        // The outermost exit runs blocked: once the count drops the pause may
        // go active, and this thread must already count as stopped. Leaving
        // the scope polls and parks.
        let _scope = self.blocked_scope();
        if let ExitOutcome::CompletesPause = self.safepoint.gate.exit(depth) {
            self.safepoint.complete_deferred_pause();
        }
    }

    /// RAII form of [`Mutator::enter_critical`].
    pub fn critical(&self) -> CriticalRegion<'_, 'a> {
        self.enter_critical();
        CriticalRegion { mutator: self }
    }

    /// Waits until no deferred pause is pending, then takes part in it.
    pub fn stall_until_clear(&self) {
        debug_assert_eq!(
            self.record.critical_depth(),
            0,
            "stalling inside a critical region deadlocks the pending pause"
        );

        let _scope = self.blocked_scope();
        self.safepoint.gate.stall_until_clear();
        debug_assert_eq!(self.record.state(), ThreadState::Blocked);
    }
}

pub struct CriticalRegion<'m, 'a> {
    mutator: &'m Mutator<'a>,
}

impl<'m, 'a> Drop for CriticalRegion<'m, 'a> {
    fn drop(&mut self) {
        self.mutator.exit_critical();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_nesting_touches_counter_once() {
        let gate = CriticalGate::new();
        let depth = AtomicUsize::new(0);

        assert_eq!(gate.try_enter(&depth), EnterOutcome::Entered);
        assert_eq!(gate.try_enter(&depth), EnterOutcome::Nested);
        assert_eq!(gate.active_count(), 1);

        assert_eq!(gate.exit(&depth), ExitOutcome::Nested);
        assert!(gate.is_active());
        assert_eq!(gate.exit(&depth), ExitOutcome::Left);
        assert!(!gate.is_active());
    }

    #[test]
    fn test_pending_cleared_by_last_exit() {
        let gate = CriticalGate::new();
        let first = AtomicUsize::new(0);
        let second = AtomicUsize::new(0);

        gate.try_enter(&first);
        gate.try_enter(&second);
        assert!(gate.defer_if_active());
        assert!(gate.needs_pause());

        let third = AtomicUsize::new(0);
        assert_eq!(gate.try_enter(&third), EnterOutcome::MustStall);

        assert_eq!(gate.exit(&first), ExitOutcome::Left);
        assert!(gate.needs_pause());
        assert_eq!(gate.exit(&second), ExitOutcome::CompletesPause);
        assert!(!gate.needs_pause());
        assert!(!gate.defer_if_active());
    }
}
