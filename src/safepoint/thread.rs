use std::{
    cell::Cell,
    marker::PhantomData,
    sync::{
        atomic::{fence, AtomicBool, AtomicU64, AtomicUsize},
        Arc,
    },
    thread::ThreadId,
};

use atomic::{Atomic, Ordering};

use super::{error::StuckMutator, Safepoint};
use crate::sync::shared_vars::SharedFlag;

/// What a mutator is executing right now, as far as the coordinator cares.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThreadState {
    /// Running managed code. Must reach `block()` to be stopped.
    Managed,
    /// Running runtime-internal code that may touch the heap. Must reach `block()`.
    Vm,
    /// Running foreign code with no reachable managed state.
    Native,
    /// Waiting on a lock or condition outside of managed code.
    Blocked,
}

impl ThreadState {
    /// Safe states let the coordinator count the thread as stopped without
    /// waiting for it to park.
    #[inline]
    pub const fn is_safe(self) -> bool {
        matches!(self, ThreadState::Native | ThreadState::Blocked)
    }
}

/// Per-mutator pause bookkeeping.
///
/// The record is shared between the owning thread and the coordinator's scan
/// and is kept alive by the registration set until the thread deregisters,
/// so its address is stable for every scan that can observe it.
pub struct ThreadPauseState {
    id: usize,
    name: Option<String>,
    thread: ThreadId,
    state: Atomic<ThreadState>,
    parked: AtomicBool,
    observed_epoch: AtomicU64,
    /// "Please pause" indicator. Written by the coordinator, polled by the owner.
    poll: SharedFlag,
    critical_depth: AtomicUsize,
}

impl ThreadPauseState {
    pub(crate) fn new(id: usize, name: Option<String>) -> Self {
        Self {
            id,
            name,
            thread: std::thread::current().id(),
            state: Atomic::new(ThreadState::Managed),
            parked: AtomicBool::new(false),
            observed_epoch: AtomicU64::new(0),
            poll: SharedFlag::new(),
            critical_depth: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// SeqCst so the coordinator's state read and the owner's poll read
    /// cannot both miss each other's write.
    #[inline]
    pub fn state(&self) -> ThreadState {
        self.state.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state, Ordering::SeqCst);
    }

    /// Publishes the parked flag after the observed epoch.
    pub fn mark_parked(&self) {
        self.parked.store(true, Ordering::Release);
    }

    pub fn mark_running(&self) {
        self.parked.store(false, Ordering::Release);
    }

    pub fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Acquire)
    }

    pub fn set_observed_epoch(&self, epoch: u64) {
        self.observed_epoch.store(epoch, Ordering::Release);
    }

    pub fn observed_epoch(&self) -> u64 {
        self.observed_epoch.load(Ordering::Acquire)
    }

    /// Parked for exactly `epoch`. A park left over from an older pause does not count.
    pub fn is_parked_at(&self, epoch: u64) -> bool {
        // parked first: its acquire orders the epoch load after the owner's
        // epoch store.
        self.is_parked() && self.observed_epoch() == epoch
    }

    #[inline]
    pub fn poll_armed(&self) -> bool {
        self.poll.is_set()
    }

    pub(crate) fn arm_poll(&self) {
        self.poll.set();
    }

    pub(crate) fn disarm_poll(&self) {
        self.poll.unset();
    }

    pub fn critical_depth(&self) -> usize {
        self.critical_depth.load(Ordering::Acquire)
    }

    pub(crate) fn critical_depth_cell(&self) -> &AtomicUsize {
        &self.critical_depth
    }

    pub fn snapshot(&self) -> StuckMutator {
        StuckMutator {
            id: self.id,
            name: self.name.clone(),
            state: self.state(),
            parked: self.is_parked(),
            observed_epoch: self.observed_epoch(),
            critical_depth: self.critical_depth(),
        }
    }
}

impl std::fmt::Debug for ThreadPauseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPauseState")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("parked", &self.is_parked())
            .field("observed_epoch", &self.observed_epoch())
            .field("critical_depth", &self.critical_depth())
            .finish()
    }
}

/// Clears the parked marker even if the parked caller unwinds.
pub(crate) struct ParkedGuard<'a> {
    record: &'a ThreadPauseState,
}

impl<'a> ParkedGuard<'a> {
    pub(crate) fn park(record: &'a ThreadPauseState, epoch: u64) -> Self {
        record.set_observed_epoch(epoch);
        record.mark_parked();
        Self { record }
    }
}

impl<'a> Drop for ParkedGuard<'a> {
    fn drop(&mut self) {
        self.record.mark_running();
        self.record.set_observed_epoch(0);
    }
}

thread_local! {
    /// Set while this thread holds a [`Mutator`].
    static REGISTERED: Cell<bool> = Cell::new(false);
}

/// True if the calling thread holds a [`Mutator`].
pub fn is_registered() -> bool {
    REGISTERED.with(|registered| registered.get())
}

/// Registered mutator thread.
///
/// Created by [`Safepoint::register_mutator`] and bound to the registering
/// thread. Dropping it deregisters the thread.
pub struct Mutator<'a> {
    pub(crate) safepoint: &'a Safepoint,
    pub(crate) record: Arc<ThreadPauseState>,
    _not_send: PhantomData<*mut ()>,
}

impl<'a> Mutator<'a> {
    pub(crate) fn new(safepoint: &'a Safepoint, record: Arc<ThreadPauseState>) -> Self {
        REGISTERED.with(|registered| registered.set(true));
        Self {
            safepoint,
            record,
            _not_send: PhantomData,
        }
    }

    pub fn record(&self) -> &Arc<ThreadPauseState> {
        &self.record
    }

    pub fn id(&self) -> usize {
        self.record.id()
    }

    pub fn state(&self) -> ThreadState {
        self.record.state()
    }

    pub fn safepoint(&self) -> &'a Safepoint {
        self.safepoint
    }

    /// Safepoint poll. Mutator code calls this at bounded intervals; it parks
    /// the thread when a pause is requested. Inside a critical region the
    /// poll is a no-op, the region's exit takes care of it.
    #[inline(always)]
    pub fn poll(&self) {
        if self.record.poll_armed() && self.record.critical_depth() == 0 {
            self.block();
        }
    }

    /// Parks this thread until the current pause ends.
    #[cold]
    #[inline(never)]
    pub fn block(&self) {
        self.safepoint.block(&self.record);
    }

    /// Switches the execution state. Leaving a safe state re-checks the poll
    /// since the coordinator may already have counted this thread as stopped.
    pub fn transition(&self, to: ThreadState) -> ThreadState {
        let from = self.record.state();
        self.record.set_state(to);

        if from.is_safe() && !to.is_safe() {
            // Pairs with the fence after the coordinator arms the polls.
            fence(Ordering::SeqCst);
            self.poll();
        }

        from
    }

    /// Runs the scope in [`ThreadState::Native`].
    pub fn safe_scope(&self) -> StateScope<'_, 'a> {
        StateScope::new(self, ThreadState::Native)
    }

    /// Runs the scope in [`ThreadState::Blocked`].
    pub fn blocked_scope(&self) -> StateScope<'_, 'a> {
        StateScope::new(self, ThreadState::Blocked)
    }

    /// Runs the scope in [`ThreadState::Managed`], e.g. a callback from
    /// native code back into the runtime.
    pub fn managed_scope(&self) -> StateScope<'_, 'a> {
        StateScope::new(self, ThreadState::Managed)
    }

    /// Copy of the registered set. Waits for a pause in progress in the
    /// blocked state, so the pause does not wait for this thread.
    pub fn registered_threads(&self) -> Vec<Arc<ThreadPauseState>> {
        let _scope = self.blocked_scope();
        self.safepoint.threads.snapshot()
    }
}

impl<'a> Drop for Mutator<'a> {
    fn drop(&mut self) {
        // The registration lock may be held by a pause; wait for it in a safe
        // state so the coordinator does not wait for us.
        debug_assert_eq!(
            self.record.critical_depth(),
            0,
            "mutator deregistered inside a critical region"
        );
        self.record.set_state(ThreadState::Native);
        self.safepoint.deregister(&self.record);
        REGISTERED.with(|registered| registered.set(false));
    }
}

/// Restores the previous execution state on drop.
pub struct StateScope<'m, 'a> {
    mutator: &'m Mutator<'a>,
    prev: ThreadState,
}

impl<'m, 'a> StateScope<'m, 'a> {
    pub fn new(mutator: &'m Mutator<'a>, state: ThreadState) -> Self {
        Self {
            prev: mutator.transition(state),
            mutator,
        }
    }
}

impl<'m, 'a> Drop for StateScope<'m, 'a> {
    fn drop(&mut self) {
        self.mutator.transition(self.prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parked_guard_clears_on_drop() {
        let record = ThreadPauseState::new(0, Some("test".to_string()));
        {
            let _guard = ParkedGuard::park(&record, 7);
            assert!(record.is_parked_at(7));
            assert!(!record.is_parked_at(9));
        }
        assert!(!record.is_parked());
        assert_eq!(record.observed_epoch(), 0);
    }

    #[test]
    fn test_parked_guard_clears_on_unwind() {
        let record = ThreadPauseState::new(0, None);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = ParkedGuard::park(&record, 3);
            panic!("unwind while parked");
        }));

        assert!(result.is_err());
        assert!(!record.is_parked());
    }

    #[test]
    fn test_safe_states() {
        assert!(ThreadState::Native.is_safe());
        assert!(ThreadState::Blocked.is_safe());
        assert!(!ThreadState::Managed.is_safe());
        assert!(!ThreadState::Vm.is_safe());
    }
}
