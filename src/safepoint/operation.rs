use std::sync::Arc;

use super::{error::SafepointError, thread::Mutator, thread::ThreadPauseState, Safepoint};

/// Work that needs the world stopped: a collection, code patching, a heap
/// dump. Runs on the coordinator between the pause going active and ending.
pub trait VmOperation {
    fn name(&self) -> &'static str;

    /// `threads` are the mutators stopped for this pause.
    fn doit(&mut self, threads: &[Arc<ThreadPauseState>]);
}

/// Ends the pause even if the operation panics.
struct PauseGuard<'a> {
    safepoint: &'a Safepoint,
}

impl<'a> Drop for PauseGuard<'a> {
    fn drop(&mut self) {
        self.safepoint.end_pause();
    }
}

impl Safepoint {
    /// Runs `op` with every mutator stopped. Operations from different threads
    /// are serialized.
    pub fn execute(&self, op: &mut dyn VmOperation) -> Result<(), SafepointError> {
        let _serial = self.operation_lock.lock();

        log::debug!(target: "gc-safepoint", "VM operation '{}' requested", op.name());
        self.begin_pause(self.options.timeout)?;
        let _guard = PauseGuard { safepoint: self };

        // SAFETY: the registration lock is held until the guard ends the pause.
        let threads = unsafe { self.threads.locked() };
        op.doit(threads);
        Ok(())
    }

    /// Closure form of [`Safepoint::execute`].
    pub fn stop_the_world<R>(
        &self,
        f: impl FnOnce(&[Arc<ThreadPauseState>]) -> R,
    ) -> Result<R, SafepointError> {
        let _serial = self.operation_lock.lock();

        self.begin_pause(self.options.timeout)?;
        let _guard = PauseGuard { safepoint: self };

        // SAFETY: see `execute`.
        let threads = unsafe { self.threads.locked() };
        Ok(f(threads))
    }
}

impl<'a> Mutator<'a> {
    /// Stops the world from a registered thread. The caller counts as stopped
    /// while it waits and runs `f` in a safe state.
    pub fn stop_the_world<R>(
        &self,
        f: impl FnOnce(&[Arc<ThreadPauseState>]) -> R,
    ) -> Result<R, SafepointError> {
        self.assert_outside_critical();
        let _scope = self.safe_scope();
        self.safepoint.stop_the_world(f)
    }

    pub fn execute(&self, op: &mut dyn VmOperation) -> Result<(), SafepointError> {
        self.assert_outside_critical();
        let _scope = self.safe_scope();
        self.safepoint.execute(op)
    }

    /// The pause would be deferred until this thread's own region closes.
    #[inline]
    fn assert_outside_critical(&self) {
        debug_assert_eq!(
            self.record.critical_depth(),
            0,
            "stopping the world inside a critical region defers the pause on itself"
        );
    }
}
