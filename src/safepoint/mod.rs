//! Global pause coordination.
//!
//! A [`Safepoint`] brings every registered [`Mutator`] to a stop, runs an
//! operation and the cleanup menu while the world is stopped, and resumes
//! the mutators. Mutators cooperate by calling [`Mutator::poll`] at bounded
//! intervals and by switching to a safe [`ThreadState`] around code that
//! cannot reach a poll, e.g. foreign calls or blocking waits.
//!
//! One pause is in flight at a time. Its life is tracked by an epoch counter
//! that is odd while the pause is armed or active and even otherwise.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::base::monitor::Monitor;

pub mod cleanup;
pub mod critical;
pub mod error;
pub mod operation;
pub mod options;
pub mod state;
pub mod stats;
mod synchronizer;
pub mod thread;
pub mod threads;
pub mod wait_barrier;

pub use self::{
    cleanup::{CleanupSummary, CleanupTask, CleanupTaskRunner},
    critical::{CriticalGate, CriticalRegion},
    error::{CleanupError, SafepointError, StuckMutator},
    operation::VmOperation,
    options::SafepointOptions,
    state::{PauseState, SafepointState},
    stats::{PauseRecord, SafepointStatistics, StatisticsSummary},
    thread::{Mutator, StateScope, ThreadPauseState, ThreadState},
    threads::Threads,
    wait_barrier::WaitBarrier,
};

pub struct Safepoint {
    pub(crate) state: SafepointState,
    pub(crate) barrier: WaitBarrier,
    pub(crate) threads: Threads,
    pub(crate) gate: CriticalGate,
    pub(crate) cleanup: CleanupTaskRunner,
    pub(crate) options: SafepointOptions,
    /// Last epoch declared active. The coordinator of a deferred pause waits on it.
    pub(crate) completion: Monitor<u64>,
    pub(crate) operation_lock: Mutex<()>,
    pub(crate) stats: SafepointStatistics,
}

impl Safepoint {
    pub fn new(options: SafepointOptions) -> Self {
        Self::with_cleanup(options, CleanupTaskRunner::new())
    }

    pub fn with_cleanup(options: SafepointOptions, mut cleanup: CleanupTaskRunner) -> Self {
        let workers = options.cleanup_worker_count();
        // The thread running the pause is a worker too.
        cleanup.start_workers(workers.saturating_sub(1));

        log::debug!(
            target: "gc-safepoint",
            "safepoint initialized: {}, {} cleanup task(s)",
            options,
            cleanup.len()
        );

        Self {
            state: SafepointState::new(),
            barrier: WaitBarrier::new(),
            threads: Threads::new(),
            gate: CriticalGate::new(),
            stats: SafepointStatistics::new(options.statistics_window, options.statistics_interval),
            cleanup,
            options,
            completion: Monitor::new(0),
            operation_lock: Mutex::new(()),
        }
    }

    /// Registers the calling thread. Blocks while a pause is in progress.
    pub fn register_mutator(&self) -> Mutator<'_> {
        let name = std::thread::current().name().map(str::to_owned);
        self.register_named(name)
    }

    /// Registers the calling thread under `name`. Blocks while a pause is in progress.
    ///
    /// A thread registers at most once: a second registration would wait for
    /// a pause while its first [`Mutator`] still counts as running.
    pub fn register_named(&self, name: Option<String>) -> Mutator<'_> {
        debug_assert!(
            !thread::is_registered(),
            "{:?} is already registered as a mutator",
            std::thread::current().id()
        );
        let record = self.threads.add(name);
        log::trace!(target: "gc-safepoint", "registered mutator #{} {:?}", record.id(), record.name());
        Mutator::new(self, record)
    }

    pub(crate) fn deregister(&self, record: &Arc<ThreadPauseState>) {
        let removed = self.threads.remove(record);
        debug_assert!(removed, "mutator #{} deregistered twice", record.id());
        log::trace!(target: "gc-safepoint", "deregistered mutator #{}", record.id());
    }

    pub fn state(&self) -> PauseState {
        self.state.state()
    }

    pub fn is_at_safepoint(&self) -> bool {
        self.state.is_at_safepoint()
    }

    pub fn is_synchronizing(&self) -> bool {
        self.state.is_synchronizing()
    }

    pub fn safepoint_counter(&self) -> u64 {
        self.state.counter()
    }

    /// Mutators the current pause is still waiting for.
    pub fn waiting(&self) -> usize {
        self.state.waiting()
    }

    pub fn threads(&self) -> &Threads {
        &self.threads
    }

    pub fn gate(&self) -> &CriticalGate {
        &self.gate
    }

    pub fn is_critical_active(&self) -> bool {
        self.gate.is_active()
    }

    pub fn needs_pause(&self) -> bool {
        self.gate.needs_pause()
    }

    pub fn cleanup(&self) -> &CleanupTaskRunner {
        &self.cleanup
    }

    pub fn options(&self) -> &SafepointOptions {
        &self.options
    }

    pub fn statistics(&self) -> StatisticsSummary {
        self.stats.summary()
    }

    /// Stops the cleanup workers. Later pauses run cleanup on the coordinator alone.
    pub fn shutdown(&self) {
        let _serial = self.operation_lock.lock();
        debug_assert_eq!(self.state(), PauseState::Idle);
        self.cleanup.shutdown();

        let summary = self.statistics();
        log::info!(
            target: "gc-safepoint",
            "safepoint shut down after {} pause(s), {} deferred, {} timed out",
            summary.pauses,
            summary.deferred,
            summary.timeouts
        );
    }
}

static SAFEPOINT: OnceCell<Safepoint> = OnceCell::new();

/// Installs the process-wide safepoint. Returns false if one is already installed.
pub fn init(options: SafepointOptions, cleanup: CleanupTaskRunner) -> bool {
    let mut created = false;
    SAFEPOINT.get_or_init(|| {
        created = true;
        Safepoint::with_cleanup(options, cleanup)
    });
    created
}

/// The process-wide safepoint.
///
/// # Panics
///
/// Panics if [`init`] was not called.
pub fn safepoint() -> &'static Safepoint {
    match SAFEPOINT.get() {
        Some(safepoint) => safepoint,
        None => panic!("safepoint subsystem is not initialized"),
    }
}

pub fn try_safepoint() -> Option<&'static Safepoint> {
    SAFEPOINT.get()
}
