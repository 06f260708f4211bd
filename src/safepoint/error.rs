use core::fmt;
use std::time::Duration;

use super::thread::ThreadState;

/// Snapshot of a mutator that did not reach a safe state in time.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StuckMutator {
    pub id: usize,
    pub name: Option<String>,
    pub state: ThreadState,
    pub parked: bool,
    pub observed_epoch: u64,
    pub critical_depth: usize,
}

impl fmt::Display for StuckMutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mutator #{} ({}): state={:?} parked={} observed_epoch={} critical_depth={}",
            self.id,
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.state,
            self.parked,
            self.observed_epoch,
            self.critical_depth
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SafepointError {
    #[error("safepoint {epoch} timed out after {waited:?}: {} mutator(s) not responding", .unresponsive.len())]
    Timeout {
        epoch: u64,
        waited: Duration,
        unresponsive: Vec<StuckMutator>,
    },
    #[error("a pause is already in progress (state {0:?})")]
    NotIdle(super::state::PauseState),
}

#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum CleanupError {
    /// The job could not get the scratch memory it needs. It is skipped for
    /// this pause and tried again on the next one.
    #[error("cleanup task could not allocate {0} bytes of scratch memory")]
    ResourceExhausted(usize),
}
