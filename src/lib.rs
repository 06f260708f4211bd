pub mod base;
pub mod safepoint;
pub mod sync;

pub use base::utils::formatted_duration;
pub use safepoint::{
    init, safepoint, try_safepoint, CleanupError, CleanupTaskRunner, CriticalRegion, Mutator,
    PauseState, Safepoint, SafepointError, SafepointOptions, ThreadState, VmOperation,
};
