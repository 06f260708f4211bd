use core::fmt;
use std::time::Duration;

use crate::base::utils::{
    formatted_duration, read_bool_from_env, read_millis_from_env, read_uint_from_env,
};

/// Tunables of the safepoint subsystem.
///
/// All fields can be overridden from the environment, see [`SafepointOptions::from_env`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SafepointOptions {
    /// How long the coordinator waits for mutators before reporting them as stuck.
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// Abort the process when the timeout fires. When unset the pause is rolled
    /// back and `begin_pause` returns an error instead.
    pub abort_on_timeout: bool,
    /// Number of scans retried with only a spin hint in between.
    pub spin_iterations: usize,
    /// Sleep between scans while the synchronization is younger than `short_sleep_window`.
    pub short_sleep: Duration,
    /// Sleep between scans once the synchronization is older than `short_sleep_window`.
    pub long_sleep: Duration,
    pub short_sleep_window: Duration,
    /// Cleanup workers including the thread running the pause. 0 means one per CPU.
    pub cleanup_workers: usize,
    pub parallel_cleanup: bool,
    /// Log a statistics summary every this many pauses. 0 disables it.
    pub statistics_interval: usize,
    pub statistics_window: usize,
}

impl Default for SafepointOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_millis(10_000)),
            abort_on_timeout: true,
            spin_iterations: 8,
            short_sleep: Duration::from_micros(10),
            long_sleep: Duration::from_millis(1),
            short_sleep_window: Duration::from_millis(1),
            cleanup_workers: 0,
            parallel_cleanup: true,
            statistics_interval: 0,
            statistics_window: 64,
        }
    }
}

impl SafepointOptions {
    /// Defaults overlaid with:
    ///
    /// - `SAFEPOINT_TIMEOUT_MS` (0 disables the timeout)
    /// - `SAFEPOINT_ABORT_ON_TIMEOUT`
    /// - `SAFEPOINT_SPIN_ITERATIONS`
    /// - `SAFEPOINT_CLEANUP_WORKERS`
    /// - `SAFEPOINT_PARALLEL_CLEANUP`
    /// - `SAFEPOINT_STATISTICS_INTERVAL`
    pub fn from_env() -> Self {
        let mut opts = Self::default();

        if let Some(timeout) = read_millis_from_env("SAFEPOINT_TIMEOUT_MS") {
            opts.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        }

        if let Some(abort) = read_bool_from_env("SAFEPOINT_ABORT_ON_TIMEOUT") {
            opts.abort_on_timeout = abort;
        }

        if let Some(spins) = read_uint_from_env("SAFEPOINT_SPIN_ITERATIONS") {
            opts.spin_iterations = spins;
        }

        if let Some(workers) = read_uint_from_env("SAFEPOINT_CLEANUP_WORKERS") {
            opts.cleanup_workers = workers;
        }

        if let Some(parallel) = read_bool_from_env("SAFEPOINT_PARALLEL_CLEANUP") {
            opts.parallel_cleanup = parallel;
        }

        if let Some(interval) = read_uint_from_env("SAFEPOINT_STATISTICS_INTERVAL") {
            opts.statistics_interval = interval;
        }

        opts
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_abort_on_timeout(mut self, abort: bool) -> Self {
        self.abort_on_timeout = abort;
        self
    }

    pub fn with_cleanup_workers(mut self, workers: usize) -> Self {
        self.cleanup_workers = workers;
        self
    }

    /// Resolved number of cleanup workers, never 0.
    pub fn cleanup_worker_count(&self) -> usize {
        if !self.parallel_cleanup {
            1
        } else if self.cleanup_workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.cleanup_workers
        }
    }
}

impl fmt::Display for SafepointOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafepointOptions")
            .field(
                "timeout",
                &self
                    .timeout
                    .map(formatted_duration)
                    .unwrap_or_else(|| "none".to_string()),
            )
            .field("abort_on_timeout", &self.abort_on_timeout)
            .field("spin_iterations", &self.spin_iterations)
            .field("short_sleep", &formatted_duration(self.short_sleep))
            .field("long_sleep", &formatted_duration(self.long_sleep))
            .field("cleanup_workers", &self.cleanup_worker_count())
            .field("statistics_interval", &self.statistics_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_resolution() {
        let opts = SafepointOptions::default().with_cleanup_workers(3);
        assert_eq!(opts.cleanup_worker_count(), 3);

        let mut serial = opts.clone();
        serial.parallel_cleanup = false;
        assert_eq!(serial.cleanup_worker_count(), 1);

        let auto = SafepointOptions::default();
        assert!(auto.cleanup_worker_count() >= 1);
    }
}
