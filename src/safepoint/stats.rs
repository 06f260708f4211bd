use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::base::{number_seq::TruncatedSeq, utils::formatted_duration};

/// Timings of one pause, filled in as it progresses.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PauseRecord {
    pub epoch: u64,
    pub threads: usize,
    /// Mutators that were neither parked nor in a safe state on the first scan.
    pub initially_running: usize,
    pub iterations: usize,
    pub deferred: bool,
    pub sync_time: Duration,
    pub cleanup_time: Duration,
    pub pause_time: Duration,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct StatisticsSummary {
    pub pauses: u64,
    pub deferred: u64,
    pub timeouts: u64,
    pub avg_sync_ms: f64,
    pub max_sync_ms: f64,
    pub avg_pause_ms: f64,
    pub max_pause_ms: f64,
    pub last: Option<PauseRecord>,
}

struct Inner {
    current: Option<(Instant, PauseRecord)>,
    last: Option<PauseRecord>,
    pauses: u64,
    deferred: u64,
    timeouts: u64,
    sync_times: TruncatedSeq,
    cleanup_times: TruncatedSeq,
    pause_times: TruncatedSeq,
}

fn ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

pub struct SafepointStatistics {
    inner: Mutex<Inner>,
    interval: usize,
}

impl SafepointStatistics {
    pub fn new(window: usize, interval: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: None,
                last: None,
                pauses: 0,
                deferred: 0,
                timeouts: 0,
                sync_times: TruncatedSeq::new(window, 0.3),
                cleanup_times: TruncatedSeq::new(window, 0.3),
                pause_times: TruncatedSeq::new(window, 0.3),
            }),
            interval,
        }
    }

    pub(crate) fn begin(&self, epoch: u64, started: Instant) {
        self.inner.lock().current = Some((
            started,
            PauseRecord {
                epoch,
                threads: 0,
                initially_running: 0,
                iterations: 0,
                deferred: false,
                sync_time: Duration::ZERO,
                cleanup_time: Duration::ZERO,
                pause_time: Duration::ZERO,
            },
        ));
    }

    pub(crate) fn synchronized(
        &self,
        threads: usize,
        initially_running: usize,
        iterations: usize,
        deferred: bool,
    ) {
        let mut inner = self.inner.lock();
        if let Some((started, record)) = inner.current.as_mut() {
            record.threads = threads;
            record.initially_running = initially_running;
            record.iterations = iterations;
            record.deferred = deferred;
            record.sync_time = started.elapsed();
        }
    }

    pub(crate) fn cleanup_done(&self, elapsed: Duration) {
        if let Some((_, record)) = self.inner.lock().current.as_mut() {
            record.cleanup_time = elapsed;
        }
    }

    pub(crate) fn timed_out(&self) {
        let mut inner = self.inner.lock();
        inner.current = None;
        inner.timeouts += 1;
    }

    pub(crate) fn end(&self) {
        let mut inner = self.inner.lock();
        let Some((started, mut record)) = inner.current.take() else {
            return;
        };

        record.pause_time = started.elapsed().saturating_sub(record.sync_time);
        inner.pauses += 1;
        if record.deferred {
            inner.deferred += 1;
        }
        inner.sync_times.add(ms(record.sync_time));
        inner.cleanup_times.add(ms(record.cleanup_time));
        inner.pause_times.add(ms(record.pause_time));

        log::debug!(
            target: "gc-safepoint",
            "safepoint {}: {} thread(s), {} running, {} iteration(s), sync {}, cleanup {}, total {}",
            record.epoch,
            record.threads,
            record.initially_running,
            record.iterations,
            formatted_duration(record.sync_time),
            formatted_duration(record.cleanup_time),
            formatted_duration(record.pause_time),
        );

        inner.last = Some(record);

        if self.interval != 0 && inner.pauses % self.interval as u64 == 0 {
            log::info!(
                target: "gc-safepoint",
                "{} pauses ({} deferred, {} timed out): sync avg {:.3}ms max {:.3}ms, cleanup avg {:.3}ms, pause avg {:.3}ms max {:.3}ms sd {:.3}ms",
                inner.pauses,
                inner.deferred,
                inner.timeouts,
                inner.sync_times.avg(),
                inner.sync_times.maximum(),
                inner.cleanup_times.avg(),
                inner.pause_times.avg(),
                inner.pause_times.maximum(),
                inner.pause_times.sd(),
            );
        }
    }

    pub fn summary(&self) -> StatisticsSummary {
        let inner = self.inner.lock();
        StatisticsSummary {
            pauses: inner.pauses,
            deferred: inner.deferred,
            timeouts: inner.timeouts,
            avg_sync_ms: inner.sync_times.avg(),
            max_sync_ms: inner.sync_times.maximum(),
            avg_pause_ms: inner.pause_times.avg(),
            max_pause_ms: inner.pause_times.maximum(),
            last: inner.last.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lifecycle() {
        let stats = SafepointStatistics::new(4, 1);
        stats.begin(1, Instant::now());
        stats.synchronized(3, 1, 2, true);
        stats.cleanup_done(Duration::from_micros(5));
        stats.end();

        let summary = stats.summary();
        assert_eq!(summary.pauses, 1);
        assert_eq!(summary.deferred, 1);

        let last = summary.last.unwrap();
        assert_eq!(last.epoch, 1);
        assert_eq!(last.threads, 3);
        assert_eq!(last.iterations, 2);
        assert_eq!(last.cleanup_time, Duration::from_micros(5));
    }

    #[test]
    fn test_timeout_discards_current() {
        let stats = SafepointStatistics::new(4, 0);
        stats.begin(1, Instant::now());
        stats.timed_out();
        stats.end();

        let summary = stats.summary();
        assert_eq!(summary.pauses, 0);
        assert_eq!(summary.timeouts, 1);
        assert!(summary.last.is_none());
    }
}
