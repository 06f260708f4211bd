use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use scoped_thread_pool::Pool;

use super::error::CleanupError;
use crate::{base::utils::formatted_duration, sync::shared_vars::SharedFlag};

pub type CleanupJob = Box<dyn Fn() -> Result<(), CleanupError> + Send + Sync>;

/// Maintenance job run once per pause while the world is stopped.
pub struct CleanupTask {
    name: &'static str,
    job: CleanupJob,
    runs: AtomicU64,
    skips: AtomicU64,
}

impl CleanupTask {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn skips(&self) -> u64 {
        self.skips.load(Ordering::Relaxed)
    }
}

/// One claim flag per task: whoever flips it first runs the task.
struct SubTasksDone {
    claims: Box<[SharedFlag]>,
}

impl SubTasksDone {
    fn new(n: usize) -> Self {
        Self {
            claims: (0..n).map(|_| SharedFlag::new()).collect(),
        }
    }

    fn try_claim(&self, index: usize) -> bool {
        self.claims[index].try_set()
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct CleanupSummary {
    pub executed: usize,
    pub skipped: Vec<&'static str>,
    pub workers: usize,
    pub elapsed: Duration,
}

/// Runs the registered cleanup menu. Tasks are independent; workers claim
/// them one by one, and a worker that finishes early keeps claiming until
/// the menu is exhausted.
pub struct CleanupTaskRunner {
    tasks: Vec<CleanupTask>,
    pool: Mutex<Option<Pool>>,
    pool_workers: usize,
}

impl CleanupTaskRunner {
    pub fn new() -> Self {
        Self {
            tasks: vec![],
            pool: Mutex::new(None),
            pool_workers: 0,
        }
    }

    /// Adds a job to the menu. The menu is fixed once the runner is handed to
    /// a [`Safepoint`](super::Safepoint).
    pub fn register_job<F>(&mut self, name: &'static str, job: F) -> &mut Self
    where
        F: Fn() -> Result<(), CleanupError> + Send + Sync + 'static,
    {
        debug_assert!(
            self.tasks.iter().all(|task| task.name != name),
            "cleanup task {} registered twice",
            name
        );
        self.tasks.push(CleanupTask {
            name,
            job: Box::new(job),
            runs: AtomicU64::new(0),
            skips: AtomicU64::new(0),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[CleanupTask] {
        &self.tasks
    }

    pub fn task(&self, name: &str) -> Option<&CleanupTask> {
        self.tasks.iter().find(|task| task.name == name)
    }

    /// Spawns `workers` helper threads. The thread calling [`run`](Self::run)
    /// always works too.
    pub(crate) fn start_workers(&mut self, workers: usize) {
        if workers == 0 || self.tasks.len() < 2 {
            return;
        }

        *self.pool.get_mut() = Some(Pool::new(workers));
        self.pool_workers = workers;
    }

    pub fn shutdown(&self) {
        if let Some(pool) = self.pool.lock().take() {
            pool.shutdown();
        }
    }

    fn claim_and_run(
        &self,
        claims: &SubTasksDone,
        executed: &AtomicUsize,
        skipped: &Mutex<Vec<&'static str>>,
    ) {
        for (index, task) in self.tasks.iter().enumerate() {
            if !claims.try_claim(index) {
                continue;
            }

            let start = Instant::now();
            match (task.job)() {
                Ok(()) => {
                    task.runs.fetch_add(1, Ordering::Relaxed);
                    executed.fetch_add(1, Ordering::Relaxed);
                    log::trace!(target: "gc-cleanup", "{} done in {}", task.name, formatted_duration(start.elapsed()));
                }
                Err(err) => {
                    // Retried on the next pause; never fails this one.
                    task.skips.fetch_add(1, Ordering::Relaxed);
                    skipped.lock().push(task.name);
                    log::warn!(target: "gc-cleanup", "{} skipped: {}", task.name, err);
                }
            }
        }
    }

    /// Executes every task exactly once using up to `worker_count` threads.
    pub fn run(&self, worker_count: usize) -> CleanupSummary {
        let start = Instant::now();
        let claims = SubTasksDone::new(self.tasks.len());
        let executed = AtomicUsize::new(0);
        let skipped = Mutex::new(Vec::new());

        let pool = self.pool.lock();
        let helpers = worker_count
            .min(self.tasks.len())
            .saturating_sub(1)
            .min(self.pool_workers);

        let work = || self.claim_and_run(&claims, &executed, &skipped);

        match pool.as_ref() {
            Some(pool) if helpers > 0 => {
                let work = &work;
                pool.scoped(|scope| {
                    for _ in 0..helpers {
                        scope.execute(move || work());
                    }
                    work();
                });
            }
            _ => work(),
        }
        drop(pool);

        let summary = CleanupSummary {
            executed: executed.load(Ordering::Relaxed),
            skipped: skipped.into_inner(),
            workers: helpers + 1,
            elapsed: start.elapsed(),
        };

        log::debug!(
            target: "gc-cleanup",
            "{} cleanup task(s) on {} worker(s) in {}, {} skipped",
            summary.executed,
            summary.workers,
            formatted_duration(summary.elapsed),
            summary.skipped.len()
        );
        summary
    }
}

impl Default for CleanupTaskRunner {
    fn default() -> Self {
        Self::new()
    }
}
