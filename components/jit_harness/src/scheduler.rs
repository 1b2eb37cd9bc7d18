//! Bounded worker pool.
//!
//! `jobs` supervisor threads pull work from a shared channel. Each supervises
//! at most one worker process at a time. Heavy jobs additionally hold one of
//! a small number of permits for their whole run.

use crate::cancel::CancellationToken;
use crate::classify::ExecutionOutcome;
use crossbeam::channel;
use parking_lot::{Condvar, Mutex};
use std::thread;
use std::time::Duration;
use tracing::debug;

const PERMIT_POLL: Duration = Duration::from_millis(50);

/// Runs one job to completion
pub trait Executor: Sync {
    type Job: Send;

    /// Whether `job` needs a heavy permit
    fn is_heavy(&self, job: &Self::Job) -> bool;

    /// Run `job`; must honour `cancel`
    fn execute(&self, job: Self::Job, cancel: &CancellationToken) -> ExecutionOutcome;

    /// Outcome for a job that never started
    fn cancelled(&self, job: Self::Job) -> ExecutionOutcome;
}

/// Counting semaphore for heavy jobs
#[derive(Debug)]
pub struct HeavyPermits {
    available: Mutex<usize>,
    released: Condvar,
}

/// Held for the duration of a heavy job
#[derive(Debug)]
pub struct HeavyPermit<'a> {
    permits: &'a HeavyPermits,
}

impl HeavyPermits {
    pub fn new(count: usize) -> Self {
        Self {
            available: Mutex::new(count.max(1)),
            released: Condvar::new(),
        }
    }

    /// Wait for a permit; `None` if the batch is cancelled while waiting.
    pub fn acquire(&self, cancel: &CancellationToken) -> Option<HeavyPermit<'_>> {
        let mut available = self.available.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if *available > 0 {
                *available -= 1;
                return Some(HeavyPermit { permits: self });
            }
            self.released.wait_for(&mut available, PERMIT_POLL);
        }
    }

    pub fn available(&self) -> usize {
        *self.available.lock()
    }
}

impl Drop for HeavyPermit<'_> {
    fn drop(&mut self) {
        *self.permits.available.lock() += 1;
        self.permits.released.notify_one();
    }
}

/// Fixed-size pool that runs an [`Executor`]'s jobs
#[derive(Debug)]
pub struct Scheduler {
    jobs: usize,
    permits: HeavyPermits,
}

impl Scheduler {
    pub fn new(jobs: usize, heavy_jobs: usize) -> Self {
        Self {
            jobs: jobs.max(1),
            permits: HeavyPermits::new(heavy_jobs),
        }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Run every job; `progress` sees outcomes in completion order.
    ///
    /// Returns exactly one outcome per job, in completion order.
    pub fn run<E, P>(
        &self,
        executor: &E,
        jobs: Vec<E::Job>,
        cancel: &CancellationToken,
        mut progress: P,
    ) -> Vec<ExecutionOutcome>
    where
        E: Executor,
        P: FnMut(&ExecutionOutcome),
    {
        let total = jobs.len();
        let (job_tx, job_rx) = channel::unbounded::<E::Job>();
        let (result_tx, result_rx) = channel::unbounded::<ExecutionOutcome>();
        for job in jobs {
            // The receiver lives until the scope below ends.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let workers = self.jobs.min(total.max(1));
        debug!(workers, total, "starting worker pool");

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for job in job_rx.iter() {
                        let outcome = self.dispatch(executor, job, cancel);
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            let mut outcomes = Vec::with_capacity(total);
            for outcome in result_rx.iter() {
                progress(&outcome);
                outcomes.push(outcome);
            }
            outcomes
        })
    }

    fn dispatch<E: Executor>(
        &self,
        executor: &E,
        job: E::Job,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        if cancel.is_cancelled() {
            return executor.cancelled(job);
        }
        if executor.is_heavy(&job) {
            match self.permits.acquire(cancel) {
                Some(_permit) => executor.execute(job, cancel),
                None => executor.cancelled(job),
            }
        } else {
            executor.execute(job, cancel)
        }
    }
}
