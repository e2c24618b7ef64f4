use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use interlock_core::SchedulerConfig;
use interlock_graph::LockManager;
use tracing::{debug, info};

use crate::error::{JobError, Result};
use crate::job::{Job, JobStatus};
use crate::metrics::SchedulerMetrics;

/// Jobs known to the scheduler, in the order they were scheduled.
#[derive(Default)]
pub(crate) struct Queue {
    pub(super) waiting: VecDeque<Job>,
    pub(super) running: Vec<Job>,
    pub(super) shutdown: bool,
}

impl Queue {
    pub(super) fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.running.is_empty()
    }
}

pub(crate) struct Shared {
    pub(super) workers: usize,
    pub(super) locks: LockManager,
    pub(super) pool: rayon::ThreadPool,
    pub(super) queue: Mutex<Queue>,
    /// Signalled whenever the queue becomes idle.
    pub(super) idle: Condvar,
    pub(super) metrics: RwLock<SchedulerMetrics>,
}

impl Shared {
    pub(super) fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn notify_if_idle(&self, queue: &Queue) {
        if queue.is_idle() {
            self.idle.notify_all();
        }
    }
}

/// The job scheduler. Runs [`Job`]s on a pool of worker threads, never
/// starting a job while a job with a conflicting rule is running.
///
/// Clones share the same queue, pool and lock manager.
#[derive(Clone)]
pub struct JobManager {
    pub(super) shared: Arc<Shared>,
}

impl JobManager {
    /// Create a scheduler whose jobs take their rules through `locks`.
    pub fn new(config: SchedulerConfig, locks: LockManager) -> Result<Self> {
        let workers = config.resolved_worker_threads();
        let prefix = config.thread_name_prefix.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()
            .map_err(|e| JobError::Pool(e.to_string()))?;

        info!(
            workers,
            prefix = %config.thread_name_prefix,
            "Job manager starting"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                workers,
                locks,
                pool,
                queue: Mutex::new(Queue::default()),
                idle: Condvar::new(),
                metrics: RwLock::new(SchedulerMetrics::default()),
            }),
        })
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// The lock manager shared by all jobs of this scheduler.
    pub fn locks(&self) -> &LockManager {
        &self.shared.locks
    }

    pub fn workers(&self) -> usize {
        self.shared.workers
    }

    /// Queue `job`. It moves to WAITING and starts as soon as a worker is
    /// free and no running job holds a conflicting rule.
    pub fn schedule(&self, job: &Job) -> Result<()> {
        let mut queue = self.shared.lock_queue();
        if queue.shutdown {
            return Err(JobError::ShutDown);
        }
        job.prepare(Arc::downgrade(&self.shared))?;
        queue.waiting.push_back(job.clone());
        if let Ok(mut m) = self.shared.metrics.write() {
            m.jobs_scheduled += 1;
        }
        debug!(job = job.name(), id = %job.id(), "Job scheduled");
        self.shared.dispatch(&mut queue);
        Ok(())
    }

    /// Cancel `job`.
    ///
    /// A queued job is removed, finishes as CANCELLED and `true` is returned.
    /// A running job has its cancellation token set and `false` is returned;
    /// its work decides when to stop and releases its own locks.
    pub fn cancel(&self, job: &Job) -> bool {
        let mut queue = self.shared.lock_queue();
        if let Some(pos) = queue.waiting.iter().position(|j| j.is(job)) {
            if let Some(removed) = queue.waiting.remove(pos) {
                removed.complete(JobStatus::Cancelled);
                if let Ok(mut m) = self.shared.metrics.write() {
                    m.record_dequeued_cancel();
                }
                debug!(job = removed.name(), "Queued job cancelled");
            }
            // The removed job may have been holding back later ones.
            self.shared.dispatch(&mut queue);
            self.shared.notify_if_idle(&queue);
            return true;
        }
        if queue.running.iter().any(|j| j.is(job)) {
            info!(job = job.name(), "Cancellation requested for running job");
            job.token().cancel();
        }
        false
    }

    /// Wait until no job is queued or running. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let queue = self.shared.lock_queue();
        let (_queue, wait) = self
            .shared
            .idle
            .wait_timeout_while(queue, timeout, |q| !q.is_idle())
            .unwrap_or_else(PoisonError::into_inner);
        !wait.timed_out()
    }

    pub fn waiting_count(&self) -> usize {
        self.shared.lock_queue().waiting.len()
    }

    pub fn running_count(&self) -> usize {
        self.shared.lock_queue().running.len()
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.shared
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop accepting jobs, cancel everything queued and request
    /// cancellation of running jobs.
    pub fn shutdown(&self) {
        info!("Job manager shutdown requested");
        let mut queue = self.shared.lock_queue();
        queue.shutdown = true;
        let drained: Vec<Job> = queue.waiting.drain(..).collect();
        for job in drained {
            job.complete(JobStatus::Cancelled);
            if let Ok(mut m) = self.shared.metrics.write() {
                m.record_dequeued_cancel();
            }
        }
        for job in &queue.running {
            job.token().cancel();
        }
        self.shared.notify_if_idle(&queue);
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("workers", &self.shared.workers)
            .finish_non_exhaustive()
    }
}
