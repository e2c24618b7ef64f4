//! Progress reporting and cooperative cancellation for running jobs.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use interlock_core::CancelToken;
use tracing::trace;

/// Handle passed to a job's work function.
///
/// Work should check [`is_cancelled`](Self::is_cancelled) at safe points and
/// return [`JobStatus::Cancelled`](crate::JobStatus::Cancelled) after
/// releasing whatever it acquired.
#[derive(Debug)]
pub struct ProgressMonitor {
    job: String,
    task: Mutex<String>,
    total: AtomicU64,
    worked: AtomicU64,
    token: CancelToken,
}

impl ProgressMonitor {
    pub fn new(job: impl Into<String>, token: CancelToken) -> Self {
        Self {
            job: job.into(),
            task: Mutex::new(String::new()),
            total: AtomicU64::new(0),
            worked: AtomicU64::new(0),
            token,
        }
    }

    pub fn begin_task(&self, name: &str, total_work: u64) {
        if let Ok(mut task) = self.task.lock() {
            *task = name.to_string();
        }
        self.total.store(total_work, Ordering::Relaxed);
        self.worked.store(0, Ordering::Relaxed);
        trace!(job = %self.job, task = name, total_work, "task begun");
    }

    pub fn worked(&self, units: u64) {
        self.worked.fetch_add(units, Ordering::Relaxed);
    }

    /// Mark the current task complete.
    pub fn done(&self) {
        self.worked
            .store(self.total.load(Ordering::Relaxed), Ordering::Relaxed);
        trace!(job = %self.job, "task done");
    }

    /// Completed fraction in `0.0..=1.0`, or `None` before `begin_task`.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return None;
        }
        let worked = self.worked.load(Ordering::Relaxed).min(total);
        Some(worked as f64 / total as f64)
    }

    pub fn task_name(&self) -> String {
        self.task.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request cancellation from inside the job.
    pub fn set_cancelled(&self) {
        self.token.cancel();
    }

    /// Token to pass to cancellable lock waits.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.token
    }
}
