use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use interlock_core::CancelToken;
use interlock_graph::LockError;
use tracing::{debug, error, warn};

use crate::job::{Job, JobState, JobStatus};
use crate::monitor::ProgressMonitor;

use super::core::Shared;

impl Shared {
    /// Run one admitted job on the current worker thread.
    pub(super) fn run_job(self: &Arc<Self>, job: Job) {
        let started = Instant::now();
        let token = job.token();
        let monitor = ProgressMonitor::new(job.name(), token.clone());

        let status = self.execute(&job, &monitor, &token);
        self.release_leftovers(&job);
        self.finish(job, status, started.elapsed());
    }

    fn execute(&self, job: &Job, monitor: &ProgressMonitor, token: &CancelToken) -> JobStatus {
        if token.is_cancelled() {
            return JobStatus::Cancelled;
        }

        if let Some(rule) = job.rule() {
            let mark_blocked = || job.set_state(JobState::Blocked);
            match self.locks.begin_rule_observed(rule, Some(token), &mark_blocked) {
                Ok(()) => {}
                Err(LockError::Cancelled { .. }) => return JobStatus::Cancelled,
                Err(e) => {
                    error!(job = job.name(), error = %e, "Failed to enter job rule");
                    return JobStatus::Failed(e.to_string());
                }
            }
        }

        job.set_state(JobState::Running);
        debug!(job = job.name(), id = %job.id(), "Job running");
        let status = match panic::catch_unwind(AssertUnwindSafe(|| job.run_work(monitor))) {
            Ok(status) => status,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(job = job.name(), %message, "Job panicked");
                JobStatus::Failed(message)
            }
        };

        if let Some(rule) = job.rule() {
            if let Err(e) = self.locks.end_rule(rule) {
                warn!(job = job.name(), error = %e, "Job rule not ended cleanly");
            }
        }
        status
    }

    /// Release whatever the job's work left held on this worker thread.
    fn release_leftovers(&self, job: &Job) {
        match self.locks.release_all() {
            Ok(leaked) if !leaked.is_empty() => {
                warn!(
                    job = job.name(),
                    count = leaked.len(),
                    resources = ?leaked,
                    "Job finished while holding resources; released"
                );
                if let Ok(mut m) = self.metrics.write() {
                    m.leaked_resources += leaked.len() as u64;
                }
            }
            Ok(_) => {}
            Err(e) => error!(job = job.name(), error = %e, "Failed to release job resources"),
        }
    }

    fn finish(self: &Arc<Self>, job: Job, status: JobStatus, elapsed: Duration) {
        let mut queue = self.lock_queue();
        queue.running.retain(|j| !j.is(&job));

        match &status {
            JobStatus::Failed(reason) => warn!(job = job.name(), %reason, "Job failed"),
            _ => debug!(job = job.name(), ?status, ?elapsed, "Job finished"),
        }
        if let Ok(mut m) = self.metrics.write() {
            m.record_execution(job.name(), elapsed, &status);
        }
        job.complete(status);

        self.dispatch(&mut queue);
        self.notify_if_idle(&queue);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}
