use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use interlock_core::CancelToken;
use interlock_graph::SchedulingRule;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{JobError, Result};
use crate::monitor::ProgressMonitor;
use crate::scheduler::{JobManager, Shared};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Not scheduled, or finished.
    None,
    /// Queued for a worker.
    Waiting,
    /// Queued or picked up, but held back by a conflicting rule.
    Blocked,
    Running,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::None => "NONE",
            JobState::Waiting => "WAITING",
            JobState::Blocked => "BLOCKED",
            JobState::Running => "RUNNING",
        };
        f.write_str(name)
    }
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Ok,
    Cancelled,
    Failed(String),
}

impl JobStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, JobStatus::Ok)
    }
}

type Work = dyn Fn(&ProgressMonitor) -> JobStatus + Send + Sync;

struct RunState {
    state: JobState,
    result: Option<JobStatus>,
    token: CancelToken,
    scheduler: Weak<Shared>,
}

struct JobInner {
    id: Uuid,
    name: String,
    rule: Option<Arc<dyn SchedulingRule>>,
    work: Box<Work>,
    run: Mutex<RunState>,
    finished: Condvar,
}

/// A schedulable unit of work, optionally guarded by a scheduling rule.
///
/// Clones are handles to the same job. A job may be scheduled again once it
/// has returned to [`JobState::None`].
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn(&ProgressMonitor) -> JobStatus + Send + Sync + 'static,
    {
        Self::build(name.into(), None, Box::new(work))
    }

    /// A job that runs inside `rule`. It is not started while another job or
    /// thread holds a conflicting rule.
    pub fn with_rule<F>(name: impl Into<String>, rule: Arc<dyn SchedulingRule>, work: F) -> Self
    where
        F: Fn(&ProgressMonitor) -> JobStatus + Send + Sync + 'static,
    {
        Self::build(name.into(), Some(rule), Box::new(work))
    }

    fn build(name: String, rule: Option<Arc<dyn SchedulingRule>>, work: Box<Work>) -> Self {
        Self {
            inner: Arc::new(JobInner {
                id: Uuid::new_v4(),
                name,
                rule,
                work,
                run: Mutex::new(RunState {
                    state: JobState::None,
                    result: None,
                    token: CancelToken::new(),
                    scheduler: Weak::new(),
                }),
                finished: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn rule(&self) -> Option<&Arc<dyn SchedulingRule>> {
        self.inner.rule.as_ref()
    }

    pub fn state(&self) -> JobState {
        self.lock_run().state
    }

    /// Result of the most recent finished run.
    pub fn result(&self) -> Option<JobStatus> {
        self.lock_run().result.clone()
    }

    pub fn schedule(&self, manager: &JobManager) -> Result<()> {
        manager.schedule(self)
    }

    /// Cancel the job. A queued job is removed and `true` is returned; a
    /// running job only has its token set and `false` is returned.
    pub fn cancel(&self) -> bool {
        let scheduler = self.lock_run().scheduler.upgrade();
        match scheduler {
            Some(shared) => JobManager::from_shared(shared).cancel(self),
            None => false,
        }
    }

    /// Block until the current run finishes and return its result.
    pub fn join(&self, timeout: Duration) -> Result<JobStatus> {
        let run = self.lock_run();
        let (run, wait) = self
            .inner
            .finished
            .wait_timeout_while(run, timeout, |r| r.state != JobState::None)
            .unwrap_or_else(PoisonError::into_inner);
        if wait.timed_out() {
            return Err(JobError::JoinTimeout {
                name: self.inner.name.clone(),
            });
        }
        run.result.clone().ok_or_else(|| JobError::NotScheduled {
            name: self.inner.name.clone(),
        })
    }

    pub(crate) fn is(&self, other: &Job) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn run_work(&self, monitor: &ProgressMonitor) -> JobStatus {
        (self.inner.work)(monitor)
    }

    /// Move a finished or fresh job to WAITING with a new cancellation token.
    pub(crate) fn prepare(&self, scheduler: Weak<Shared>) -> Result<()> {
        let mut run = self.lock_run();
        if run.state != JobState::None {
            return Err(JobError::AlreadyScheduled {
                name: self.inner.name.clone(),
            });
        }
        run.state = JobState::Waiting;
        run.result = None;
        run.token = CancelToken::new();
        run.scheduler = scheduler;
        Ok(())
    }

    pub(crate) fn token(&self) -> CancelToken {
        self.lock_run().token.clone()
    }

    pub(crate) fn set_state(&self, state: JobState) {
        let mut run = self.lock_run();
        if run.state != state && run.state != JobState::None {
            debug!(job = %self.inner.name, from = %run.state, to = %state, "job state");
            run.state = state;
        }
    }

    /// Record the run's result, return to NONE and wake joiners.
    pub(crate) fn complete(&self, status: JobStatus) {
        let mut run = self.lock_run();
        run.state = JobState::None;
        run.result = Some(status);
        run.scheduler = Weak::new();
        self.inner.finished.notify_all();
    }

    fn lock_run(&self) -> MutexGuard<'_, RunState> {
        self.inner.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("rule", &self.inner.rule)
            .field("state", &self.state())
            .finish()
    }
}
