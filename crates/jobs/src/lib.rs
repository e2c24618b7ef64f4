//! Job scheduling on top of the interlock lock manager.
//!
//! A [`JobManager`] runs [`Job`]s on a pool of worker threads. Jobs that carry
//! a scheduling rule are admitted one conflicting rule at a time, and every
//! job's locks and rules are reclaimed when it finishes, whatever its result.

pub mod error;
pub mod job;
pub mod metrics;
pub mod monitor;
pub mod scheduler;

pub use error::{JobError, Result};
pub use job::{Job, JobState, JobStatus};
pub use metrics::SchedulerMetrics;
pub use monitor::ProgressMonitor;
pub use scheduler::JobManager;
