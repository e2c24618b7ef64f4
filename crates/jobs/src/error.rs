use interlock_graph::LockError;

/// Error type for job scheduling.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job '{name}' is already scheduled or running")]
    AlreadyScheduled { name: String },
    #[error("Job '{name}' was never scheduled")]
    NotScheduled { name: String },
    #[error("Timed out waiting for job '{name}'")]
    JoinTimeout { name: String },
    #[error("Job manager is shut down")]
    ShutDown,
    #[error("Worker pool: {0}")]
    Pool(String),
    #[error(transparent)]
    Lock(#[from] LockError),
}

pub type Result<T> = std::result::Result<T, JobError>;
