//! Lock manager error types.

use thiserror::Error;

use crate::resource::ResourceId;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("{resource} is not owned by the calling thread")]
    NotOwner { resource: ResourceId },

    #[error("end_rule({actual}) does not match the innermost active rule {expected}")]
    RuleMismatch { expected: String, actual: String },

    #[error("end_rule called without an active rule")]
    NoActiveRule,

    #[error("wait for {resource} cancelled")]
    Cancelled { resource: ResourceId },

    #[error("lock graph mutex poisoned: {0}")]
    Poisoned(String),

    #[error("lock graph inconsistent: {0}")]
    GraphCorrupted(String),
}

impl LockError {
    /// Usage errors are caller bugs; everything else is either cancellation or
    /// an internal failure.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            LockError::NotOwner { .. } | LockError::RuleMismatch { .. } | LockError::NoActiveRule
        )
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
