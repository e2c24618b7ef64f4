//! Job scheduler -- admits queued jobs by rule and runs them on a worker pool.
//!
//! Split into focused submodules:
//! - `core`: JobManager struct, constructor, schedule/cancel and accessors
//! - `execution`: running one job on a worker, including cleanup
//! - `scheduling`: choosing which queued jobs may start

mod core;
mod execution;
mod scheduling;

pub use self::core::JobManager;
pub(crate) use self::core::Shared;
