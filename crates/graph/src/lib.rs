//! Wait-for graph, deadlock detector and lock/rule manager.
//!
//! A [`LockManager`] owns a single graph of which thread holds which
//! [`OrderedLock`] or [`SchedulingRule`] and which thread is waiting for what.
//! Every time a thread is about to block, the manager searches the graph for a
//! cycle through the new wait edge. When it finds one, a victim thread in the
//! cycle forfeits all of its holdings and later re-acquires them, so no set of
//! threads can stay deadlocked.

pub mod detector;
pub mod error;
pub mod graph;
pub mod lock;
pub mod manager;
pub mod metrics;
pub mod resource;
pub mod rule;
pub mod snapshot;

pub use detector::{Cycle, Hop, select_victim};
pub use error::{LockError, Result};
pub use lock::{OrderedLock, OrderedLockGuard};
pub use manager::{LockManager, RuleGuard};
pub use metrics::{LockMetrics, Resolution};
pub use resource::ResourceId;
pub use rule::{IdentityRule, PathRule, SchedulingRule, rules_conflict, same_rule};
pub use snapshot::{GraphSnapshot, ResourceView, ThreadView};
