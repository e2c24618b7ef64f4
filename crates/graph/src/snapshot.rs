//! Serializable point-in-time view of the wait-for graph.

use serde::Serialize;

use crate::resource::ResourceId;

#[derive(Debug, Clone, Serialize)]
pub struct ResourceView {
    pub id: ResourceId,
    pub owner: String,
    pub depth: usize,
    /// Debug rendering of the rule, for rule nodes.
    pub rule: Option<String>,
    /// Threads queued for this lock, in grant order.
    pub waiters: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    pub thread: String,
    pub owned: Vec<ResourceId>,
    pub waiting_for: Option<ResourceId>,
    /// Holdings forfeited to a deadlock resolution and not yet restored.
    pub suspended: Vec<ResourceId>,
    pub rule_depth: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphSnapshot {
    pub resources: Vec<ResourceView>,
    pub threads: Vec<ThreadView>,
}

impl GraphSnapshot {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.threads.is_empty()
    }

    /// Number of threads currently blocked on a resource.
    pub fn waiting_threads(&self) -> usize {
        self.threads.iter().filter(|t| t.waiting_for.is_some()).count()
    }
}
