use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::resource::ResourceId;

/// One deadlock resolution, kept for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub at: DateTime<Utc>,
    /// Thread whose wait would have closed the cycle.
    pub requester: String,
    /// Thread forced to forfeit its holdings.
    pub victim: String,
    /// Resources along the cycle, in traversal order.
    pub cycle: Vec<ResourceId>,
    /// Number of resources the victim forfeited.
    pub forfeited: usize,
    /// Whether the requester was handed the contended resource directly.
    pub granted_directly: bool,
}

/// Lock manager counters exposed to diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct LockMetrics {
    /// Grants, including reentrant ones and restored holdings.
    pub acquisitions: u64,
    /// Times a thread committed a wait edge and slept.
    pub contended_waits: u64,
    pub cycles_detected: u64,
    pub victims_forced: u64,
    pub cancelled_waits: u64,
    /// Resources released by `release_all` rather than by their owner's balanced calls.
    pub abandoned_resources: u64,
    /// Most recent resolutions, oldest first.
    pub recent_resolutions: VecDeque<Resolution>,
    #[serde(skip)]
    history: usize,
}

impl LockMetrics {
    pub fn with_history(history: usize) -> Self {
        Self {
            acquisitions: 0,
            contended_waits: 0,
            cycles_detected: 0,
            victims_forced: 0,
            cancelled_waits: 0,
            abandoned_resources: 0,
            recent_resolutions: VecDeque::with_capacity(history.min(256)),
            history,
        }
    }

    /// Record a resolution, dropping the oldest beyond the configured history.
    pub fn record_resolution(&mut self, resolution: Resolution) {
        self.cycles_detected += 1;
        self.victims_forced += 1;
        if self.history == 0 {
            return;
        }
        self.recent_resolutions.push_back(resolution);
        while self.recent_resolutions.len() > self.history {
            self.recent_resolutions.pop_front();
        }
    }
}

impl Default for LockMetrics {
    fn default() -> Self {
        Self::with_history(64)
    }
}
