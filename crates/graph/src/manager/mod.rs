//! The lock manager: the single synchronized entry point to the wait-for graph.

mod acquire;
mod rules;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use interlock_core::{LockConfig, ThreadKey};
use tracing::debug;

use crate::error::{LockError, Result};
use crate::graph::WaitForGraph;
use crate::lock::OrderedLock;
use crate::metrics::LockMetrics;
use crate::resource::ResourceId;
use crate::snapshot::GraphSnapshot;

pub use rules::RuleGuard;

struct Shared {
    graph: Mutex<WaitForGraph>,
    next_id: AtomicU64,
    config: LockConfig,
}

/// Handle to one lock/rule manager. Clones share the same graph.
///
/// Every mutation of the graph happens under one internal mutex; threads that
/// must wait sleep on their own condition variable with that mutex released,
/// so a blocked thread never stalls unrelated resources.
#[derive(Clone)]
pub struct LockManager {
    shared: Arc<Shared>,
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        debug!(
            cancel_poll_ms = config.cancel_poll_ms,
            resolution_history = config.resolution_history,
            "lock manager created"
        );
        Self {
            shared: Arc::new(Shared {
                graph: Mutex::new(WaitForGraph::new(config.resolution_history)),
                next_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.shared.config
    }

    /// Allocate a fresh lock. Nothing is recorded in the graph until the lock
    /// is first acquired.
    pub fn new_lock(&self) -> OrderedLock {
        OrderedLock::new(ResourceId::Lock(self.next_id()), self.clone())
    }

    /// Whether the calling thread owns any lock or rule.
    pub fn is_lock_owner(&self) -> bool {
        self.read(|g| g.owns_any(ThreadKey::current()))
    }

    /// No resource nodes, wait edges or thread state remain.
    pub fn is_empty(&self) -> bool {
        self.read(WaitForGraph::is_empty)
    }

    pub fn metrics(&self) -> LockMetrics {
        self.read(|g| g.metrics().clone())
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.read(WaitForGraph::snapshot)
    }

    /// Run the graph's consistency checks.
    pub fn check_invariants(&self) -> Result<()> {
        self.graph()?.check_invariants()
    }

    /// Abandon every lock and rule the calling thread holds, including rules
    /// still on its stack. Returns what was released.
    pub fn release_all(&self) -> Result<Vec<ResourceId>> {
        let key = ThreadKey::current();
        let mut graph = self.graph()?;
        let released = graph.release_all(key);
        if !released.is_empty() {
            debug!(thread = %key, count = released.len(), "abandoned holdings released");
        }
        Self::verify(&graph)?;
        Ok(released)
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn graph(&self) -> Result<MutexGuard<'_, WaitForGraph>> {
        self.shared.graph.lock().map_err(poisoned)
    }

    /// Read-only access that tolerates a poisoned mutex; queries must keep
    /// working after a panicking thread so diagnostics stay available.
    fn read<T>(&self, f: impl FnOnce(&WaitForGraph) -> T) -> T {
        let graph = self
            .shared
            .graph
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&*graph)
    }

    #[cfg(debug_assertions)]
    pub(crate) fn verify(graph: &WaitForGraph) -> Result<()> {
        graph.check_invariants()
    }

    #[cfg(not(debug_assertions))]
    pub(crate) fn verify(_graph: &WaitForGraph) -> Result<()> {
        Ok(())
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

pub(crate) fn poisoned<T>(err: PoisonError<T>) -> LockError {
    LockError::Poisoned(err.to_string())
}
