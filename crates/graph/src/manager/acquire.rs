use std::collections::VecDeque;
use std::sync::MutexGuard;

use chrono::Utc;
use interlock_core::{CancelToken, ThreadKey};
use tracing::{debug, info};

use super::{LockManager, poisoned};
use crate::detector::{find_cycle, select_victim};
use crate::error::{LockError, Result};
use crate::graph::{Target, WaitForGraph};
use crate::metrics::Resolution;
use crate::resource::ResourceId;

/// One pending grant in a thread's work list.
#[derive(Debug, Clone)]
struct Request {
    target: Target,
    depth: usize,
    /// Only the caller's own request honours cancellation. Restoring holdings
    /// lost to a deadlock resolution always runs to completion.
    cancellable: bool,
}

/// How a sleeping waiter left its wait.
enum Woken {
    Granted,
    Suspended,
    Retry,
}

impl LockManager {
    /// Obtain `target` for `key`, blocking as needed.
    ///
    /// Works through an explicit list: the caller's request at the back and,
    /// after this thread has been chosen as a deadlock victim, the forfeited
    /// holdings at the front. The list is empty exactly when the caller's
    /// request and every forfeited holding have been granted again.
    ///
    /// `on_wait` runs once, with the graph locked, the first time the thread
    /// commits a wait edge. It must not call back into the manager.
    pub(crate) fn obtain<'a>(
        &'a self,
        mut graph: MutexGuard<'a, WaitForGraph>,
        key: ThreadKey,
        target: Target,
        cancel: Option<&CancelToken>,
        on_wait: &dyn Fn(),
    ) -> Result<MutexGuard<'a, WaitForGraph>> {
        let mut work = VecDeque::from([Request {
            target,
            depth: 1,
            cancellable: cancel.is_some(),
        }]);
        let mut announced = false;

        while let Some(request) = work.front().cloned() {
            if graph.try_grant(key, &request.target, request.depth) {
                work.pop_front();
                continue;
            }

            if let Some(cycle) = find_cycle(&graph, key, &request.target) {
                let Some(victim) = select_victim(&cycle) else {
                    return Err(LockError::GraphCorrupted(format!(
                        "cycle through {} has no victim",
                        request.target.resource()
                    )));
                };
                let (forfeited, granted) =
                    graph.suspend(victim, key, &request.target, request.depth)?;
                info!(
                    requester = %key,
                    victim = %victim,
                    resource = %request.target.resource(),
                    cycle_len = cycle.hops.len(),
                    forfeited = forfeited.len(),
                    granted,
                    "deadlock resolved"
                );
                graph.metrics.record_resolution(Resolution {
                    at: Utc::now(),
                    requester: key.to_string(),
                    victim: victim.to_string(),
                    cycle: cycle.resources(),
                    forfeited: forfeited.len(),
                    granted_directly: granted,
                });
                if granted {
                    work.pop_front();
                }
                continue;
            }

            graph.enqueue_wait(key, &request.target, request.depth);
            debug!(thread = %key, resource = %request.target.resource(), "waiting");
            if !announced {
                announced = true;
                on_wait();
            }

            let (guard, woken) = self.sleep(graph, key, &request, cancel)?;
            graph = guard;
            match woken {
                Woken::Granted => {
                    work.pop_front();
                }
                Woken::Suspended => {
                    for holding in graph.take_suspended(key).into_iter().rev() {
                        work.push_front(Request {
                            target: holding.target,
                            depth: holding.depth,
                            cancellable: false,
                        });
                    }
                }
                Woken::Retry => {}
            }
        }

        Self::verify(&graph)?;
        Ok(graph)
    }

    /// Sleep on the thread's condition variable until its wait is resolved one
    /// way or another. The wait edge is gone whenever this returns `Ok`.
    fn sleep<'a>(
        &'a self,
        mut graph: MutexGuard<'a, WaitForGraph>,
        key: ThreadKey,
        request: &Request,
        cancel: Option<&CancelToken>,
    ) -> Result<(MutexGuard<'a, WaitForGraph>, Woken)> {
        let wake = graph.wake_handle(key);
        let cancel = cancel.filter(|_| request.cancellable);
        let poll = self.config().cancel_poll_interval();

        loop {
            graph = match cancel {
                Some(_) => wake.wait_timeout(graph, poll).map_err(poisoned)?.0,
                None => wake.wait(graph).map_err(poisoned)?,
            };

            if graph.has_suspended(key) {
                return Ok((graph, Woken::Suspended));
            }
            if !graph.is_waiting(key) {
                return Ok((graph, Woken::Granted));
            }
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    let resource = request.target.resource();
                    graph.clear_wait(key);
                    graph.prune(key);
                    graph.metrics.cancelled_waits += 1;
                    debug!(thread = %key, %resource, "wait cancelled");
                    return Err(LockError::Cancelled { resource });
                }
            }
            if request.target.is_rule() {
                // Rule waiters are not queued; they race for the rule again.
                graph.clear_wait(key);
                return Ok((graph, Woken::Retry));
            }
        }
    }

    pub(crate) fn acquire_lock(&self, id: ResourceId, cancel: Option<&CancelToken>) -> Result<()> {
        let key = ThreadKey::current();
        let graph = self.graph()?;
        drop(self.obtain(graph, key, Target::Lock(id), cancel, &|| {})?);
        Ok(())
    }

    pub(crate) fn release_lock(&self, id: ResourceId) -> Result<()> {
        let key = ThreadKey::current();
        let mut graph = self.graph()?;
        graph.release(key, id)?;
        Self::verify(&graph)
    }

    pub(crate) fn lock_depth(&self, id: ResourceId) -> usize {
        self.read(|g| g.depth_of(ThreadKey::current(), id))
    }
}
