use std::sync::Arc;

use interlock_core::ThreadKey;
use tracing::debug;

use super::{Holding, Target, WaitForGraph};
use crate::error::{LockError, Result};
use crate::resource::ResourceId;

impl WaitForGraph {
    /// Drop one level of `key`'s ownership of `id`. Returns `true` once the
    /// count reaches zero and the resource has been passed on or removed.
    pub(crate) fn release(&mut self, key: ThreadKey, id: ResourceId) -> Result<bool> {
        let node = match self.resources.get_mut(&id) {
            Some(node) if node.owner == key => node,
            _ => return Err(LockError::NotOwner { resource: id }),
        };
        node.depth = node.depth.saturating_sub(1);
        if node.depth > 0 {
            return Ok(false);
        }

        if let Some(record) = self.threads.get_mut(&key) {
            record.owned.retain(|owned| *owned != id);
        }
        self.vacate(id);
        self.prune(key);
        Ok(true)
    }

    /// Pass a resource whose owner has let go of it entirely to the next lock
    /// waiter, or remove the node. The caller has already dropped it from the
    /// previous owner's `owned` list.
    pub(crate) fn vacate(&mut self, id: ResourceId) {
        let Some(node) = self.resources.get_mut(&id) else {
            return;
        };

        if let Some(rule) = node.rule.clone() {
            self.resources.remove(&id);
            self.wake_rule_waiters(&*rule);
            return;
        }

        while let Some(next) = node.queue.pop_front() {
            let Some(record) = self.threads.get_mut(&next) else {
                continue;
            };
            let depth = match &record.waiting {
                Some(wait) if wait.target.resource() == id => wait.depth,
                _ => continue,
            };
            record.waiting = None;
            record.owned.push(id);
            node.owner = next;
            node.depth = depth;
            self.metrics.acquisitions += 1;
            record.wake.notify_one();
            debug!(resource = %id, thread = ?next, "lock handed to next waiter");
            return;
        }

        self.resources.remove(&id);
    }

    /// Force `victim` to forfeit everything it owns, breaking a cycle found on
    /// behalf of `requester`.
    ///
    /// The victim's wait edge is removed and its holdings are parked in its
    /// `suspended` list for it to restore. When the requester's wanted lock is
    /// among them, the requester becomes its owner directly and `true` is
    /// returned.
    pub(crate) fn suspend(
        &mut self,
        victim: ThreadKey,
        requester: ThreadKey,
        wanted: &Target,
        depth: usize,
    ) -> Result<(Vec<Holding>, bool)> {
        self.clear_wait(victim);
        let owned = match self.threads.get_mut(&victim) {
            Some(record) => std::mem::take(&mut record.owned),
            None => {
                return Err(LockError::GraphCorrupted(format!(
                    "victim {:?} has no thread record",
                    victim
                )));
            }
        };

        let mut holdings = Vec::with_capacity(owned.len());
        let mut granted = false;
        for id in owned {
            let Some(node) = self.resources.get_mut(&id) else {
                return Err(LockError::GraphCorrupted(format!(
                    "{:?} lists {} as owned but the node is missing",
                    victim, id
                )));
            };
            let target = match &node.rule {
                Some(rule) => Target::Rule(id, Arc::clone(rule)),
                None => Target::Lock(id),
            };
            holdings.push(Holding {
                target,
                depth: node.depth,
            });

            if !wanted.is_rule() && wanted.resource() == id {
                node.owner = requester;
                node.depth = depth;
                self.record(requester).owned.push(id);
                self.metrics.acquisitions += 1;
                granted = true;
            } else {
                self.vacate(id);
            }
        }

        let record = self.record(victim);
        record.suspended.extend(holdings.iter().cloned());
        record.wake.notify_one();
        Ok((holdings, granted))
    }

    /// Abandon everything `key` holds, waits for or still has to restore.
    /// Returns the resources that were actually released.
    pub(crate) fn release_all(&mut self, key: ThreadKey) -> Vec<ResourceId> {
        self.clear_wait(key);
        let owned = match self.threads.get_mut(&key) {
            Some(record) => {
                record.suspended.clear();
                record.rule_stack.clear();
                std::mem::take(&mut record.owned)
            }
            None => return Vec::new(),
        };
        for id in &owned {
            self.vacate(*id);
        }
        self.metrics.abandoned_resources += owned.len() as u64;
        self.prune(key);
        owned
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::test_support::keys;
    use super::*;
    use crate::rule::{IdentityRule, SchedulingRule};

    fn lock(n: u64) -> Target {
        Target::Lock(ResourceId::Lock(n))
    }

    #[test]
    fn suspend_grants_wanted_lock_to_requester() {
        let k = keys(2);
        let mut g = WaitForGraph::new(8);
        // k0 holds L1 and waits for L2; k1 holds L2 and wants L1.
        g.try_grant(k[0], &lock(1), 2);
        g.try_grant(k[1], &lock(2), 1);
        g.enqueue_wait(k[0], &lock(2), 1);

        let (holdings, granted) = g.suspend(k[0], k[1], &lock(1), 1).unwrap();
        assert!(granted);
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].depth, 2);
        assert_eq!(g.owner_of(ResourceId::Lock(1)), Some(k[1]));
        assert!(!g.is_waiting(k[0]));
        assert!(g.resources[&ResourceId::Lock(2)].queue.is_empty());

        let restored = g.take_suspended(k[0]);
        assert_eq!(restored.len(), 1);
        g.check_invariants().unwrap();
    }

    #[test]
    fn suspend_passes_other_holdings_to_their_waiters() {
        let k = keys(3);
        let mut g = WaitForGraph::new(8);
        g.try_grant(k[0], &lock(1), 1);
        g.try_grant(k[0], &lock(3), 1);
        g.enqueue_wait(k[2], &lock(3), 1);
        g.try_grant(k[1], &lock(2), 1);
        g.enqueue_wait(k[0], &lock(2), 1);

        let (_, granted) = g.suspend(k[0], k[1], &lock(1), 1).unwrap();
        assert!(granted);
        assert_eq!(g.owner_of(ResourceId::Lock(3)), Some(k[2]));
        g.check_invariants().unwrap();
    }

    #[test]
    fn suspended_rule_wakes_conflicting_waiters() {
        let k = keys(2);
        let mut g = WaitForGraph::new(8);
        let rule: Arc<dyn SchedulingRule> = Arc::new(IdentityRule::new("r"));
        let held = Target::Rule(ResourceId::Rule(10), Arc::clone(&rule));
        g.try_grant(k[0], &held, 1);
        g.try_grant(k[1], &lock(1), 1);
        g.enqueue_wait(k[0], &lock(1), 1);

        let wanted = Target::Rule(ResourceId::Rule(11), Arc::clone(&rule));
        let (holdings, granted) = g.suspend(k[0], k[1], &wanted, 1).unwrap();
        assert!(!granted);
        assert!(holdings[0].target.is_rule());
        assert!(g.owner_of(ResourceId::Rule(10)).is_none());
        assert!(g.try_grant(k[1], &wanted, 1));
    }

    #[test]
    fn release_all_abandons_everything() {
        let k = keys(2);
        let mut g = WaitForGraph::new(8);
        g.try_grant(k[0], &lock(1), 3);
        g.try_grant(k[0], &lock(2), 1);
        g.enqueue_wait(k[1], &lock(2), 1);

        let released = g.release_all(k[0]);
        assert_eq!(released, vec![ResourceId::Lock(1), ResourceId::Lock(2)]);
        assert_eq!(g.owner_of(ResourceId::Lock(2)), Some(k[1]));
        assert_eq!(g.metrics.abandoned_resources, 2);

        g.release(k[1], ResourceId::Lock(2)).unwrap();
        assert!(g.is_empty());
    }
}
