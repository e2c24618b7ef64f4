//! The wait-for graph: ownership and blocking edges between threads and
//! resources.
//!
//! The graph is plain data. It never blocks; it only records state and
//! notifies per-thread condition variables when a thread's situation changes.
//! [`crate::LockManager`] wraps it in a mutex and performs the actual waits.
//!
//! Edges are implicit:
//! - resource → owner: [`ResourceNode::owner`]
//! - thread → resource: [`ThreadRecord::waiting`]; for a rule wait the edge
//!   fans out to every conflicting rule node held by another thread, computed
//!   on demand by [`WaitForGraph::blockers`].

mod invariants;
mod release;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar};

use interlock_core::ThreadKey;

use crate::metrics::LockMetrics;
use crate::resource::ResourceId;
use crate::rule::{SchedulingRule, rules_conflict};
use crate::snapshot::{GraphSnapshot, ResourceView, ThreadView};

/// What a thread is trying to obtain.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    Lock(ResourceId),
    Rule(ResourceId, Arc<dyn SchedulingRule>),
}

impl Target {
    pub(crate) fn resource(&self) -> ResourceId {
        match self {
            Target::Lock(id) | Target::Rule(id, _) => *id,
        }
    }

    pub(crate) fn is_rule(&self) -> bool {
        matches!(self, Target::Rule(..))
    }
}

/// A committed wait edge.
#[derive(Debug, Clone)]
pub(crate) struct Wait {
    pub(crate) target: Target,
    /// Reentrancy depth to install when the wait is granted.
    pub(crate) depth: usize,
}

/// A holding taken away from a deadlock victim, to be restored by the victim.
#[derive(Debug, Clone)]
pub(crate) struct Holding {
    pub(crate) target: Target,
    pub(crate) depth: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct RuleFrame {
    pub(crate) rule: Arc<dyn SchedulingRule>,
    /// Node that accounts for this frame. Nested rules contained in an outer
    /// rule share the outer frame's node.
    pub(crate) node: ResourceId,
}

pub(crate) struct ResourceNode {
    pub(crate) owner: ThreadKey,
    pub(crate) depth: usize,
    pub(crate) rule: Option<Arc<dyn SchedulingRule>>,
    /// Lock waiters in grant order. Always empty for rule nodes.
    pub(crate) queue: VecDeque<ThreadKey>,
}

pub(crate) struct ThreadRecord {
    /// Owned resources in acquisition order.
    pub(crate) owned: Vec<ResourceId>,
    pub(crate) waiting: Option<Wait>,
    pub(crate) suspended: Vec<Holding>,
    pub(crate) rule_stack: Vec<RuleFrame>,
    pub(crate) wake: Arc<Condvar>,
}

impl ThreadRecord {
    fn new() -> Self {
        Self {
            owned: Vec::new(),
            waiting: None,
            suspended: Vec::new(),
            rule_stack: Vec::new(),
            wake: Arc::new(Condvar::new()),
        }
    }

    fn is_idle(&self) -> bool {
        self.owned.is_empty()
            && self.waiting.is_none()
            && self.suspended.is_empty()
            && self.rule_stack.is_empty()
    }
}

pub struct WaitForGraph {
    pub(crate) resources: BTreeMap<ResourceId, ResourceNode>,
    pub(crate) threads: HashMap<ThreadKey, ThreadRecord>,
    pub(crate) metrics: LockMetrics,
}

impl WaitForGraph {
    pub fn new(resolution_history: usize) -> Self {
        Self {
            resources: BTreeMap::new(),
            threads: HashMap::new(),
            metrics: LockMetrics::with_history(resolution_history),
        }
    }

    /// No resource nodes and no thread state of any kind.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.threads.is_empty()
    }

    pub fn metrics(&self) -> &LockMetrics {
        &self.metrics
    }

    pub(crate) fn record(&mut self, key: ThreadKey) -> &mut ThreadRecord {
        self.threads.entry(key).or_insert_with(ThreadRecord::new)
    }

    /// Drop the thread's record once it holds, awaits and owes nothing.
    pub(crate) fn prune(&mut self, key: ThreadKey) {
        if self.threads.get(&key).is_some_and(ThreadRecord::is_idle) {
            self.threads.remove(&key);
        }
    }

    pub(crate) fn wake_handle(&mut self, key: ThreadKey) -> Arc<Condvar> {
        Arc::clone(&self.record(key).wake)
    }

    pub fn owns_any(&self, key: ThreadKey) -> bool {
        self.threads.get(&key).is_some_and(|t| !t.owned.is_empty())
    }

    /// Number of resources `key` currently owns.
    pub fn held_count(&self, key: ThreadKey) -> usize {
        self.threads.get(&key).map_or(0, |t| t.owned.len())
    }

    pub fn owner_of(&self, id: ResourceId) -> Option<ThreadKey> {
        self.resources.get(&id).map(|n| n.owner)
    }

    /// Reentrancy depth of `key` on `id`, 0 if not the owner.
    pub fn depth_of(&self, key: ThreadKey, id: ResourceId) -> usize {
        match self.resources.get(&id) {
            Some(node) if node.owner == key => node.depth,
            _ => 0,
        }
    }

    pub(crate) fn is_waiting(&self, key: ThreadKey) -> bool {
        self.threads.get(&key).is_some_and(|t| t.waiting.is_some())
    }

    pub(crate) fn waiting_target(&self, key: ThreadKey) -> Option<&Target> {
        self.threads
            .get(&key)
            .and_then(|t| t.waiting.as_ref())
            .map(|w| &w.target)
    }

    /// Resources held by other threads that prevent `key` from obtaining
    /// `target` right now, in ascending id order.
    pub(crate) fn blockers(&self, key: ThreadKey, target: &Target) -> Vec<ResourceId> {
        match target {
            Target::Lock(id) => match self.resources.get(id) {
                Some(node) if node.owner != key => vec![*id],
                _ => Vec::new(),
            },
            Target::Rule(_, rule) => self
                .resources
                .iter()
                .filter(|(_, node)| node.owner != key)
                .filter(|(_, node)| {
                    node.rule
                        .as_ref()
                        .is_some_and(|held| rules_conflict(&**held, &**rule))
                })
                .map(|(id, _)| *id)
                .collect(),
        }
    }

    /// Grant `target` to `key` if nothing blocks it. Reentrant grants add
    /// `depth` to the existing count.
    pub(crate) fn try_grant(&mut self, key: ThreadKey, target: &Target, depth: usize) -> bool {
        let id = target.resource();
        if let Some(node) = self.resources.get_mut(&id) {
            if node.owner != key {
                return false;
            }
            node.depth += depth;
            self.metrics.acquisitions += 1;
            return true;
        }
        if target.is_rule() && !self.blockers(key, target).is_empty() {
            return false;
        }
        let rule = match target {
            Target::Rule(_, rule) => Some(Arc::clone(rule)),
            Target::Lock(_) => None,
        };
        self.resources.insert(
            id,
            ResourceNode {
                owner: key,
                depth,
                rule,
                queue: VecDeque::new(),
            },
        );
        self.record(key).owned.push(id);
        self.metrics.acquisitions += 1;
        true
    }

    /// Commit the wait edge `key → target`.
    pub(crate) fn enqueue_wait(&mut self, key: ThreadKey, target: &Target, depth: usize) {
        if let Target::Lock(id) = target {
            if let Some(node) = self.resources.get_mut(id) {
                node.queue.push_back(key);
            }
        }
        self.record(key).waiting = Some(Wait {
            target: target.clone(),
            depth,
        });
        self.metrics.contended_waits += 1;
    }

    /// Remove the wait edge of `key`, if any.
    pub(crate) fn clear_wait(&mut self, key: ThreadKey) -> Option<Wait> {
        let wait = self.threads.get_mut(&key)?.waiting.take()?;
        if let Target::Lock(id) = &wait.target {
            if let Some(node) = self.resources.get_mut(id) {
                node.queue.retain(|k| *k != key);
            }
        }
        Some(wait)
    }

    pub(crate) fn has_suspended(&self, key: ThreadKey) -> bool {
        self.threads.get(&key).is_some_and(|t| !t.suspended.is_empty())
    }

    /// Holdings forfeited by a deadlock resolution, handed back to their owner
    /// for restoration.
    pub(crate) fn take_suspended(&mut self, key: ThreadKey) -> Vec<Holding> {
        self.threads
            .get_mut(&key)
            .map(|t| std::mem::take(&mut t.suspended))
            .unwrap_or_default()
    }

    pub(crate) fn top_rule(&self, key: ThreadKey) -> Option<&RuleFrame> {
        self.threads.get(&key).and_then(|t| t.rule_stack.last())
    }

    pub(crate) fn push_rule_frame(&mut self, key: ThreadKey, frame: RuleFrame) {
        self.record(key).rule_stack.push(frame);
    }

    pub(crate) fn pop_rule_frame(&mut self, key: ThreadKey) -> Option<RuleFrame> {
        self.threads.get_mut(&key).and_then(|t| t.rule_stack.pop())
    }

    /// Wake every thread waiting for a rule that conflicts with `rule`.
    pub(crate) fn wake_rule_waiters(&self, rule: &dyn SchedulingRule) {
        for record in self.threads.values() {
            if let Some(Wait {
                target: Target::Rule(_, wanted),
                ..
            }) = &record.waiting
            {
                if rules_conflict(&**wanted, rule) {
                    record.wake.notify_one();
                }
            }
        }
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let resources = self
            .resources
            .iter()
            .map(|(id, node)| ResourceView {
                id: *id,
                owner: node.owner.to_string(),
                depth: node.depth,
                rule: node.rule.as_ref().map(|r| format!("{:?}", r)),
                waiters: node.queue.iter().map(ToString::to_string).collect(),
            })
            .collect();

        let mut threads: Vec<ThreadView> = self
            .threads
            .iter()
            .map(|(key, record)| ThreadView {
                thread: key.to_string(),
                owned: record.owned.clone(),
                waiting_for: record.waiting.as_ref().map(|w| w.target.resource()),
                suspended: record.suspended.iter().map(|h| h.target.resource()).collect(),
                rule_depth: record.rule_stack.len(),
            })
            .collect();
        // Labels are `ThreadId(n)`; shorter labels carry smaller numbers.
        threads.sort_by(|a, b| {
            a.thread
                .len()
                .cmp(&b.thread.len())
                .then_with(|| a.thread.cmp(&b.thread))
        });

        GraphSnapshot { resources, threads }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::keys;
    use super::*;
    use crate::rule::IdentityRule;

    fn lock(n: u64) -> Target {
        Target::Lock(ResourceId::Lock(n))
    }

    #[test]
    fn grant_creates_node_and_release_removes_it() {
        let k = keys(1);
        let mut g = WaitForGraph::new(8);
        assert!(g.try_grant(k[0], &lock(1), 1));
        assert_eq!(g.owner_of(ResourceId::Lock(1)), Some(k[0]));
        assert!(g.owns_any(k[0]));

        assert!(g.release(k[0], ResourceId::Lock(1)).unwrap());
        assert!(g.is_empty());
    }

    #[test]
    fn reentrant_grant_needs_balanced_release() {
        let k = keys(1);
        let mut g = WaitForGraph::new(8);
        assert!(g.try_grant(k[0], &lock(1), 1));
        assert!(g.try_grant(k[0], &lock(1), 1));
        assert_eq!(g.depth_of(k[0], ResourceId::Lock(1)), 2);

        assert!(!g.release(k[0], ResourceId::Lock(1)).unwrap());
        assert!(!g.is_empty());
        assert!(g.release(k[0], ResourceId::Lock(1)).unwrap());
        assert!(g.is_empty());
    }

    #[test]
    fn release_by_non_owner_is_rejected() {
        let k = keys(2);
        let mut g = WaitForGraph::new(8);
        assert!(g.try_grant(k[0], &lock(1), 1));
        assert!(g.release(k[1], ResourceId::Lock(1)).is_err());
        assert!(g.release(k[1], ResourceId::Lock(2)).is_err());
        assert_eq!(g.owner_of(ResourceId::Lock(1)), Some(k[0]));
    }

    #[test]
    fn release_hands_lock_to_first_waiter() {
        let k = keys(3);
        let mut g = WaitForGraph::new(8);
        assert!(g.try_grant(k[0], &lock(1), 1));
        assert!(!g.try_grant(k[1], &lock(1), 1));
        g.enqueue_wait(k[1], &lock(1), 1);
        g.enqueue_wait(k[2], &lock(1), 2);

        g.release(k[0], ResourceId::Lock(1)).unwrap();
        assert_eq!(g.owner_of(ResourceId::Lock(1)), Some(k[1]));
        assert!(!g.is_waiting(k[1]));
        assert!(g.is_waiting(k[2]));

        g.release(k[1], ResourceId::Lock(1)).unwrap();
        assert_eq!(g.owner_of(ResourceId::Lock(1)), Some(k[2]));
        assert_eq!(g.depth_of(k[2], ResourceId::Lock(1)), 2);
        g.check_invariants().unwrap();
    }

    #[test]
    fn cleared_wait_leaves_the_queue() {
        let k = keys(2);
        let mut g = WaitForGraph::new(8);
        g.try_grant(k[0], &lock(1), 1);
        g.enqueue_wait(k[1], &lock(1), 1);
        assert!(g.clear_wait(k[1]).is_some());
        g.prune(k[1]);

        g.release(k[0], ResourceId::Lock(1)).unwrap();
        assert!(g.is_empty());
    }

    #[test]
    fn rule_blockers_are_conflicting_rules_of_other_threads() {
        let k = keys(2);
        let mut g = WaitForGraph::new(8);
        let r: Arc<dyn SchedulingRule> = Arc::new(IdentityRule::new("r"));
        let other: Arc<dyn SchedulingRule> = Arc::new(IdentityRule::new("other"));

        let held = Target::Rule(ResourceId::Rule(1), Arc::clone(&r));
        assert!(g.try_grant(k[0], &held, 1));

        let same = Target::Rule(ResourceId::Rule(2), Arc::clone(&r));
        assert_eq!(g.blockers(k[1], &same), vec![ResourceId::Rule(1)]);
        assert!(g.blockers(k[0], &same).is_empty());

        let unrelated = Target::Rule(ResourceId::Rule(3), other);
        assert!(g.try_grant(k[1], &unrelated, 1));
    }

    #[test]
    fn snapshot_lists_owners_and_waiters() {
        let k = keys(2);
        let mut g = WaitForGraph::new(8);
        g.try_grant(k[0], &lock(4), 1);
        g.enqueue_wait(k[1], &lock(4), 1);

        let snap = g.snapshot();
        assert_eq!(snap.resources.len(), 1);
        assert_eq!(snap.resources[0].waiters, vec![k[1].to_string()]);
        assert_eq!(snap.waiting_threads(), 1);
    }

    fn thread_number(label: &str) -> u64 {
        label
            .trim_start_matches("ThreadId(")
            .trim_end_matches(')')
            .parse()
            .unwrap()
    }

    #[test]
    fn snapshot_orders_threads_numerically() {
        let k = keys(120);
        let mut g = WaitForGraph::new(8);
        for (i, key) in k.iter().enumerate() {
            g.try_grant(*key, &lock(i as u64), 1);
        }

        let numbers: Vec<u64> = g
            .snapshot()
            .threads
            .iter()
            .map(|t| thread_number(&t.thread))
            .collect();
        assert_eq!(numbers.len(), 120);
        assert!(numbers.windows(2).all(|w| w[0] < w[1]), "{:?}", numbers);
    }
}
