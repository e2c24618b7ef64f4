//! Cycle search over the wait-for graph and victim selection.
//!
//! Detection runs with the graph mutex held, just before a thread would commit
//! a wait edge. Every earlier edge passed the same check, so the graph is
//! acyclic and the only possible cycle runs through the new edge. The search
//! starts at the owners of whatever blocks the requester and follows wait
//! edges until it reaches the requester again or runs out of waiting threads.

use std::collections::HashSet;

use interlock_core::ThreadKey;

use crate::graph::{Target, WaitForGraph};
use crate::resource::ResourceId;

/// One step along a cycle: `resource` is held by `owner`, which held `held`
/// resources in total when the cycle was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub resource: ResourceId,
    pub owner: ThreadKey,
    pub held: usize,
}

/// A cycle closed by `requester`'s tentative wait.
///
/// Hops start at a resource the requester wants and end at one it owns. Each
/// thread other than the requester appears at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pub requester: ThreadKey,
    pub hops: Vec<Hop>,
}

impl Cycle {
    /// Threads in the cycle other than the requester, in traversal order.
    pub fn participants(&self) -> Vec<ThreadKey> {
        self.hops
            .iter()
            .map(|h| h.owner)
            .filter(|owner| *owner != self.requester)
            .collect()
    }

    pub fn resources(&self) -> Vec<ResourceId> {
        self.hops.iter().map(|h| h.resource).collect()
    }
}

/// Search for a cycle through the tentative edge `requester → target`.
pub(crate) fn find_cycle(graph: &WaitForGraph, requester: ThreadKey, target: &Target) -> Option<Cycle> {
    let mut visited = HashSet::new();
    let mut hops = Vec::new();
    if walk(graph, requester, target, requester, &mut hops, &mut visited) {
        Some(Cycle { requester, hops })
    } else {
        None
    }
}

fn walk(
    graph: &WaitForGraph,
    from: ThreadKey,
    target: &Target,
    requester: ThreadKey,
    hops: &mut Vec<Hop>,
    visited: &mut HashSet<ThreadKey>,
) -> bool {
    for resource in graph.blockers(from, target) {
        let Some(owner) = graph.owner_of(resource) else {
            continue;
        };
        hops.push(Hop {
            resource,
            owner,
            held: graph.held_count(owner),
        });
        if owner == requester {
            return true;
        }
        if visited.insert(owner) {
            if let Some(next) = graph.waiting_target(owner) {
                if walk(graph, owner, next, requester, hops, visited) {
                    return true;
                }
            }
        }
        hops.pop();
    }
    false
}

/// Pick the thread that forfeits its holdings to break `cycle`.
///
/// The participant holding the fewest resources overall loses the least work,
/// so it is preferred; ties go to the owner of the lowest resource id on the
/// cycle. The requester is never chosen. Returns `None` only for a cycle with
/// no other participant, which a consistent graph cannot produce.
pub fn select_victim(cycle: &Cycle) -> Option<ThreadKey> {
    cycle
        .hops
        .iter()
        .filter(|h| h.owner != cycle.requester)
        .min_by_key(|h| (h.held, h.resource))
        .map(|h| h.owner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::test_support::keys;
    use crate::rule::{IdentityRule, SchedulingRule};

    fn lock(n: u64) -> Target {
        Target::Lock(ResourceId::Lock(n))
    }

    /// k[i] holds L(i+1); all but the last also wait for L(i+2).
    fn chain(graph: &mut WaitForGraph, k: &[ThreadKey]) {
        for (i, key) in k.iter().enumerate() {
            assert!(graph.try_grant(*key, &lock(i as u64 + 1), 1));
        }
        for (i, key) in k.iter().enumerate().take(k.len() - 1) {
            graph.enqueue_wait(*key, &lock(i as u64 + 2), 1);
        }
    }

    #[test]
    fn chain_without_back_edge_is_not_a_cycle() {
        let k = keys(3);
        let mut g = WaitForGraph::new(0);
        chain(&mut g, &k);
        assert!(find_cycle(&g, k[2], &lock(99)).is_none());
        // Its own lock never blocks the requester.
        assert!(find_cycle(&g, k[2], &lock(3)).is_none());
        // A thread behind the chain is blocked but not deadlocked.
        let late = keys(1)[0];
        assert!(find_cycle(&g, late, &lock(1)).is_none());
    }

    #[test]
    fn ab_ba_is_detected() {
        let k = keys(2);
        let mut g = WaitForGraph::new(0);
        chain(&mut g, &k);
        let cycle = find_cycle(&g, k[1], &lock(1)).expect("AB-BA must be detected");
        assert_eq!(cycle.resources(), vec![ResourceId::Lock(1), ResourceId::Lock(2)]);
        assert_eq!(cycle.participants(), vec![k[0]]);
        assert_eq!(select_victim(&cycle), Some(k[0]));
    }

    #[test]
    fn six_thread_ring_picks_owner_of_lowest_resource() {
        let k = keys(6);
        let mut g = WaitForGraph::new(0);
        chain(&mut g, &k);
        let cycle = find_cycle(&g, k[5], &lock(1)).expect("ring must be detected");
        assert_eq!(cycle.hops.len(), 6);
        assert_eq!(cycle.participants().len(), 5);
        assert_eq!(select_victim(&cycle), Some(k[0]));
    }

    #[test]
    fn lighter_participant_is_preferred() {
        let k = keys(2);
        let mut g = WaitForGraph::new(0);
        chain(&mut g, &k);
        // k0 now holds three resources, k1 only one.
        g.try_grant(k[0], &lock(10), 1);
        g.try_grant(k[0], &lock(11), 1);

        // k1 closes the cycle: only k0 is eligible regardless of weight.
        let cycle = find_cycle(&g, k[1], &lock(1)).unwrap();
        assert_eq!(cycle.hops[0].held, 3);
        assert_eq!(select_victim(&cycle), Some(k[0]));

        // With three threads the lighter participant wins over the lower id.
        let k3 = keys(3);
        let mut g = WaitForGraph::new(0);
        chain(&mut g, &k3);
        g.try_grant(k3[0], &lock(10), 1);
        g.try_grant(k3[0], &lock(11), 1);
        let cycle = find_cycle(&g, k3[2], &lock(1)).unwrap();
        // k0 holds L1 (lowest id) but three resources; k1 holds one.
        assert_eq!(select_victim(&cycle), Some(k3[1]));
    }

    #[test]
    fn rule_waits_fan_out_to_conflicting_holders() {
        let k = keys(2);
        let mut g = WaitForGraph::new(0);
        let r: Arc<dyn SchedulingRule> = Arc::new(IdentityRule::new("r"));

        // k0 is inside rule r and waits for L2, held by k1.
        g.try_grant(k[0], &Target::Rule(ResourceId::Rule(1), Arc::clone(&r)), 1);
        g.try_grant(k[1], &lock(2), 1);
        g.enqueue_wait(k[0], &lock(2), 1);

        // k1 now asks for the same rule.
        let wanted = Target::Rule(ResourceId::Rule(3), Arc::clone(&r));
        let cycle = find_cycle(&g, k[1], &wanted).expect("rule/lock cycle");
        assert_eq!(cycle.resources(), vec![ResourceId::Rule(1), ResourceId::Lock(2)]);
        assert_eq!(select_victim(&cycle), Some(k[0]));

        // A rule nobody conflicts with cannot close a cycle.
        let free = Target::Rule(ResourceId::Rule(4), Arc::new(IdentityRule::new("free")));
        assert!(find_cycle(&g, k[1], &free).is_none());
    }

    #[test]
    fn resolution_is_deterministic() {
        let k = keys(4);
        let mut g = WaitForGraph::new(0);
        chain(&mut g, &k);
        let first = find_cycle(&g, k[3], &lock(1)).unwrap();
        for _ in 0..10 {
            let again = find_cycle(&g, k[3], &lock(1)).unwrap();
            assert_eq!(again, first);
            assert_eq!(select_victim(&again), select_victim(&first));
        }
    }

    #[test]
    fn requester_is_never_the_victim() {
        let k = keys(2);
        let cycle = Cycle {
            requester: k[0],
            hops: vec![
                Hop { resource: ResourceId::Lock(1), owner: k[1], held: 5 },
                Hop { resource: ResourceId::Lock(0), owner: k[0], held: 1 },
            ],
        };
        assert_eq!(select_victim(&cycle), Some(k[1]));

        let degenerate = Cycle {
            requester: k[0],
            hops: vec![Hop { resource: ResourceId::Lock(0), owner: k[0], held: 1 }],
        };
        assert_eq!(select_victim(&degenerate), None);
    }
}
