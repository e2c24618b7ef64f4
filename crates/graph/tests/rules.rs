//! Scheduling rules mixed with locks.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use interlock_graph::{IdentityRule, LockManager, OrderedLock, PathRule, SchedulingRule};

use common::{init_tracing, jitter, run_all, wait_until};

const FREE: usize = usize::MAX;

fn identity(label: &str) -> Arc<dyn SchedulingRule> {
    Arc::new(IdentityRule::new(label))
}

fn enter(slot: &AtomicUsize, who: usize) {
    slot.compare_exchange(FREE, who, Ordering::SeqCst, Ordering::SeqCst)
        .expect("two participants inside the same resource");
}

#[test]
fn lock_then_rule_against_rule_then_lock() {
    init_tracing();
    let manager = LockManager::default();
    let lock = manager.new_lock();
    let rule = identity("shared");

    let lock_first = {
        let (manager, lock, rule) = (manager.clone(), lock.clone(), Arc::clone(&rule));
        Box::new(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..100 {
                lock.acquire().unwrap();
                jitter(&mut rng);
                manager.begin_rule(&rule, None).unwrap();
                assert_eq!(lock.depth(), 1);
                manager.end_rule(&rule).unwrap();
                lock.release().unwrap();
            }
        }) as Box<dyn FnOnce() + Send>
    };
    let rule_first = {
        let (manager, lock, rule) = (manager.clone(), lock.clone(), Arc::clone(&rule));
        Box::new(move || {
            let mut rng = rand::thread_rng();
            for _ in 0..100 {
                manager.begin_rule(&rule, None).unwrap();
                jitter(&mut rng);
                lock.acquire().unwrap();
                assert_eq!(manager.rule_depth(), 1);
                lock.release().unwrap();
                manager.end_rule(&rule).unwrap();
            }
        }) as Box<dyn FnOnce() + Send>
    };

    run_all(vec![lock_first, rule_first]);
    assert!(manager.is_empty());
    manager.check_invariants().unwrap();
}

#[test]
fn fifteen_threads_over_five_rules_and_five_locks() {
    init_tracing();
    let manager = LockManager::default();
    let rules: Arc<Vec<Arc<dyn SchedulingRule>>> =
        Arc::new((0..5).map(|i| identity(&format!("rule-{i}"))).collect());
    let locks: Arc<Vec<OrderedLock>> = Arc::new((0..5).map(|_| manager.new_lock()).collect());
    let in_rule: Arc<Vec<AtomicUsize>> = Arc::new((0..5).map(|_| AtomicUsize::new(FREE)).collect());
    let in_lock: Arc<Vec<AtomicUsize>> = Arc::new((0..5).map(|_| AtomicUsize::new(FREE)).collect());

    let bodies: Vec<_> = (0..15)
        .map(|t| {
            let manager = manager.clone();
            let rules = Arc::clone(&rules);
            let locks = Arc::clone(&locks);
            let in_rule = Arc::clone(&in_rule);
            let in_lock = Arc::clone(&in_lock);
            move || {
                let mut rng = rand::thread_rng();
                let (r, first, second) = (t % 5, t % 5, (t + 1) % 5);
                for _ in 0..20 {
                    if t % 2 == 0 {
                        manager.begin_rule(&rules[r], None).unwrap();
                        jitter(&mut rng);
                        locks[first].acquire().unwrap();
                    } else {
                        locks[first].acquire().unwrap();
                        jitter(&mut rng);
                        manager.begin_rule(&rules[r], None).unwrap();
                    }
                    locks[second].acquire().unwrap();

                    enter(&in_rule[r], t);
                    enter(&in_lock[first], t);
                    enter(&in_lock[second], t);
                    jitter(&mut rng);
                    in_lock[second].store(FREE, Ordering::SeqCst);
                    in_lock[first].store(FREE, Ordering::SeqCst);
                    in_rule[r].store(FREE, Ordering::SeqCst);

                    locks[second].release().unwrap();
                    if t % 2 == 0 {
                        locks[first].release().unwrap();
                        manager.end_rule(&rules[r]).unwrap();
                    } else {
                        manager.end_rule(&rules[r]).unwrap();
                        locks[first].release().unwrap();
                    }
                }
            }
        })
        .collect();

    run_all(bodies);
    assert!(manager.is_empty());
}

#[test]
fn path_rules_block_along_the_hierarchy_only() {
    init_tracing();
    let manager = LockManager::default();
    let parent: Arc<dyn SchedulingRule> = Arc::new(PathRule::new("/project"));
    manager.begin_rule(&parent, None).unwrap();

    // A sibling path is admitted immediately.
    let sibling = manager.clone();
    thread::spawn(move || {
        let other: Arc<dyn SchedulingRule> = Arc::new(PathRule::new("/elsewhere"));
        sibling.begin_rule(&other, None).unwrap();
        sibling.end_rule(&other).unwrap();
    })
    .join()
    .unwrap();

    // A descendant has to wait for the parent to end.
    let (tx, rx) = mpsc::channel();
    let child_manager = manager.clone();
    let handle = thread::spawn(move || {
        let child: Arc<dyn SchedulingRule> = Arc::new(PathRule::new("/project/src"));
        child_manager.begin_rule(&child, None).unwrap();
        tx.send(()).unwrap();
        child_manager.end_rule(&child).unwrap();
    });

    wait_until(|| manager.snapshot().waiting_threads() == 1);
    assert!(rx.try_recv().is_err());
    manager.end_rule(&parent).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    handle.join().unwrap();
    assert!(manager.is_empty());
}

#[test]
fn nested_rules_under_contention() {
    init_tracing();
    let manager = LockManager::default();
    let outer = identity("outer");
    let inner = identity("inner");

    let bodies: Vec<_> = (0..4)
        .map(|t| {
            let manager = manager.clone();
            let (outer, inner) = (Arc::clone(&outer), Arc::clone(&inner));
            move || {
                let mut rng = rand::thread_rng();
                for _ in 0..50 {
                    // Half the threads take the rules in the opposite order.
                    let (a, b) = if t % 2 == 0 { (&outer, &inner) } else { (&inner, &outer) };
                    manager.begin_rule(a, None).unwrap();
                    jitter(&mut rng);
                    manager.begin_rule(b, None).unwrap();
                    manager.begin_rule(b, None).unwrap();
                    assert_eq!(manager.rule_depth(), 3);
                    manager.end_rule(b).unwrap();
                    manager.end_rule(b).unwrap();
                    manager.end_rule(a).unwrap();
                }
            }
        })
        .collect();

    run_all(bodies);
    assert!(manager.is_empty());
}

#[test]
fn one_directional_conflict_still_serializes() {
    #[derive(Debug)]
    struct Exclusive;

    impl SchedulingRule for Exclusive {
        fn conflicts_with(&self, _other: &dyn SchedulingRule) -> bool {
            true
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    init_tracing();
    let manager = LockManager::default();
    let plain = identity("plain");
    manager.begin_rule(&plain, None).unwrap();

    let (tx, rx) = mpsc::channel();
    let remote = manager.clone();
    let handle = thread::spawn(move || {
        let exclusive: Arc<dyn SchedulingRule> = Arc::new(Exclusive);
        remote.begin_rule(&exclusive, None).unwrap();
        tx.send(()).unwrap();
        remote.end_rule(&exclusive).unwrap();
    });

    wait_until(|| manager.snapshot().waiting_threads() == 1);
    manager.end_rule(&plain).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    handle.join().unwrap();
    assert!(manager.is_empty());
}
