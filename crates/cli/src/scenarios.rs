use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use interlock_core::Config;
use interlock_graph::{IdentityRule, LockManager, OrderedLock, SchedulingRule};
use interlock_jobs::{Job, JobManager, JobStatus};
use rand::Rng;
use tracing::{debug, info, warn};

/// Extra time participants get past the deadline before they count as stuck.
const GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
pub struct Outcome {
    pub participants: usize,
    pub finished: usize,
    pub iterations: u64,
    pub failures: Vec<String>,
}

impl Outcome {
    pub fn is_clean(&self) -> bool {
        self.finished == self.participants && self.failures.is_empty()
    }
}

type Body = Box<dyn FnOnce(Instant) -> Result<u64> + Send>;

/// Run every body on its own named thread until `deadline` and collect what
/// they report.
fn run_threads(name: &str, bodies: Vec<Body>, deadline: Instant) -> Result<Outcome> {
    let participants = bodies.len();
    let (tx, rx) = mpsc::channel();
    for (i, body) in bodies.into_iter().enumerate() {
        let tx = tx.clone();
        thread::Builder::new()
            .name(format!("{}-{}", name, i))
            .spawn(move || {
                let _ = tx.send(body(deadline));
            })
            .with_context(|| format!("failed to spawn {} participant {}", name, i))?;
    }
    drop(tx);

    let mut outcome = Outcome {
        participants,
        ..Outcome::default()
    };
    let give_up = deadline + GRACE;
    while outcome.finished + outcome.failures.len() < participants {
        let left = give_up.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(Ok(iterations)) => {
                outcome.finished += 1;
                outcome.iterations += iterations;
            }
            Ok(Err(e)) => outcome.failures.push(format!("{:#}", e)),
            Err(_) => {
                warn!(
                    scenario = name,
                    stuck = participants - outcome.finished - outcome.failures.len(),
                    "Participants did not finish in time"
                );
                break;
            }
        }
    }
    Ok(outcome)
}

fn jitter(rng: &mut impl Rng) {
    if rng.gen_bool(0.3) {
        thread::sleep(Duration::from_micros(rng.gen_range(0..200)));
    }
}

/// Each thread takes three consecutive locks of a ring, starting at a
/// different position, so every lock order appears somewhere.
pub fn rotate(manager: &LockManager, threads: usize, lock_count: usize, deadline: Instant) -> Result<Outcome> {
    if lock_count < 3 {
        bail!("rotate needs at least 3 locks, got {}", lock_count);
    }
    let locks: Arc<Vec<OrderedLock>> = Arc::new((0..lock_count).map(|_| manager.new_lock()).collect());
    info!(threads, locks = lock_count, "Running rotate scenario");

    let bodies = (0..threads)
        .map(|t| {
            let locks = Arc::clone(&locks);
            Box::new(move |deadline: Instant| -> Result<u64> {
                let mut rng = rand::thread_rng();
                let mut done = 0u64;
                while Instant::now() < deadline {
                    let start = (t + done as usize) % locks.len();
                    let triple = [start, (start + 1) % locks.len(), (start + 2) % locks.len()];
                    for &i in &triple {
                        locks[i].acquire()?;
                        jitter(&mut rng);
                    }
                    for &i in triple.iter().rev() {
                        locks[i].release()?;
                    }
                    done += 1;
                }
                Ok(done)
            }) as Body
        })
        .collect();
    run_threads("rotate", bodies, deadline)
}

/// Even threads take A then B, odd threads B then A.
pub fn ab_ba(manager: &LockManager, threads: usize, deadline: Instant) -> Result<Outcome> {
    let a = manager.new_lock();
    let b = manager.new_lock();
    info!(threads, "Running ab-ba scenario");

    let bodies = (0..threads)
        .map(|t| {
            let (first, second) = if t % 2 == 0 {
                (a.clone(), b.clone())
            } else {
                (b.clone(), a.clone())
            };
            Box::new(move |deadline: Instant| -> Result<u64> {
                let mut rng = rand::thread_rng();
                let mut done = 0u64;
                while Instant::now() < deadline {
                    first.acquire()?;
                    jitter(&mut rng);
                    second.acquire()?;
                    second.release()?;
                    first.release()?;
                    done += 1;
                }
                Ok(done)
            }) as Body
        })
        .collect();
    run_threads("ab-ba", bodies, deadline)
}

/// Threads alternate between rule-then-lock and lock-then-rule over a set
/// of rules and locks.
pub fn mixed(manager: &LockManager, threads: usize, width: usize, deadline: Instant) -> Result<Outcome> {
    if width == 0 {
        bail!("mixed needs at least one rule and lock");
    }
    let rules: Arc<Vec<Arc<dyn SchedulingRule>>> = Arc::new(
        (0..width)
            .map(|i| Arc::new(IdentityRule::new(format!("rule-{}", i))) as Arc<dyn SchedulingRule>)
            .collect(),
    );
    let locks: Arc<Vec<OrderedLock>> = Arc::new((0..width).map(|_| manager.new_lock()).collect());
    info!(threads, width, "Running mixed scenario");

    let bodies = (0..threads)
        .map(|t| {
            let (manager, rules, locks) = (manager.clone(), Arc::clone(&rules), Arc::clone(&locks));
            Box::new(move |deadline: Instant| -> Result<u64> {
                let mut rng = rand::thread_rng();
                let mut done = 0u64;
                while Instant::now() < deadline {
                    let rule = &rules[rng.gen_range(0..rules.len())];
                    let lock = &locks[rng.gen_range(0..locks.len())];
                    if t % 2 == 0 {
                        let _guard = manager.rule_guard(rule, None)?;
                        jitter(&mut rng);
                        let _held = lock.lock()?;
                        jitter(&mut rng);
                    } else {
                        let _held = lock.lock()?;
                        jitter(&mut rng);
                        let _guard = manager.rule_guard(rule, None)?;
                        jitter(&mut rng);
                    }
                    done += 1;
                }
                Ok(done)
            }) as Body
        })
        .collect();
    run_threads("mixed", bodies, deadline)
}

/// Schedule rounds of jobs that take nested rules and locks until the
/// deadline passes.
pub fn jobs(config: &Config, manager: &LockManager, jobs_per_round: usize, width: usize, deadline: Instant) -> Result<Outcome> {
    let scheduler = JobManager::new(config.scheduler.clone(), manager.clone())
        .context("failed to start job manager")?;
    let rules: Vec<Arc<dyn SchedulingRule>> = (0..width.max(1))
        .map(|i| Arc::new(IdentityRule::new(format!("job-rule-{}", i))) as Arc<dyn SchedulingRule>)
        .collect();
    let locks: Vec<OrderedLock> = (0..width.max(2)).map(|_| manager.new_lock()).collect();
    info!(jobs = jobs_per_round, workers = scheduler.workers(), "Running jobs scenario");

    let mut outcome = Outcome::default();
    let mut round = 0usize;
    while Instant::now() < deadline {
        let batch: Vec<Job> = (0..jobs_per_round)
            .map(|i| {
                let manager = manager.clone();
                let rule = Arc::clone(&rules[i % rules.len()]);
                let first = locks[i % locks.len()].clone();
                let second = locks[(i + 1) % locks.len()].clone();
                Job::new(format!("soak-{}-{}", round, i), move |monitor| {
                    monitor.begin_task("rule and lock cycle", 2);
                    let result = (|| -> interlock_graph::Result<()> {
                        if i % 2 == 0 {
                            manager.begin_rule(&rule, Some(monitor.cancel_token()))?;
                            first.acquire()?;
                        } else {
                            first.acquire()?;
                            manager.begin_rule(&rule, Some(monitor.cancel_token()))?;
                        }
                        monitor.worked(1);
                        second.acquire()?;
                        second.release()?;
                        manager.end_rule(&rule)?;
                        first.release()?;
                        monitor.worked(1);
                        Ok(())
                    })();
                    monitor.done();
                    match result {
                        Ok(()) => JobStatus::Ok,
                        Err(e) => JobStatus::Failed(e.to_string()),
                    }
                })
            })
            .collect();

        for job in &batch {
            job.schedule(&scheduler)?;
        }
        outcome.participants += batch.len();
        let left = deadline.saturating_duration_since(Instant::now()) + GRACE;
        if !scheduler.wait_idle(left) {
            warn!(round, "Job round did not drain in time");
            break;
        }
        for job in &batch {
            match job.result() {
                Some(JobStatus::Ok) => {
                    outcome.finished += 1;
                    outcome.iterations += 1;
                }
                Some(status) => outcome.failures.push(format!("{}: {:?}", job.name(), status)),
                None => {}
            }
        }
        debug!(round, "Job round complete");
        round += 1;
    }
    scheduler.shutdown();
    Ok(outcome)
}
