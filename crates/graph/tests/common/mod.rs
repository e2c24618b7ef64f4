//! Shared helpers for the lock manager integration tests.

#![allow(dead_code)]

use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing_subscriber::EnvFilter;

/// Upper bound for a whole scenario. Exceeding it means some thread never
/// left its wait.
pub const DEADLINE: Duration = Duration::from_secs(60);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Reports completion even when the participant panics, so the runner never
/// waits out the deadline on a failure it could report right away.
struct Done(Sender<usize>, usize);

impl Drop for Done {
    fn drop(&mut self) {
        let _ = self.0.send(self.1);
    }
}

/// Run every body on its own thread and require all of them to finish
/// within [`DEADLINE`].
pub fn run_all<F>(bodies: Vec<F>)
where
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handles: Vec<_> = bodies
        .into_iter()
        .enumerate()
        .map(|(i, body)| {
            let done = Done(tx.clone(), i);
            thread::Builder::new()
                .name(format!("participant-{i}"))
                .spawn(move || {
                    let _done = done;
                    body();
                })
                .expect("spawn participant")
        })
        .collect();
    drop(tx);

    let deadline = Instant::now() + DEADLINE;
    for _ in 0..handles.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        rx.recv_timeout(remaining)
            .expect("participants still blocked at the deadline");
    }
    for handle in handles {
        handle.join().expect("participant panicked");
    }
}

/// Sleep for a few microseconds to shake up interleavings.
pub fn jitter(rng: &mut impl Rng) {
    let micros = rng.gen_range(0..200);
    if micros > 0 {
        thread::sleep(Duration::from_micros(micros));
    }
}

/// Poll `cond` until it holds or five seconds pass.
pub fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}
