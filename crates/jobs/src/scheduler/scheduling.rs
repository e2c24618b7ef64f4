use std::sync::Arc;

use interlock_graph::{SchedulingRule, rules_conflict};
use tracing::trace;

use crate::job::{Job, JobState};

use super::core::{Queue, Shared};

impl Shared {
    /// Start every queued job that may run now.
    pub(super) fn dispatch(self: &Arc<Self>, queue: &mut Queue) {
        for job in self.collect_runnable(queue) {
            let shared = Arc::clone(self);
            self.pool.spawn(move || shared.run_job(job));
        }
        if let Ok(mut m) = self.metrics.write() {
            m.update_occupancy(queue.waiting.len(), queue.running.len(), self.workers);
        }
    }

    /// Move admissible jobs from `waiting` to `running`, oldest first.
    ///
    /// A job is held back while its rule conflicts with the rule of a running
    /// job or of an older job that is itself still waiting, so a stream of
    /// newer jobs cannot overtake it. Held-back jobs report BLOCKED.
    pub(super) fn collect_runnable(&self, queue: &mut Queue) -> Vec<Job> {
        let available = self.workers.saturating_sub(queue.running.len());
        let mut claimed: Vec<Arc<dyn SchedulingRule>> = queue
            .running
            .iter()
            .filter_map(|j| j.rule().cloned())
            .collect();

        let mut runnable = Vec::new();
        let mut index = 0;
        while index < queue.waiting.len() && runnable.len() < available {
            let job = &queue.waiting[index];
            let blocked = job
                .rule()
                .is_some_and(|rule| claimed.iter().any(|held| rules_conflict(&**held, &**rule)));
            if let Some(rule) = job.rule() {
                claimed.push(Arc::clone(rule));
            }
            if blocked {
                trace!(job = job.name(), "Job held back by a conflicting rule");
                job.set_state(JobState::Blocked);
                index += 1;
                continue;
            }
            if let Some(job) = queue.waiting.remove(index) {
                queue.running.push(job.clone());
                runnable.push(job);
            }
        }
        runnable
    }
}
