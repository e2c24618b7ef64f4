use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::JobStatus;

/// Job scheduler metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Total jobs accepted by `schedule`.
    pub jobs_scheduled: u64,
    /// Finished runs by job name, whatever their status.
    pub jobs_completed: HashMap<String, u64>,
    pub jobs_cancelled: u64,
    pub jobs_failed: u64,
    /// Average run duration by job name.
    pub avg_job_duration: HashMap<String, Duration>,
    /// Last completion time by job name.
    pub last_run: HashMap<String, DateTime<Utc>>,
    /// Resources a job left held that cleanup had to release.
    pub leaked_resources: u64,
    /// Running jobs over worker threads (0.0 - 1.0).
    pub worker_utilization: f64,
    pub waiting: usize,
    pub running: usize,
}

impl SchedulerMetrics {
    /// Record a finished run.
    pub fn record_execution(&mut self, job_name: &str, duration: Duration, status: &JobStatus) {
        match status {
            JobStatus::Ok => {}
            JobStatus::Cancelled => self.jobs_cancelled += 1,
            JobStatus::Failed(_) => self.jobs_failed += 1,
        }
        *self.jobs_completed.entry(job_name.to_string()).or_default() += 1;
        self.last_run.insert(job_name.to_string(), Utc::now());

        let count = self.jobs_completed[job_name];
        let prev_avg = self
            .avg_job_duration
            .get(job_name)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
        self.avg_job_duration.insert(job_name.to_string(), new_avg);
    }

    /// Record a job removed from the queue before it ran.
    pub fn record_dequeued_cancel(&mut self) {
        self.jobs_cancelled += 1;
    }

    pub fn update_occupancy(&mut self, waiting: usize, running: usize, workers: usize) {
        self.waiting = waiting;
        self.running = running;
        self.worker_utilization = if workers == 0 {
            0.0
        } else {
            running as f64 / workers as f64
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_execution() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("job", Duration::from_millis(100), &JobStatus::Ok);

        assert_eq!(m.jobs_completed["job"], 1);
        assert!(m.last_run.contains_key("job"));
        assert_eq!(m.avg_job_duration["job"], Duration::from_millis(100));
        assert_eq!(m.jobs_failed, 0);
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("job", Duration::from_millis(100), &JobStatus::Ok);
        m.record_execution("job", Duration::from_millis(200), &JobStatus::Failed("boom".into()));

        assert_eq!(m.jobs_completed["job"], 2);
        assert_eq!(m.jobs_failed, 1);
        let avg = m.avg_job_duration["job"].as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn occupancy_sets_utilization() {
        let mut m = SchedulerMetrics::default();
        m.update_occupancy(3, 2, 4);
        assert_eq!(m.worker_utilization, 0.5);
        m.update_occupancy(0, 0, 0);
        assert_eq!(m.worker_utilization, 0.0);
    }
}
