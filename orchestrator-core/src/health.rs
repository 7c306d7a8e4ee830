//! Health Monitor: periodic sweep recovering dead-worker and timed-out
//! jobs. Runs independently of the per-session PostToolUse watchdog — the
//! two share no state and catch different failure modes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorResult;
use crate::job::Job;
use crate::job_store::JobStore;

/// Tells the Health Monitor whether a project currently has a live worker,
/// without coupling this crate to the daemon's worker registry type.
pub trait WorkerLiveness: Send + Sync {
    fn is_alive(&self, project_key: &str) -> bool;
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub struct HealthMonitor {
    store: Arc<JobStore>,
    config: OrchestratorConfig,
}

impl HealthMonitor {
    pub fn new(store: Arc<JobStore>, config: OrchestratorConfig) -> Self {
        Self { store, config }
    }

    /// Run one sweep across the given set of projects. Returns the job ids
    /// recovered, for logging/testing.
    pub fn sweep(
        &self,
        project_keys: &HashSet<String>,
        liveness: &dyn WorkerLiveness,
    ) -> OrchestratorResult<Vec<String>> {
        let mut recovered_ids = Vec::new();
        for project_key in project_keys {
            let jobs = self.store.running_jobs_for(project_key)?;
            let needs_recovery = jobs.iter().any(|job| self.should_recover(job, liveness));
            if needs_recovery {
                tracing::warn!(project_key = %project_key, "health monitor recovering job(s)");
                let recovered = self.store.recover_interrupted(project_key)?;
                recovered_ids.extend(recovered.into_iter().map(|j| j.job_id));
            }
        }
        Ok(recovered_ids)
    }

    fn should_recover(&self, job: &Job, liveness: &dyn WorkerLiveness) -> bool {
        let age = job.started_at.map(|started| now_secs() - started);
        let worker_alive = liveness.is_alive(&job.project_key);

        let dead_worker_recoverable = !worker_alive
            && age.map(|a| a >= self.config.job_health_min_running.as_secs_f64())
                .unwrap_or(true); // missing started_at: age unknown, but worker is gone

        if dead_worker_recoverable {
            return true;
        }

        let timeout = self.config.job_timeout_for(&job.message_text);
        if let Some(age) = age {
            if age > timeout.as_secs_f64() {
                return true;
            }
        }
        false
    }
}

pub fn default_check_interval(config: &OrchestratorConfig) -> Duration {
    config.job_health_check_interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{NewJob, Priority};

    struct AlwaysDead;
    impl WorkerLiveness for AlwaysDead {
        fn is_alive(&self, _project_key: &str) -> bool {
            false
        }
    }

    struct AlwaysAlive;
    impl WorkerLiveness for AlwaysAlive {
        fn is_alive(&self, _project_key: &str) -> bool {
            true
        }
    }

    fn test_store() -> (Arc<JobStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.db")).unwrap();
        (Arc::new(store), dir)
    }

    fn sample_job() -> NewJob {
        NewJob {
            project_key: "proj-a".to_string(),
            session_id: "sess-1".to_string(),
            working_dir: "/repo".to_string(),
            message_text: "do work".to_string(),
            sender_name: "alice".to_string(),
            chat_id: "chat-1".to_string(),
            message_id: 1,
            chat_title: None,
            priority: Priority::High,
            revival_context: None,
            auto_continue_count: 0,
        }
    }

    #[test]
    fn race_guard_skips_recently_started_dead_worker_jobs() {
        let (store, _dir) = test_store();
        store.push(sample_job()).unwrap();
        store.pop("proj-a").unwrap();

        let mut config = OrchestratorConfig::default();
        config.job_health_min_running = Duration::from_secs(300);
        let monitor = HealthMonitor::new(store.clone(), config);

        let mut projects = HashSet::new();
        projects.insert("proj-a".to_string());
        let recovered = monitor.sweep(&projects, &AlwaysDead).unwrap();
        assert!(recovered.is_empty());
    }

    #[test]
    fn dead_worker_job_past_min_running_is_recovered() {
        let (store, _dir) = test_store();
        store.push(sample_job()).unwrap();
        store.pop("proj-a").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        // A near-zero grace window means the job popped above already
        // clears it by the time the sweep runs, without needing to
        // fabricate a backdated started_at.
        let mut config = OrchestratorConfig::default();
        config.job_health_min_running = Duration::from_millis(1);
        let monitor = HealthMonitor::new(store.clone(), config);

        let mut projects = HashSet::new();
        projects.insert("proj-a".to_string());
        let recovered = monitor.sweep(&projects, &AlwaysDead).unwrap();
        assert_eq!(recovered.len(), 1);
    }

    #[test]
    fn alive_worker_under_timeout_is_not_recovered() {
        let (store, _dir) = test_store();
        store.push(sample_job()).unwrap();
        store.pop("proj-a").unwrap();

        let config = OrchestratorConfig::default();
        let monitor = HealthMonitor::new(store.clone(), config);

        let mut projects = HashSet::new();
        projects.insert("proj-a".to_string());
        let recovered = monitor.sweep(&projects, &AlwaysAlive).unwrap();
        assert!(recovered.is_empty());
    }
}
