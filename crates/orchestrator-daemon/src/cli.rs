//! Admin CLI surface: a handful of operational commands run against the
//! same on-disk stores the daemon uses, for a human checking or unsticking
//! a project without going through chat.

use clap::Subcommand;

use orchestrator_core::{JobStore, JobStoreError, ProjectRegistry};

#[derive(Subcommand, Debug)]
pub enum AdminCommand {
    /// Show pending/running counts for every registered project.
    Status,
    /// Recover every project's stuck `Running` jobs back to `Pending`.
    FlushStuck,
    /// Force-remove a single job by id, regardless of status.
    FlushJob {
        job_id: String,
    },
}

/// `"42m"` under an hour, `"1h 30m"` otherwise, `"N/A"` for an unknown age.
pub fn format_duration(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds else { return "N/A".to_string() };
    let total_minutes = (seconds / 60.0).floor() as u64;
    if total_minutes < 60 {
        format!("{total_minutes}m")
    } else {
        let hours = total_minutes / 60;
        let minutes = total_minutes % 60;
        format!("{hours}h {minutes}m")
    }
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub fn run_status(store: &JobStore, registry: &ProjectRegistry) {
    for project in &registry.projects {
        let pending = store.pending_depth(&project.project_key).unwrap_or(0);
        let running = store.running_jobs_for(&project.project_key).unwrap_or_default();
        println!("{}: {pending} pending, {} running", project.project_key, running.len());
        for job in running {
            let age = job.started_at.map(|s| now_secs() - s);
            println!(
                "  - session={} running for {} (message: {:.60})",
                job.session_id,
                format_duration(age),
                job.message_text
            );
        }
    }
}

pub fn run_flush_stuck(store: &JobStore, registry: &ProjectRegistry) {
    for project in &registry.projects {
        match store.recover_interrupted(&project.project_key) {
            Ok(recovered) if !recovered.is_empty() => {
                println!("{}: recovered {} job(s)", project.project_key, recovered.len());
            }
            Ok(_) => {}
            Err(e) => println!("{}: failed to recover: {e}", project.project_key),
        }
    }
}

pub fn run_flush_job(store: &JobStore, job_id: &str) -> Result<(), JobStoreError> {
    let job = store.get(job_id)?;
    store.fail(job)?;
    println!("flushed job {job_id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_under_an_hour() {
        assert_eq!(format_duration(Some(125.0)), "2m");
    }

    #[test]
    fn formats_hours_and_minutes_over_an_hour() {
        assert_eq!(format_duration(Some(5400.0)), "1h 30m");
    }

    #[test]
    fn reports_not_available_for_missing_age() {
        assert_eq!(format_duration(None), "N/A");
    }

    #[test]
    fn flush_job_removes_a_running_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.db")).unwrap();
        let new = orchestrator_core::NewJob::fresh("proj-a", "sess-1", "/repo", "do work", "alice", "chat-1", 1);
        store.push(new).unwrap();
        let running = store.pop("proj-a").unwrap().unwrap();

        run_flush_job(&store, &running.job_id).unwrap();
        assert!(store.get(&running.job_id).is_err());
    }
}
