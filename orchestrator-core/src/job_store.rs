//! Job Store: persistent, per-project work queue over an embedded RocksDB
//! instance.
//!
//! Two column families:
//! - `jobs`           — job_id -> Job, the record of truth.
//! - `pending_index`   — "{project_key}:{job_id}" -> () marker, scanned with a
//!                        prefix iterator to find a project's pending jobs
//!                        without scanning the whole `jobs` CF.
//!
//! Every status transition that changes queue membership (push, pop,
//! complete, remove-by-session) deletes the old index entry and writes the
//! new one in the same call rather than mutating a job in place and leaving
//! a stale index pointer behind — see `transition`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use uuid::Uuid;

use crate::error::JobStoreError;
use crate::job::{Job, JobStatus, NewJob, Priority};

const CF_JOBS: &str = "jobs";
const CF_PENDING_INDEX: &str = "pending_index";
const ALL_CFS: &[&str] = &[CF_JOBS, CF_PENDING_INDEX];

pub type JobStoreResult<T> = Result<T, JobStoreError>;
pub type SharedJobStore = Arc<JobStore>;

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn pending_index_key(project_key: &str, job_id: &str) -> String {
    format!("{project_key}:{job_id}")
}

pub struct JobStore {
    db: RwLock<DB>,
    #[allow(dead_code)]
    path: PathBuf,
}

impl JobStore {
    pub fn open(path: impl Into<PathBuf>) -> JobStoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    pub fn shared(self) -> SharedJobStore {
        Arc::new(self)
    }

    fn put_job(&self, job: &Job) -> JobStoreResult<()> {
        let db = self.db.read().map_err(|_| JobStoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(CF_JOBS)
            .ok_or(JobStoreError::ColumnFamilyMissing(CF_JOBS))?;
        let bytes = bincode::serde::encode_to_vec(job, bincode::config::standard())
            .map_err(|e| JobStoreError::Serialize(e.to_string()))?;
        db.put_cf(&cf, job.job_id.as_bytes(), bytes)?;
        Ok(())
    }

    fn get_job_raw(&self, job_id: &str) -> JobStoreResult<Option<Job>> {
        let db = self.db.read().map_err(|_| JobStoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(CF_JOBS)
            .ok_or(JobStoreError::ColumnFamilyMissing(CF_JOBS))?;
        match db.get_cf(&cf, job_id.as_bytes())? {
            Some(bytes) => {
                let (job, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                    .map_err(|e| JobStoreError::Deserialize(e.to_string()))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Delete a job's pending-index marker, re-derived from the caller's
    /// known project key rather than read back from storage, so the removal
    /// can happen in the same breath as any index mutation.
    fn delete_pending_index(&self, project_key: &str, job_id: &str) -> JobStoreResult<()> {
        let db = self.db.read().map_err(|_| JobStoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(CF_PENDING_INDEX)
            .ok_or(JobStoreError::ColumnFamilyMissing(CF_PENDING_INDEX))?;
        db.delete_cf(&cf, pending_index_key(project_key, job_id).as_bytes())?;
        Ok(())
    }

    fn put_pending_index(&self, project_key: &str, job_id: &str) -> JobStoreResult<()> {
        let db = self.db.read().map_err(|_| JobStoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(CF_PENDING_INDEX)
            .ok_or(JobStoreError::ColumnFamilyMissing(CF_PENDING_INDEX))?;
        db.put_cf(&cf, pending_index_key(project_key, job_id).as_bytes(), [])?;
        Ok(())
    }

    /// Applies a status transition to a job via delete-then-recreate: the
    /// old record (and, if it was pending, its index entry) is removed, and
    /// an entirely new record — with a freshly minted `job_id` — is written
    /// in its place. A naive in-place `status` mutation would risk leaving
    /// a stale index entry behind if a caller forgot to also update the
    /// index; minting a new id structurally rules that out, since the old
    /// key can never collide with the new one.
    ///
    /// `priority` lets recovery transitions bump priority to `High` in the
    /// same breath as the status change.
    fn transition(
        &self,
        job: Job,
        new_status: JobStatus,
        priority: Priority,
    ) -> JobStoreResult<Job> {
        let old_job_id = job.job_id.clone();
        let was_pending = matches!(job.status, JobStatus::Pending);
        let fields = job.carried_fields();

        let started_at = if matches!(new_status, JobStatus::Running) {
            Some(now_secs())
        } else {
            None
        };

        let new_job = Job::recreate(Uuid::new_v4().to_string(), fields, new_status, started_at, priority);

        self.put_job(&new_job)?;
        self.delete_job_record(&old_job_id)?;
        if was_pending {
            self.delete_pending_index(&new_job.project_key, &old_job_id)?;
        }
        if matches!(new_status, JobStatus::Pending) {
            self.put_pending_index(&new_job.project_key, &new_job.job_id)?;
        }
        Ok(new_job)
    }

    fn delete_job_record(&self, job_id: &str) -> JobStoreResult<()> {
        let db = self.db.read().map_err(|_| JobStoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(CF_JOBS)
            .ok_or(JobStoreError::ColumnFamilyMissing(CF_JOBS))?;
        db.delete_cf(&cf, job_id.as_bytes())?;
        Ok(())
    }

    /// Enqueue a new job and return the pending queue depth for its project.
    pub fn push(&self, new: NewJob) -> JobStoreResult<(Job, usize)> {
        let job_id = Uuid::new_v4().to_string();
        let job = Job::from_new(job_id, new, now_secs());
        self.put_job(&job)?;
        self.put_pending_index(&job.project_key, &job.job_id)?;
        let depth = self.pending_depth(&job.project_key)?;
        Ok((job, depth))
    }

    /// Pop the highest-priority pending job for a project: high priority
    /// first, then newest-first (FILO) within the same priority. Marks it
    /// Running before returning.
    pub fn pop(&self, project_key: &str) -> JobStoreResult<Option<Job>> {
        let candidates = self.pending_jobs(project_key)?;
        let Some(chosen) = candidates
            .into_iter()
            .min_by_key(|j| j.sort_key())
        else {
            return Ok(None);
        };
        let priority = chosen.priority;
        Ok(Some(self.transition(chosen, JobStatus::Running, priority)?))
    }

    pub fn pending_jobs(&self, project_key: &str) -> JobStoreResult<Vec<Job>> {
        let prefix = format!("{project_key}:");
        let db = self.db.read().map_err(|_| JobStoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(CF_PENDING_INDEX)
            .ok_or(JobStoreError::ColumnFamilyMissing(CF_PENDING_INDEX))?;
        let mut job_ids = Vec::new();
        for item in db.prefix_iterator_cf(&cf, prefix.as_bytes()) {
            let (key, _) = item?;
            let key_str = String::from_utf8_lossy(&key).into_owned();
            if !key_str.starts_with(&prefix) {
                break;
            }
            if let Some(job_id) = key_str.strip_prefix(&prefix) {
                job_ids.push(job_id.to_string());
            }
        }
        drop(db);

        let mut jobs = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            if let Some(job) = self.get_job_raw(&job_id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    pub fn pending_depth(&self, project_key: &str) -> JobStoreResult<usize> {
        Ok(self.pending_jobs(project_key)?.len())
    }

    pub fn get(&self, job_id: &str) -> JobStoreResult<Job> {
        self.get_job_raw(job_id)?
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))
    }

    /// Remove all pending jobs belonging to a session. Returns true if any
    /// were removed. Used when a user explicitly cancels before a job has
    /// started running.
    pub fn remove_by_session(&self, project_key: &str, session_id: &str) -> JobStoreResult<bool> {
        let mut removed = false;
        for job in self.pending_jobs(project_key)? {
            if job.session_id == session_id {
                self.delete_job(&job)?;
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Mark a running job completed and remove it from the store entirely —
    /// completed jobs are not retained, matching the original's delete-on-
    /// complete behavior.
    pub fn complete(&self, job: Job) -> JobStoreResult<()> {
        self.delete_job(&job)
    }

    /// Mark a running job failed and remove it, same as `complete`: the
    /// store only tracks work still in flight or waiting.
    pub fn fail(&self, job: Job) -> JobStoreResult<()> {
        self.delete_job(&job)
    }

    fn delete_job(&self, job: &Job) -> JobStoreResult<()> {
        let db = self.db.read().map_err(|_| JobStoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(CF_JOBS)
            .ok_or(JobStoreError::ColumnFamilyMissing(CF_JOBS))?;
        db.delete_cf(&cf, job.job_id.as_bytes())?;
        drop(db);
        if matches!(job.status, JobStatus::Pending) {
            self.delete_pending_index(&job.project_key, &job.job_id)?;
        }
        Ok(())
    }

    /// All jobs for a project currently marked `Running`. By the job-store's
    /// own invariant there is at most one, but the health monitor and
    /// recovery paths deal in lists so a double-booked project (a bug
    /// elsewhere) still surfaces rather than silently dropping work.
    pub fn running_jobs_for(&self, project_key: &str) -> JobStoreResult<Vec<Job>> {
        let db = self.db.read().map_err(|_| JobStoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(CF_JOBS)
            .ok_or(JobStoreError::ColumnFamilyMissing(CF_JOBS))?;
        let mut running = Vec::new();
        for item in db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (_, bytes) = item?;
            let (job, _): (Job, usize) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                    .map_err(|e| JobStoreError::Deserialize(e.to_string()))?;
            if job.project_key == project_key && matches!(job.status, JobStatus::Running) {
                running.push(job);
            }
        }
        Ok(running)
    }

    /// Jobs still marked `Running` with no live worker for them — called
    /// when a worker goroutine exits unexpectedly. Demotes each to `Pending`
    /// with priority bumped to `High` and `started_at` cleared, via
    /// delete-then-recreate (the job gets a new `job_id`).
    pub fn recover_interrupted(&self, project_key: &str) -> JobStoreResult<Vec<Job>> {
        let stale = self.running_jobs_for(project_key)?;
        let mut recovered = Vec::with_capacity(stale.len());
        for job in stale {
            recovered.push(self.transition(job, JobStatus::Pending, Priority::High)?);
        }
        Ok(recovered)
    }

    /// Same semantics as `recover_interrupted`, named separately for the
    /// startup call site: every `Running` job left over from a previous
    /// process is, by definition, orphaned.
    pub fn reset_running(&self, project_key: &str) -> JobStoreResult<usize> {
        Ok(self.recover_interrupted(project_key)?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (JobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.db")).unwrap();
        (store, dir)
    }

    fn sample_job(project_key: &str, priority: crate::job::Priority) -> NewJob {
        NewJob {
            project_key: project_key.to_string(),
            session_id: "session-1".to_string(),
            working_dir: "/repo".to_string(),
            message_text: "fix the bug".to_string(),
            sender_name: "alice".to_string(),
            chat_id: "chat-1".to_string(),
            message_id: 1,
            chat_title: None,
            priority,
            revival_context: None,
            auto_continue_count: 0,
        }
    }

    #[test]
    fn push_then_pop_returns_running_job() {
        let (store, _dir) = test_store();
        let (job, depth) = store.push(sample_job("proj-a", crate::job::Priority::High)).unwrap();
        assert_eq!(depth, 1);

        let popped = store.pop("proj-a").unwrap().unwrap();
        // pop mints a fresh job_id as part of its delete-then-recreate
        // transition, so identity across the transition is tracked by
        // session_id, not job_id.
        assert_ne!(popped.job_id, job.job_id);
        assert_eq!(popped.session_id, job.session_id);
        assert!(matches!(popped.status, JobStatus::Running));
        assert!(popped.started_at.is_some());

        assert_eq!(store.pending_depth("proj-a").unwrap(), 0);
    }

    #[test]
    fn high_priority_pops_before_low_priority() {
        let (store, _dir) = test_store();
        let mut low = sample_job("proj-a", crate::job::Priority::Low);
        low.session_id = "session-low".to_string();
        store.push(low).unwrap();
        let mut high = sample_job("proj-a", crate::job::Priority::High);
        high.session_id = "session-high".to_string();
        store.push(high).unwrap();

        let popped = store.pop("proj-a").unwrap().unwrap();
        assert_eq!(popped.session_id, "session-high");
    }

    #[test]
    fn same_priority_pops_newest_first() {
        let (store, _dir) = test_store();
        let mut first = sample_job("proj-a", crate::job::Priority::High);
        first.session_id = "session-first".to_string();
        store.push(first).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut second = sample_job("proj-a", crate::job::Priority::High);
        second.session_id = "session-second".to_string();
        store.push(second).unwrap();

        let popped = store.pop("proj-a").unwrap().unwrap();
        assert_eq!(popped.session_id, "session-second");
    }

    #[test]
    fn complete_removes_job_entirely() {
        let (store, _dir) = test_store();
        let (_, _) = store.push(sample_job("proj-a", crate::job::Priority::High)).unwrap();
        let running = store.pop("proj-a").unwrap().unwrap();
        let job_id = running.job_id.clone();
        store.complete(running).unwrap();
        assert!(store.get(&job_id).is_err());
    }

    #[test]
    fn remove_by_session_clears_only_pending_jobs_for_that_session() {
        let (store, _dir) = test_store();
        let mut a = sample_job("proj-a", crate::job::Priority::High);
        a.session_id = "session-a".to_string();
        let mut b = sample_job("proj-a", crate::job::Priority::High);
        b.session_id = "session-b".to_string();
        store.push(a).unwrap();
        store.push(b).unwrap();

        let removed = store.remove_by_session("proj-a", "session-a").unwrap();
        assert!(removed);
        assert_eq!(store.pending_depth("proj-a").unwrap(), 1);
    }

    #[test]
    fn recover_interrupted_resets_running_jobs_to_pending() {
        let (store, _dir) = test_store();
        store.push(sample_job("proj-a", crate::job::Priority::High)).unwrap();
        store.pop("proj-a").unwrap();
        assert_eq!(store.pending_depth("proj-a").unwrap(), 0);

        let recovered = store.recover_interrupted("proj-a").unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(store.pending_depth("proj-a").unwrap(), 1);
    }

    #[test]
    fn pending_index_has_no_stale_entries_after_repeated_transitions() {
        let (store, _dir) = test_store();
        let (job, _) = store.push(sample_job("proj-a", crate::job::Priority::High)).unwrap();
        let running = store.pop("proj-a").unwrap().unwrap();
        assert_eq!(store.pending_depth("proj-a").unwrap(), 0);

        let recovered = store
            .transition(running, JobStatus::Pending, Priority::High)
            .unwrap();
        assert_eq!(store.pending_depth("proj-a").unwrap(), 1);
        store.complete(recovered).unwrap();
        assert_eq!(store.pending_depth("proj-a").unwrap(), 0);
        // The original pending->running->pending chain minted new job_ids
        // at each step; the original id must be gone, not just re-indexed.
        assert!(store.get(&job.job_id).is_err());
    }

    #[test]
    fn pop_mints_a_new_job_id_distinct_from_the_pending_record() {
        let (store, _dir) = test_store();
        let (job, _) = store.push(sample_job("proj-a", crate::job::Priority::High)).unwrap();
        let running = store.pop("proj-a").unwrap().unwrap();
        assert_ne!(running.job_id, job.job_id);
        assert!(store.get(&job.job_id).is_err());
    }

    #[test]
    fn recovery_preserves_every_carried_field_except_id_status_and_started_at() {
        let (store, _dir) = test_store();
        let mut new = sample_job("proj-a", crate::job::Priority::Low);
        new.chat_title = Some("My Chat".to_string());
        new.revival_context = Some("resuming branch work".to_string());
        let (pushed, _) = store.push(new).unwrap();
        let running = store.pop("proj-a").unwrap().unwrap();

        let recovered = store.recover_interrupted("proj-a").unwrap();
        assert_eq!(recovered.len(), 1);
        let recovered = &recovered[0];

        assert_ne!(recovered.job_id, running.job_id);
        assert!(matches!(recovered.status, JobStatus::Pending));
        assert!(matches!(recovered.priority, Priority::High));
        assert!(recovered.started_at.is_none());

        assert_eq!(recovered.project_key, pushed.project_key);
        assert_eq!(recovered.session_id, pushed.session_id);
        assert_eq!(recovered.working_dir, pushed.working_dir);
        assert_eq!(recovered.message_text, pushed.message_text);
        assert_eq!(recovered.sender_name, pushed.sender_name);
        assert_eq!(recovered.chat_id, pushed.chat_id);
        assert_eq!(recovered.message_id, pushed.message_id);
        assert_eq!(recovered.chat_title, pushed.chat_title);
        assert_eq!(recovered.revival_context, pushed.revival_context);
        assert_eq!(recovered.created_at, pushed.created_at);
    }
}
