//! Job record: a queued unit of chat-triggered work for one project.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Low,
}

impl Priority {
    /// Lower rank sorts first: high priority goes to the top of the stack.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Low => 1,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub project_key: String,
    pub status: JobStatus,
    pub priority: Priority,
    /// Unix timestamp (seconds) the job was enqueued; used as the FILO tiebreaker.
    pub created_at: f64,
    /// Unix timestamp (seconds) the job transitioned to `Running`, if it has.
    pub started_at: Option<f64>,
    pub session_id: String,
    pub working_dir: String,
    pub message_text: String,
    pub sender_name: String,
    pub chat_id: String,
    pub message_id: i64,
    pub chat_title: Option<String>,
    /// Set when this job was created by the Revival Detector rather than a
    /// fresh chat message; carries the branch state summary shown to the
    /// agent as its opening context.
    pub revival_context: Option<String>,
    /// Bumped on every auto-continue re-enqueue of the same user-originated
    /// job; bounded by `OrchestratorConfig::max_auto_continues`.
    pub auto_continue_count: u32,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub project_key: String,
    pub session_id: String,
    pub working_dir: String,
    pub message_text: String,
    pub sender_name: String,
    pub chat_id: String,
    pub message_id: i64,
    pub chat_title: Option<String>,
    pub priority: Priority,
    pub revival_context: Option<String>,
    pub auto_continue_count: u32,
}

impl NewJob {
    /// Construct a fresh, non-continuation job (the common case: a chat
    /// message arriving straight from the bridge).
    pub fn fresh(
        project_key: impl Into<String>,
        session_id: impl Into<String>,
        working_dir: impl Into<String>,
        message_text: impl Into<String>,
        sender_name: impl Into<String>,
        chat_id: impl Into<String>,
        message_id: i64,
    ) -> Self {
        NewJob {
            project_key: project_key.into(),
            session_id: session_id.into(),
            working_dir: working_dir.into(),
            message_text: message_text.into(),
            sender_name: sender_name.into(),
            chat_id: chat_id.into(),
            message_id,
            chat_title: None,
            priority: Priority::High,
            revival_context: None,
            auto_continue_count: 0,
        }
    }
}

/// Every field of a `Job` except `job_id`, `status` and `started_at` — the
/// fields a status transition is allowed to carry forward unchanged. Kept as
/// a distinct type (rather than cloning `Job` and overwriting fields in
/// place) so the delete-then-recreate discipline in `job_store` can't
/// accidentally forget to reset one of the three.
#[derive(Debug, Clone)]
pub(crate) struct CarriedFields {
    pub project_key: String,
    pub priority: Priority,
    pub created_at: f64,
    pub session_id: String,
    pub working_dir: String,
    pub message_text: String,
    pub sender_name: String,
    pub chat_id: String,
    pub message_id: i64,
    pub chat_title: Option<String>,
    pub revival_context: Option<String>,
    pub auto_continue_count: u32,
}

impl Job {
    pub(crate) fn from_new(job_id: String, new: NewJob, created_at: f64) -> Self {
        Job {
            job_id,
            project_key: new.project_key,
            status: JobStatus::Pending,
            priority: new.priority,
            created_at,
            started_at: None,
            session_id: new.session_id,
            working_dir: new.working_dir,
            message_text: new.message_text,
            sender_name: new.sender_name,
            chat_id: new.chat_id,
            message_id: new.message_id,
            chat_title: new.chat_title,
            revival_context: new.revival_context,
            auto_continue_count: new.auto_continue_count,
        }
    }

    /// Extract every field this job would carry across a delete-then-
    /// recreate transition, preserving everything except `job_id`, `status`
    /// and `started_at`.
    pub(crate) fn carried_fields(&self) -> CarriedFields {
        CarriedFields {
            project_key: self.project_key.clone(),
            priority: self.priority,
            created_at: self.created_at,
            session_id: self.session_id.clone(),
            working_dir: self.working_dir.clone(),
            message_text: self.message_text.clone(),
            sender_name: self.sender_name.clone(),
            chat_id: self.chat_id.clone(),
            message_id: self.message_id,
            chat_title: self.chat_title.clone(),
            revival_context: self.revival_context.clone(),
            auto_continue_count: self.auto_continue_count,
        }
    }

    /// Build a fresh `Job` record from carried-forward fields plus a newly
    /// minted id and the new status/started_at/priority. This is the only
    /// constructor a status transition uses — it can never leave a field
    /// half-updated.
    pub(crate) fn recreate(
        job_id: String,
        fields: CarriedFields,
        status: JobStatus,
        started_at: Option<f64>,
        priority: Priority,
    ) -> Self {
        Job {
            job_id,
            project_key: fields.project_key,
            status,
            priority,
            created_at: fields.created_at,
            started_at,
            session_id: fields.session_id,
            working_dir: fields.working_dir,
            message_text: fields.message_text,
            sender_name: fields.sender_name,
            chat_id: fields.chat_id,
            message_id: fields.message_id,
            chat_title: fields.chat_title,
            revival_context: fields.revival_context,
            auto_continue_count: fields.auto_continue_count,
        }
    }

    /// Sort key for popping the queue: high priority first, then newest
    /// first within the same priority (FILO), matching the original stack
    /// discipline.
    pub(crate) fn sort_key(&self) -> (u8, i64) {
        (self.priority.rank(), -(self.created_at * 1000.0) as i64)
    }
}
