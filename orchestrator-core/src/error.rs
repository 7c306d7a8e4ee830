//! Error taxonomy for the orchestrator core.
//!
//! Each component gets its own typed error; `OrchestratorError` is the
//! umbrella any call site crossing a component boundary can return.

use std::collections::HashMap;
use std::fmt;

/// Result alias used throughout `orchestrator-core`.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Structured, loggable representation of any error in this crate.
///
/// Mirrors the shape a chat-facing error message needs: a stable code, a
/// human message, an optional recovery suggestion, and free-form context.
#[derive(Debug, Clone)]
pub struct StructuredError {
    pub code: String,
    pub message: String,
    pub recovery_action: Option<String>,
    pub context: HashMap<String, String>,
    pub retryable: bool,
}

impl StructuredError {
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(action) = &self.recovery_action {
            write!(f, " ({action})")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("rocksdb error: {0}")]
    Db(#[from] rocksdb::Error),
    #[error("serialization error: {0}")]
    Serialize(String),
    #[error("deserialization error: {0}")]
    Deserialize(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("lock poisoned")]
    LockPoisoned,
    #[error("column family not found: {0}")]
    ColumnFamilyMissing(&'static str),
}

impl JobStoreError {
    /// Store index corruption has no runtime recovery path — it is prevented
    /// structurally by the delete-then-recreate discipline (see `job_store`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobStoreError::Db(_) | JobStoreError::LockPoisoned)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SteeringError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error("malformed steering payload for session {session_id}: {reason}")]
    MalformedPayload { session_id: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum BranchError {
    #[error("git {operation} failed: {message}")]
    Git { operation: String, message: String },
    #[error("merge conflict finishing branch {branch}")]
    MergeConflict { branch: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BranchError {
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        BranchError::Git {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Transient git failures (lock contention, brief network blip on push)
    /// are retried by the caller with backoff; anything else is surfaced.
    pub fn is_retryable(&self) -> bool {
        match self {
            BranchError::Git { message, .. } => {
                let m = message.to_lowercase();
                m.contains("lock") || m.contains("index.lock") || m.contains("timed out")
            }
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OutputPipelineError {
    #[error("classifier endpoint error: {0}")]
    Classifier(String),
    #[error("summarizer endpoint error: {0}")]
    Summarizer(String),
    #[error("io error writing attachment: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentRunnerError {
    #[error("failed to spawn agent subprocess: {0}")]
    Spawn(String),
    #[error("agent subprocess exited with error: {0}")]
    AgentError(String),
    #[error("no runner registered for session {0}")]
    NotRegistered(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    JobStore(#[from] JobStoreError),
    #[error(transparent)]
    Steering(#[from] SteeringError),
    #[error(transparent)]
    Branch(#[from] BranchError),
    #[error(transparent)]
    OutputPipeline(#[from] OutputPipelineError),
    #[error(transparent)]
    AgentRunner(#[from] AgentRunnerError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::JobStore(e) => e.is_retryable(),
            OrchestratorError::Branch(e) => e.is_retryable(),
            OrchestratorError::Steering(_) => false,
            OrchestratorError::OutputPipeline(_) => false,
            OrchestratorError::AgentRunner(_) => false,
            OrchestratorError::Config(_) => false,
        }
    }

    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            OrchestratorError::JobStore(_) => {
                Some("job store invariant violation; this is fatal, not recoverable at runtime")
            }
            OrchestratorError::Branch(BranchError::MergeConflict { .. }) => {
                Some("resolve the merge conflict manually; the branch was left intact")
            }
            OrchestratorError::Branch(_) => Some("retry the git operation"),
            OrchestratorError::OutputPipeline(_) => {
                Some("falls through the tiered summarizer/classifier fallback")
            }
            OrchestratorError::AgentRunner(_) => Some("the job will be recovered by the health monitor"),
            OrchestratorError::Steering(_) => None,
            OrchestratorError::Config(_) => Some("check environment variables and the project registry file"),
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        StructuredError {
            code: self.code().to_string(),
            message: self.to_string(),
            recovery_action: self.recovery_suggestion().map(|s| s.to_string()),
            context: HashMap::new(),
            retryable: self.is_retryable(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            OrchestratorError::JobStore(_) => "job_store_error",
            OrchestratorError::Steering(_) => "steering_error",
            OrchestratorError::Branch(BranchError::MergeConflict { .. }) => "merge_conflict",
            OrchestratorError::Branch(_) => "branch_error",
            OrchestratorError::OutputPipeline(_) => "output_pipeline_error",
            OrchestratorError::AgentRunner(_) => "agent_runner_error",
            OrchestratorError::Config(_) => "config_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_conflict_is_not_retryable_but_has_suggestion() {
        let err = OrchestratorError::Branch(BranchError::MergeConflict {
            branch: "session/foo".into(),
        });
        assert!(!err.is_retryable());
        assert!(err.recovery_suggestion().is_some());
        assert_eq!(err.to_structured().code, "merge_conflict");
    }

    #[test]
    fn lock_contention_git_error_is_retryable() {
        let err = BranchError::git("commit", "Unable to create 'index.lock': File exists");
        assert!(err.is_retryable());
    }

    #[test]
    fn job_store_errors_are_fatal_by_default() {
        let err = JobStoreError::NotFound("job-1".into());
        assert!(!err.is_retryable());
    }
}
