//! Daemon-wide configuration: where the agent binary and its system prompt
//! live, where the persistent stores sit on disk, and the project registry
//! the bridge's project keys resolve against.
//!
//! Thresholds shared with the core (summarization limits, health-monitor
//! intervals, auto-continue cap) live in `orchestrator_core::OrchestratorConfig`
//! and are loaded alongside this one; this type only holds what's specific
//! to running the subprocess and wiring the daemon's own storage paths.

use std::path::{Path, PathBuf};

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Populated from environment variables with documented defaults, matching
/// the core config's idiom.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Populated from AGENT_COMMAND. The coding-agent CLI to spawn per
    /// session (an opaque subprocess as far as this daemon is concerned).
    pub agent_command: String,
    /// Populated from AGENT_SYSTEM_PROMPT_PATH. Loaded once at startup and
    /// passed to every spawned session.
    pub system_prompt_path: PathBuf,
    /// Populated from JOBS_DB_PATH.
    pub jobs_db_path: PathBuf,
    /// Populated from STEERING_DB_PATH.
    pub steering_db_path: PathBuf,
    /// Populated from PROJECT_REGISTRY_PATH. TOML file listing every
    /// project this daemon serves.
    pub project_registry_path: PathBuf,
    /// Populated from WORKER_IDLE_POLL_SECS. How long a drained worker
    /// sleeps before its drain-guard recheck.
    pub worker_idle_poll_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            agent_command: env_string("AGENT_COMMAND", "claude-agent"),
            system_prompt_path: env_path("AGENT_SYSTEM_PROMPT_PATH", "config/SYSTEM_PROMPT.md"),
            jobs_db_path: env_path("JOBS_DB_PATH", "state/jobs.db"),
            steering_db_path: env_path("STEERING_DB_PATH", "state/steering.db"),
            project_registry_path: env_path("PROJECT_REGISTRY_PATH", "config/projects.toml"),
            worker_idle_poll_secs: std::env::var("WORKER_IDLE_POLL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
        }
    }
}

impl DaemonConfig {
    /// Load the system prompt from disk, falling back to a minimal default
    /// if the file isn't present (matches the teacher's soft-fail idiom for
    /// missing config documents rather than refusing to start).
    pub fn load_system_prompt(&self) -> String {
        match std::fs::read_to_string(&self.system_prompt_path) {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!(
                    path = %self.system_prompt_path.display(),
                    "system prompt file not found, using default"
                );
                "You are an autonomous coding agent operating inside an isolated git branch.\
                 Be direct, verify your work, and report concrete evidence of completion."
                    .to_string()
            }
        }
    }
}

/// Check that an HTTP endpoint is reachable, same shape as the teacher's
/// `check_endpoint`: used at startup to log a warning (not fail) when a
/// classifier/summarizer/watchdog endpoint looks unreachable.
pub async fn check_endpoint(url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
    {
        Ok(c) => c,
        Err(_) => return false,
    };
    client.get(url).send().await.is_ok()
}

pub fn resolve_relative(base: &Path, maybe_relative: &Path) -> PathBuf {
    if maybe_relative.is_absolute() {
        maybe_relative.to_path_buf()
    } else {
        base.join(maybe_relative)
    }
}
