//! Orchestrator-wide tunables, populated from environment variables with
//! documented defaults — same idiom as the agent daemon's per-endpoint
//! config, just for the thresholds the core components read.

use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Thresholds governing the Output Pipeline, Agent Runner watchdog, Worker
/// Loop and Health Monitor. Each field is `/// Populated from <ENV_VAR>`.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Populated from SUMMARIZE_THRESHOLD. Responses at or under this length
    /// are delivered verbatim.
    pub summarize_threshold: usize,
    /// Populated from FILE_ATTACH_THRESHOLD. Responses over this length also
    /// get the full output attached as a file.
    pub file_attach_threshold: usize,
    /// Populated from MAX_SUMMARY_CHARS. Target length for an LLM summary.
    pub max_summary_chars: usize,
    /// Populated from SAFETY_TRUNCATE. Hard platform delivery limit.
    pub safety_truncate: usize,
    /// Populated from MAX_AUTO_CONTINUES. Hard bound on auto-continue chains.
    pub max_auto_continues: u32,
    /// Populated from WATCHDOG_CHECK_INTERVAL. Tool calls between watchdog
    /// health judgments.
    pub watchdog_check_interval: u32,
    /// Populated from JOB_HEALTH_CHECK_INTERVAL (seconds).
    pub job_health_check_interval: Duration,
    /// Populated from JOB_HEALTH_MIN_RUNNING (seconds). Race-condition guard:
    /// a dead-worker job below this age is not recovered.
    pub job_health_min_running: Duration,
    /// Populated from JOB_TIMEOUT_BUILD (seconds). Applied when the job's
    /// message text contains the literal substring `/do-build`.
    pub job_timeout_build: Duration,
    /// Populated from JOB_TIMEOUT_DEFAULT (seconds).
    pub job_timeout_default: Duration,
    /// Populated from ACKNOWLEDGMENT_TIMEOUT (seconds). How long the worker
    /// waits before sending a one-time "I'm working on this." ack.
    pub acknowledgment_timeout: Duration,
    /// Populated from REVIVAL_COOLDOWN_SECS. Minimum gap between revival
    /// notifications for the same chat.
    pub revival_cooldown: Duration,
    /// Populated from CLASSIFIER_ENDPOINT_URL.
    pub classifier_endpoint: String,
    /// Populated from SUMMARIZER_ENDPOINT_URL.
    pub summarizer_endpoint: String,
    /// Populated from SUMMARIZER_FALLBACK_ENDPOINT_URL. Second-tier local
    /// model used when the primary summarizer call fails.
    pub summarizer_fallback_endpoint: String,
    /// Populated from WATCHDOG_ENDPOINT_URL. Fast judge model for the
    /// PostToolUse watchdog.
    pub watchdog_endpoint: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            summarize_threshold: env_usize("SUMMARIZE_THRESHOLD", 1500),
            file_attach_threshold: env_usize("FILE_ATTACH_THRESHOLD", 3000),
            max_summary_chars: env_usize("MAX_SUMMARY_CHARS", 1200),
            safety_truncate: env_usize("SAFETY_TRUNCATE", 4096),
            max_auto_continues: env_u32("MAX_AUTO_CONTINUES", 3),
            watchdog_check_interval: env_u32("WATCHDOG_CHECK_INTERVAL", 20),
            job_health_check_interval: Duration::from_secs(env_u64(
                "JOB_HEALTH_CHECK_INTERVAL",
                300,
            )),
            job_health_min_running: Duration::from_secs(env_u64("JOB_HEALTH_MIN_RUNNING", 300)),
            job_timeout_build: Duration::from_secs(env_u64("JOB_TIMEOUT_BUILD", 9000)),
            job_timeout_default: Duration::from_secs(env_u64("JOB_TIMEOUT_DEFAULT", 2700)),
            acknowledgment_timeout: Duration::from_secs(env_u64("ACKNOWLEDGMENT_TIMEOUT", 180)),
            revival_cooldown: Duration::from_secs(env_u64("REVIVAL_COOLDOWN_SECS", 24 * 3600)),
            classifier_endpoint: std::env::var("CLASSIFIER_ENDPOINT_URL")
                .unwrap_or_else(|_| "http://localhost:11434/v1/classify".to_string()),
            summarizer_endpoint: std::env::var("SUMMARIZER_ENDPOINT_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string()),
            summarizer_fallback_endpoint: std::env::var("SUMMARIZER_FALLBACK_ENDPOINT_URL")
                .unwrap_or_else(|_| "http://localhost:11434/v1/summarize".to_string()),
            watchdog_endpoint: std::env::var("WATCHDOG_ENDPOINT_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string()),
        }
    }
}

impl OrchestratorConfig {
    /// Per-job timeout, selected by whether the message text contains the
    /// literal, case-sensitive substring `/do-build`.
    pub fn job_timeout_for(&self, message_text: &str) -> Duration {
        if message_text.contains("/do-build") {
            self.job_timeout_build
        } else {
            self.job_timeout_default
        }
    }
}

/// Per-project settings loaded from the project registry TOML file.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ProjectConfig {
    pub project_key: String,
    pub working_directory: String,
    #[serde(default)]
    pub auto_merge: bool,
}

#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct ProjectRegistry {
    #[serde(default, rename = "project")]
    pub projects: Vec<ProjectConfig>,
}

impl ProjectRegistry {
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn get(&self, project_key: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.project_key == project_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_timeout_picks_build_timeout_for_build_messages() {
        let cfg = OrchestratorConfig {
            job_timeout_build: Duration::from_secs(9000),
            job_timeout_default: Duration::from_secs(2700),
            ..Default::default()
        };
        assert_eq!(cfg.job_timeout_for("/do-build please"), Duration::from_secs(9000));
        assert_eq!(cfg.job_timeout_for("/DO-BUILD please"), Duration::from_secs(2700));
        assert_eq!(cfg.job_timeout_for("just fix it"), Duration::from_secs(2700));
    }

    #[test]
    fn project_registry_round_trips_toml() {
        let toml_text = r#"
            [[project]]
            project_key = "alpha"
            working_directory = "/srv/alpha"
            auto_merge = true
        "#;
        let registry: ProjectRegistry = toml::from_str(toml_text).unwrap();
        let project = registry.get("alpha").unwrap();
        assert_eq!(project.working_directory, "/srv/alpha");
        assert!(project.auto_merge);
        assert!(registry.get("missing").is_none());
    }
}
