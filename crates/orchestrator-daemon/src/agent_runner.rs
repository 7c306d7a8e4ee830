//! Agent Runner: owns the coding-agent subprocess for one session, streams
//! its JSON-lines output, and answers the PostToolUse hook round-trip the
//! subprocess makes after every tool call.
//!
//! Grounded in `original_source/agent/sdk_client.py` (`ValorAgent`: system
//! prompt load, permission-mode bypass, session continuity, `AssistantMessage`
//! / `ResultMessage` accumulation) and `original_source/agent/health_check.py`
//! (watchdog interval, transcript-tail summarization, judge-model JSON
//! contract, fail-open error handling). Unlike the Python SDK — where the
//! hook is an in-process callback — this subprocess model carries the hook
//! round-trip over the same stdin/stdout pipe as the rest of the protocol:
//! the child emits a `hook_request` line and blocks until a matching
//! `hook_response` line arrives.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

use orchestrator_core::AgentRunnerError;
use orchestrator_core::SteeringQueue;

/// One block of an `AssistantMessage`'s content array.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { name: String, input: serde_json::Value },
}

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub text: String,
    pub num_turns: u32,
    pub duration_ms: u64,
    pub total_cost_usd: Option<f64>,
    pub is_error: bool,
    pub result: Option<String>,
    pub stop_reason: Option<String>,
}

/// The subset of the runner's surface the PostToolUse hook and the worker
/// loop need: query/interrupt. Kept as a trait so the hook-decision logic
/// can be unit-tested against a fake without spawning a real subprocess.
#[async_trait]
pub trait AgentControl: Send + Sync {
    async fn interrupt(&self) -> Result<(), AgentRunnerError>;
    async fn query(&self, text: &str) -> Result<(), AgentRunnerError>;
}

/// Process-wide `session_id -> runner` map so the hook (running inside the
/// session's own reader loop) and any external caller (health monitor,
/// steering push) can reach a live runner without threading a handle
/// through every call site.
#[derive(Default, Clone)]
pub struct RunnerRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<dyn AgentControl>>>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session_id: &str, runner: Arc<dyn AgentControl>) {
        self.inner.lock().await.insert(session_id.to_string(), runner);
    }

    pub async fn unregister(&self, session_id: &str) {
        self.inner.lock().await.remove(session_id);
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<dyn AgentControl>> {
        self.inner.lock().await.get(session_id).cloned()
    }
}

/// A live subprocess handle for one session.
pub struct AgentRunner {
    session_id: String,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
}

impl AgentRunner {
    /// Spawn the coding agent with the given working directory and system
    /// prompt, in permission-bypass ("YOLO") mode, continuing `session_id`'s
    /// conversation if the agent supports resume.
    pub async fn spawn(
        agent_command: &str,
        working_dir: &Path,
        session_id: &str,
        system_prompt: &str,
        api_key_env: &str,
    ) -> Result<Self, AgentRunnerError> {
        let mut cmd = Command::new(agent_command);
        cmd.current_dir(working_dir)
            .arg("--permission-mode")
            .arg("bypassPermissions")
            .arg("--resume")
            .arg(session_id)
            .arg("--output-format")
            .arg("stream-json")
            .env("ANTHROPIC_API_KEY", api_key_env)
            .env("AGENT_SYSTEM_PROMPT", system_prompt)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| AgentRunnerError::Spawn(e.to_string()))?;
        let stdin = child.stdin.take().ok_or_else(|| AgentRunnerError::Spawn("no stdin handle".into()))?;

        Ok(Self {
            session_id: session_id.to_string(),
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn write_line(&self, value: &serde_json::Value) -> Result<(), AgentRunnerError> {
        let mut line = serde_json::to_vec(value).map_err(|e| AgentRunnerError::AgentError(e.to_string()))?;
        line.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&line).await.map_err(AgentRunnerError::Io)
    }

    /// Take the subprocess's stdout for the caller's reader loop. Each
    /// session's output is consumed exactly once, by the worker task that
    /// spawned it.
    pub async fn take_stdout(&self) -> Option<tokio::process::ChildStdout> {
        self.child.lock().await.stdout.take()
    }

    pub async fn wait(&self) -> std::io::Result<std::process::ExitStatus> {
        self.child.lock().await.wait().await
    }
}

#[async_trait]
impl AgentControl for AgentRunner {
    async fn interrupt(&self) -> Result<(), AgentRunnerError> {
        self.write_line(&serde_json::json!({"type": "control", "subtype": "interrupt"})).await
    }

    async fn query(&self, text: &str) -> Result<(), AgentRunnerError> {
        self.write_line(&serde_json::json!({
            "type": "user",
            "message": {"role": "user", "content": text}
        }))
        .await
    }
}

/// Reads the child's stdout line by line, accumulating assistant text and
/// answering hook requests, until a `ResultMessage` (or EOF) ends the turn.
pub async fn run_to_completion(
    runner: &AgentRunner,
    stdout: tokio::process::ChildStdout,
    registry: &RunnerRegistry,
    steering: &SteeringQueue,
    watchdog: &dyn HealthJudge,
    watchdog_interval: u32,
) -> RunOutcome {
    let mut reader = BufReader::new(stdout).lines();
    let mut accumulated = String::new();
    let tool_counts = AtomicU32::new(0);
    let mut outcome = RunOutcome::default();

    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(session_id = %runner.session_id, error = %e, "stdout read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(session_id = %runner.session_id, error = %e, raw = %line, "unparseable agent output line");
                continue;
            }
        };

        match value.get("type").and_then(|t| t.as_str()) {
            Some("assistant") => {
                if let Some(content) = value.pointer("/message/content").and_then(|c| c.as_array()) {
                    for block in content {
                        if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                                accumulated.push_str(text);
                            }
                        } else if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                            tool_counts.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            }
            Some("hook_request") => {
                let request_id = value.get("request_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let transcript_path = value.get("transcript_path").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let count = tool_counts.load(Ordering::SeqCst);

                let decision = decide_post_tool_use(
                    &runner.session_id,
                    registry,
                    steering,
                    watchdog,
                    count,
                    watchdog_interval,
                    &transcript_path,
                )
                .await;

                let response = serde_json::json!({
                    "type": "hook_response",
                    "request_id": request_id,
                    "continue_": decision.continue_,
                    "stopReason": decision.stop_reason,
                });
                if let Err(e) = runner.write_line(&response).await {
                    tracing::warn!(session_id = %runner.session_id, error = %e, "failed to answer hook request");
                }
                if !decision.continue_ {
                    outcome.stop_reason = decision.stop_reason;
                }
            }
            Some("result") => {
                outcome.num_turns = value.get("num_turns").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                outcome.duration_ms = value.get("duration_ms").and_then(|v| v.as_u64()).unwrap_or(0);
                outcome.total_cost_usd = value.get("total_cost_usd").and_then(|v| v.as_f64());
                outcome.is_error = value.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false);
                outcome.result = value.get("result").and_then(|v| v.as_str()).map(str::to_string);
                break;
            }
            _ => {}
        }
    }

    outcome.text = accumulated;
    outcome
}

/// What the PostToolUse hook decided, framed for the wire (`hook_response`)
/// and for the worker's own bookkeeping.
#[derive(Debug, Clone)]
pub struct HookDecision {
    pub continue_: bool,
    pub stop_reason: Option<String>,
}

impl HookDecision {
    fn proceed() -> Self {
        Self { continue_: true, stop_reason: None }
    }

    fn block(reason: impl Into<String>) -> Self {
        Self { continue_: false, stop_reason: Some(reason.into()) }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogVerdict {
    pub healthy: bool,
    pub reason: String,
}

/// Judges whether a session is making progress, given a tail of its
/// transcript. `HttpHealthJudge` calls a fast judge model; tests use a fake.
#[async_trait]
pub trait HealthJudge: Send + Sync {
    async fn judge(&self, activity: &str) -> Result<WatchdogVerdict, String>;
}

pub struct HttpHealthJudge {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpHealthJudge {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }
}

const JUDGE_PROMPT_TEMPLATE: &str = "You are a watchdog monitoring an AI coding agent session. Based on the recent \
activity log below, determine if the agent is:\n\
1. Making meaningful progress toward its goal\n\
2. Stuck in a repetitive loop (same tools, same patterns, similar errors)\n\
3. Exploring without converging (unbounded research with no clear deliverable)\n\n\
Recent activity:\n{activity}\n\n\
Respond with ONLY a JSON object, no other text:\n\
{{\"healthy\": true/false, \"reason\": \"brief explanation\"}}";

#[async_trait]
impl HealthJudge for HttpHealthJudge {
    async fn judge(&self, activity: &str) -> Result<WatchdogVerdict, String> {
        let prompt = JUDGE_PROMPT_TEMPLATE.replace("{activity}", activity);
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({"prompt": prompt}))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let text = resp.text().await.map_err(|e| e.to_string())?;
        serde_json::from_str(&text).map_err(|e| format!("unparseable judge response: {e}: {text}"))
    }
}

/// Reads the last ~30 tool-use entries from a transcript JSONL file and
/// renders them as a compact activity log for the judge prompt.
pub fn read_recent_activity(transcript_path: &str, max_entries: usize) -> String {
    let path = PathBuf::from(transcript_path);
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return "(transcript not found)".to_string();
    };
    let lines: Vec<&str> = contents.lines().collect();
    let tail = if lines.len() > max_entries { &lines[lines.len() - max_entries..] } else { &lines[..] };

    let mut entries = Vec::new();
    for line in tail {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else { continue };
        if value.get("type").and_then(|t| t.as_str()) != Some("assistant") {
            continue;
        }
        let Some(content) = value.pointer("/message/content").and_then(|c| c.as_array()) else { continue };
        for block in content {
            if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("unknown");
                let input = block.get("input").cloned().unwrap_or_default();
                entries.push(format!("- {name}: {}", summarize_tool_input(name, &input)));
            }
        }
    }

    if entries.is_empty() {
        return "(no tool calls found in recent transcript)".to_string();
    }
    entries.join("\n")
}

fn summarize_tool_input(tool_name: &str, input: &serde_json::Value) -> String {
    let truncate = |s: &str, n: usize| -> String {
        if s.chars().count() > n {
            let head: String = s.chars().take(n).collect();
            format!("{head}...")
        } else {
            s.to_string()
        }
    };
    match tool_name {
        "Bash" => truncate(input.get("command").and_then(|v| v.as_str()).unwrap_or(""), 120),
        "Read" | "Write" | "Edit" => input
            .get("file_path")
            .or_else(|| input.get("path"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        "Grep" | "Glob" => format!("pattern=\"{}\"", input.get("pattern").and_then(|v| v.as_str()).unwrap_or("")),
        _ => truncate(&input.to_string(), 100),
    }
}

/// Answers one PostToolUse round-trip:
/// 1. Steering injection: pop all pending steering messages; an abort wins
///    outright. Otherwise inject the rest as a composite query.
/// 2. Watchdog: every `watchdog_interval` tool calls, judge the transcript
///    tail; an unhealthy verdict blocks the same way an abort does.
#[allow(clippy::too_many_arguments)]
pub async fn decide_post_tool_use(
    session_id: &str,
    registry: &RunnerRegistry,
    steering: &SteeringQueue,
    watchdog: &dyn HealthJudge,
    tool_call_count: u32,
    watchdog_interval: u32,
    transcript_path: &str,
) -> HookDecision {
    if let Some(decision) = inject_steering(session_id, registry, steering).await {
        return decision;
    }

    if watchdog_interval > 0 && tool_call_count > 0 && tool_call_count % watchdog_interval == 0 {
        let activity = read_recent_activity(transcript_path, 30);
        match watchdog.judge(&activity).await {
            Ok(verdict) if !verdict.healthy => {
                tracing::warn!(session_id, reason = %verdict.reason, "watchdog judged session unhealthy");
                return HookDecision::block(format!("Watchdog: {}", verdict.reason));
            }
            Ok(_) => {}
            Err(e) => {
                // Fail-open: a watchdog bug must never block the agent.
                tracing::warn!(session_id, error = %e, "watchdog check failed, continuing");
            }
        }
    }

    HookDecision::proceed()
}

async fn inject_steering(
    session_id: &str,
    registry: &RunnerRegistry,
    steering: &SteeringQueue,
) -> Option<HookDecision> {
    let pending = match steering.pop_all(session_id) {
        Ok(messages) => messages,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "failed to drain steering queue");
            return None;
        }
    };
    if pending.is_empty() {
        return None;
    }

    if let Some(abort) = pending.iter().find(|m| m.is_abort) {
        return Some(HookDecision::block(format!("Aborted: {}", abort.text)));
    }

    let Some(runner) = registry.get(session_id).await else {
        tracing::warn!(session_id, "no runner registered, re-queuing steering messages");
        for message in pending {
            let _ = steering.push(session_id, &message.text, &message.sender, message.is_abort);
        }
        return None;
    };

    let composite = pending
        .iter()
        .map(|m| format!("[{}] {}", m.sender, m.text))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!("STEERING MESSAGE\n\n{composite}");

    if runner.interrupt().await.is_err() || runner.query(&prompt).await.is_err() {
        tracing::warn!(session_id, "steering injection failed, re-queuing messages");
        for message in pending {
            let _ = steering.push(session_id, &message.text, &message.sender, message.is_abort);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeRunner {
        interrupted: StdMutex<bool>,
        queried: StdMutex<Vec<String>>,
        fail: bool,
    }

    impl FakeRunner {
        fn new(fail: bool) -> Self {
            Self { interrupted: StdMutex::new(false), queried: StdMutex::new(Vec::new()), fail }
        }
    }

    #[async_trait]
    impl AgentControl for FakeRunner {
        async fn interrupt(&self) -> Result<(), AgentRunnerError> {
            if self.fail {
                return Err(AgentRunnerError::AgentError("boom".into()));
            }
            *self.interrupted.lock().unwrap() = true;
            Ok(())
        }

        async fn query(&self, text: &str) -> Result<(), AgentRunnerError> {
            if self.fail {
                return Err(AgentRunnerError::AgentError("boom".into()));
            }
            self.queried.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct AlwaysHealthy;
    #[async_trait]
    impl HealthJudge for AlwaysHealthy {
        async fn judge(&self, _activity: &str) -> Result<WatchdogVerdict, String> {
            Ok(WatchdogVerdict { healthy: true, reason: "fine".into() })
        }
    }

    struct AlwaysUnhealthy;
    #[async_trait]
    impl HealthJudge for AlwaysUnhealthy {
        async fn judge(&self, _activity: &str) -> Result<WatchdogVerdict, String> {
            Ok(WatchdogVerdict { healthy: false, reason: "stuck in a loop".into() })
        }
    }

    struct AlwaysErrors;
    #[async_trait]
    impl HealthJudge for AlwaysErrors {
        async fn judge(&self, _activity: &str) -> Result<WatchdogVerdict, String> {
            Err("endpoint down".into())
        }
    }

    fn test_steering() -> (SteeringQueue, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (SteeringQueue::open(dir.path().join("steering.db")).unwrap(), dir)
    }

    #[tokio::test]
    async fn abort_steering_message_blocks_the_session() {
        let (steering, _dir) = test_steering();
        steering.push("sess-1", "stop", "boss", false).unwrap();
        let registry = RunnerRegistry::new();

        let decision = decide_post_tool_use(
            "sess-1", &registry, &steering, &AlwaysHealthy, 1, 20, "",
        )
        .await;
        assert!(!decision.continue_);
        assert!(decision.stop_reason.unwrap().starts_with("Aborted:"));
    }

    #[tokio::test]
    async fn non_abort_steering_is_injected_via_interrupt_then_query() {
        let (steering, _dir) = test_steering();
        steering.push("sess-1", "please also check the README", "boss", false).unwrap();
        let registry = RunnerRegistry::new();
        let runner = Arc::new(FakeRunner::new(false));
        registry.register("sess-1", runner.clone()).await;

        let decision = decide_post_tool_use(
            "sess-1", &registry, &steering, &AlwaysHealthy, 1, 20, "",
        )
        .await;
        assert!(decision.continue_);
        assert!(*runner.interrupted.lock().unwrap());
        let queried = runner.queried.lock().unwrap();
        assert_eq!(queried.len(), 1);
        assert!(queried[0].starts_with("STEERING MESSAGE"));
        assert!(queried[0].contains("please also check the README"));
    }

    #[tokio::test]
    async fn steering_with_no_registered_runner_is_requeued() {
        let (steering, _dir) = test_steering();
        steering.push("sess-1", "check the logs too", "boss", false).unwrap();
        let registry = RunnerRegistry::new();

        let decision = decide_post_tool_use(
            "sess-1", &registry, &steering, &AlwaysHealthy, 1, 20, "",
        )
        .await;
        assert!(decision.continue_);
        assert!(steering.has_messages("sess-1").unwrap());
    }

    #[tokio::test]
    async fn failed_injection_requeues_and_continues() {
        let (steering, _dir) = test_steering();
        steering.push("sess-1", "check the logs too", "boss", false).unwrap();
        let registry = RunnerRegistry::new();
        registry.register("sess-1", Arc::new(FakeRunner::new(true))).await;

        let decision = decide_post_tool_use(
            "sess-1", &registry, &steering, &AlwaysHealthy, 1, 20, "",
        )
        .await;
        assert!(decision.continue_);
        assert!(steering.has_messages("sess-1").unwrap());
    }

    #[tokio::test]
    async fn watchdog_fires_every_n_tool_calls_and_blocks_when_unhealthy() {
        let (steering, _dir) = test_steering();
        let registry = RunnerRegistry::new();

        let healthy_tick = decide_post_tool_use(
            "sess-1", &registry, &steering, &AlwaysUnhealthy, 19, 20, "",
        )
        .await;
        assert!(healthy_tick.continue_, "watchdog should not fire off-cadence");

        let unhealthy_tick = decide_post_tool_use(
            "sess-1", &registry, &steering, &AlwaysUnhealthy, 20, 20, "",
        )
        .await;
        assert!(!unhealthy_tick.continue_);
        assert!(unhealthy_tick.stop_reason.unwrap().contains("stuck in a loop"));
    }

    #[tokio::test]
    async fn watchdog_error_fails_open() {
        let (steering, _dir) = test_steering();
        let registry = RunnerRegistry::new();

        let decision = decide_post_tool_use(
            "sess-1", &registry, &steering, &AlwaysErrors, 20, 20, "",
        )
        .await;
        assert!(decision.continue_);
    }

    #[tokio::test]
    async fn abort_takes_priority_over_watchdog_cadence() {
        let (steering, _dir) = test_steering();
        steering.push("sess-1", "abort", "boss", false).unwrap();
        let registry = RunnerRegistry::new();

        let decision = decide_post_tool_use(
            "sess-1", &registry, &steering, &AlwaysUnhealthy, 20, 20, "",
        )
        .await;
        assert!(!decision.continue_);
        assert!(decision.stop_reason.unwrap().starts_with("Aborted:"));
    }

    #[test]
    fn recent_activity_summarizes_bash_and_read_tool_calls() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = dir.path().join("transcript.jsonl");
        let lines = vec![
            serde_json::json!({
                "type": "assistant",
                "message": {"content": [{"type": "tool_use", "name": "Bash", "input": {"command": "cargo test"}}]}
            }),
            serde_json::json!({
                "type": "assistant",
                "message": {"content": [{"type": "tool_use", "name": "Read", "input": {"file_path": "src/lib.rs"}}]}
            }),
        ];
        let contents = lines.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("\n");
        std::fs::write(&transcript, contents).unwrap();

        let activity = read_recent_activity(transcript.to_str().unwrap(), 30);
        assert!(activity.contains("Bash: cargo test"));
        assert!(activity.contains("Read: src/lib.rs"));
    }

    #[test]
    fn recent_activity_reports_missing_transcript() {
        let activity = read_recent_activity("/nonexistent/path.jsonl", 30);
        assert_eq!(activity, "(transcript not found)");
    }
}
