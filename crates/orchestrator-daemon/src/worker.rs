//! Worker Loop: one persistent task per project, serially draining that
//! project's job queue. Grounded in the pop/execute/sleep cycle the job
//! queue's own docstring describes and in `original_source/agent/messenger.py`'s
//! `BackgroundTask` for the ack-watchdog-alongside-work shape; the steering
//! drain and auto-continue wiring follow spec §4.6 directly since the
//! source spreads that logic across several bridge handler functions this
//! crate collapses into one place.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use orchestrator_core::{
    AgentRunnerError, BranchCoordinator, CoachContext, Job, OrchestratorConfig, OutputType,
    ProjectConfig, SharedJobStore, SteeringQueue,
};

use crate::agent_runner::RunOutcome;
use crate::bridge::{self, Reactor, Responder, Sender};
use crate::messenger::{AckWatchdog, MessageType, Messenger};

/// Runs one session's agent turn to completion. The real implementation
/// spawns the subprocess and drives `run_to_completion`; tests substitute a
/// fake that returns canned output without touching a child process.
#[async_trait]
pub trait AgentSessionFactory: Send + Sync {
    async fn run_session(
        &self,
        session_id: &str,
        working_dir: &Path,
        prompt: &str,
    ) -> Result<RunOutcome, AgentRunnerError>;
}

/// Tracks each project's worker task so the Health Monitor can ask whether
/// a project currently has a live worker.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    handles: Arc<std::sync::Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, project_key: &str, handle: JoinHandle<()>) {
        self.handles.lock().unwrap().insert(project_key.to_string(), handle);
    }
}

impl orchestrator_core::WorkerLiveness for WorkerRegistry {
    fn is_alive(&self, project_key: &str) -> bool {
        self.handles
            .lock()
            .unwrap()
            .get(project_key)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

/// Everything one project's worker needs, bundled so `main.rs` only
/// constructs this once per project and hands it to `run_worker_loop`.
pub struct WorkerContext {
    pub project: ProjectConfig,
    pub job_store: SharedJobStore,
    pub steering: Arc<SteeringQueue>,
    pub config: Arc<OrchestratorConfig>,
    pub branch: Arc<BranchCoordinator>,
    pub agent_sessions: Arc<dyn AgentSessionFactory>,
    pub sender: Arc<dyn Sender>,
    pub reactor: Arc<dyn Reactor>,
    pub responder: Arc<dyn Responder>,
    pub classifier: Arc<dyn orchestrator_core::ClassifierClient>,
    pub summarizer_primary: Arc<dyn orchestrator_core::SummarizerClient>,
    pub summarizer_fallback: Arc<dyn orchestrator_core::SummarizerClient>,
    pub idle_poll: Duration,
}

/// The persistent per-project loop: pop, execute, repeat; sleep and recheck
/// when the queue is empty. Runs until the process exits — there is no
/// normal-path termination, matching the source's long-running worker
/// coroutines.
pub async fn run_worker_loop(ctx: Arc<WorkerContext>) {
    loop {
        let job = match ctx.job_store.pop(&ctx.project.project_key) {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::time::sleep(ctx.idle_poll).await;
                continue;
            }
            Err(e) => {
                tracing::error!(project = %ctx.project.project_key, error = %e, "job store pop failed");
                tokio::time::sleep(ctx.idle_poll).await;
                continue;
            }
        };

        if let Err(e) = execute_job(&ctx, job).await {
            tracing::error!(project = %ctx.project.project_key, error = %e, "job execution failed");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Branch(#[from] orchestrator_core::BranchError),
    #[error(transparent)]
    JobStore(#[from] orchestrator_core::JobStoreError),
    #[error(transparent)]
    Steering(#[from] orchestrator_core::SteeringError),
    #[error(transparent)]
    AgentRunner(#[from] AgentRunnerError),
}

/// Run one job to a terminal outcome: checkout its session branch, run the
/// agent, route the result through the output pipeline, and either
/// deliver or enqueue a continuation.
async fn execute_job(ctx: &WorkerContext, job: Job) -> Result<(), ExecuteError> {
    let working_dir = Path::new(&job.working_dir);
    let branch_name = BranchCoordinator::session_branch_name(&job.session_id);
    ctx.branch.checkout_session_branch(working_dir, &branch_name)?;

    let messenger = Arc::new(Messenger::new(
        ctx.sender.clone(),
        job.chat_id.clone(),
        job.session_id.clone(),
        Some(job.message_id),
    ));
    ctx.reactor
        .set_reaction(&job.chat_id, job.message_id, Some(bridge::REACTION_WORKING))
        .await;

    let watchdog = AckWatchdog::spawn(
        messenger.clone(),
        ctx.config.acknowledgment_timeout,
        "I'm working on this.".to_string(),
    );

    let prompt = if let Some(revival_context) = &job.revival_context {
        format!("{revival_context}\n\n{}", job.message_text)
    } else {
        job.message_text.clone()
    };

    let outcome = ctx
        .agent_sessions
        .run_session(&job.session_id, working_dir, &prompt)
        .await;
    watchdog.cancel();

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(session = %job.session_id, error = %e, "agent session failed");
            messenger
                .send(&format!("I encountered an error: {}", truncate(&e.to_string(), 200)), MessageType::Error)
                .await;
            ctx.reactor
                .set_reaction(&job.chat_id, job.message_id, Some(bridge::REACTION_ERROR))
                .await;

            drain_leftover_steering(&ctx.steering, &job.session_id)?;
            let merged = ctx
                .branch
                .finish_branch(working_dir, &branch_name, ctx.project.auto_merge)
                .unwrap_or(false);
            if !merged {
                tracing::warn!(session = %job.session_id, branch = %branch_name, "merge conflict, branch left intact");
            }

            ctx.job_store.fail(job)?;
            return Ok(());
        }
    };

    drain_leftover_steering(&ctx.steering, &job.session_id)?;

    let summarized = orchestrator_core::summarize_response(
        &outcome.text,
        &ctx.config,
        ctx.summarizer_primary.as_ref(),
        ctx.summarizer_fallback.as_ref(),
    )
    .await;
    let classification = orchestrator_core::output::classifier::classify(
        &outcome.text,
        &summarized.artifacts,
        ctx.classifier.as_ref(),
    )
    .await
    .unwrap_or_else(|e| {
        tracing::warn!(session = %job.session_id, error = %e, "classifier failed, defaulting to completion");
        orchestrator_core::ClassificationResult {
            output_type: OutputType::Completion,
            confidence: 0.0,
            reason: "classifier unavailable".to_string(),
            was_rejected_completion: false,
        }
    });

    let state = ctx.branch.get_state(working_dir)?;
    let active_plan_contents = state
        .active_plan
        .as_ref()
        .and_then(|p| std::fs::read_to_string(p).ok());
    let active_plan_path = state.active_plan.as_ref().and_then(|p| p.to_str().map(str::to_string));
    let coach_ctx = CoachContext {
        was_rejected_completion: classification.was_rejected_completion,
        active_plan_contents: active_plan_contents.as_deref(),
        active_plan_path: active_plan_path.as_deref(),
        original_message_text: &job.message_text,
    };

    let decision = orchestrator_core::decide_auto_continue(
        &classification,
        &summarized,
        job.auto_continue_count,
        ctx.config.max_auto_continues,
        &coach_ctx,
    );

    match decision {
        orchestrator_core::AutoContinueDecision::AutoContinue { coached_prompt, next_count } => {
            let mut continuation = orchestrator_core::NewJob::fresh(
                job.project_key.clone(),
                job.session_id.clone(),
                job.working_dir.clone(),
                coached_prompt,
                job.sender_name.clone(),
                job.chat_id.clone(),
                job.message_id,
            );
            continuation.chat_title = job.chat_title.clone();
            continuation.priority = orchestrator_core::Priority::Low;
            continuation.auto_continue_count = next_count;
            ctx.job_store.push(continuation)?;
            ctx.job_store.complete(job)?;
        }
        orchestrator_core::AutoContinueDecision::Deliver { text, file_attachment } => {
            let merged = ctx
                .branch
                .finish_branch(working_dir, &branch_name, ctx.project.auto_merge)
                .unwrap_or(false);
            if !merged {
                tracing::warn!(session = %job.session_id, branch = %branch_name, "merge conflict, branch left intact");
            }

            let reaction = if matches!(classification.output_type, OutputType::Error) {
                bridge::REACTION_ERROR
            } else {
                bridge::REACTION_SUCCESS
            };

            if let Some(path) = &file_attachment {
                ctx.responder
                    .respond_with_files(&text, &job.chat_id, job.message_id, Some(path))
                    .await;
            } else {
                messenger.send(&text, MessageType::Result).await;
            }
            ctx.reactor.set_reaction(&job.chat_id, job.message_id, Some(reaction)).await;
            ctx.job_store.complete(job)?;
        }
    }

    Ok(())
}

/// Any steering messages still queued after the agent finished are stale —
/// there is no one left to receive them. Logged, not silently dropped.
fn drain_leftover_steering(
    steering: &SteeringQueue,
    session_id: &str,
) -> Result<(), orchestrator_core::SteeringError> {
    let leftover = steering.pop_all(session_id)?;
    if !leftover.is_empty() {
        tracing::warn!(session_id, count = leftover.len(), "discarding steering messages left after session ended");
    }
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}
