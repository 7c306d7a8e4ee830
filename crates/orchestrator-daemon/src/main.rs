//! Daemon entrypoint: wires every component together and either runs the
//! per-project worker loops or dispatches a one-shot admin command.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;

use orchestrator_core::{
    AgentRunnerError, BranchCoordinator, HealthMonitor, JobStore, OrchestratorConfig,
    ProjectRegistry, SteeringQueue,
};

use orchestrator_daemon::agent_runner::{
    run_to_completion, AgentControl, AgentRunner, HttpHealthJudge, RunnerRegistry, RunOutcome,
};
use orchestrator_daemon::bridge::{Reactor, Responder, Sender};
use orchestrator_daemon::cli::{self, AdminCommand};
use orchestrator_daemon::config::DaemonConfig;
use orchestrator_daemon::worker::{run_worker_loop, AgentSessionFactory, WorkerContext, WorkerRegistry};

#[derive(Parser, Debug)]
#[command(name = "orchestrator-daemon")]
struct Cli {
    #[command(subcommand)]
    admin: Option<AdminCommand>,
}

/// Real subprocess-backed agent session: spawns the coding agent, registers
/// it so the PostToolUse hook can reach it for steering/watchdog, and
/// unregisters on completion.
struct SubprocessAgentSessions {
    daemon_config: Arc<DaemonConfig>,
    orchestrator_config: Arc<OrchestratorConfig>,
    registry: Arc<RunnerRegistry>,
    steering: Arc<SteeringQueue>,
    system_prompt: String,
    judge: Arc<HttpHealthJudge>,
}

#[async_trait]
impl AgentSessionFactory for SubprocessAgentSessions {
    async fn run_session(
        &self,
        session_id: &str,
        working_dir: &Path,
        prompt: &str,
    ) -> Result<RunOutcome, AgentRunnerError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        let runner = Arc::new(
            AgentRunner::spawn(
                &self.daemon_config.agent_command,
                working_dir,
                session_id,
                &self.system_prompt,
                &api_key,
            )
            .await?,
        );
        self.registry.register(session_id, runner.clone()).await;
        runner.query(prompt).await?;

        let stdout = runner
            .take_stdout()
            .await
            .ok_or_else(|| AgentRunnerError::Spawn("missing stdout handle".to_string()))?;

        let outcome = run_to_completion(
            &runner,
            stdout,
            &self.registry,
            &self.steering,
            self.judge.as_ref(),
            self.orchestrator_config.watchdog_check_interval,
        )
        .await;

        self.registry.unregister(session_id).await;
        let _ = runner.wait().await;
        Ok(outcome)
    }
}

/// Placeholder bridge used until a real chat platform client is wired in:
/// logs instead of delivering. The actual platform integration is the
/// caller's responsibility, not this crate's.
struct LoggingBridge;

#[async_trait]
impl Sender for LoggingBridge {
    async fn send(&self, chat_id: &str, text: &str, reply_to_msg_id: Option<i64>) {
        tracing::info!(chat_id, reply_to_msg_id, "[bridge] {text}");
    }
}

#[async_trait]
impl Reactor for LoggingBridge {
    async fn set_reaction(&self, chat_id: &str, msg_id: i64, emoji: Option<&'static str>) {
        tracing::info!(chat_id, msg_id, ?emoji, "[bridge] reaction");
    }
}

#[async_trait]
impl Responder for LoggingBridge {
    async fn respond_with_files(&self, text: &str, chat_id: &str, msg_id: i64, file: Option<&Path>) {
        tracing::info!(chat_id, msg_id, ?file, "[bridge] {text}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let daemon_config = DaemonConfig::default();
    let registry = ProjectRegistry::load(&daemon_config.project_registry_path)?;
    let job_store = JobStore::open(&daemon_config.jobs_db_path)?;

    if let Some(admin) = cli.admin {
        return run_admin_command(admin, &job_store, &registry);
    }

    run_daemon(daemon_config, job_store, registry).await
}

fn run_admin_command(command: AdminCommand, job_store: &JobStore, registry: &ProjectRegistry) -> anyhow::Result<()> {
    match command {
        AdminCommand::Status => cli::run_status(job_store, registry),
        AdminCommand::FlushStuck => cli::run_flush_stuck(job_store, registry),
        AdminCommand::FlushJob { job_id } => cli::run_flush_job(job_store, &job_id)?,
    }
    Ok(())
}

async fn run_daemon(daemon_config: DaemonConfig, job_store: JobStore, registry: ProjectRegistry) -> anyhow::Result<()> {
    let orchestrator_config = Arc::new(OrchestratorConfig::default());
    let job_store = Arc::new(job_store);
    let steering = Arc::new(SteeringQueue::open(&daemon_config.steering_db_path)?);
    let branch = Arc::new(BranchCoordinator::new());
    let runner_registry = Arc::new(RunnerRegistry::new());
    let worker_registry = WorkerRegistry::new();

    for endpoint in [
        &orchestrator_config.classifier_endpoint,
        &orchestrator_config.summarizer_endpoint,
        &orchestrator_config.watchdog_endpoint,
    ] {
        if !orchestrator_daemon::config::check_endpoint(endpoint).await {
            tracing::warn!(endpoint, "endpoint unreachable at startup, continuing anyway");
        }
    }

    let classifier: Arc<dyn orchestrator_core::ClassifierClient> =
        Arc::new(orchestrator_core::output::classifier::HttpClassifierClient::new(
            orchestrator_config.classifier_endpoint.clone(),
        ));
    let summarizer_primary: Arc<dyn orchestrator_core::SummarizerClient> =
        Arc::new(orchestrator_core::output::summarizer::HttpSummarizerClient::new(
            orchestrator_config.summarizer_endpoint.clone(),
        ));
    let summarizer_fallback: Arc<dyn orchestrator_core::SummarizerClient> =
        Arc::new(orchestrator_core::output::summarizer::HttpSummarizerClient::new(
            orchestrator_config.summarizer_fallback_endpoint.clone(),
        ));
    let judge = Arc::new(HttpHealthJudge::new(orchestrator_config.watchdog_endpoint.clone()));
    let bridge = Arc::new(LoggingBridge);
    let system_prompt = daemon_config.load_system_prompt();
    let daemon_config = Arc::new(daemon_config);

    for project in registry.projects.clone() {
        job_store.reset_running(&project.project_key)?;

        let agent_sessions: Arc<dyn AgentSessionFactory> = Arc::new(SubprocessAgentSessions {
            daemon_config: daemon_config.clone(),
            orchestrator_config: orchestrator_config.clone(),
            registry: runner_registry.clone(),
            steering: steering.clone(),
            system_prompt: system_prompt.clone(),
            judge: judge.clone(),
        });

        let ctx = Arc::new(WorkerContext {
            project,
            job_store: job_store.clone(),
            steering: steering.clone(),
            config: orchestrator_config.clone(),
            branch: branch.clone(),
            agent_sessions,
            sender: bridge.clone(),
            reactor: bridge.clone(),
            responder: bridge.clone(),
            classifier: classifier.clone(),
            summarizer_primary: summarizer_primary.clone(),
            summarizer_fallback: summarizer_fallback.clone(),
            idle_poll: Duration::from_secs(daemon_config.worker_idle_poll_secs),
        });

        let project_key = ctx.project.project_key.clone();
        let handle = tokio::spawn(run_worker_loop(ctx));
        worker_registry.register(&project_key, handle);
    }

    let health_monitor = HealthMonitor::new(job_store.clone(), (*orchestrator_config).clone());
    let project_keys: HashSet<String> = registry.projects.iter().map(|p| p.project_key.clone()).collect();
    let check_interval = orchestrator_config.job_health_check_interval;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(check_interval).await;
            if let Err(e) = health_monitor.sweep(&project_keys, &worker_registry) {
                tracing::error!(error = %e, "health monitor sweep failed");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
