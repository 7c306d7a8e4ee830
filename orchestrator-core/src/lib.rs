//! Orchestrator core library.
//!
//! Holds the parts of the multi-project agent orchestrator that don't
//! themselves spawn a subprocess or own a CLI: the persistent Job Store,
//! the per-session Steering Queue, the git-backed Branch Coordinator, the
//! Output Pipeline (summarization, classification, coaching), the Health
//! Monitor's recovery sweep, and the Revival Detector. The daemon binary
//! (`orchestrator-daemon`) wires these together with the Agent Runner and
//! Worker Loop.

#![allow(dead_code)]

pub mod branch;
pub mod config;
pub mod error;
pub mod health;
pub mod job;
pub mod job_store;
pub mod output;
pub mod revival;
pub mod steering;

pub use branch::{BranchCoordinator, BranchState, CompletionReport, WorkPlan, WorkStatus};
pub use config::{OrchestratorConfig, ProjectConfig, ProjectRegistry};
pub use error::{
    AgentRunnerError, BranchError, JobStoreError, OrchestratorError, OrchestratorResult,
    OutputPipelineError, SteeringError, StructuredError,
};
pub use health::{HealthMonitor, WorkerLiveness};
pub use job::{Job, JobStatus, NewJob, Priority};
pub use job_store::{JobStore, SharedJobStore};
pub use output::{
    build_coaching_message, decide_auto_continue, summarize_response, Artifacts,
    AutoContinueDecision, ClassificationResult, ClassifierClient, CoachContext, OutputType,
    SummarizedResponse, SummarizerClient,
};
pub use revival::{RevivalDetector, RevivalInfo, RevivalNotification};
pub use steering::{SteeringMessage, SteeringQueue};
