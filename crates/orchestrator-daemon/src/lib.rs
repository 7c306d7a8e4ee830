//! Orchestrator daemon: the subprocess-owning half of the multi-project
//! agent orchestrator. Wires `orchestrator_core`'s stores and pipelines to
//! a real coding-agent subprocess per session, a bridge into a chat
//! platform, and an admin CLI.

#![allow(dead_code)]

pub mod agent_runner;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod messenger;
pub mod worker;

pub use agent_runner::{AgentControl, AgentRunner, HealthJudge, HttpHealthJudge, RunnerRegistry};
pub use bridge::{Reactor, Responder, Sender};
pub use config::DaemonConfig;
pub use messenger::{AckWatchdog, Messenger};
pub use worker::{run_worker_loop, AgentSessionFactory, WorkerContext, WorkerRegistry};
