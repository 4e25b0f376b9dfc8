//! In-VM agent contract.
//!
//! The agent runs inside the deployed VM and performs job lifecycle and disk
//! operations on the orchestrator's behalf. [`HttpAgentClient`] speaks the
//! mbus HTTP protocol; [`MockAgent`] records calls for tests.

mod http;
mod mock;

pub use http::HttpAgentClient;
pub use mock::MockAgent;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

/// Result type alias for agent calls.
pub type AgentResult<T> = Result<T, AgentError>;

/// A failed agent call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("agent {method} failed: {message}")]
pub struct AgentError {
    /// Agent method that failed.
    pub method: String,
    pub message: String,
    /// Set when the agent's task was still running at the polling deadline.
    pub waited: Option<Duration>,
}

impl AgentError {
    #[must_use]
    pub fn new(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            message: message.into(),
            waited: None,
        }
    }

    /// A task that outlived its polling deadline. `message` is the last
    /// status observed.
    #[must_use]
    pub fn timeout(method: impl Into<String>, waited: Duration, message: impl Into<String>) -> Self {
        Self {
            waited: Some(waited),
            ..Self::new(method, message)
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        self.waited.is_some()
    }
}

/// Job state reported by `get_state`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentState {
    pub job_state: String,
}

impl AgentState {
    #[must_use]
    pub fn new(job_state: impl Into<String>) -> Self {
        Self {
            job_state: job_state.into(),
        }
    }

    /// Whether every job on the VM reports running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.job_state == "running"
    }
}

/// Operations offered by the agent inside the deployed VM.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Liveness check.
    async fn ping(&self) -> AgentResult<()>;

    /// Stop every job.
    async fn stop(&self) -> AgentResult<()>;

    /// Start every job.
    async fn start(&self) -> AgentResult<()>;

    /// Apply a job spec.
    async fn apply(&self, spec: &serde_json::Value) -> AgentResult<()>;

    async fn get_state(&self) -> AgentResult<AgentState>;

    /// Mount an attached persistent disk.
    async fn mount_disk(&self, disk_cid: &str) -> AgentResult<()>;

    async fn unmount_disk(&self, disk_cid: &str) -> AgentResult<()>;

    /// CIDs of the persistent disks the agent currently has mounted.
    async fn list_disk(&self) -> AgentResult<Vec<String>>;

    /// Copy the contents of the old persistent disk onto the newly mounted
    /// one.
    async fn migrate_disk(&self) -> AgentResult<()>;
}
