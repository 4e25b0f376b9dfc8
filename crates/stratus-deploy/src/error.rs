//! Error types for stratus-deploy.

use std::time::Duration;

use crate::agent::AgentError;
use crate::cloud::CloudError;

/// Result type alias using [`DeployError`].
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors that abort a deploy run.
///
/// Nothing inside the orchestrator swallows or retries these; recovery is
/// always a fresh run that resumes from the persisted state.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A cloud provider call failed.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// An agent call failed or reported an error.
    #[error(transparent)]
    Agent(AgentError),

    /// The agent could not move data onto the new persistent disk.
    #[error("migrating disk contents from '{from}' to '{to}' failed: {message}")]
    Migration {
        /// Disk being migrated away from.
        from: String,
        /// Disk receiving the data.
        to: String,
        /// Agent-reported failure.
        message: String,
    },

    /// A bounded wait ran past its deadline.
    #[error("timed out after {}s waiting for {operation}: {last_status}", waited.as_secs())]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// How long we waited.
        waited: Duration,
        /// The last observed status.
        last_status: String,
    },

    /// Missing or invalid configuration, detected before any cloud call.
    #[error("configuration error: {0}")]
    Config(String),

    /// The deployment state file could not be read or written.
    #[error("state error: {0}")]
    State(String),

    /// The bootstrap registry could not be started or stopped.
    #[error("registry error: {0}")]
    Registry(#[from] stratus_registry::RegistryError),
}

impl From<AgentError> for DeployError {
    fn from(err: AgentError) -> Self {
        match err.waited {
            Some(waited) => Self::Timeout {
                operation: format!("agent task {}", err.method),
                waited,
                last_status: err.message,
            },
            None => Self::Agent(err),
        }
    }
}

impl DeployError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a state persistence error.
    #[must_use]
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Whether this is a [`DeployError::Timeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_task_timeouts_become_timeouts() {
        let err = DeployError::from(AgentError::timeout(
            "apply",
            Duration::from_secs(600),
            "task 7 is running",
        ));

        match err {
            DeployError::Timeout {
                operation,
                waited,
                last_status,
            } => {
                assert_eq!(operation, "agent task apply");
                assert_eq!(waited, Duration::from_secs(600));
                assert_eq!(last_status, "task 7 is running");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn other_agent_failures_stay_agent_errors() {
        let err = DeployError::from(AgentError::new("apply", "bad spec"));
        assert!(matches!(err, DeployError::Agent(ref e) if e.message == "bad spec"));
    }
}
