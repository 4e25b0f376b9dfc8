//! In-memory state store for testing.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{DeployError, DeployResult};
use crate::types::DeploymentState;

use super::StateStore;

/// In-memory state store for testing.
///
/// Data is lost when the process exits. Sharing one instance between two
/// deployers models a process restart against the same state file.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: RwLock<Option<DeploymentState>>,
}

impl MemoryStateStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with existing state.
    #[must_use]
    pub fn with_state(state: DeploymentState) -> Self {
        Self {
            state: RwLock::new(Some(state)),
        }
    }

    /// Snapshot of the stored state, if any was saved.
    pub fn snapshot(&self) -> DeployResult<Option<DeploymentState>> {
        let state = self
            .state
            .read()
            .map_err(|_| DeployError::state("lock poisoned"))?;
        Ok(state.clone())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> DeployResult<DeploymentState> {
        let mut state = self
            .state
            .write()
            .map_err(|_| DeployError::state("lock poisoned"))?;

        Ok(state.get_or_insert_with(DeploymentState::new).clone())
    }

    async fn save(&self, new_state: &DeploymentState) -> DeployResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| DeployError::state("lock poisoned"))?;

        *state = Some(new_state.clone());
        Ok(())
    }
}
