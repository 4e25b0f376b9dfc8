//! Deployment state storage backends.
//!
//! The whole deployment state is one document. The primary implementation
//! keeps it in a JSON file next to the manifest; an in-memory implementation
//! is provided for testing.

mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use async_trait::async_trait;

use crate::error::DeployResult;
use crate::types::DeploymentState;

/// Backend for loading and saving the deployment state document.
///
/// `save` must be atomic: after a crash the document is either the old or
/// the new version, never a mix. Repositories call `save` after every
/// mutation, so a retry always resumes from the last completed step.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the current state.
    ///
    /// When nothing has been stored yet a fresh [`DeploymentState`] is
    /// created, persisted, and returned, so the installation ID is stable
    /// from the first load on.
    async fn load(&self) -> DeployResult<DeploymentState>;

    /// Replace the stored state.
    async fn save(&self, state: &DeploymentState) -> DeployResult<()>;
}
