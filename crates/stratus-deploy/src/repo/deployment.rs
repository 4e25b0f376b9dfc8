//! Installation identity and last-deployed manifest fingerprint.

use std::sync::Arc;

use crate::error::DeployResult;
use crate::store::StateStore;

/// Repository for deployment-level pointers.
#[derive(Clone)]
pub struct DeploymentRepo {
    store: Arc<dyn StateStore>,
}

impl DeploymentRepo {
    pub(crate) fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Stable identifier of this installation.
    pub async fn installation_id(&self) -> DeployResult<String> {
        Ok(self.store.load().await?.installation_id)
    }

    /// SHA-256 of the manifest of the last successful deploy.
    pub async fn find_current_manifest_sha(&self) -> DeployResult<Option<String>> {
        Ok(self.store.load().await?.current_manifest_sha)
    }

    /// Record the manifest fingerprint of a successful deploy.
    pub async fn update_current_manifest_sha(&self, sha: &str) -> DeployResult<()> {
        let sha = sha.to_owned();
        super::update(self.store.as_ref(), |state| {
            state.current_manifest_sha = Some(sha);
            Ok(())
        })
        .await
    }

    /// Forget the manifest fingerprint, forcing the next deploy to run.
    pub async fn clear_current_manifest_sha(&self) -> DeployResult<()> {
        super::update(self.store.as_ref(), |state| {
            state.current_manifest_sha = None;
            Ok(())
        })
        .await
    }
}
