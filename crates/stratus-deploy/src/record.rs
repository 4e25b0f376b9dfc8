//! Fingerprint of the last successful deploy.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::DeployResult;
use crate::manifest::{Manifest, ReleaseRef, StemcellRef};
use crate::repo::Repositories;
use crate::types::StemcellRecord;

/// Decides whether a deploy has anything to do, and records what was
/// deployed once it succeeds.
///
/// A deploy is needed when the manifest, the set of releases or the stemcell
/// differ from what was last recorded.
#[derive(Debug, Clone)]
pub struct DeploymentRecord {
    repos: Repositories,
}

impl DeploymentRecord {
    #[must_use]
    pub const fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn needs_deploy(
        &self,
        manifest: &Manifest,
        stemcell: &StemcellRef,
        releases: &[ReleaseRef],
    ) -> DeployResult<bool> {
        let sha = manifest.sha()?;
        if self.repos.deployment.find_current_manifest_sha().await?.as_deref() != Some(sha.as_str()) {
            debug!(manifest_sha = %sha, "manifest changed");
            return Ok(true);
        }

        let stemcell_matches = self
            .repos
            .stemcell
            .find_current()
            .await?
            .is_some_and(|s| s.name == stemcell.name && s.version == stemcell.version);
        if !stemcell_matches {
            debug!(name = %stemcell.name, version = %stemcell.version, "stemcell changed");
            return Ok(true);
        }

        let recorded: BTreeSet<ReleaseRef> = self
            .repos
            .release
            .find_current()
            .await?
            .into_iter()
            .map(|r| ReleaseRef::new(r.name, r.version))
            .collect();
        let requested: BTreeSet<ReleaseRef> = releases.iter().cloned().collect();
        if recorded != requested {
            debug!("releases changed");
            return Ok(true);
        }

        Ok(false)
    }

    /// Record a successful deploy.
    pub async fn update(
        &self,
        manifest: &Manifest,
        stemcell: &StemcellRecord,
        releases: &[ReleaseRef],
    ) -> DeployResult<()> {
        let mut ids = Vec::with_capacity(releases.len());
        for release in releases {
            ids.push(
                self.repos
                    .release
                    .find_or_create(&release.name, &release.version)
                    .await?
                    .id,
            );
        }
        self.repos.release.update_current(ids).await?;
        self.repos.stemcell.update_current(&stemcell.id).await?;
        self.repos
            .deployment
            .update_current_manifest_sha(&manifest.sha()?)
            .await
    }

    /// Forget the fingerprint so the next deploy always runs.
    pub async fn clear(&self) -> DeployResult<()> {
        self.repos.release.update_current(Vec::new()).await?;
        self.repos.deployment.clear_current_manifest_sha().await
    }
}
