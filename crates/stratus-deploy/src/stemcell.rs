//! Stemcell upload and clean-up.

use std::sync::Arc;

use tracing::info;

use crate::cloud::Cloud;
use crate::error::DeployResult;
use crate::manifest::StemcellRef;
use crate::repo::StemcellRepo;
use crate::types::StemcellRecord;

/// Uploads stemcells once and deletes the ones nothing uses any more.
#[derive(Clone)]
pub struct StemcellManager {
    cloud: Arc<dyn Cloud>,
    stemcells: StemcellRepo,
}

impl StemcellManager {
    pub fn new(cloud: Arc<dyn Cloud>, stemcells: StemcellRepo) -> Self {
        Self { cloud, stemcells }
    }

    /// Upload `stemcell` unless one with the same name and version already
    /// exists.
    ///
    /// The current stemcell pointer is part of the deploy fingerprint and is
    /// only moved by [`DeploymentRecord::update`](crate::record::DeploymentRecord::update).
    pub async fn upload(&self, stemcell: &StemcellRef) -> DeployResult<StemcellRecord> {
        let record = match self.stemcells.find(&stemcell.name, &stemcell.version).await? {
            Some(existing) => {
                info!(
                    name = %existing.name,
                    version = %existing.version,
                    stemcell_cid = %existing.cid,
                    "stemcell already uploaded"
                );
                existing
            }
            None => {
                let cid = self
                    .cloud
                    .create_stemcell(&stemcell.image_path, &stemcell.cloud_properties)
                    .await?;
                let record = self
                    .stemcells
                    .save(&stemcell.name, &stemcell.version, &cid)
                    .await?;
                info!(
                    name = %record.name,
                    version = %record.version,
                    stemcell_cid = %record.cid,
                    "stemcell uploaded"
                );
                record
            }
        };

        Ok(record)
    }

    /// Delete every stemcell that is neither current nor backing the VM
    /// booted from `in_use_cid`.
    pub async fn delete_unused(&self, in_use_cid: Option<&str>) -> DeployResult<()> {
        let current = self.stemcells.find_current().await?.map(|s| s.id);

        for stemcell in self.stemcells.all().await? {
            if Some(&stemcell.id) == current.as_ref() || Some(stemcell.cid.as_str()) == in_use_cid {
                continue;
            }
            self.delete(&stemcell).await?;
        }
        Ok(())
    }

    /// Delete every uploaded stemcell.
    pub async fn delete_all(&self) -> DeployResult<()> {
        for stemcell in self.stemcells.all().await? {
            self.delete(&stemcell).await?;
        }
        Ok(())
    }

    async fn delete(&self, stemcell: &StemcellRecord) -> DeployResult<()> {
        info!(
            name = %stemcell.name,
            version = %stemcell.version,
            stemcell_cid = %stemcell.cid,
            "deleting stemcell"
        );
        self.cloud.delete_stemcell(&stemcell.cid).await?;
        self.stemcells.delete(&stemcell.id).await
    }
}

impl std::fmt::Debug for StemcellManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StemcellManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::cloud::MockCloud;
    use crate::repo::Repositories;
    use crate::store::MemoryStateStore;
    use crate::types::Properties;

    fn stemcell(version: &str) -> StemcellRef {
        StemcellRef {
            name: "ubuntu-jammy".to_owned(),
            version: version.to_owned(),
            image_path: PathBuf::from(format!("stemcell-{version}.tgz")),
            cloud_properties: Properties::new(),
        }
    }

    fn manager() -> (Arc<MockCloud>, StemcellRepo, StemcellManager) {
        let cloud = Arc::new(MockCloud::new());
        let repo = Repositories::new(Arc::new(MemoryStateStore::new())).stemcell;
        let manager = StemcellManager::new(cloud.clone(), repo.clone());
        (cloud, repo, manager)
    }

    #[tokio::test]
    async fn uploads_once_per_name_and_version() {
        let (cloud, repo, manager) = manager();

        let first = manager.upload(&stemcell("1.0")).await.unwrap();
        let again = manager.upload(&stemcell("1.0")).await.unwrap();

        assert_eq!(first, again);
        assert_eq!(cloud.log().methods(), vec!["create_stemcell"]);
        assert!(repo.find_current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_unused_keeps_current_and_in_use() {
        let (cloud, repo, manager) = manager();

        let old = manager.upload(&stemcell("1.0")).await.unwrap();
        let stale = manager.upload(&stemcell("1.1")).await.unwrap();
        let current = manager.upload(&stemcell("2.0")).await.unwrap();
        repo.update_current(&current.id).await.unwrap();
        cloud.log().clear();

        manager.delete_unused(Some(&old.cid)).await.unwrap();

        assert_eq!(cloud.log().methods(), vec!["delete_stemcell"]);
        assert_eq!(cloud.stemcells(), vec![old.cid.clone(), current.cid.clone()]);
        assert!(repo.find("ubuntu-jammy", "1.1").await.unwrap().is_none());
        assert_ne!(stale.cid, current.cid);
    }

    #[tokio::test]
    async fn delete_all_clears_current() {
        let (cloud, repo, manager) = manager();
        let uploaded = manager.upload(&stemcell("1.0")).await.unwrap();
        repo.update_current(&uploaded.id).await.unwrap();

        manager.delete_all().await.unwrap();

        assert!(cloud.stemcells().is_empty());
        assert!(repo.find_current().await.unwrap().is_none());
    }
}
