//! Release identity bookkeeping.

use std::sync::Arc;

use crate::error::DeployResult;
use crate::store::StateStore;
use crate::types::{RecordId, ReleaseRecord};

/// Repository for releases referenced by deploys.
#[derive(Clone)]
pub struct ReleaseRepo {
    store: Arc<dyn StateStore>,
}

impl ReleaseRepo {
    pub(crate) fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// All known releases.
    pub async fn all(&self) -> DeployResult<Vec<ReleaseRecord>> {
        Ok(self.store.load().await?.releases)
    }

    /// Find the record for `name`/`version`, creating it if needed.
    pub async fn find_or_create(&self, name: &str, version: &str) -> DeployResult<ReleaseRecord> {
        let (name, version) = (name.to_owned(), version.to_owned());
        super::update(self.store.as_ref(), |state| {
            if let Some(existing) = state
                .releases
                .iter()
                .find(|r| r.name == name && r.version == version)
            {
                return Ok(existing.clone());
            }

            let record = ReleaseRecord {
                id: RecordId::generate(),
                name,
                version,
            };
            state.releases.push(record.clone());
            Ok(record)
        })
        .await
    }

    /// Releases used by the last successful deploy.
    pub async fn find_current(&self) -> DeployResult<Vec<ReleaseRecord>> {
        let state = self.store.load().await?;
        Ok(state
            .current_release_ids
            .iter()
            .filter_map(|id| state.releases.iter().find(|r| &r.id == id).cloned())
            .collect())
    }

    /// Replace the set of current releases. Releases no longer current are
    /// dropped from the document.
    pub async fn update_current(&self, ids: Vec<RecordId>) -> DeployResult<()> {
        super::update(self.store.as_ref(), |state| {
            state.releases.retain(|r| ids.contains(&r.id));
            state.current_release_ids = ids;
            Ok(())
        })
        .await
    }
}
