//! Stemcell bookkeeping.

use std::sync::Arc;

use crate::error::DeployResult;
use crate::store::StateStore;
use crate::types::{RecordId, StemcellRecord};

/// Repository for uploaded stemcells.
#[derive(Clone)]
pub struct StemcellRepo {
    store: Arc<dyn StateStore>,
}

impl StemcellRepo {
    pub(crate) fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// All uploaded stemcells.
    pub async fn all(&self) -> DeployResult<Vec<StemcellRecord>> {
        Ok(self.store.load().await?.stemcells)
    }

    /// Find an uploaded stemcell by name and version.
    pub async fn find(&self, name: &str, version: &str) -> DeployResult<Option<StemcellRecord>> {
        Ok(self
            .store
            .load()
            .await?
            .stemcells
            .into_iter()
            .find(|s| s.name == name && s.version == version))
    }

    /// The stemcell of the current deployment.
    pub async fn find_current(&self) -> DeployResult<Option<StemcellRecord>> {
        let state = self.store.load().await?;
        Ok(state.current_stemcell_id.and_then(|id| {
            state.stemcells.into_iter().find(|s| s.id == id)
        }))
    }

    /// Record an uploaded stemcell.
    pub async fn save(&self, name: &str, version: &str, cid: &str) -> DeployResult<StemcellRecord> {
        let record = StemcellRecord {
            id: RecordId::generate(),
            name: name.to_owned(),
            version: version.to_owned(),
            cid: cid.to_owned(),
        };

        let saved = record.clone();
        super::update(self.store.as_ref(), |state| {
            state.stemcells.push(saved);
            Ok(())
        })
        .await?;

        Ok(record)
    }

    /// Point the deployment at `id`.
    pub async fn update_current(&self, id: &RecordId) -> DeployResult<()> {
        let id = id.clone();
        super::update(self.store.as_ref(), |state| {
            state.current_stemcell_id = Some(id);
            Ok(())
        })
        .await
    }

    /// Remove a record, clearing the current pointer if it referenced it.
    pub async fn delete(&self, id: &RecordId) -> DeployResult<()> {
        let id = id.clone();
        super::update(self.store.as_ref(), |state| {
            state.stemcells.retain(|s| s.id != id);
            if state.current_stemcell_id.as_ref() == Some(&id) {
                state.current_stemcell_id = None;
            }
            Ok(())
        })
        .await
    }
}
