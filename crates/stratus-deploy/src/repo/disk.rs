//! Persistent disk bookkeeping.

use std::sync::Arc;

use crate::error::{DeployError, DeployResult};
use crate::store::StateStore;
use crate::types::{DiskRecord, Properties, RecordId};

/// Repository for persistent disk records.
///
/// At most one record is current once a deploy has converged. Non-current
/// records are leftovers of interrupted migrations and are always safe to
/// delete.
#[derive(Clone)]
pub struct DiskRepo {
    store: Arc<dyn StateStore>,
}

impl DiskRepo {
    pub(crate) fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// All disk records, current or not.
    pub async fn all(&self) -> DeployResult<Vec<DiskRecord>> {
        Ok(self.store.load().await?.disks)
    }

    /// The current disk, if any.
    pub async fn find_current(&self) -> DeployResult<Option<DiskRecord>> {
        Ok(self
            .store
            .load()
            .await?
            .disks
            .into_iter()
            .find(|d| d.current))
    }

    /// Records that are not current.
    pub async fn find_orphans(&self) -> DeployResult<Vec<DiskRecord>> {
        Ok(self
            .store
            .load()
            .await?
            .disks
            .into_iter()
            .filter(|d| !d.current)
            .collect())
    }

    /// Record a freshly created disk. The record starts out non-current and
    /// unattached.
    pub async fn save(
        &self,
        cid: &str,
        size: u64,
        cloud_properties: &Properties,
    ) -> DeployResult<DiskRecord> {
        let record = DiskRecord {
            id: RecordId::generate(),
            cid: cid.to_owned(),
            size,
            cloud_properties: cloud_properties.clone(),
            current: false,
            vm_cid: None,
        };

        let saved = record.clone();
        super::update(self.store.as_ref(), |state| {
            state.disks.push(saved);
            Ok(())
        })
        .await?;

        Ok(record)
    }

    /// Record which VM the disk is attached to (`None` once detached).
    pub async fn set_vm(&self, id: &RecordId, vm_cid: Option<&str>) -> DeployResult<DiskRecord> {
        let id = id.clone();
        let vm_cid = vm_cid.map(ToOwned::to_owned);
        super::update(self.store.as_ref(), |state| {
            let disk = state
                .disks
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| DeployError::state(format!("disk record {id} not found")))?;
            disk.vm_cid = vm_cid;
            Ok(disk.clone())
        })
        .await
    }

    /// Make `id` the current disk. Every other record loses the flag in the
    /// same save and becomes an orphan.
    pub async fn update_current(&self, id: &RecordId) -> DeployResult<DiskRecord> {
        let id = id.clone();
        super::update(self.store.as_ref(), |state| {
            if !state.disks.iter().any(|d| d.id == id) {
                return Err(DeployError::state(format!("disk record {id} not found")));
            }

            for disk in &mut state.disks {
                disk.current = disk.id == id;
            }

            state
                .disks
                .iter()
                .find(|d| d.id == id)
                .cloned()
                .ok_or_else(|| DeployError::state(format!("disk record {id} not found")))
        })
        .await
    }

    /// Remove a record. Removing an unknown record is not an error.
    pub async fn delete(&self, id: &RecordId) -> DeployResult<()> {
        let id = id.clone();
        super::update(self.store.as_ref(), |state| {
            state.disks.retain(|d| d.id != id);
            Ok(())
        })
        .await
    }
}
