//! Persistent disk lifecycle and migration.
//!
//! A deploy converges on exactly one current disk of the requested size.
//! Resizing never touches the old disk's contents in place: a new disk is
//! created, attached, mounted and filled by the agent. The current flag
//! moves over as soon as the data has been copied, and the old disk is
//! only detached and deleted after that.
//!
//! ```text
//! create new ─▶ attach new ─▶ mount new ─▶ migrate ─▶ promote new ─▶ detach old ─▶ delete old
//!                                             │
//!                                             └─ failure: old stays current, new is an orphan
//! ```
//!
//! Orphans (non-current records) are removed at the start of every deploy.
//! Every step above leaves either the old or the new disk current, so a run
//! interrupted anywhere converges on the next deploy without losing data.

use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::AgentClient;
use crate::cloud::Cloud;
use crate::error::{DeployError, DeployResult};
use crate::repo::DiskRepo;
use crate::types::{DiskRecord, Properties};

/// Creates, migrates and reconciles persistent disks.
#[derive(Clone)]
pub struct DiskManager {
    cloud: Arc<dyn Cloud>,
    agent: Arc<dyn AgentClient>,
    disks: DiskRepo,
}

impl DiskManager {
    pub fn new(cloud: Arc<dyn Cloud>, agent: Arc<dyn AgentClient>, disks: DiskRepo) -> Self {
        Self {
            cloud,
            agent,
            disks,
        }
    }

    /// Converge on one current disk of `desired_size` MiB attached to
    /// `vm_cid`.
    ///
    /// A `desired_size` of zero requests no persistent disk; an existing
    /// current disk is then left alone. Returns the current disk afterwards.
    pub async fn deploy_disk(
        &self,
        desired_size: u64,
        cloud_properties: &Properties,
        vm_cid: &str,
    ) -> DeployResult<Option<DiskRecord>> {
        self.reconcile_orphans(vm_cid).await?;

        let current = match self.disks.find_current().await? {
            Some(disk) if !disk.is_attached_to(vm_cid) => Some(self.reattach(disk, vm_cid).await?),
            other => other,
        };

        match current {
            None if desired_size == 0 => Ok(None),
            None => {
                let disk = self.create_and_mount(desired_size, cloud_properties, vm_cid).await?;
                let disk = self.disks.update_current(&disk.id).await?;
                info!(disk_cid = %disk.cid, size = disk.size, "persistent disk created");
                Ok(Some(disk))
            }
            Some(disk) if desired_size == 0 || disk.size == desired_size => {
                info!(disk_cid = %disk.cid, size = disk.size, "reusing persistent disk");
                Ok(Some(disk))
            }
            Some(old) => self
                .migrate(old, desired_size, cloud_properties, vm_cid)
                .await
                .map(Some),
        }
    }

    /// Delete every non-current disk from the cloud and forget it.
    ///
    /// An orphan still attached to `vm_cid` is unmounted and detached first.
    pub async fn reconcile_orphans(&self, vm_cid: &str) -> DeployResult<()> {
        for orphan in self.disks.find_orphans().await? {
            warn!(disk_cid = %orphan.cid, size = orphan.size, "deleting orphaned disk");

            if orphan.is_attached_to(vm_cid) {
                self.agent.unmount_disk(&orphan.cid).await?;
            }
            self.discard(&orphan, vm_cid).await?;
        }
        Ok(())
    }

    /// Delete every recorded disk. Used when the VM is already gone.
    pub async fn delete_all(&self) -> DeployResult<()> {
        for disk in self.disks.all().await? {
            info!(disk_cid = %disk.cid, "deleting disk");
            self.cloud.delete_disk(&disk.cid).await?;
            self.disks.delete(&disk.id).await?;
        }
        Ok(())
    }

    /// Attach and mount a current disk left behind by a replaced VM.
    ///
    /// The new VM is only recorded once the disk is mounted, so an
    /// interrupted re-attach is repeated in full.
    async fn reattach(&self, disk: DiskRecord, vm_cid: &str) -> DeployResult<DiskRecord> {
        info!(disk_cid = %disk.cid, vm_cid = %vm_cid, "attaching disk to new VM");

        self.cloud.attach_disk(vm_cid, &disk.cid).await?;
        self.agent.mount_disk(&disk.cid).await?;
        self.disks.set_vm(&disk.id, Some(vm_cid)).await
    }

    /// Create a disk, record it as an orphan, attach it and mount it.
    ///
    /// Until the caller promotes it, a failure anywhere leaves a record the
    /// next deploy cleans up.
    async fn create_and_mount(
        &self,
        size: u64,
        cloud_properties: &Properties,
        vm_cid: &str,
    ) -> DeployResult<DiskRecord> {
        let cid = self.cloud.create_disk(size, cloud_properties, vm_cid).await?;
        let disk = self.disks.save(&cid, size, cloud_properties).await?;

        self.cloud.attach_disk(vm_cid, &disk.cid).await?;
        let disk = self.disks.set_vm(&disk.id, Some(vm_cid)).await?;
        self.agent.mount_disk(&disk.cid).await?;

        Ok(disk)
    }

    async fn migrate(
        &self,
        old: DiskRecord,
        size: u64,
        cloud_properties: &Properties,
        vm_cid: &str,
    ) -> DeployResult<DiskRecord> {
        info!(
            old_disk_cid = %old.cid,
            old_size = old.size,
            new_size = size,
            "migrating persistent disk"
        );

        let new = self.create_and_mount(size, cloud_properties, vm_cid).await?;

        self.agent
            .migrate_disk()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    return DeployError::from(e);
                }
                DeployError::Migration {
                    from: old.cid.clone(),
                    to: new.cid.clone(),
                    message: e.message,
                }
            })?;

        let promoted = self.disks.update_current(&new.id).await?;
        info!(disk_cid = %promoted.cid, size = promoted.size, "disk migration complete");

        self.discard(&old, vm_cid).await?;
        Ok(promoted)
    }

    /// Detach a non-current disk from `vm_cid` if it is recorded there, then
    /// delete it and its record.
    ///
    /// Each cloud call is followed by a save, so repeating this after a
    /// failure picks up where it stopped.
    async fn discard(&self, disk: &DiskRecord, vm_cid: &str) -> DeployResult<()> {
        if disk.is_attached_to(vm_cid) {
            self.cloud.detach_disk(vm_cid, &disk.cid).await?;
            self.disks.set_vm(&disk.id, None).await?;
        }

        self.cloud.delete_disk(&disk.cid).await?;
        self.disks.delete(&disk.id).await
    }
}

impl std::fmt::Debug for DiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskManager").finish_non_exhaustive()
    }
}
