//! VM lifecycle.
//!
//! The VM is recreated when [`needs_recreate`] says so, or when the cloud no
//! longer has the recorded VM. Creation is
//! write-ahead: the record is persisted as soon as the cloud returns a CID,
//! before the agent is known to be reachable, so a failed or interrupted run
//! never leaks an untracked VM.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::AgentClient;
use crate::cloud::Cloud;
use crate::error::DeployResult;
use crate::manifest::Manifest;
use crate::poll::{self, Attempt, PollPolicy};
use crate::repo::{DeploymentRepo, VmRepo};
use crate::types::VmRecord;

/// Why the current VM cannot be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateReason {
    /// No VM is recorded.
    Missing,
    /// The VM was booted from a different stemcell.
    StemcellChanged,
    /// Cloud properties, networks or env changed.
    ConfigChanged,
}

/// Decide whether the VM has to be (re)created.
///
/// Returns `None` when `current` can be reused as is.
#[must_use]
pub fn needs_recreate(
    current: Option<&VmRecord>,
    stemcell_cid: &str,
    config_hash: &str,
) -> Option<RecreateReason> {
    match current {
        None => Some(RecreateReason::Missing),
        Some(vm) if vm.stemcell_cid != stemcell_cid => Some(RecreateReason::StemcellChanged),
        Some(vm) if vm.config_hash != config_hash => Some(RecreateReason::ConfigChanged),
        Some(_) => None,
    }
}

/// The VM a deploy continues with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredVm {
    pub record: VmRecord,
    /// Whether the VM was created by this call.
    pub created: bool,
}

/// Creates, reuses and deletes the deployment's VM.
#[derive(Clone)]
pub struct VmManager {
    cloud: Arc<dyn Cloud>,
    agent: Arc<dyn AgentClient>,
    vms: VmRepo,
    deployment: DeploymentRepo,
    ping_policy: PollPolicy,
}

impl VmManager {
    pub fn new(
        cloud: Arc<dyn Cloud>,
        agent: Arc<dyn AgentClient>,
        vms: VmRepo,
        deployment: DeploymentRepo,
        ping_policy: PollPolicy,
    ) -> Self {
        Self {
            cloud,
            agent,
            vms,
            deployment,
            ping_policy,
        }
    }

    /// Make sure a VM matching `manifest` and booted from `stemcell_cid`
    /// exists and its agent answers.
    pub async fn ensure_vm(&self, stemcell_cid: &str, manifest: &Manifest) -> DeployResult<EnsuredVm> {
        let config_hash = manifest.vm_config_hash()?;
        let current = self.vms.find_current().await?;

        match (needs_recreate(current.as_ref(), stemcell_cid, &config_hash), current) {
            (None, Some(record)) => {
                if self.cloud.has_vm(&record.cid).await? {
                    info!(vm_cid = %record.cid, "reusing existing VM");
                    self.wait_for_agent().await?;
                    return Ok(EnsuredVm {
                        record,
                        created: false,
                    });
                }
                warn!(vm_cid = %record.cid, "recorded VM no longer exists, recreating");
                self.teardown(&record, false).await?;
            }
            (reason, Some(old)) => {
                info!(vm_cid = %old.cid, reason = ?reason, "replacing VM");
                self.delete_vm(&old).await?;
            }
            (_, None) => {}
        }

        let agent_id = self.deployment.installation_id().await?;
        let cid = self
            .cloud
            .create_vm(
                &agent_id,
                stemcell_cid,
                &manifest.cloud_properties,
                &manifest.networks,
                &manifest.env,
            )
            .await?;

        let record = VmRecord {
            cid,
            stemcell_cid: stemcell_cid.to_owned(),
            config_hash,
        };
        self.vms.update_current(record.clone()).await?;
        info!(vm_cid = %record.cid, stemcell_cid = %stemcell_cid, "VM created");

        self.wait_for_agent().await?;

        Ok(EnsuredVm {
            record,
            created: true,
        })
    }

    /// Tear down `record` and forget it.
    ///
    /// A VM the cloud still knows about is shut down gracefully through its
    /// agent first. A VM that is already gone is never contacted through the
    /// agent. The record is cleared only once the cloud deletion succeeded.
    /// Deleting a VM the cloud no longer has is expected to succeed.
    pub async fn delete_vm(&self, record: &VmRecord) -> DeployResult<()> {
        let exists = self.cloud.has_vm(&record.cid).await?;
        self.teardown(record, exists).await
    }

    async fn teardown(&self, record: &VmRecord, exists: bool) -> DeployResult<()> {
        if exists {
            self.shutdown(record).await?;
        } else {
            warn!(vm_cid = %record.cid, "VM no longer exists, skipping agent shutdown");
        }

        self.cloud.delete_vm(&record.cid).await?;
        self.vms.clear_current().await?;

        info!(vm_cid = %record.cid, "VM deleted");
        Ok(())
    }

    /// Stop jobs and unmount every disk the agent reports.
    async fn shutdown(&self, record: &VmRecord) -> DeployResult<()> {
        debug!(vm_cid = %record.cid, "shutting down VM through its agent");

        self.wait_for_agent().await?;
        self.agent.stop().await?;

        for disk_cid in self.agent.list_disk().await? {
            debug!(vm_cid = %record.cid, disk_cid = %disk_cid, "unmounting disk");
            self.agent.unmount_disk(&disk_cid).await?;
        }

        Ok(())
    }

    /// Ping the agent until it answers or the ping deadline passes.
    pub async fn wait_for_agent(&self) -> DeployResult<()> {
        poll::until("agent ping", self.ping_policy, || async {
            Ok(match self.agent.ping().await {
                Ok(()) => Attempt::Ready(()),
                Err(e) => Attempt::Pending(e.to_string()),
            })
        })
        .await
    }
}

impl std::fmt::Debug for VmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmManager")
            .field("ping_policy", &self.ping_policy)
            .finish_non_exhaustive()
    }
}
