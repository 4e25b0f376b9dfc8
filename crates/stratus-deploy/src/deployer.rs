//! Deploy sequencing.
//!
//! A deploy runs, in order:
//!
//! 1. manifest validation (nothing touches the cloud before this passes)
//! 2. up-to-date check against the recorded fingerprint
//! 3. registry start
//! 4. stemcell upload or reuse
//! 5. VM ensure
//! 6. disk deploy
//! 7. agent `stop`, `apply`, `start`
//! 8. `get_state` polling until jobs report running
//! 9. registry stop
//! 10. fingerprint record
//! 11. unused stemcell clean-up
//!
//! Any failure aborts the run and is returned as is. The registry is stopped
//! on every exit path; the fingerprint is only written after a full success,
//! so a failed run is always retried in full.

use std::sync::Arc;

use stratus_registry::{Credentials, RegistryConfig, RegistryServer};
use tracing::{error, info, warn};

use crate::agent::AgentClient;
use crate::cloud::Cloud;
use crate::config::DeployConfig;
use crate::disk::DiskManager;
use crate::error::DeployResult;
use crate::manifest::{Manifest, ReleaseRef, StemcellRef};
use crate::poll::{self, Attempt, PollPolicy};
use crate::record::DeploymentRecord;
use crate::repo::Repositories;
use crate::stemcell::StemcellManager;
use crate::store::StateStore;
use crate::types::{DiskRecord, StemcellRecord, VmRecord};
use crate::vm::VmManager;

/// Everything a deploy converges on.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployRequest {
    pub manifest: Manifest,
    pub stemcell: StemcellRef,
    pub releases: Vec<ReleaseRef>,
}

/// Whether a deploy did any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    /// The VM was converged.
    Deployed,
    /// Nothing changed since the last successful deploy.
    UpToDate,
}

/// What the deployment looks like after a deploy.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployReport {
    pub outcome: DeployOutcome,
    pub vm: Option<VmRecord>,
    pub disk: Option<DiskRecord>,
    pub stemcell: Option<StemcellRecord>,
}

/// Top-level deploy and delete sequencer.
pub struct Deployer {
    repos: Repositories,
    agent: Arc<dyn AgentClient>,
    vms: VmManager,
    disks: DiskManager,
    stemcells: StemcellManager,
    record: DeploymentRecord,
    running_policy: PollPolicy,
}

impl Deployer {
    pub fn new(
        store: Arc<dyn StateStore>,
        cloud: Arc<dyn Cloud>,
        agent: Arc<dyn AgentClient>,
        config: &DeployConfig,
    ) -> Self {
        let repos = Repositories::new(store);

        Self {
            vms: VmManager::new(
                Arc::clone(&cloud),
                Arc::clone(&agent),
                repos.vm.clone(),
                repos.deployment.clone(),
                config.ping_policy(),
            ),
            disks: DiskManager::new(Arc::clone(&cloud), Arc::clone(&agent), repos.disk.clone()),
            stemcells: StemcellManager::new(cloud, repos.stemcell.clone()),
            record: DeploymentRecord::new(repos.clone()),
            running_policy: config.running_policy(),
            agent,
            repos,
        }
    }

    /// Converge the deployment on `request`.
    pub async fn deploy(&self, request: &DeployRequest) -> DeployResult<DeployReport> {
        let manifest = &request.manifest;
        manifest.validate()?;

        if !self
            .record
            .needs_deploy(manifest, &request.stemcell, &request.releases)
            .await?
        {
            info!(deployment = %manifest.name, "deployment is up to date");
            return self.report(DeployOutcome::UpToDate).await;
        }

        info!(
            deployment = %manifest.name,
            stemcell = %request.stemcell.name,
            stemcell_version = %request.stemcell.version,
            "starting deploy"
        );

        let registry = start_registry(manifest).await?;
        let result = self.converge(request).await;
        let stemcell = finish(result, registry).await.inspect_err(|e| {
            error!(deployment = %manifest.name, error = %e, "deploy failed");
        })?;

        self.record
            .update(manifest, &stemcell, &request.releases)
            .await?;

        let vm = self.repos.vm.find_current().await?;
        self.stemcells
            .delete_unused(vm.as_ref().map(|vm| vm.stemcell_cid.as_str()))
            .await?;

        info!(deployment = %manifest.name, "deploy finished");
        self.report(DeployOutcome::Deployed).await
    }

    /// Tear the whole deployment down: VM, disks and stemcells.
    pub async fn delete(&self, manifest: &Manifest) -> DeployResult<()> {
        manifest.validate()?;
        info!(deployment = %manifest.name, "deleting deployment");

        let registry = start_registry(manifest).await?;
        let result = self.teardown().await;
        finish(result, registry).await.inspect_err(|e| {
            error!(deployment = %manifest.name, error = %e, "delete failed");
        })?;

        info!(deployment = %manifest.name, "deployment deleted");
        Ok(())
    }

    async fn converge(&self, request: &DeployRequest) -> DeployResult<StemcellRecord> {
        let manifest = &request.manifest;

        let stemcell = self.stemcells.upload(&request.stemcell).await?;
        let vm = self.vms.ensure_vm(&stemcell.cid, manifest).await?;
        self.disks
            .deploy_disk(
                manifest.persistent_disk,
                &manifest.disk_cloud_properties,
                &vm.record.cid,
            )
            .await?;

        info!(vm_cid = %vm.record.cid, "applying job spec");
        self.agent.stop().await?;
        self.agent.apply(&manifest.apply_spec).await?;
        self.agent.start().await?;
        self.wait_until_running().await?;

        Ok(stemcell)
    }

    async fn teardown(&self) -> DeployResult<()> {
        if let Some(vm) = self.repos.vm.find_current().await? {
            self.vms.delete_vm(&vm).await?;
        }
        self.disks.delete_all().await?;
        self.stemcells.delete_all().await?;
        self.record.clear().await
    }

    async fn wait_until_running(&self) -> DeployResult<()> {
        poll::until("jobs to be running", self.running_policy, || async {
            let state = self.agent.get_state().await?;
            Ok(if state.is_running() {
                Attempt::Ready(())
            } else {
                Attempt::Pending(format!("job state is '{}'", state.job_state))
            })
        })
        .await
    }

    async fn report(&self, outcome: DeployOutcome) -> DeployResult<DeployReport> {
        Ok(DeployReport {
            outcome,
            vm: self.repos.vm.find_current().await?,
            disk: self.repos.disk.find_current().await?,
            stemcell: self.repos.stemcell.find_current().await?,
        })
    }
}

impl std::fmt::Debug for Deployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployer")
            .field("running_policy", &self.running_policy)
            .finish_non_exhaustive()
    }
}

async fn start_registry(manifest: &Manifest) -> DeployResult<Option<RegistryServer>> {
    let Some(spec) = &manifest.registry else {
        return Ok(None);
    };

    let config = RegistryConfig::new(spec.listen_addr()?)
        .with_credentials(Credentials::new(&spec.username, &spec.password));
    Ok(Some(RegistryServer::start(config).await?))
}

/// Stop the registry and combine the outcome with the run's result.
///
/// The run's own error wins; a stop failure after a failed run is only
/// logged.
async fn finish<T>(result: DeployResult<T>, registry: Option<RegistryServer>) -> DeployResult<T> {
    let stopped = match registry {
        Some(server) => server.stop().await,
        None => Ok(()),
    };

    match (result, stopped) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(stop_error)) => {
            warn!(error = %stop_error, "failed to stop registry");
            Err(e)
        }
    }
}
