//! Typed repositories over the deployment state document.
//!
//! Each repository owns one slice of [`DeploymentState`]. Every mutating
//! call loads the document, applies the change and saves it before
//! returning, so callers can rely on write-ahead ordering: once a repository
//! call has returned, the change survives a crash.

mod deployment;
mod disk;
mod release;
mod stemcell;
mod vm;

pub use deployment::DeploymentRepo;
pub use disk::DiskRepo;
pub use release::ReleaseRepo;
pub use stemcell::StemcellRepo;
pub use vm::VmRepo;

use std::sync::Arc;

use crate::error::DeployResult;
use crate::store::StateStore;
use crate::types::DeploymentState;

/// All repositories over one shared store.
#[derive(Clone)]
pub struct Repositories {
    pub vm: VmRepo,
    pub disk: DiskRepo,
    pub stemcell: StemcellRepo,
    pub release: ReleaseRepo,
    pub deployment: DeploymentRepo,
}

impl Repositories {
    /// Create repositories backed by `store`.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            vm: VmRepo::new(Arc::clone(&store)),
            disk: DiskRepo::new(Arc::clone(&store)),
            stemcell: StemcellRepo::new(Arc::clone(&store)),
            release: ReleaseRepo::new(Arc::clone(&store)),
            deployment: DeploymentRepo::new(store),
        }
    }
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}

/// Load, mutate, save.
async fn update<T>(
    store: &dyn StateStore,
    mutate: impl FnOnce(&mut DeploymentState) -> DeployResult<T> + Send,
) -> DeployResult<T> {
    let mut state = store.load().await?;
    let result = mutate(&mut state)?;
    store.save(&state).await?;
    Ok(result)
}
