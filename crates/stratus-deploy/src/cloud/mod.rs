//! Cloud provider contract.
//!
//! The orchestrator drives infrastructure through the [`Cloud`] trait. The
//! production implementation, [`CpiCloud`], shells out to an external CPI
//! executable; [`MockCloud`] keeps everything in memory and records each call
//! for tests.

mod cpi;
mod mock;

pub use cpi::CpiCloud;
pub use mock::MockCloud;

use std::path::Path;

use async_trait::async_trait;

use crate::types::Properties;

/// Result type alias for cloud calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// A failed cloud call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cloud {method} failed: {message}")]
pub struct CloudError {
    /// CPI method that failed.
    pub method: String,
    pub message: String,
    /// Whether the provider reported the call as safe to retry.
    pub ok_to_retry: bool,
}

impl CloudError {
    #[must_use]
    pub fn new(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            message: message.into(),
            ok_to_retry: false,
        }
    }
}

/// Infrastructure primitives offered by a cloud provider.
///
/// Every method maps onto one CPI call. Identifiers are opaque cloud IDs
/// (CIDs).
#[async_trait]
pub trait Cloud: Send + Sync {
    /// Upload a stemcell image, returning its CID.
    async fn create_stemcell(
        &self,
        image_path: &Path,
        cloud_properties: &Properties,
    ) -> CloudResult<String>;

    async fn delete_stemcell(&self, cid: &str) -> CloudResult<()>;

    /// Boot a VM from a stemcell, returning its CID.
    ///
    /// `agent_id` is the identity the in-VM agent uses to fetch its settings
    /// from the registry.
    async fn create_vm(
        &self,
        agent_id: &str,
        stemcell_cid: &str,
        cloud_properties: &Properties,
        networks: &Properties,
        env: &Properties,
    ) -> CloudResult<String>;

    async fn delete_vm(&self, cid: &str) -> CloudResult<()>;

    /// Whether the VM still exists on the provider side.
    async fn has_vm(&self, cid: &str) -> CloudResult<bool>;

    /// Create a persistent disk of `size` MiB near `vm_cid`, returning its CID.
    async fn create_disk(
        &self,
        size: u64,
        cloud_properties: &Properties,
        vm_cid: &str,
    ) -> CloudResult<String>;

    async fn attach_disk(&self, vm_cid: &str, disk_cid: &str) -> CloudResult<()>;

    async fn detach_disk(&self, vm_cid: &str, disk_cid: &str) -> CloudResult<()>;

    async fn delete_disk(&self, cid: &str) -> CloudResult<()>;
}
