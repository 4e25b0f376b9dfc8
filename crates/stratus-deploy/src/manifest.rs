//! Deployment manifest and the identities deployed alongside it.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DeployError, DeployResult};
use crate::types::Properties;

/// Desired state of the single deployed VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Deployment name.
    pub name: String,

    /// Persistent disk size in MiB; `0` requests no persistent disk.
    #[serde(default)]
    pub persistent_disk: u64,

    #[serde(default)]
    pub disk_cloud_properties: Properties,

    /// Cloud properties of the VM (instance type, zone, ...).
    #[serde(default)]
    pub cloud_properties: Properties,

    #[serde(default)]
    pub networks: Properties,

    #[serde(default)]
    pub env: Properties,

    /// URL of the agent's message bus, optionally with credentials.
    pub mbus: String,

    /// Bootstrap registry served while the deploy runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySpec>,

    /// Spec handed verbatim to the agent's `apply`.
    #[serde(default)]
    pub apply_spec: serde_json::Value,
}

impl Manifest {
    /// Parse a JSON manifest.
    pub fn from_json(bytes: &[u8]) -> DeployResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| DeployError::config(format!("invalid deployment manifest: {e}")))
    }

    /// Read and parse a JSON manifest file.
    pub async fn load(path: &Path) -> DeployResult<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            DeployError::config(format!(
                "failed to read deployment manifest {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&bytes)
    }

    /// Check the fields a deploy cannot start without.
    pub fn validate(&self) -> DeployResult<()> {
        if self.name.trim().is_empty() {
            return Err(DeployError::config("manifest is missing 'name'"));
        }
        if self.mbus.trim().is_empty() {
            return Err(DeployError::config("manifest is missing 'mbus'"));
        }
        if let Some(registry) = &self.registry {
            registry.listen_addr()?;
        }
        Ok(())
    }

    /// Fingerprint of the whole manifest.
    ///
    /// Maps serialise with sorted keys, so equal manifests always hash the
    /// same regardless of the source file's formatting.
    pub fn sha(&self) -> DeployResult<String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| DeployError::state(format!("failed to encode manifest: {e}")))?;
        Ok(sha256_hex(&bytes))
    }

    /// Fingerprint of the fields that shape the VM itself.
    ///
    /// A change here means the VM has to be recreated. Disk size and the
    /// apply spec are not part of it.
    pub fn vm_config_hash(&self) -> DeployResult<String> {
        let shape = serde_json::json!({
            "cloud_properties": self.cloud_properties,
            "networks": self.networks,
            "env": self.env,
        });
        let bytes = serde_json::to_vec(&shape)
            .map_err(|e| DeployError::state(format!("failed to encode VM config: {e}")))?;
        Ok(sha256_hex(&bytes))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Where the bootstrap registry listens and who may use it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySpec {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl RegistrySpec {
    /// Socket address to bind. `host` must be an IP address.
    pub fn listen_addr(&self) -> DeployResult<SocketAddr> {
        let ip: IpAddr = self.host.parse().map_err(|_| {
            DeployError::config(format!(
                "registry host must be an IP address, got '{}'",
                self.host
            ))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl fmt::Debug for RegistrySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySpec")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Stemcell to boot the VM from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemcellRef {
    pub name: String,
    pub version: String,
    /// Image uploaded with `create_stemcell`.
    pub image_path: PathBuf,
    #[serde(default)]
    pub cloud_properties: Properties,
}

/// A release the deployed jobs come from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReleaseRef {
    pub name: String,
    pub version: String,
}

impl ReleaseRef {
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}
