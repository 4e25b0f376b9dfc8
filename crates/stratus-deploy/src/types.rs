//! Persisted record types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Free-form cloud properties, networks and env blocks.
///
/// Keys are kept sorted, so serialising the same map always yields the same
/// bytes.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Opaque identifier for a persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a record ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique record ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The VM currently deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    /// Cloud identifier of the VM.
    pub cid: String,
    /// Stemcell the VM was created from.
    pub stemcell_cid: String,
    /// Hash of the manifest fields that shaped the VM.
    pub config_hash: String,
}

/// A persistent disk known to the deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskRecord {
    pub id: RecordId,
    /// Cloud identifier of the disk.
    pub cid: String,
    /// Size in MiB.
    pub size: u64,
    #[serde(default)]
    pub cloud_properties: Properties,
    /// Whether this is the authoritative disk of the deployment.
    pub current: bool,
    /// VM the disk was last attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_cid: Option<String>,
}

impl DiskRecord {
    /// Whether the disk is recorded as attached to the given VM.
    #[must_use]
    pub fn is_attached_to(&self, vm_cid: &str) -> bool {
        self.vm_cid.as_deref() == Some(vm_cid)
    }
}

/// A stemcell uploaded to the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemcellRecord {
    pub id: RecordId,
    pub name: String,
    pub version: String,
    /// Cloud identifier of the uploaded image.
    pub cid: String,
}

/// A release referenced by a deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub id: RecordId,
    pub name: String,
    pub version: String,
}

/// Everything persisted about one deployment.
///
/// This is the whole content of the state file. Repositories read and write
/// slices of it; nothing else holds deployment state between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Stable identifier of this installation, used as the agent ID.
    pub installation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_vm: Option<VmRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stemcell_id: Option<RecordId>,
    #[serde(default)]
    pub current_release_ids: Vec<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_manifest_sha: Option<String>,
    #[serde(default)]
    pub disks: Vec<DiskRecord>,
    #[serde(default)]
    pub stemcells: Vec<StemcellRecord>,
    #[serde(default)]
    pub releases: Vec<ReleaseRecord>,
}

impl DeploymentState {
    /// Fresh state with a newly generated installation ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            installation_id: ulid::Ulid::new().to_string().to_lowercase(),
            current_vm: None,
            current_stemcell_id: None,
            current_release_ids: Vec::new(),
            current_manifest_sha: None,
            disks: Vec::new(),
            stemcells: Vec::new(),
            releases: Vec::new(),
        }
    }
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(RecordId::generate(), RecordId::generate());
    }

    #[test]
    fn empty_state_omits_optional_pointers() {
        let state = DeploymentState::new();
        let json = serde_json::to_value(&state).unwrap();

        assert!(json.get("current_vm").is_none());
        assert!(json.get("current_manifest_sha").is_none());
        assert_eq!(json["disks"], serde_json::json!([]));
    }

    #[test]
    fn state_tolerates_missing_collections() {
        let state: DeploymentState =
            serde_json::from_str(r#"{"installation_id":"abc"}"#).unwrap();

        assert_eq!(state.installation_id, "abc");
        assert!(state.disks.is_empty());
        assert!(state.current_vm.is_none());
    }

    #[test]
    fn disk_attachment_check() {
        let disk = DiskRecord {
            id: RecordId::new("d1"),
            cid: "disk-1".to_owned(),
            size: 1024,
            cloud_properties: Properties::new(),
            current: true,
            vm_cid: Some("vm-1".to_owned()),
        };

        assert!(disk.is_attached_to("vm-1"));
        assert!(!disk.is_attached_to("vm-2"));
    }
}
