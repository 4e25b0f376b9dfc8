//! Ordered log of calls made against the mock cloud and agent.
//!
//! [`MockCloud`](crate::cloud::MockCloud) and
//! [`MockAgent`](crate::agent::MockAgent) can share one [`CallLog`], so a test
//! can assert the exact interleaving of cloud and agent operations.

use std::sync::{Arc, Mutex, PoisonError};

/// A single recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateStemcell { image_path: String },
    DeleteStemcell { cid: String },
    CreateVm { stemcell_cid: String },
    DeleteVm { cid: String },
    HasVm { cid: String },
    CreateDisk { size: u64, vm_cid: String },
    AttachDisk { vm_cid: String, disk_cid: String },
    DetachDisk { vm_cid: String, disk_cid: String },
    DeleteDisk { cid: String },
    Ping,
    Stop,
    Start,
    Apply,
    GetState,
    MountDisk { cid: String },
    UnmountDisk { cid: String },
    ListDisk,
    MigrateDisk,
}

impl Call {
    /// Wire name of the method, as used by the CPI and agent protocols.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::CreateStemcell { .. } => "create_stemcell",
            Self::DeleteStemcell { .. } => "delete_stemcell",
            Self::CreateVm { .. } => "create_vm",
            Self::DeleteVm { .. } => "delete_vm",
            Self::HasVm { .. } => "has_vm",
            Self::CreateDisk { .. } => "create_disk",
            Self::AttachDisk { .. } => "attach_disk",
            Self::DetachDisk { .. } => "detach_disk",
            Self::DeleteDisk { .. } => "delete_disk",
            Self::Ping => "ping",
            Self::Stop => "stop",
            Self::Start => "start",
            Self::Apply => "apply",
            Self::GetState => "get_state",
            Self::MountDisk { .. } => "mount_disk",
            Self::UnmountDisk { .. } => "unmount_disk",
            Self::ListDisk => "list_disk",
            Self::MigrateDisk => "migrate_disk",
        }
    }

    /// Whether this call goes to the agent rather than the cloud.
    #[must_use]
    pub const fn is_agent_call(&self) -> bool {
        matches!(
            self,
            Self::Ping
                | Self::Stop
                | Self::Start
                | Self::Apply
                | Self::GetState
                | Self::MountDisk { .. }
                | Self::UnmountDisk { .. }
                | Self::ListDisk
                | Self::MigrateDisk
        )
    }
}

/// Shared, cloneable, append-only call log.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call.
    pub fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// Snapshot of every call so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Method names of every call so far, oldest first.
    #[must_use]
    pub fn methods(&self) -> Vec<&'static str> {
        self.calls().iter().map(Call::method).collect()
    }

    /// Forget every recorded call.
    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
