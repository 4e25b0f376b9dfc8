//! In-memory cloud for tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::calls::{Call, CallLog};
use crate::types::Properties;

use super::{Cloud, CloudError, CloudResult};

/// Mock cloud provider.
///
/// Hands out sequential CIDs (`vm-cid-1`, `disk-cid-1`, `stemcell-cid-1`),
/// tracks which disks are attached where, and records every call in a
/// [`CallLog`]. Failures are injected per method with [`MockCloud::fail_on`].
#[derive(Default)]
pub struct MockCloud {
    log: CallLog,
    inner: Mutex<Inner>,
    observer: Mutex<Option<Observer>>,
}

type Observer = Arc<dyn Fn(&Call) + Send + Sync>;

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    stemcells: BTreeSet<String>,
    vms: BTreeSet<String>,
    /// Disk CID to the VM it is attached to.
    disks: BTreeMap<String, Option<String>>,
    failures: HashMap<String, String>,
}

impl Inner {
    fn next_cid(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-cid-{}", self.next_id)
    }

    fn check(&self, method: &str) -> CloudResult<()> {
        match self.failures.get(method) {
            Some(message) => Err(CloudError::new(method, message.clone())),
            None => Ok(()),
        }
    }
}

impl MockCloud {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that records into a shared log.
    #[must_use]
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            inner: Mutex::default(),
            observer: Mutex::default(),
        }
    }

    /// Run `observer` on every call, before the call takes effect.
    pub fn observe(&self, observer: impl Fn(&Call) + Send + Sync + 'static) {
        *self.observer.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(observer));
    }

    #[must_use]
    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Make every subsequent call to `method` fail with `message`.
    pub fn fail_on(&self, method: &str, message: &str) {
        self.lock()
            .failures
            .insert(method.to_owned(), message.to_owned());
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Remove a VM behind the orchestrator's back.
    pub fn remove_vm(&self, cid: &str) {
        let mut inner = self.lock();
        inner.vms.remove(cid);
        for vm in inner.disks.values_mut() {
            if vm.as_deref() == Some(cid) {
                *vm = None;
            }
        }
    }

    /// CIDs of live VMs.
    #[must_use]
    pub fn vms(&self) -> Vec<String> {
        self.lock().vms.iter().cloned().collect()
    }

    /// CIDs of existing disks.
    #[must_use]
    pub fn disks(&self) -> Vec<String> {
        self.lock().disks.keys().cloned().collect()
    }

    /// VM a disk is attached to, if any.
    #[must_use]
    pub fn attachment(&self, disk_cid: &str) -> Option<String> {
        self.lock().disks.get(disk_cid).cloned().flatten()
    }

    /// CIDs of uploaded stemcells.
    #[must_use]
    pub fn stemcells(&self) -> Vec<String> {
        self.lock().stemcells.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, call: Call) -> CloudResult<MutexGuard<'_, Inner>> {
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(observer) = observer {
            observer(&call);
        }

        let method = call.method();
        self.log.record(call);
        let inner = self.lock();
        inner.check(method)?;
        Ok(inner)
    }
}

impl std::fmt::Debug for MockCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCloud")
            .field("log", &self.log)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Cloud for MockCloud {
    async fn create_stemcell(
        &self,
        image_path: &Path,
        _cloud_properties: &Properties,
    ) -> CloudResult<String> {
        let mut inner = self.begin(Call::CreateStemcell {
            image_path: image_path.display().to_string(),
        })?;
        let cid = inner.next_cid("stemcell");
        inner.stemcells.insert(cid.clone());
        Ok(cid)
    }

    async fn delete_stemcell(&self, cid: &str) -> CloudResult<()> {
        let mut inner = self.begin(Call::DeleteStemcell {
            cid: cid.to_owned(),
        })?;
        inner.stemcells.remove(cid);
        Ok(())
    }

    async fn create_vm(
        &self,
        _agent_id: &str,
        stemcell_cid: &str,
        _cloud_properties: &Properties,
        _networks: &Properties,
        _env: &Properties,
    ) -> CloudResult<String> {
        let mut inner = self.begin(Call::CreateVm {
            stemcell_cid: stemcell_cid.to_owned(),
        })?;
        if !inner.stemcells.contains(stemcell_cid) {
            return Err(CloudError::new(
                "create_vm",
                format!("stemcell not found: {stemcell_cid}"),
            ));
        }
        let cid = inner.next_cid("vm");
        inner.vms.insert(cid.clone());
        Ok(cid)
    }

    async fn delete_vm(&self, cid: &str) -> CloudResult<()> {
        drop(self.begin(Call::DeleteVm {
            cid: cid.to_owned(),
        })?);
        self.remove_vm(cid);
        Ok(())
    }

    async fn has_vm(&self, cid: &str) -> CloudResult<bool> {
        let inner = self.begin(Call::HasVm {
            cid: cid.to_owned(),
        })?;
        Ok(inner.vms.contains(cid))
    }

    async fn create_disk(
        &self,
        size: u64,
        _cloud_properties: &Properties,
        vm_cid: &str,
    ) -> CloudResult<String> {
        let mut inner = self.begin(Call::CreateDisk {
            size,
            vm_cid: vm_cid.to_owned(),
        })?;
        let cid = inner.next_cid("disk");
        inner.disks.insert(cid.clone(), None);
        Ok(cid)
    }

    async fn attach_disk(&self, vm_cid: &str, disk_cid: &str) -> CloudResult<()> {
        let mut inner = self.begin(Call::AttachDisk {
            vm_cid: vm_cid.to_owned(),
            disk_cid: disk_cid.to_owned(),
        })?;
        if !inner.vms.contains(vm_cid) {
            return Err(CloudError::new("attach_disk", format!("vm not found: {vm_cid}")));
        }
        match inner.disks.get_mut(disk_cid) {
            Some(attached) => {
                *attached = Some(vm_cid.to_owned());
                Ok(())
            }
            None => Err(CloudError::new(
                "attach_disk",
                format!("disk not found: {disk_cid}"),
            )),
        }
    }

    async fn detach_disk(&self, vm_cid: &str, disk_cid: &str) -> CloudResult<()> {
        let mut inner = self.begin(Call::DetachDisk {
            vm_cid: vm_cid.to_owned(),
            disk_cid: disk_cid.to_owned(),
        })?;
        if let Some(attached) = inner.disks.get_mut(disk_cid) {
            *attached = None;
        }
        Ok(())
    }

    async fn delete_disk(&self, cid: &str) -> CloudResult<()> {
        let mut inner = self.begin(Call::DeleteDisk {
            cid: cid.to_owned(),
        })?;
        inner.disks.remove(cid);
        Ok(())
    }
}
