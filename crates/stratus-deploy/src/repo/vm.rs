//! Current VM bookkeeping.

use std::sync::Arc;

use crate::error::DeployResult;
use crate::store::StateStore;
use crate::types::VmRecord;

/// Repository for the (at most one) current VM.
#[derive(Clone)]
pub struct VmRepo {
    store: Arc<dyn StateStore>,
}

impl VmRepo {
    pub(crate) fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// The current VM, if one is recorded.
    pub async fn find_current(&self) -> DeployResult<Option<VmRecord>> {
        Ok(self.store.load().await?.current_vm)
    }

    /// Record `record` as the current VM, replacing any previous one.
    pub async fn update_current(&self, record: VmRecord) -> DeployResult<()> {
        super::update(self.store.as_ref(), |state| {
            state.current_vm = Some(record);
            Ok(())
        })
        .await
    }

    /// Forget the current VM.
    pub async fn clear_current(&self) -> DeployResult<()> {
        super::update(self.store.as_ref(), |state| {
            state.current_vm = None;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;

    #[tokio::test]
    async fn update_and_clear() {
        let repo = VmRepo::new(Arc::new(MemoryStateStore::new()));
        assert!(repo.find_current().await.expect("find failed").is_none());

        let record = VmRecord {
            cid: "vm-1".to_owned(),
            stemcell_cid: "stemcell-1".to_owned(),
            config_hash: "hash".to_owned(),
        };
        repo.update_current(record.clone())
            .await
            .expect("update failed");
        assert_eq!(
            repo.find_current().await.expect("find failed"),
            Some(record)
        );

        repo.clear_current().await.expect("clear failed");
        assert!(repo.find_current().await.expect("find failed").is_none());
    }
}
