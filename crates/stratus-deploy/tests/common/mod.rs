//! Common test utilities for deploy integration tests.

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use stratus_deploy::config::DeployConfig;
use stratus_deploy::{
    CallLog, Deployer, DeploymentState, DiskRecord, MemoryStateStore, MockAgent, MockCloud,
};

/// Mock cloud and agent sharing one call log, over an in-memory state store.
pub struct TestDeployment {
    pub log: CallLog,
    pub cloud: Arc<MockCloud>,
    pub agent: Arc<MockAgent>,
    pub store: Arc<MemoryStateStore>,
    pub deployer: Deployer,
}

impl TestDeployment {
    pub fn new() -> Self {
        let log = CallLog::new();
        let cloud = Arc::new(MockCloud::with_log(log.clone()));
        let agent = Arc::new(MockAgent::with_log(log.clone()));
        let store = Arc::new(MemoryStateStore::new());

        Self {
            deployer: Deployer::new(
                store.clone(),
                cloud.clone(),
                agent.clone(),
                &fast_deploy_config(),
            ),
            log,
            cloud,
            agent,
            store,
        }
    }

    /// Replace the deployer with a fresh one over the same state and mocks,
    /// as a new process would.
    pub fn restart(&mut self) {
        self.deployer = Deployer::new(
            self.store.clone(),
            self.cloud.clone(),
            self.agent.clone(),
            &fast_deploy_config(),
        );
    }

    /// The persisted state.
    pub fn state(&self) -> DeploymentState {
        self.store.snapshot().unwrap().unwrap_or_default()
    }

    /// Persisted disk records.
    pub fn disks(&self) -> Vec<DiskRecord> {
        self.state().disks
    }

    /// The one current disk record; panics unless exactly one exists.
    pub fn current_disk(&self) -> DiskRecord {
        let current: Vec<_> = self.disks().into_iter().filter(|d| d.current).collect();
        assert_eq!(current.len(), 1, "expected exactly one current disk");
        current.into_iter().next().unwrap()
    }
}

/// Polling fast enough for tests, with deadlines that still fail quickly.
pub fn fast_deploy_config() -> DeployConfig {
    DeployConfig {
        ping_interval_ms: 1,
        ping_timeout_secs: 1,
        state_poll_interval_ms: 1,
        state_timeout_secs: 1,
    }
}
