//! In-memory agent for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::calls::{Call, CallLog};

use super::{AgentClient, AgentError, AgentResult, AgentState};

/// Mock agent.
///
/// Tracks mounted disks and applied specs, and records every call in a
/// [`CallLog`]. `get_state` answers from a script of job states and falls
/// back to `"running"` once the script is exhausted.
#[derive(Debug, Default)]
pub struct MockAgent {
    log: CallLog,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    mounted: Vec<String>,
    applied: Vec<serde_json::Value>,
    states: VecDeque<String>,
    steady_state: Option<String>,
    failing_pings: u32,
    failures: HashMap<String, String>,
}

impl MockAgent {
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
        }
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
        let mut inner = self.lock();
        inner.failures.clear();
        inner.failing_pings = 0;
    }

    /// Fail the next `count` pings, as an agent that is still booting would.
    pub fn fail_pings(&self, count: u32) {
        self.lock().failing_pings = count;
    }

    /// Queue job states for `get_state` to report, oldest first.
    pub fn script_states<I, S>(&self, states: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .states
            .extend(states.into_iter().map(Into::into));
    }

    /// Job state reported once the script is exhausted.
    pub fn set_steady_state(&self, state: &str) {
        self.lock().steady_state = Some(state.to_owned());
    }

    /// Disks currently mounted, in mount order.
    #[must_use]
    pub fn mounted(&self) -> Vec<String> {
        self.lock().mounted.clone()
    }

    /// Specs passed to `apply`, oldest first.
    #[must_use]
    pub fn applied(&self) -> Vec<serde_json::Value> {
        self.lock().applied.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, call: Call) -> AgentResult<MutexGuard<'_, Inner>> {
        let method = call.method();
        self.log.record(call);
        let inner = self.lock();
        if let Some(message) = inner.failures.get(method).cloned() {
            return Err(AgentError::new(method, message));
        }
        Ok(inner)
    }
}

#[async_trait]
impl AgentClient for MockAgent {
    async fn ping(&self) -> AgentResult<()> {
        let mut inner = self.begin(Call::Ping)?;
        if inner.failing_pings > 0 {
            inner.failing_pings -= 1;
            return Err(AgentError::new("ping", "connection refused"));
        }
        Ok(())
    }

    async fn stop(&self) -> AgentResult<()> {
        self.begin(Call::Stop).map(drop)
    }

    async fn start(&self) -> AgentResult<()> {
        self.begin(Call::Start).map(drop)
    }

    async fn apply(&self, spec: &serde_json::Value) -> AgentResult<()> {
        let mut inner = self.begin(Call::Apply)?;
        inner.applied.push(spec.clone());
        Ok(())
    }

    async fn get_state(&self) -> AgentResult<AgentState> {
        let mut inner = self.begin(Call::GetState)?;
        let state = match inner.states.pop_front() {
            Some(state) => state,
            None => inner
                .steady_state
                .clone()
                .unwrap_or_else(|| "running".to_owned()),
        };
        Ok(AgentState::new(state))
    }

    async fn mount_disk(&self, disk_cid: &str) -> AgentResult<()> {
        let mut inner = self.begin(Call::MountDisk {
            cid: disk_cid.to_owned(),
        })?;
        if !inner.mounted.iter().any(|cid| cid == disk_cid) {
            inner.mounted.push(disk_cid.to_owned());
        }
        Ok(())
    }

    async fn unmount_disk(&self, disk_cid: &str) -> AgentResult<()> {
        let mut inner = self.begin(Call::UnmountDisk {
            cid: disk_cid.to_owned(),
        })?;
        inner.mounted.retain(|cid| cid != disk_cid);
        Ok(())
    }

    async fn list_disk(&self) -> AgentResult<Vec<String>> {
        let inner = self.begin(Call::ListDisk)?;
        Ok(inner.mounted.clone())
    }

    /// Copies onto the most recently mounted disk and unmounts the rest.
    async fn migrate_disk(&self) -> AgentResult<()> {
        let mut inner = self.begin(Call::MigrateDisk)?;
        if let Some(target) = inner.mounted.pop() {
            inner.mounted = vec![target];
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_mounted_disks() {
        let agent = MockAgent::new();

        agent.mount_disk("disk-1").await.unwrap();
        agent.mount_disk("disk-2").await.unwrap();
        agent.unmount_disk("disk-1").await.unwrap();

        assert_eq!(agent.list_disk().await.unwrap(), vec!["disk-2"]);
    }

    #[tokio::test]
    async fn migration_leaves_only_the_target_mounted() {
        let agent = MockAgent::new();

        agent.mount_disk("disk-old").await.unwrap();
        agent.mount_disk("disk-new").await.unwrap();
        agent.migrate_disk().await.unwrap();

        assert_eq!(agent.mounted(), vec!["disk-new"]);
    }

    #[tokio::test]
    async fn scripted_states_then_steady_state() {
        let agent = MockAgent::new();
        agent.script_states(["starting", "failing"]);

        assert_eq!(agent.get_state().await.unwrap().job_state, "starting");
        assert_eq!(agent.get_state().await.unwrap().job_state, "failing");
        assert!(agent.get_state().await.unwrap().is_running());

        agent.set_steady_state("stopped");
        assert!(!agent.get_state().await.unwrap().is_running());
    }

    #[tokio::test]
    async fn failing_pings_recover() {
        let agent = MockAgent::new();
        agent.fail_pings(2);

        assert!(agent.ping().await.is_err());
        assert!(agent.ping().await.is_err());
        assert!(agent.ping().await.is_ok());
        assert_eq!(agent.log().methods(), vec!["ping", "ping", "ping"]);
    }

    #[tokio::test]
    async fn injected_failure() {
        let agent = MockAgent::new();
        agent.fail_on("migrate_disk", "no space left");

        let err = agent.migrate_disk().await.unwrap_err();
        assert_eq!(err, AgentError::new("migrate_disk", "no space left"));
    }
}
