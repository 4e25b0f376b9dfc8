//! Configuration for stratus-deploy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{DeployError, DeployResult};
use crate::manifest::{ReleaseRef, StemcellRef};
use crate::poll::PollPolicy;

/// Top-level configuration for a deploy run.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StratusConfig {
    /// Deployment state file.
    #[serde(default)]
    pub state: StateConfig,

    /// External CPI executable.
    #[serde(default)]
    pub cpi: CpiConfig,

    /// Agent client behaviour.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Polling intervals and deadlines of the deploy sequence.
    #[serde(default)]
    pub deploy: DeployConfig,

    /// What to deploy.
    #[serde(default)]
    pub deployment: DeploymentConfig,
}

impl StratusConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `stratus.toml` in the current directory (if present)
    /// 3. Environment variables with `STRATUS_` prefix
    pub fn load() -> DeployResult<Self> {
        Self::from_file("stratus.toml")
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> DeployResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STRATUS_").split("__"))
            .extract()
            .map_err(|e| DeployError::Config(e.to_string()))
    }
}

/// Deployment state file configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Path of the JSON state file.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("deployment.json")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

/// External CPI executable configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CpiConfig {
    /// Executable invoked once per cloud call.
    #[serde(default = "default_cpi_binary")]
    pub binary: PathBuf,

    /// Extra arguments passed before the request is written to stdin.
    #[serde(default)]
    pub args: Vec<String>,

    /// Director UUID sent in the request context.
    #[serde(default = "default_director_uuid")]
    pub director_uuid: String,
}

fn default_cpi_binary() -> PathBuf {
    PathBuf::from("cpi")
}

fn default_director_uuid() -> String {
    "stratus".to_owned()
}

impl Default for CpiConfig {
    fn default() -> Self {
        Self {
            binary: default_cpi_binary(),
            args: Vec::new(),
            director_uuid: default_director_uuid(),
        }
    }
}

/// Agent client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How often to poll a running agent task (milliseconds).
    #[serde(default = "default_task_poll_interval_ms")]
    pub task_poll_interval_ms: u64,

    /// Upper bound on a single agent task (seconds).
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_task_poll_interval_ms() -> u64 {
    500
}

const fn default_task_timeout_secs() -> u64 {
    600
}

impl AgentConfig {
    /// Polling policy for long-running agent tasks.
    #[must_use]
    pub const fn task_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.task_poll_interval_ms),
            Duration::from_secs(self.task_timeout_secs),
        )
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            task_poll_interval_ms: default_task_poll_interval_ms(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

/// Deploy sequence timing.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    /// Interval between agent pings after a VM is created (milliseconds).
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// How long to wait for a new VM's agent to answer (seconds).
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,

    /// Interval between `get_state` polls after start (milliseconds).
    #[serde(default = "default_state_poll_interval_ms")]
    pub state_poll_interval_ms: u64,

    /// How long to wait for jobs to report running (seconds).
    #[serde(default = "default_state_timeout_secs")]
    pub state_timeout_secs: u64,
}

const fn default_ping_interval_ms() -> u64 {
    500
}

const fn default_ping_timeout_secs() -> u64 {
    600
}

const fn default_state_poll_interval_ms() -> u64 {
    1000
}

const fn default_state_timeout_secs() -> u64 {
    600
}

impl DeployConfig {
    /// Polling policy for agent reachability.
    #[must_use]
    pub const fn ping_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.ping_interval_ms),
            Duration::from_secs(self.ping_timeout_secs),
        )
    }

    /// Polling policy for the post-start running check.
    #[must_use]
    pub const fn running_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.state_poll_interval_ms),
            Duration::from_secs(self.state_timeout_secs),
        )
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_secs: default_ping_timeout_secs(),
            state_poll_interval_ms: default_state_poll_interval_ms(),
            state_timeout_secs: default_state_timeout_secs(),
        }
    }
}

/// The deployment selected for this run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploymentConfig {
    /// Path of the JSON deployment manifest.
    pub manifest: Option<PathBuf>,

    /// Stemcell to boot the VM from.
    pub stemcell: Option<StemcellRef>,

    /// Releases the manifest's jobs come from.
    #[serde(default)]
    pub releases: Vec<ReleaseRef>,
}

impl DeploymentConfig {
    /// The manifest path, or a configuration error when none is set.
    pub fn require_manifest(&self) -> DeployResult<&Path> {
        self.manifest
            .as_deref()
            .ok_or_else(|| DeployError::config("no deployment set: deployment.manifest is missing"))
    }

    /// The stemcell, or a configuration error when none is set.
    pub fn require_stemcell(&self) -> DeployResult<&StemcellRef> {
        self.stemcell
            .as_ref()
            .ok_or_else(|| DeployError::config("no stemcell set: deployment.stemcell is missing"))
    }
}
