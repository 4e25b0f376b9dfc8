//! Stratus single-VM deployer
//!
//! This crate deploys and converges one managed VM to match a deployment
//! manifest. It drives two independent, fallible remote actors, a cloud
//! provider and the agent inside the VM, and persists its view of the world
//! after every step so an interrupted run can simply be re-run.
//!
//! # Architecture
//!
//! - **Repositories** ([`repo`], [`store`]): typed views over one JSON state
//!   document. Every mutation is saved before the call returns.
//! - **Cloud** ([`cloud`]): VM, disk and stemcell primitives, served by an
//!   external CPI executable.
//! - **Agent** ([`agent`]): job lifecycle and disk operations inside the VM.
//! - **Managers** ([`vm`], [`disk`], [`stemcell`]): each owns one resource
//!   kind and its repository.
//! - **Deployer** ([`deployer`]): runs the managers in order, with the
//!   bootstrap registry ([`stratus_registry`]) up for the duration.
//!
//! # Disk migration
//!
//! ```text
//!  current: old ──▶ create new ─▶ attach ─▶ mount ─▶ migrate ─▶ promote new ─▶ detach old ─▶ delete old
//!                                                     │              │
//!                                                     ▼              ▼
//!                                         old current, new orphan   new current, old orphan
//! ```
//!
//! Orphans are deleted at the start of the next deploy.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stratus_deploy::{
//!     agent::MockAgent, cloud::MockCloud, store::MemoryStateStore, DeployRequest, Deployer,
//! };
//!
//! let deployer = Deployer::new(
//!     Arc::new(MemoryStateStore::new()),
//!     Arc::new(MockCloud::new()),
//!     Arc::new(MockAgent::new()),
//!     &Default::default(),
//! );
//!
//! let report = deployer.deploy(&request).await?;
//! ```

#![forbid(unsafe_code)]

pub mod agent;
pub mod calls;
pub mod cloud;
pub mod config;
pub mod deployer;
pub mod disk;
pub mod error;
pub mod manifest;
pub mod poll;
pub mod record;
pub mod repo;
pub mod stemcell;
pub mod store;
pub mod types;
pub mod vm;

// Re-export commonly used types at the crate root
pub use agent::{AgentClient, AgentError, AgentState, HttpAgentClient, MockAgent};
pub use calls::{Call, CallLog};
pub use cloud::{Cloud, CloudError, CpiCloud, MockCloud};
pub use config::StratusConfig;
pub use deployer::{DeployOutcome, DeployReport, DeployRequest, Deployer};
pub use error::{DeployError, DeployResult};
pub use manifest::{Manifest, RegistrySpec, ReleaseRef, StemcellRef};
pub use store::{FileStateStore, MemoryStateStore, StateStore};
pub use types::{DeploymentState, DiskRecord, RecordId, StemcellRecord, VmRecord};
