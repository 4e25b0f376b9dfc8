//! Stratus bootstrap registry.
//!
//! A short-lived HTTP endpoint that brokers per-instance settings between the
//! deployer and an agent whose message bus is not reachable yet. The cloud
//! provider writes the agent's bootstrap settings here when it creates a VM,
//! and the agent reads them back during boot.
//!
//! # Endpoints
//!
//! | Method   | Path                        | Result                                  |
//! |----------|-----------------------------|-----------------------------------------|
//! | `PUT`    | `/instances/{id}/settings`  | stores the body verbatim, `201`         |
//! | `GET`    | `/instances/{id}/settings`  | `{"settings":…,"status":"ok"}` or `404` |
//! | `DELETE` | `/instances/{id}/settings`  | removes the settings, `200`             |
//!
//! When credentials are configured every request must carry matching HTTP
//! basic auth, otherwise the server answers `401`.
//!
//! # Example
//!
//! ```ignore
//! use stratus_registry::{RegistryConfig, RegistryServer};
//!
//! let server = RegistryServer::start(RegistryConfig::new("127.0.0.1:6301".parse()?)).await?;
//! // ... drive the cloud provider ...
//! server.stop().await?;
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod error;
pub mod server;
pub mod store;

pub use api::{router, AppState, Credentials};
pub use error::{RegistryError, Result};
pub use server::{RegistryConfig, RegistryServer};
pub use store::SettingsStore;
