//! Error types for the registry server.

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to bind registry listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("registry server failed: {0}")]
    Serve(#[from] std::io::Error),

    #[error("registry server task aborted: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
