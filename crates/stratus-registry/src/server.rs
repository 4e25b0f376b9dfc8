//! Background registry server with scoped lifetime.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{router, AppState, Credentials};
use crate::error::{RegistryError, Result};
use crate::store::SettingsStore;

/// Where and how the registry listens.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Address to bind. Port `0` picks an ephemeral port.
    pub listen: SocketAddr,
    /// Basic auth credentials; `None` disables authentication.
    pub credentials: Option<Credentials>,
}

impl RegistryConfig {
    /// Create an unauthenticated configuration.
    #[must_use]
    pub const fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            credentials: None,
        }
    }

    /// Require basic auth with the given credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// A running registry server.
///
/// The listener runs on a spawned task until [`RegistryServer::stop`] is
/// called or the handle is dropped, so the port is released on every exit
/// path of the caller.
#[derive(Debug)]
pub struct RegistryServer {
    addr: SocketAddr,
    store: Arc<SettingsStore>,
    cancel: CancellationToken,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl RegistryServer {
    /// Bind the listener and start serving in the background.
    pub async fn start(config: RegistryConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| RegistryError::Bind {
                addr: config.listen,
                source,
            })?;
        let addr = listener.local_addr()?;

        let store = Arc::new(SettingsStore::new());
        let app = router(Arc::new(AppState {
            store: Arc::clone(&store),
            credentials: config.credentials,
        }));

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });

        info!(address = %addr, "registry listening");

        Ok(Self {
            addr,
            store,
            cancel,
            task: Some(task),
        })
    }

    /// The bound address (useful when started on port `0`).
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The settings held by this server.
    #[must_use]
    pub fn store(&self) -> &Arc<SettingsStore> {
        &self.store
    }

    /// Shut the listener down and wait for in-flight requests to finish.
    pub async fn stop(mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| RegistryError::Task(e.to_string()))??;
        }

        info!(address = %self.addr, "registry stopped");
        Ok(())
    }
}

impl Drop for RegistryServer {
    fn drop(&mut self) {
        if self.task.is_some() {
            debug!(address = %self.addr, "registry dropped without stop, cancelling listener");
            self.cancel.cancel();
        }
    }
}
