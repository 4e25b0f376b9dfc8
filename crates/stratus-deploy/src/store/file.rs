//! JSON file state store.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{DeployError, DeployResult};
use crate::types::DeploymentState;

use super::StateStore;

/// State store backed by a single JSON file.
///
/// Opening the store takes an exclusive advisory lock on a sibling
/// `.lock` file that is held until the store is dropped, so two deploys
/// cannot write the same state concurrently. Writes go to a temporary file
/// in the same directory which is then renamed over the state file.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    lock: File,
}

impl FileStateStore {
    /// Open (and lock) the state file at `path`. The file itself is created
    /// lazily on first load.
    pub fn open(path: impl Into<PathBuf>) -> DeployResult<Self> {
        let path = path.into();
        let dir = parent_dir(&path);
        fs::create_dir_all(dir).map_err(|e| {
            DeployError::state(format!("failed to create {}: {e}", dir.display()))
        })?;

        let lock_path = path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                DeployError::state(format!("failed to open {}: {e}", lock_path.display()))
            })?;

        FileExt::try_lock_exclusive(&lock).map_err(|_| {
            DeployError::config(format!(
                "state file {} is in use by another deploy",
                path.display()
            ))
        })?;

        debug!(path = %path.display(), "opened state file");

        Ok(Self { path, lock })
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomically(&self, bytes: &[u8]) -> DeployResult<()> {
        let write_err =
            |e: std::io::Error| DeployError::state(format!("failed to write {}: {e}", self.path.display()));

        let mut tmp = NamedTempFile::new_in(parent_dir(&self.path)).map_err(write_err)?;
        tmp.write_all(bytes).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

impl Drop for FileStateStore {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock);
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> DeployResult<DeploymentState> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                DeployError::state(format!(
                    "state file {} is corrupted: {e}",
                    self.path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let state = DeploymentState::new();
                info!(
                    path = %self.path.display(),
                    installation_id = %state.installation_id,
                    "creating deployment state file"
                );
                self.save(&state).await?;
                Ok(state)
            }
            Err(e) => Err(DeployError::state(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn save(&self, state: &DeploymentState) -> DeployResult<()> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| DeployError::state(format!("failed to serialise state: {e}")))?;
        self.write_atomically(&bytes)
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
