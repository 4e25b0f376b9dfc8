//! Cloud backed by an external CPI executable.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::CpiConfig;
use crate::types::Properties;

use super::{Cloud, CloudError, CloudResult};

#[derive(Serialize)]
struct CpiRequest<'a> {
    method: &'a str,
    arguments: Vec<Value>,
    context: CpiContext<'a>,
}

#[derive(Serialize)]
struct CpiContext<'a> {
    director_uuid: &'a str,
}

#[derive(Deserialize)]
struct CpiResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<CpiErrorBody>,
    #[serde(default)]
    log: String,
}

#[derive(Deserialize)]
struct CpiErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    message: String,
    #[serde(default)]
    ok_to_retry: bool,
}

/// Cloud that runs the configured CPI executable once per call.
///
/// The request is written as JSON to the child's stdin; the response is read
/// from its stdout. A non-zero exit status or a non-null `error` fails the
/// call.
pub struct CpiCloud {
    binary: PathBuf,
    args: Vec<String>,
    director_uuid: String,
}

impl CpiCloud {
    #[must_use]
    pub fn new(config: &CpiConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            args: config.args.clone(),
            director_uuid: config.director_uuid.clone(),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, arguments: Vec<Value>) -> CloudResult<T> {
        let request = serde_json::to_vec(&CpiRequest {
            method,
            arguments,
            context: CpiContext {
                director_uuid: &self.director_uuid,
            },
        })
        .map_err(|e| CloudError::new(method, format!("failed to encode request: {e}")))?;

        debug!(method, binary = %self.binary.display(), "invoking CPI");

        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CloudError::new(
                    method,
                    format!("failed to spawn {}: {e}", self.binary.display()),
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&request)
                .await
                .map_err(|e| CloudError::new(method, format!("failed to write request: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CloudError::new(method, format!("failed to wait for CPI: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CloudError::new(
                method,
                format!("CPI exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let response: CpiResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| CloudError::new(method, format!("malformed CPI response: {e}")))?;

        if !response.log.is_empty() {
            debug!(method, log = %response.log, "CPI log");
        }

        if let Some(error) = response.error {
            return Err(CloudError {
                method: method.to_owned(),
                message: format!("{}: {}", error.kind, error.message),
                ok_to_retry: error.ok_to_retry,
            });
        }

        serde_json::from_value(response.result)
            .map_err(|e| CloudError::new(method, format!("unexpected CPI result: {e}")))
    }
}

impl std::fmt::Debug for CpiCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpiCloud")
            .field("binary", &self.binary)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Cloud for CpiCloud {
    async fn create_stemcell(
        &self,
        image_path: &Path,
        cloud_properties: &Properties,
    ) -> CloudResult<String> {
        info!(image = %image_path.display(), "uploading stemcell");
        self.call(
            "create_stemcell",
            vec![json!(image_path), json!(cloud_properties)],
        )
        .await
    }

    async fn delete_stemcell(&self, cid: &str) -> CloudResult<()> {
        self.call("delete_stemcell", vec![json!(cid)]).await
    }

    async fn create_vm(
        &self,
        agent_id: &str,
        stemcell_cid: &str,
        cloud_properties: &Properties,
        networks: &Properties,
        env: &Properties,
    ) -> CloudResult<String> {
        self.call(
            "create_vm",
            vec![
                json!(agent_id),
                json!(stemcell_cid),
                json!(cloud_properties),
                json!(networks),
                json!([]),
                json!(env),
            ],
        )
        .await
    }

    async fn delete_vm(&self, cid: &str) -> CloudResult<()> {
        self.call("delete_vm", vec![json!(cid)]).await
    }

    async fn has_vm(&self, cid: &str) -> CloudResult<bool> {
        self.call("has_vm", vec![json!(cid)]).await
    }

    async fn create_disk(
        &self,
        size: u64,
        cloud_properties: &Properties,
        vm_cid: &str,
    ) -> CloudResult<String> {
        self.call(
            "create_disk",
            vec![json!(size), json!(cloud_properties), json!(vm_cid)],
        )
        .await
    }

    async fn attach_disk(&self, vm_cid: &str, disk_cid: &str) -> CloudResult<()> {
        self.call("attach_disk", vec![json!(vm_cid), json!(disk_cid)])
            .await
    }

    async fn detach_disk(&self, vm_cid: &str, disk_cid: &str) -> CloudResult<()> {
        self.call("detach_disk", vec![json!(vm_cid), json!(disk_cid)])
            .await
    }

    async fn delete_disk(&self, cid: &str) -> CloudResult<()> {
        self.call("delete_disk", vec![json!(cid)]).await
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// A CPI stand-in: saves the request next to itself and prints `reply`.
    fn fake_cpi(dir: &Path, reply: &str, exit_code: i32) -> CpiCloud {
        let script = dir.join("cpi.sh");
        let request = dir.join("request.json");
        std::fs::write(
            &script,
            format!(
                "cat > '{}'\nprintf '%s' '{reply}'\necho 'cpi diagnostics' >&2\nexit {exit_code}\n",
                request.display()
            ),
        )
        .unwrap();

        CpiCloud::new(&CpiConfig {
            binary: PathBuf::from("/bin/sh"),
            args: vec![script.display().to_string()],
            director_uuid: "director-1".to_owned(),
        })
    }

    fn saved_request(dir: &Path) -> Value {
        serde_json::from_slice(&std::fs::read(dir.join("request.json")).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn create_vm_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = fake_cpi(dir.path(), r#"{"result":"vm-123","error":null,"log":""}"#, 0);

        let mut props = Properties::new();
        props.insert("instance_type".to_owned(), json!("m1.small"));

        let cid = cloud
            .create_vm("agent-1", "sc-1", &props, &Properties::new(), &Properties::new())
            .await
            .unwrap();
        assert_eq!(cid, "vm-123");

        let request = saved_request(dir.path());
        assert_eq!(request["method"], "create_vm");
        assert_eq!(request["context"]["director_uuid"], "director-1");
        assert_eq!(
            request["arguments"],
            json!(["agent-1", "sc-1", {"instance_type": "m1.small"}, {}, [], {}])
        );
    }

    #[tokio::test]
    async fn unit_results_accept_null() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = fake_cpi(dir.path(), r#"{"result":null,"error":null,"log":"detached"}"#, 0);

        cloud.detach_disk("vm-1", "disk-1").await.unwrap();
        assert_eq!(saved_request(dir.path())["arguments"], json!(["vm-1", "disk-1"]));
    }

    #[tokio::test]
    async fn error_body_becomes_cloud_error() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = fake_cpi(
            dir.path(),
            r#"{"result":null,"error":{"type":"Bosh::Clouds::VMNotFound","message":"vm-9 missing","ok_to_retry":true},"log":""}"#,
            0,
        );

        let err = cloud.has_vm("vm-9").await.unwrap_err();
        assert_eq!(err.method, "has_vm");
        assert_eq!(err.message, "Bosh::Clouds::VMNotFound: vm-9 missing");
        assert!(err.ok_to_retry);
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = fake_cpi(dir.path(), "", 3);

        let err = cloud.delete_disk("disk-1").await.unwrap_err();
        assert!(err.message.contains("cpi diagnostics"));
        assert!(!err.ok_to_retry);
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let cloud = CpiCloud::new(&CpiConfig {
            binary: PathBuf::from("/nonexistent/cpi"),
            args: Vec::new(),
            director_uuid: "director-1".to_owned(),
        });

        let err = cloud.delete_vm("vm-1").await.unwrap_err();
        assert!(err.message.contains("failed to spawn"));
    }
}
