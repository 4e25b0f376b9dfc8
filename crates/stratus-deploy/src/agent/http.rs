//! mbus HTTP client for the in-VM agent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::AgentConfig;
use crate::error::{DeployError, DeployResult};
use crate::poll::{self, Attempt, PollPolicy};

use super::{AgentClient, AgentError, AgentResult, AgentState};

#[derive(Serialize)]
struct AgentRequest<'a> {
    method: &'a str,
    arguments: Vec<Value>,
    reply_to: &'a str,
}

#[derive(Deserialize)]
struct AgentResponse {
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    exception: Option<AgentException>,
}

#[derive(Deserialize)]
struct AgentException {
    message: String,
}

/// Handle returned by long-running agent methods.
#[derive(Deserialize)]
struct TaskHandle {
    agent_task_id: String,
    state: String,
}

impl TaskHandle {
    fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value::<Self>(value.clone())
            .ok()
            .filter(|task| task.state == "running")
    }
}

/// Agent client speaking JSON over HTTP to `{mbus}/agent`.
///
/// Credentials embedded in the mbus URL are sent as HTTP basic auth, never as
/// part of the request URL.
#[derive(Clone)]
pub struct HttpAgentClient {
    client: Client,
    endpoint: Url,
    username: String,
    password: Option<String>,
    reply_to: String,
    task_policy: PollPolicy,
}

impl HttpAgentClient {
    /// Create a client for the agent reachable at `mbus`.
    pub fn new(mbus: &str, config: &AgentConfig) -> DeployResult<Self> {
        let mut url = Url::parse(mbus)
            .map_err(|e| DeployError::config(format!("invalid mbus URL: {e}")))?;

        let username = url.username().to_owned();
        let password = url.password().map(ToOwned::to_owned);
        url.set_username("")
            .and_then(|()| url.set_password(None))
            .map_err(|()| DeployError::config("mbus URL cannot carry credentials"))?;

        let endpoint = Url::parse(&format!("{}/agent", url.as_str().trim_end_matches('/')))
            .map_err(|e| DeployError::config(format!("invalid mbus URL: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DeployError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            username,
            password,
            reply_to: format!("stratus-{}", ulid::Ulid::new().to_string().to_lowercase()),
            task_policy: config.task_policy(),
        })
    }

    /// Send one request and return the reply's `value`.
    async fn send(&self, method: &str, arguments: Vec<Value>) -> AgentResult<Value> {
        let request = AgentRequest {
            method,
            arguments,
            reply_to: &self.reply_to,
        };

        let mut builder = self.client.post(self.endpoint.clone()).json(&request);
        if !self.username.is_empty() {
            builder = builder.basic_auth(&self.username, self.password.as_deref());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AgentError::new(method, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::new(method, format!("unexpected status {status}")));
        }

        let reply: AgentResponse = response
            .json()
            .await
            .map_err(|e| AgentError::new(method, format!("malformed response: {e}")))?;

        if let Some(exception) = reply.exception {
            return Err(AgentError::new(method, exception.message));
        }

        Ok(reply.value.unwrap_or(Value::Null))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, arguments: Vec<Value>) -> AgentResult<T> {
        let value = self.send(method, arguments).await?;
        serde_json::from_value(value)
            .map_err(|e| AgentError::new(method, format!("unexpected value: {e}")))
    }

    /// Run a long-running method and poll its task until it finishes.
    ///
    /// A task still running at the policy deadline fails with
    /// [`AgentError::timeout`].
    async fn run_task(&self, method: &str, arguments: Vec<Value>) -> AgentResult<Value> {
        let value = self.send(method, arguments).await?;
        let Some(task) = TaskHandle::from_value(&value) else {
            return Ok(value);
        };

        let task_id = task.agent_task_id.as_str();
        let operation = format!("agent task {method}");
        poll::until(&operation, self.task_policy, move || async move {
            let value = self
                .send("get_task", vec![json!(task_id)])
                .await
                .map_err(|e| AgentError::new(method, e.message))?;

            Ok(match TaskHandle::from_value(&value) {
                Some(task) => {
                    debug!(method, task_id = %task.agent_task_id, "agent task running");
                    Attempt::Pending(format!("task {} is {}", task.agent_task_id, task.state))
                }
                None => Attempt::Ready(value),
            })
        })
        .await
        .map_err(|e| match e {
            DeployError::Timeout {
                waited,
                last_status,
                ..
            } => AgentError::timeout(method, waited, last_status),
            DeployError::Agent(e) => e,
            other => AgentError::new(method, other.to_string()),
        })
    }
}

impl std::fmt::Debug for HttpAgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAgentClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn ping(&self) -> AgentResult<()> {
        self.send("ping", Vec::new()).await.map(drop)
    }

    async fn stop(&self) -> AgentResult<()> {
        self.run_task("stop", Vec::new()).await.map(drop)
    }

    async fn start(&self) -> AgentResult<()> {
        self.send("start", Vec::new()).await.map(drop)
    }

    async fn apply(&self, spec: &Value) -> AgentResult<()> {
        self.run_task("apply", vec![spec.clone()]).await.map(drop)
    }

    async fn get_state(&self) -> AgentResult<AgentState> {
        self.call("get_state", Vec::new()).await
    }

    async fn mount_disk(&self, disk_cid: &str) -> AgentResult<()> {
        self.run_task("mount_disk", vec![json!(disk_cid)])
            .await
            .map(drop)
    }

    async fn unmount_disk(&self, disk_cid: &str) -> AgentResult<()> {
        self.run_task("unmount_disk", vec![json!(disk_cid)])
            .await
            .map(drop)
    }

    async fn list_disk(&self) -> AgentResult<Vec<String>> {
        self.call("list_disk", Vec::new()).await
    }

    async fn migrate_disk(&self) -> AgentResult<()> {
        self.run_task("migrate_disk", Vec::new()).await.map(drop)
    }
}
