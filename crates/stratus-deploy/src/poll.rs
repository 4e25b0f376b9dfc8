//! Bounded polling.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{DeployError, DeployResult};

/// Interval and deadline of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Outcome of a single polling attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The condition holds; stop polling.
    Ready(T),
    /// Not yet; the string describes what was observed.
    Pending(String),
}

/// Call `attempt` until it reports [`Attempt::Ready`] or the policy's
/// deadline passes.
///
/// At least one attempt is always made. An `Err` from `attempt` aborts the
/// loop immediately; callers that want to retry on errors map them to
/// [`Attempt::Pending`] themselves. Running out of time yields
/// [`DeployError::Timeout`] carrying the last observed status.
pub async fn until<T, F, Fut>(operation: &str, policy: PollPolicy, mut attempt: F) -> DeployResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DeployResult<Attempt<T>>>,
{
    let start = Instant::now();
    let deadline = start + policy.timeout;

    loop {
        let last_status = match attempt().await? {
            Attempt::Ready(value) => return Ok(value),
            Attempt::Pending(status) => status,
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(DeployError::Timeout {
                operation: operation.to_owned(),
                waited: now.duration_since(start),
                last_status,
            });
        }

        debug!(operation, status = %last_status, "not ready yet");
        tokio::time::sleep(policy.interval.min(deadline - now)).await;
    }
}
