//! Long-running operation driver
//!
//! A provider call either finishes in its first response or hands back a
//! poll URL. The driver never sleeps waiting for completion: when an
//! operation is still running it persists an [`AsyncOperationHandle`] in the
//! instance state and returns [`Step::RetryLater`]. The orchestrator
//! re-invokes the lifecycle operation after the suggested wait, and the
//! driver then polls the stored URL instead of submitting the mutation again.
//!
//! ```text
//! Idle ──submit──▶ Requested ──┬──▶ Completed
//!                              ├──▶ Failed
//!                              └──▶ Polling ──┬──▶ Completed
//!                                     ▲       ├──▶ Failed
//!                                     └───────┘
//! ```

use crate::error::{CloudError, Result};
use crate::identity::ResourceIdentity;
use crate::provider::{
    self, HEADER_ASYNC_OPERATION, HEADER_LOCATION, HEADER_REQUEST_ID, Lookup, ProviderClient,
    ProviderResponse,
};
use crate::state::{self, InstanceStateStore, keys};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

const REQUEST_ID_NOT_REPORTED: &str = "not-reported";

const IN_PROGRESS_STATES: &[&str] = &[
    "inprogress",
    "running",
    "accepted",
    "creating",
    "updating",
    "deleting",
];
const FAILED_STATES: &[&str] = &["failed", "canceled", "cancelled"];

/// Logical provider call driven to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LroOperation {
    Create,
    Update,
    Delete,
    Get,
    WhatIf,
}

impl std::fmt::Display for LroOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LroOperation::Create => write!(f, "create"),
            LroOperation::Update => write!(f, "update"),
            LroOperation::Delete => write!(f, "delete"),
            LroOperation::Get => write!(f, "get"),
            LroOperation::WhatIf => write!(f, "what-if"),
        }
    }
}

impl LroOperation {
    /// State key holding this operation's handle
    pub fn state_key(self) -> &'static str {
        match self {
            LroOperation::WhatIf => keys::WHAT_IF_OPERATION,
            _ => keys::ASYNC_OPERATION,
        }
    }
}

/// An operation in flight, persisted across re-invocations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncOperationHandle {
    pub poll_url: String,
    pub request_id: String,
    pub retry_after_seconds: u64,
    pub operation: LroOperation,
    pub started_at: DateTime<Utc>,
}

/// Terminal result of a driven operation
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Final response body
    Resource(serde_json::Value),
    /// The resource does not exist
    Absent,
    /// Finished without a body
    Done,
}

impl Completion {
    pub fn resource(&self) -> Option<&serde_json::Value> {
        match self {
            Completion::Resource(body) => Some(body),
            _ => None,
        }
    }
}

/// Request to re-invoke the operation no sooner than `after`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySignal {
    pub after: Duration,
    pub reason: String,
}

/// Outcome of one invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Completed(Completion),
    RetryLater(RetrySignal),
}

impl Step {
    pub fn is_completed(&self) -> bool {
        matches!(self, Step::Completed(_))
    }
}

/// State transition implied by one response
#[derive(Debug)]
pub enum Transition {
    Complete(Completion),
    /// Keep polling; carries the poll URL found in the response, if any
    Poll(Option<String>),
    Fail(CloudError),
}

/// Map a response to a transition
///
/// `polling` is true when the response came from a poll URL rather than
/// from the original request.
pub fn classify(operation: LroOperation, response: &ProviderResponse, polling: bool) -> Transition {
    let status = response.status;
    match status {
        200 | 201 if polling => classify_poll_body(response),
        200 => match response.header(HEADER_ASYNC_OPERATION) {
            Some(url) => Transition::Poll(Some(url.to_string())),
            None => Transition::Complete(completion_from_body(response)),
        },
        201 => match response
            .header(HEADER_ASYNC_OPERATION)
            .or_else(|| response.header(HEADER_LOCATION))
        {
            Some(url) => Transition::Poll(Some(url.to_string())),
            None => Transition::Complete(completion_from_body(response)),
        },
        202 if polling => Transition::Poll(None),
        202 => match response
            .header(HEADER_LOCATION)
            .or_else(|| response.header(HEADER_ASYNC_OPERATION))
        {
            Some(url) => Transition::Poll(Some(url.to_string())),
            None => Transition::Fail(CloudError::MissingPollLocation { status }),
        },
        204 => Transition::Complete(Completion::Done),
        400 => Transition::Fail(CloudError::BadRequest {
            status,
            body: response.body_text(),
        }),
        404 if matches!(operation, LroOperation::Get | LroOperation::Delete) => {
            Transition::Complete(Completion::Absent)
        }
        409 => Transition::Fail(CloudError::Conflict {
            status,
            body: response.body_text(),
        }),
        500 if polling => Transition::Poll(None),
        _ => Transition::Fail(CloudError::UnexpectedStatus {
            status,
            body: response.body_text(),
        }),
    }
}

fn classify_poll_body(response: &ProviderResponse) -> Transition {
    let state = response
        .body
        .get("status")
        .and_then(|s| s.as_str())
        .map(str::to_ascii_lowercase);

    match state.as_deref() {
        Some(s) if IN_PROGRESS_STATES.contains(&s) => Transition::Poll(None),
        Some(s) if FAILED_STATES.contains(&s) => {
            Transition::Fail(CloudError::OperationFailed(response.error_message()))
        }
        _ => Transition::Complete(completion_from_body(response)),
    }
}

fn completion_from_body(response: &ProviderResponse) -> Completion {
    if response.body.is_null() {
        Completion::Done
    } else {
        Completion::Resource(response.body.clone())
    }
}

/// Drives provider calls through the long-running-operation state machine
#[derive(Debug, Clone, Copy)]
pub struct LroDriver {
    default_interval: Duration,
    interval_override: Option<Duration>,
}

impl Default for LroDriver {
    fn default() -> Self {
        Self {
            default_interval: DEFAULT_POLL_INTERVAL,
            interval_override: None,
        }
    }
}

impl LroDriver {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            interval_override: None,
        }
    }

    /// Per-node wait that takes precedence over `Retry-After`
    pub fn with_interval_override(mut self, interval: Option<Duration>) -> Self {
        self.interval_override = interval;
        self
    }

    /// Override, else `Retry-After`, else the default
    pub fn wait_for(&self, response: &ProviderResponse) -> Duration {
        self.interval_override
            .or_else(|| response.retry_after_secs().map(Duration::from_secs))
            .unwrap_or(self.default_interval)
    }

    /// The handle in flight for `operation`, discarding one left by another operation
    pub async fn pending(
        &self,
        store: &dyn InstanceStateStore,
        operation: LroOperation,
    ) -> Result<Option<AsyncOperationHandle>> {
        let key = operation.state_key();
        let handle: Option<AsyncOperationHandle> = state::load(store, key).await?;
        match handle {
            Some(h) if h.operation != operation => {
                tracing::warn!(
                    "Discarding {} operation handle (request {}) while running {}",
                    h.operation,
                    h.request_id,
                    operation
                );
                store.delete(key).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Submit `request`, or poll the operation already in flight
    pub async fn drive<F, Fut>(
        &self,
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
        operation: LroOperation,
        label: &str,
        request: F,
    ) -> Result<Step>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ProviderResponse>>,
    {
        if let Some(handle) = self.pending(store, operation).await? {
            return self.resume(client, store, handle, label).await;
        }

        tracing::info!("Submitting {} of {}", operation, label);
        let response = request().await?;
        self.settle(store, operation, label, &response, None).await
    }

    async fn resume(
        &self,
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
        handle: AsyncOperationHandle,
        label: &str,
    ) -> Result<Step> {
        tracing::debug!(
            "Polling {} of {} at {} (request {})",
            handle.operation,
            label,
            handle.poll_url,
            handle.request_id
        );
        // A transport failure leaves the handle in place: nothing terminal was observed.
        let response = client.poll(&handle.poll_url).await?;
        if response.status == 500 {
            tracing::warn!(
                "Transient 500 while polling {} of {}; keeping handle",
                handle.operation,
                label
            );
        }
        self.settle(store, handle.operation, label, &response, Some(&handle))
            .await
    }

    async fn settle(
        &self,
        store: &dyn InstanceStateStore,
        operation: LroOperation,
        label: &str,
        response: &ProviderResponse,
        current: Option<&AsyncOperationHandle>,
    ) -> Result<Step> {
        match classify(operation, response, current.is_some()) {
            Transition::Complete(completion) => {
                if current.is_some() {
                    store.delete(operation.state_key()).await?;
                }
                tracing::info!("{} of {} completed", operation, label);
                Ok(Step::Completed(completion))
            }
            Transition::Poll(url) => {
                let poll_url = match (current, url) {
                    (Some(h), _) => h.poll_url.clone(),
                    (None, Some(url)) => url,
                    (None, None) => {
                        return Err(CloudError::MissingPollLocation {
                            status: response.status,
                        });
                    }
                };
                let wait = self.wait_for(response);
                let request_id = response
                    .header(HEADER_REQUEST_ID)
                    .map(str::to_string)
                    .or_else(|| current.map(|h| h.request_id.clone()))
                    .unwrap_or_else(|| REQUEST_ID_NOT_REPORTED.to_string());
                let handle = AsyncOperationHandle {
                    poll_url,
                    request_id,
                    retry_after_seconds: wait.as_secs(),
                    operation,
                    started_at: current.map(|h| h.started_at).unwrap_or_else(Utc::now),
                };
                state::save(store, operation.state_key(), &handle).await?;

                Ok(Step::RetryLater(RetrySignal {
                    after: wait,
                    reason: format!(
                        "{} of {} in progress (request {})",
                        operation, label, handle.request_id
                    ),
                }))
            }
            Transition::Fail(error) => {
                if current.is_some() {
                    store.delete(operation.state_key()).await?;
                }
                tracing::warn!("{} of {} failed: {}", operation, label, error);
                Err(error)
            }
        }
    }

    /// Read a resource; a 404 completes as [`Completion::Absent`]
    pub async fn get(
        &self,
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
        identity: &ResourceIdentity,
    ) -> Result<Step> {
        let label = identity.to_string();
        self.drive(client, store, LroOperation::Get, &label, || {
            client.get(identity)
        })
        .await
    }

    /// Create or update a resource with `payload`
    pub async fn create_or_update(
        &self,
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
        identity: &ResourceIdentity,
        payload: &serde_json::Value,
        operation: LroOperation,
    ) -> Result<Step> {
        let label = identity.to_string();
        self.drive(client, store, operation, &label, || {
            client.create_or_update(identity, payload)
        })
        .await
    }

    /// Delete a resource, completing immediately when it is already gone
    pub async fn delete(
        &self,
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
        identity: &ResourceIdentity,
    ) -> Result<Step> {
        let label = identity.to_string();
        if let Some(handle) = self.pending(store, LroOperation::Delete).await? {
            return self.resume(client, store, handle, &label).await;
        }

        if let Lookup::NotFound = provider::probe(client, identity).await? {
            tracing::info!("{} does not exist; nothing to delete", label);
            return Ok(Step::Completed(Completion::Absent));
        }

        self.drive(client, store, LroOperation::Delete, &label, || {
            client.delete(identity)
        })
        .await
    }

    /// Run a what-if preview of `template` against a deployment
    pub async fn what_if(
        &self,
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
        deployment: &ResourceIdentity,
        template: &serde_json::Value,
    ) -> Result<Step> {
        let label = deployment.to_string();
        self.drive(client, store, LroOperation::WhatIf, &label, || {
            client.what_if(deployment, template)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn poll_url(t: Transition) -> Option<String> {
        match t {
            Transition::Poll(url) => url,
            other => panic!("expected poll, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_initial_responses() {
        let ok = ProviderResponse::new(200).with_body(json!({"id": "/x"}));
        assert!(matches!(
            classify(LroOperation::Create, &ok, false),
            Transition::Complete(Completion::Resource(_))
        ));

        let async_ok = ProviderResponse::new(200).with_header("Azure-AsyncOperation", "https://op");
        assert_eq!(
            poll_url(classify(LroOperation::Create, &async_ok, false)).as_deref(),
            Some("https://op")
        );

        let created = ProviderResponse::new(201);
        assert!(matches!(
            classify(LroOperation::Create, &created, false),
            Transition::Complete(Completion::Done)
        ));

        let accepted = ProviderResponse::new(202).with_header("Location", "https://loc");
        assert_eq!(
            poll_url(classify(LroOperation::Delete, &accepted, false)).as_deref(),
            Some("https://loc")
        );

        assert!(matches!(
            classify(LroOperation::Create, &ProviderResponse::new(202), false),
            Transition::Fail(CloudError::MissingPollLocation { status: 202 })
        ));
    }

    #[test]
    fn test_classify_failures() {
        let bad = ProviderResponse::new(400).with_body(json!({"error": {"message": "bad sku"}}));
        match classify(LroOperation::Create, &bad, false) {
            Transition::Fail(e @ CloudError::BadRequest { .. }) => {
                assert!(!e.is_recoverable());
                assert!(e.to_string().contains("bad sku"));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            classify(LroOperation::Create, &ProviderResponse::new(409), false),
            Transition::Fail(CloudError::Conflict { .. })
        ));

        match classify(LroOperation::Create, &ProviderResponse::new(500), false) {
            Transition::Fail(e) => assert!(e.is_recoverable()),
            other => panic!("unexpected {other:?}"),
        }

        match classify(LroOperation::Create, &ProviderResponse::new(404), false) {
            Transition::Fail(e) => assert!(e.is_recoverable()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_absent() {
        assert!(matches!(
            classify(LroOperation::Get, &ProviderResponse::new(404), false),
            Transition::Complete(Completion::Absent)
        ));
    }

    #[test]
    fn test_classify_while_polling() {
        assert!(matches!(
            classify(LroOperation::Create, &ProviderResponse::new(500), true),
            Transition::Poll(None)
        ));
        assert!(matches!(
            classify(LroOperation::Create, &ProviderResponse::new(202), true),
            Transition::Poll(None)
        ));

        let running = ProviderResponse::new(200).with_body(json!({"status": "InProgress"}));
        assert!(matches!(
            classify(LroOperation::Create, &running, true),
            Transition::Poll(None)
        ));

        let failed = ProviderResponse::new(200).with_body(
            json!({"status": "Failed", "error": {"code": "QuotaExceeded", "message": "quota"}}),
        );
        match classify(LroOperation::Create, &failed, true) {
            Transition::Fail(CloudError::OperationFailed(msg)) => assert_eq!(msg, "quota"),
            other => panic!("unexpected {other:?}"),
        }

        let done = ProviderResponse::new(200).with_body(json!({"status": "Succeeded"}));
        assert!(matches!(
            classify(LroOperation::Create, &done, true),
            Transition::Complete(Completion::Resource(_))
        ));
    }

    #[test]
    fn test_wait_precedence() {
        let response = ProviderResponse::new(202).with_header("Retry-After", "5");
        assert_eq!(
            LroDriver::default().wait_for(&response),
            Duration::from_secs(5)
        );
        assert_eq!(
            LroDriver::default().wait_for(&ProviderResponse::new(202)),
            Duration::from_secs(60)
        );
        assert_eq!(
            LroDriver::default()
                .with_interval_override(Some(Duration::from_secs(2)))
                .wait_for(&response),
            Duration::from_secs(2)
        );
    }
}
