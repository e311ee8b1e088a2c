//! Provider client trait definition

use crate::error::{CloudError, Result};
use crate::identity::ResourceIdentity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const HEADER_ASYNC_OPERATION: &str = "azure-asyncoperation";
pub const HEADER_LOCATION: &str = "location";
pub const HEADER_RETRY_AFTER: &str = "retry-after";
pub const HEADER_REQUEST_ID: &str = "x-ms-request-id";

/// Management API abstraction
///
/// Implementations return every HTTP response as a [`ProviderResponse`],
/// whatever its status; only transport failures are reported as errors.
/// Interpreting statuses is the job of the long-running-operation driver.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Returns the provider name (e.g., "azure")
    fn name(&self) -> &str;

    /// Read a resource
    async fn get(&self, identity: &ResourceIdentity) -> Result<ProviderResponse>;

    /// Create a resource or replace its configuration
    async fn create_or_update(
        &self,
        identity: &ResourceIdentity,
        payload: &serde_json::Value,
    ) -> Result<ProviderResponse>;

    /// Delete a resource
    async fn delete(&self, identity: &ResourceIdentity) -> Result<ProviderResponse>;

    /// Follow a poll URL returned by an earlier call
    async fn poll(&self, poll_url: &str) -> Result<ProviderResponse>;

    /// Preview the changes a deployment would make without applying them
    async fn what_if(
        &self,
        deployment: &ResourceIdentity,
        template: &serde_json::Value,
    ) -> Result<ProviderResponse>;

    /// Ids of all resources currently in a resource group
    ///
    /// `NotFound` means the resource group itself no longer exists.
    async fn list_resource_ids(&self, resource_group: &str) -> Result<Lookup<Vec<String>>>;
}

/// Raw provider response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub status: u16,

    /// Header names are lower-cased
    pub headers: HashMap<String, String>,

    /// Decoded JSON body; `Null` when the body is empty
    pub body: serde_json::Value,
}

impl ProviderResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// `Retry-After` in seconds, when present and numeric
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.header(HEADER_RETRY_AFTER)
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// Provider error message from an ARM error envelope, or the raw body
    pub fn error_message(&self) -> String {
        self.body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.body_text())
    }

    pub fn body_text(&self) -> String {
        match &self.body {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// The `id` property of the body
    pub fn resource_id(&self) -> Option<&str> {
        self.body.get("id").and_then(|v| v.as_str())
    }
}

/// Result of an existence probe
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn exists(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
        }
    }
}

/// Separate "absent" from real failures in a `get` response
pub fn lookup(response: ProviderResponse) -> Result<Lookup<ProviderResponse>> {
    match response.status {
        404 => Ok(Lookup::NotFound),
        s if (200..300).contains(&s) => Ok(Lookup::Found(response)),
        status => Err(CloudError::Provider {
            status,
            message: response.error_message(),
        }),
    }
}

/// Probe whether a resource exists
pub async fn probe(
    client: &dyn ProviderClient,
    identity: &ResourceIdentity,
) -> Result<Lookup<ProviderResponse>> {
    let response = client.get(identity).await?;
    tracing::debug!("Probed {}: status {}", identity, response.status);
    lookup(response)
}

/// Change type reported by a what-if preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Create,
    Delete,
    Deploy,
    Ignore,
    Modify,
    NoChange,
    Unsupported,
}

impl ChangeType {
    /// The provider still considers the resource present
    pub fn keeps_resource(&self) -> bool {
        matches!(self, ChangeType::NoChange | ChangeType::Modify)
    }
}

/// One entry of a what-if preview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfChange {
    pub resource_id: String,
    pub change_type: ChangeType,
}

impl WhatIfChange {
    pub fn new(resource_id: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            resource_id: resource_id.into(),
            change_type,
        }
    }
}

/// Extract the change list from a completed what-if body
///
/// Accepts both the operation-result envelope (`properties.changes`) and a
/// bare `changes` array.
pub fn parse_what_if(body: &serde_json::Value) -> Result<Vec<WhatIfChange>> {
    let changes = body
        .get("properties")
        .and_then(|p| p.get("changes"))
        .or_else(|| body.get("changes"));

    match changes {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(Vec::new()),
    }
}
