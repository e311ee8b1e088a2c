//! ARM REST client
//!
//! Implements [`ProviderClient`] against the Azure Resource Manager API.
//! Every HTTP response is handed back as a [`ProviderResponse`]; status
//! interpretation is left to the engine.

use crate::credential::CredentialProvider;
use crate::error::{AzureError, Result};
use armflow_cloud::{Lookup, ProviderClient, ProviderResponse, ResourceIdentity};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

pub const ARM_API_BASE: &str = "https://management.azure.com";
const RESOURCES_API_VERSION: &str = "2021-04-01";

/// Subscription and endpoint for the client
#[derive(Debug, Clone)]
pub struct ArmConfig {
    pub subscription_id: String,
    pub api_base: String,
}

impl ArmConfig {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            api_base: ARM_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

/// Azure Resource Manager client
pub struct ArmClient {
    client: reqwest::Client,
    config: ArmConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl ArmClient {
    pub fn new(config: ArmConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        if config.subscription_id.trim().is_empty() {
            return Err(AzureError::InvalidConfig(
                "subscription id is empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("armflow/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    fn resource_url(&self, identity: &ResourceIdentity) -> Result<String> {
        let path = identity.resource_path(&self.config.subscription_id)?;
        Ok(format!(
            "{}{}?api-version={}",
            self.config.api_base,
            path,
            identity.kind.api_version()
        ))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ProviderResponse> {
        let token = self.credentials.token().await?;
        let response = request.bearer_auth(token).send().await?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };

        tracing::debug!("ARM responded {} ({} header(s))", status, headers.len());
        Ok(ProviderResponse {
            status,
            headers,
            body,
        })
    }

    async fn list_page(&self, url: &str) -> Result<ProviderResponse> {
        self.send(self.client.get(url)).await
    }
}

#[async_trait]
impl ProviderClient for ArmClient {
    fn name(&self) -> &str {
        "azure"
    }

    async fn get(&self, identity: &ResourceIdentity) -> armflow_cloud::Result<ProviderResponse> {
        let url = self.resource_url(identity)?;
        tracing::debug!("GET {}", url);
        Ok(self.send(self.client.get(&url)).await?)
    }

    async fn create_or_update(
        &self,
        identity: &ResourceIdentity,
        payload: &serde_json::Value,
    ) -> armflow_cloud::Result<ProviderResponse> {
        let url = self.resource_url(identity)?;
        tracing::debug!("PUT {}", url);
        Ok(self.send(self.client.put(&url).json(payload)).await?)
    }

    async fn delete(&self, identity: &ResourceIdentity) -> armflow_cloud::Result<ProviderResponse> {
        let url = self.resource_url(identity)?;
        tracing::debug!("DELETE {}", url);
        Ok(self.send(self.client.delete(&url)).await?)
    }

    async fn poll(&self, poll_url: &str) -> armflow_cloud::Result<ProviderResponse> {
        if !poll_url.starts_with(&self.config.api_base) {
            tracing::warn!("Polling URL outside the management endpoint: {}", poll_url);
        }
        Ok(self.send(self.client.get(poll_url)).await?)
    }

    async fn what_if(
        &self,
        deployment: &ResourceIdentity,
        template: &serde_json::Value,
    ) -> armflow_cloud::Result<ProviderResponse> {
        let path = deployment.resource_path(&self.config.subscription_id)?;
        let url = format!(
            "{}{}/whatIf?api-version={}",
            self.config.api_base,
            path,
            deployment.kind.api_version()
        );
        let body = what_if_request(template);
        tracing::debug!("POST {}", url);
        Ok(self.send(self.client.post(&url).json(&body)).await?)
    }

    async fn list_resource_ids(
        &self,
        resource_group: &str,
    ) -> armflow_cloud::Result<Lookup<Vec<String>>> {
        let mut url = format!(
            "{}/subscriptions/{}/resourceGroups/{}/resources?api-version={}",
            self.config.api_base, self.config.subscription_id, resource_group, RESOURCES_API_VERSION
        );
        let mut ids = Vec::new();

        loop {
            let response = self.list_page(&url).await?;
            let response = match armflow_cloud::provider::lookup(response)? {
                Lookup::Found(response) => response,
                Lookup::NotFound => return Ok(Lookup::NotFound),
            };
            let page: ResourceListPage = serde_json::from_value(response.body)?;
            ids.extend(page.value.into_iter().map(|r| r.id));

            match page.next_link {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }

        Ok(Lookup::Found(ids))
    }
}

/// Wrap a bare template into a what-if request body
fn what_if_request(template: &serde_json::Value) -> serde_json::Value {
    if template.get("properties").is_some() {
        template.clone()
    } else {
        serde_json::json!({
            "properties": {
                "mode": "Incremental",
                "template": template,
            }
        })
    }
}

// ============ API Types ============

#[derive(Debug, Deserialize)]
struct ResourceListPage {
    #[serde(default)]
    value: Vec<ResourceSummary>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceSummary {
    id: String,
}
