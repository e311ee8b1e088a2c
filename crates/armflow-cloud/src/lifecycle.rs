//! Lifecycle operations
//!
//! `create`, `update`, `delete` and `pull` each run once per orchestrator
//! invocation. Everything they need from earlier invocations is read back
//! from the instance state store.

use crate::drift::{DriftCalculator, DriftRecord};
use crate::error::{CloudError, Result};
use crate::identity::{ResourceIdentity, ResourceKind};
use crate::lro::{Completion, LroDriver, LroOperation, RetrySignal, Step};
use crate::naming::NameResolver;
use crate::policy::{self, ExistencePolicyEngine, ReconciliationOutcome, ResourcePolicy};
use crate::provider::{self, Lookup, ProviderClient, WhatIfChange};
use crate::state::{self, InstanceStateStore, keys};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_WHAT_IF_BUDGET: Duration = Duration::from_secs(30 * 60);

/// A declared resource, as handed to a lifecycle operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    pub kind: ResourceKind,

    #[serde(default)]
    pub resource_group: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub policy: ResourcePolicy,

    /// Request body for `create_or_update`; the template for deployments
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Wait between polls, overriding the provider's `Retry-After`
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

impl ResourceDeclaration {
    pub fn new(kind: ResourceKind, resource_group: Option<String>, name: Option<String>) -> Self {
        Self {
            kind,
            resource_group,
            name,
            policy: ResourcePolicy::default(),
            payload: serde_json::Value::Null,
            poll_interval_secs: None,
        }
    }

    pub fn with_policy(mut self, policy: ResourcePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(
            self.kind.clone(),
            self.resource_group.clone(),
            self.name.clone(),
        )
    }
}

/// Outcome of a `pull` invocation
#[derive(Debug, Clone, PartialEq)]
pub enum PullStep {
    Drift(DriftRecord),
    RetryLater(RetrySignal),
}

/// Runs lifecycle operations against a provider
#[derive(Debug, Clone, Copy)]
pub struct LifecycleEngine {
    driver: LroDriver,
    resolver: NameResolver,
    what_if_budget: Duration,
}

impl Default for LifecycleEngine {
    fn default() -> Self {
        Self::new(LroDriver::default(), NameResolver::default())
    }
}

impl LifecycleEngine {
    pub fn new(driver: LroDriver, resolver: NameResolver) -> Self {
        Self {
            driver,
            resolver,
            what_if_budget: DEFAULT_WHAT_IF_BUDGET,
        }
    }

    pub fn with_what_if_budget(mut self, budget: Duration) -> Self {
        self.what_if_budget = budget;
        self
    }

    fn driver_for(&self, declaration: &ResourceDeclaration) -> LroDriver {
        self.driver
            .with_interval_override(declaration.poll_interval_secs.map(Duration::from_secs))
    }

    /// Identity recorded by an earlier invocation
    pub async fn stored_identity(
        &self,
        store: &dyn InstanceStateStore,
    ) -> Result<Option<ResourceIdentity>> {
        let kind: Option<ResourceKind> = state::load(store, keys::KIND).await?;
        let name: Option<String> = state::load(store, keys::NAME).await?;
        let group: Option<String> = state::load(store, keys::RESOURCE_GROUP).await?;

        Ok(match (kind, name) {
            (Some(kind), Some(name)) => Some(ResourceIdentity::new(kind, group, Some(name))),
            _ => None,
        })
    }

    /// Create (or adopt) the declared resource
    pub async fn create(
        &self,
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
        declaration: &ResourceDeclaration,
    ) -> Result<Step> {
        let driver = self.driver_for(declaration);
        declaration.policy.validate(declaration.name.as_deref())?;

        let stored = self.stored_identity(store).await?;
        if let (Some(stored), Some(declared)) = (&stored, &declaration.name) {
            if stored.name.as_deref() != Some(declared.as_str()) {
                tracing::warn!(
                    "Ignoring declared name {}; instance already resolved {}",
                    declared,
                    stored
                );
            }
        }

        if driver.pending(store, LroOperation::Create).await?.is_some() {
            let identity = stored.ok_or_else(|| {
                CloudError::StateError("operation in flight without a recorded identity".into())
            })?;
            let step = driver
                .create_or_update(client, store, &identity, &declaration.payload, LroOperation::Create)
                .await?;
            return self.finish_apply(client, store, &identity, step).await;
        }

        let identity = match stored.or_else(|| {
            declaration
                .name
                .as_ref()
                .filter(|n| !n.is_empty())
                .map(|_| declaration.identity())
        }) {
            Some(identity) => {
                let reconciled = ExistencePolicyEngine::reconcile(
                    client,
                    store,
                    &identity,
                    &declaration.policy,
                    true,
                )
                .await?;
                match reconciled.outcome {
                    ReconciliationOutcome::Create => identity,
                    ReconciliationOutcome::AdoptExisting | ReconciliationOutcome::NoOp => {
                        let body = reconciled
                            .existing
                            .map(|r| r.body)
                            .unwrap_or(serde_json::Value::Null);
                        self.record_baseline(store, &identity, &body).await?;
                        return Ok(Step::Completed(Completion::Resource(body)));
                    }
                    ReconciliationOutcome::Fail => {
                        return Err(CloudError::ExternalResourceMissing(identity.to_string()));
                    }
                }
            }
            None => {
                let template = declaration.identity();
                let name = self
                    .resolver
                    .resolve(
                        None,
                        declaration.kind.naming_rule(),
                        declaration.kind.label(),
                        |candidate| {
                            let candidate = template.with_name(candidate);
                            async move { policy::exists(client, &candidate).await }
                        },
                    )
                    .await?;
                let identity = template.with_name(name);
                policy::record_identity(store, &identity).await?;
                identity
            }
        };

        state::save(store, keys::SUBMITTED, &true).await?;
        let step = driver
            .create_or_update(client, store, &identity, &declaration.payload, LroOperation::Create)
            .await?;
        self.finish_apply(client, store, &identity, step).await
    }

    /// Re-apply the declared payload to the recorded resource
    pub async fn update(
        &self,
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
        declaration: &ResourceDeclaration,
    ) -> Result<Step> {
        let identity = self.stored_identity(store).await?.ok_or_else(|| {
            CloudError::InvalidConfig("update called before the resource was created".into())
        })?;

        if state::flag(store, keys::EXTERNAL).await?
            && !declaration.policy.modify_external_resource
        {
            tracing::warn!(
                "{} is an external resource and modify_external_resource is not set; skipping update",
                identity
            );
            return Ok(Step::Completed(Completion::Done));
        }

        let step = self
            .driver_for(declaration)
            .create_or_update(client, store, &identity, &declaration.payload, LroOperation::Update)
            .await?;
        self.finish_apply(client, store, &identity, step).await
    }

    /// Delete the recorded resource; clears the instance state once it is gone
    pub async fn delete(
        &self,
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
    ) -> Result<Step> {
        let Some(identity) = self.stored_identity(store).await? else {
            tracing::info!("No resource recorded for this instance; nothing to delete");
            store.clear().await?;
            return Ok(Step::Completed(Completion::Absent));
        };

        if state::flag(store, keys::EXTERNAL).await? {
            tracing::info!("{} is an external resource; leaving it in place", identity);
            store.clear().await?;
            return Ok(Step::Completed(Completion::Done));
        }

        let step = self.driver.delete(client, store, &identity).await?;
        if step.is_completed() {
            tracing::info!("{} deleted", identity);
            store.clear().await?;
        }
        Ok(step)
    }

    /// Compute drift between the recorded baseline and the live resource group
    pub async fn pull(
        &self,
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
        declaration: &ResourceDeclaration,
    ) -> Result<PullStep> {
        let stored = self.stored_identity(store).await?;
        let identity = stored.unwrap_or_else(|| declaration.identity());
        let group = match (&identity.kind, &identity.resource_group, &identity.name) {
            (ResourceKind::ResourceGroup, _, Some(name)) => name.clone(),
            (_, Some(group), _) => group.clone(),
            _ => {
                return Err(CloudError::InvalidConfig(format!(
                    "{} has no resource group to inspect",
                    identity
                )));
            }
        };

        let baseline: Vec<String> = state::load(store, keys::RESOURCE_IDS)
            .await?
            .unwrap_or_default();

        let live = client.list_resource_ids(&group).await?;
        let Lookup::Found(live) = live else {
            tracing::warn!("Resource group {} no longer exists", group);
            let record = DriftCalculator::calculate(&baseline, None, &[]);
            self.forget_what_if(store).await?;
            state::save(store, keys::STATE, &record.state).await?;
            return Ok(PullStep::Drift(record));
        };

        let changes = if identity.kind == ResourceKind::Deployment && identity.name.is_some() {
            match self.run_what_if(client, store, declaration, &identity).await? {
                WhatIf::Done(changes) => changes,
                WhatIf::Pending(signal) => return Ok(PullStep::RetryLater(signal)),
            }
        } else {
            Vec::new()
        };

        let record = DriftCalculator::calculate(&baseline, Some(&live), &changes);
        if record.is_drifted {
            tracing::warn!(
                "Drift detected in {}: {} of {} baseline resources confirmed",
                group,
                record.state.len(),
                baseline.len()
            );
        }
        state::save(store, keys::STATE, &record.state).await?;
        Ok(PullStep::Drift(record))
    }

    async fn run_what_if(
        &self,
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
        declaration: &ResourceDeclaration,
        deployment: &ResourceIdentity,
    ) -> Result<WhatIf> {
        let started: Option<DateTime<Utc>> = state::load(store, keys::WHAT_IF_STARTED_AT).await?;
        let started = match started {
            Some(at) => at,
            None => {
                let now = Utc::now();
                state::save(store, keys::WHAT_IF_STARTED_AT, &now).await?;
                now
            }
        };

        let elapsed = Utc::now()
            .signed_duration_since(started)
            .to_std()
            .unwrap_or_default();
        if elapsed > self.what_if_budget {
            self.forget_what_if(store).await?;
            return Err(CloudError::Timeout(format!(
                "what-if for {} exceeded {}s",
                deployment,
                self.what_if_budget.as_secs()
            )));
        }

        let driver = self.driver_for(declaration);
        let step = match driver
            .what_if(client, store, deployment, &declaration.payload)
            .await
        {
            Ok(step) => step,
            Err(e) => {
                // The budget keeps running while a preview is still being polled
                if driver.pending(store, LroOperation::WhatIf).await?.is_none() {
                    store.delete(keys::WHAT_IF_STARTED_AT).await?;
                }
                return Err(e);
            }
        };

        match step {
            Step::RetryLater(signal) => Ok(WhatIf::Pending(signal)),
            Step::Completed(completion) => {
                store.delete(keys::WHAT_IF_STARTED_AT).await?;
                let changes = match completion.resource() {
                    Some(body) => provider::parse_what_if(body)?,
                    None => Vec::new(),
                };
                Ok(WhatIf::Done(changes))
            }
        }
    }

    async fn forget_what_if(&self, store: &dyn InstanceStateStore) -> Result<()> {
        if let Some(handle) = self.driver.pending(store, LroOperation::WhatIf).await? {
            tracing::debug!("Dropping what-if handle {}", handle.request_id);
            store.delete(keys::WHAT_IF_OPERATION).await?;
        }
        store.delete(keys::WHAT_IF_STARTED_AT).await
    }

    /// Record the resource id and drift baseline once an apply completes
    async fn finish_apply(
        &self,
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
        identity: &ResourceIdentity,
        step: Step,
    ) -> Result<Step> {
        let completion = match step {
            Step::RetryLater(signal) => {
                tracing::info!("{}; retry in {}s", signal.reason, signal.after.as_secs());
                return Ok(Step::RetryLater(signal));
            }
            Step::Completed(completion) => completion,
        };

        let body = match completion {
            Completion::Resource(body) if body.get("id").and_then(|v| v.as_str()).is_some() => {
                body
            }
            _ => match provider::probe(client, identity).await? {
                Lookup::Found(response) => response.body,
                Lookup::NotFound => {
                    return Err(CloudError::NotYetVisible(identity.to_string()));
                }
            },
        };

        self.record_baseline(store, identity, &body).await?;
        Ok(Step::Completed(Completion::Resource(body)))
    }

    async fn record_baseline(
        &self,
        store: &dyn InstanceStateStore,
        identity: &ResourceIdentity,
        body: &serde_json::Value,
    ) -> Result<()> {
        let Some(id) = body.get("id").and_then(|v| v.as_str()) else {
            return Ok(());
        };
        state::save(store, keys::RESOURCE_ID, id).await?;

        let baseline: Vec<String> = if identity.kind == ResourceKind::Deployment {
            body.pointer("/properties/outputResources")
                .and_then(|v| v.as_array())
                .map(|resources| {
                    resources
                        .iter()
                        .filter_map(|r| r.get("id").and_then(|v| v.as_str()))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        } else {
            vec![id.to_string()]
        };
        state::save(store, keys::RESOURCE_IDS, &baseline).await
    }
}

enum WhatIf {
    Done(Vec<WhatIfChange>),
    Pending(RetrySignal),
}
