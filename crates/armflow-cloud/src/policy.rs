//! Existence policy: create, adopt, fail or leave alone

use crate::error::{CloudError, Result};
use crate::identity::ResourceIdentity;
use crate::provider::{self, Lookup, ProviderClient, ProviderResponse};
use crate::state::{self, InstanceStateStore, keys};
use serde::{Deserialize, Serialize};

/// Declared existence policy flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePolicy {
    /// The resource is expected to exist already
    pub use_external_resource: bool,

    /// Create the resource when an expected one is absent
    pub create_if_missing: bool,

    /// Adopt a resource that unexpectedly exists
    pub use_if_exists: bool,

    /// Allow updates to an adopted resource
    pub modify_external_resource: bool,
}

impl ResourcePolicy {
    /// An expected pre-existing resource must be named unless it may be created
    pub fn validate(&self, declared_name: Option<&str>) -> Result<()> {
        let named = declared_name.is_some_and(|n| !n.is_empty());
        if self.use_external_resource && !named && !self.create_if_missing {
            return Err(CloudError::InvalidConfig(
                "use_external_resource requires a resource name".to_string(),
            ));
        }
        Ok(())
    }
}

/// What to do with a declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Create,
    AdoptExisting,
    Fail,
    NoOp,
}

impl std::fmt::Display for ReconciliationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconciliationOutcome::Create => write!(f, "create"),
            ReconciliationOutcome::AdoptExisting => write!(f, "adopt"),
            ReconciliationOutcome::Fail => write!(f, "fail"),
            ReconciliationOutcome::NoOp => write!(f, "no-op"),
        }
    }
}

/// Decide the outcome for a resource
pub fn decide(
    exists: bool,
    policy: &ResourcePolicy,
    is_idempotent: bool,
    is_create: bool,
) -> ReconciliationOutcome {
    let expected = policy.use_external_resource;
    match (exists, expected) {
        (true, true) => ReconciliationOutcome::AdoptExisting,
        (true, false) if policy.use_if_exists => ReconciliationOutcome::AdoptExisting,
        (true, false) if is_create && is_idempotent => ReconciliationOutcome::Create,
        (true, false) => ReconciliationOutcome::NoOp,
        (false, false) => ReconciliationOutcome::Create,
        (false, true) if policy.create_if_missing => ReconciliationOutcome::Create,
        (false, true) => ReconciliationOutcome::Fail,
    }
}

/// Outcome of a reconciliation, with the live resource when one was found
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub outcome: ReconciliationOutcome,
    pub existing: Option<ProviderResponse>,
}

/// Probes the provider and applies the policy table
pub struct ExistencePolicyEngine;

impl ExistencePolicyEngine {
    /// Probe `identity`, decide, and record the identity for later calls
    ///
    /// Only "not found" counts as absence; any other provider error is
    /// returned. Every non-failing branch persists the resource group and
    /// name. Adopted and no-op resources are marked external unless this
    /// instance already submitted their creation.
    pub async fn reconcile(
        client: &dyn ProviderClient,
        store: &dyn InstanceStateStore,
        identity: &ResourceIdentity,
        policy: &ResourcePolicy,
        is_create: bool,
    ) -> Result<Reconciled> {
        policy.validate(identity.name.as_deref())?;

        let found = provider::probe(client, identity).await?;
        let outcome = decide(
            found.exists(),
            policy,
            identity.kind.is_idempotent(),
            is_create,
        );
        tracing::info!("Reconciling {}: {}", identity, outcome);

        if outcome == ReconciliationOutcome::Fail {
            return Err(CloudError::ExternalResourceMissing(identity.to_string()));
        }

        record_identity(store, identity).await?;

        let existing = found.found();
        match outcome {
            ReconciliationOutcome::AdoptExisting | ReconciliationOutcome::NoOp => {
                if outcome == ReconciliationOutcome::NoOp {
                    tracing::warn!(
                        "{} already exists; leaving its configuration untouched",
                        identity
                    );
                }
                let owned = state::flag(store, keys::SUBMITTED).await?;
                if owned {
                    tracing::info!("{} was submitted by this instance; keeping ownership", identity);
                } else {
                    state::save(store, keys::EXTERNAL, &true).await?;
                }
                if let Some(id) = existing.as_ref().and_then(|r| r.resource_id()) {
                    state::save(store, keys::RESOURCE_ID, id).await?;
                }
            }
            ReconciliationOutcome::Create | ReconciliationOutcome::Fail => {}
        }

        Ok(Reconciled { outcome, existing })
    }
}

/// Persist kind, resource group and name so teardown can find the resource
pub async fn record_identity(
    store: &dyn InstanceStateStore,
    identity: &ResourceIdentity,
) -> Result<()> {
    state::save(store, keys::KIND, &identity.kind).await?;
    if let Some(group) = &identity.resource_group {
        state::save(store, keys::RESOURCE_GROUP, group).await?;
    }
    state::save(store, keys::NAME, identity.name()?).await
}

/// Probe result reduced to existence, for name resolution
pub async fn exists(
    client: &dyn ProviderClient,
    identity: &ResourceIdentity,
) -> Result<Lookup<()>> {
    Ok(provider::probe(client, identity).await?.map(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReconciliationOutcome::*;

    fn policy(external: bool, create_if_missing: bool, use_if_exists: bool) -> ResourcePolicy {
        ResourcePolicy {
            use_external_resource: external,
            create_if_missing,
            use_if_exists,
            modify_external_resource: false,
        }
    }

    /// (exists, use_external_resource, create_if_missing, use_if_exists) -> outcome
    const TABLE: [(bool, bool, bool, bool, ReconciliationOutcome); 16] = [
        (false, false, false, false, Create),
        (false, false, false, true, Create),
        (false, false, true, false, Create),
        (false, false, true, true, Create),
        (false, true, false, false, Fail),
        (false, true, false, true, Fail),
        (false, true, true, false, Create),
        (false, true, true, true, Create),
        (true, false, false, false, NoOp),
        (true, false, false, true, AdoptExisting),
        (true, false, true, false, NoOp),
        (true, false, true, true, AdoptExisting),
        (true, true, false, false, AdoptExisting),
        (true, true, false, true, AdoptExisting),
        (true, true, true, false, AdoptExisting),
        (true, true, true, true, AdoptExisting),
    ];

    #[test]
    fn test_policy_truth_table() {
        for (exists, external, create_if_missing, use_if_exists, expected) in TABLE {
            let p = policy(external, create_if_missing, use_if_exists);
            assert_eq!(
                decide(exists, &p, false, true),
                expected,
                "exists={exists} external={external} create_if_missing={create_if_missing} use_if_exists={use_if_exists}"
            );
        }
    }

    #[test]
    fn test_idempotent_create_reconciles_in_place() {
        let p = policy(false, false, false);
        assert_eq!(decide(true, &p, true, true), Create);
        assert_eq!(decide(true, &p, true, false), NoOp);
        assert_eq!(decide(true, &p, false, true), NoOp);
    }

    #[test]
    fn test_validate() {
        assert!(policy(true, false, false).validate(None).is_err());
        assert!(policy(true, false, false).validate(Some("")).is_err());
        assert!(policy(true, true, false).validate(None).is_ok());
        assert!(policy(true, false, false).validate(Some("vm1")).is_ok());
        assert!(policy(false, false, false).validate(None).is_ok());
    }

    #[test]
    fn test_policy_defaults_from_partial_yaml() {
        let p: ResourcePolicy = serde_yaml::from_str("use_if_exists: true").unwrap();
        assert!(p.use_if_exists);
        assert!(!p.use_external_resource);
    }
}
