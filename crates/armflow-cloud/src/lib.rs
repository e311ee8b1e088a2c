//! armflow cloud engine
//!
//! Reconciliation and long-running-operation engine shared by every
//! resource type armflow provisions on an ARM-style management API.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │            orchestrator (one invocation)         │
//! │        create / update / delete / pull           │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                armflow-cloud                     │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │ ExistencePol │─▶│ NameResolver │             │
//! │  └──────┬───────┘  └──────────────┘             │
//! │  ┌──────▼───────┐  ┌──────────────┐             │
//! │  │  LroDriver   │  │    Drift     │             │
//! │  └──────┬───────┘  └──────┬───────┘             │
//! └─────────┼─────────────────┼─────────────────────┘
//!           │                 │
//! ┌─────────▼───────┐ ┌───────▼─────────┐
//! │ ProviderClient  │ │ InstanceState   │
//! │ (armflow-azure) │ │     Store       │
//! └─────────────────┘ └─────────────────┘
//! ```
//!
//! The engine keeps no state in memory between invocations. An operation
//! that is still running on the provider side returns [`Step::RetryLater`]
//! and leaves an [`AsyncOperationHandle`] in the instance state; the next
//! invocation polls it instead of submitting the request again.

pub mod drift;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod lro;
pub mod naming;
pub mod policy;
pub mod provider;
pub mod state;

// Re-exports
pub use drift::{DriftCalculator, DriftRecord};
pub use error::{CloudError, ErrorClass, Result};
pub use identity::{NamingRule, ResourceIdentity, ResourceKind};
pub use lifecycle::{LifecycleEngine, PullStep, ResourceDeclaration};
pub use lro::{
    AsyncOperationHandle, Completion, DEFAULT_POLL_INTERVAL, LroDriver, LroOperation, RetrySignal,
    Step,
};
pub use naming::{DEFAULT_NAME_ATTEMPTS, NameResolver};
pub use policy::{ExistencePolicyEngine, ReconciliationOutcome, ResourcePolicy};
pub use provider::{ChangeType, Lookup, ProviderClient, ProviderResponse, WhatIfChange};
pub use state::{FileStateStore, InstanceStateStore, MemoryStateStore};
