//! Azure provider for armflow
//!
//! This crate implements the `ProviderClient` trait against the Azure
//! Resource Manager REST API.
//!
//! # Requirements
//!
//! - `AZURE_ACCESS_TOKEN`: a bearer token for `https://management.azure.com`
//! - A subscription id, from configuration or `AZURE_SUBSCRIPTION_ID`
//!
//! # Example
//!
//! ```ignore
//! use armflow_azure::{ArmClient, ArmConfig, StaticToken};
//! use std::sync::Arc;
//!
//! let client = ArmClient::new(
//!     ArmConfig::new("00000000-0000-0000-0000-000000000000"),
//!     Arc::new(StaticToken::from_env()?),
//! )?;
//!
//! let response = client.get(&identity).await?;
//! ```

pub mod client;
pub mod credential;
pub mod error;

pub use client::{ARM_API_BASE, ArmClient, ArmConfig};
pub use credential::{ACCESS_TOKEN_ENV, CredentialProvider, StaticToken};
pub use error::{AzureError, Result};
