//! Bearer token supply
//!
//! Token acquisition (client-secret or certificate exchange) happens outside
//! armflow; the client only needs something that hands out a bearer token.

use crate::error::{AzureError, Result};
use async_trait::async_trait;

pub const ACCESS_TOKEN_ENV: &str = "AZURE_ACCESS_TOKEN";

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A pre-acquired token
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Read the token from `AZURE_ACCESS_TOKEN`
    pub fn from_env() -> Result<Self> {
        let token = std::env::var(ACCESS_TOKEN_ENV)
            .map_err(|_| AzureError::MissingEnvVar(ACCESS_TOKEN_ENV.to_string()))?;
        if token.trim().is_empty() {
            return Err(AzureError::Credential(format!("{} is empty", ACCESS_TOKEN_ENV)));
        }
        Ok(Self::new(token.trim()))
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken").field("token", &"***").finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}
