//! Azure provider error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AzureError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Cloud error: {0}")]
    CloudError(#[from] armflow_cloud::CloudError),
}

impl From<AzureError> for armflow_cloud::CloudError {
    fn from(err: AzureError) -> Self {
        match err {
            AzureError::CloudError(inner) => inner,
            AzureError::MissingEnvVar(_) | AzureError::InvalidConfig(_) => {
                armflow_cloud::CloudError::InvalidConfig(err.to_string())
            }
            AzureError::Credential(msg) => armflow_cloud::CloudError::Provider {
                status: 401,
                message: msg,
            },
            AzureError::Http(e) => armflow_cloud::CloudError::Transport(e.to_string()),
            AzureError::JsonError(e) => armflow_cloud::CloudError::Json(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, AzureError>;
