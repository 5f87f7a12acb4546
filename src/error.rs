//! Error types for the ingestion pipeline and the job lifecycle.

use thiserror::Error;

use crate::models::JobStatus;

/// Errors surfaced by the pipeline, the status machine and storage.
#[derive(Error, Debug)]
pub enum HuntError {
    /// A single message or item could not be parsed. Isolated per message.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The AI backend failed after retries.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Status change that violates the lifecycle order.
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Missing or invalid configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HuntError>;

/// Failures of a provider operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The backend cannot perform this operation. Callers treat it as a no-op.
    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ProviderError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout(_) | ProviderError::Network(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Unsupported(_) | ProviderError::Malformed(_) | ProviderError::Auth(_) => {
                false
            }
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, ProviderError::Unsupported(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(0)
        } else if let Some(status) = err.status() {
            ProviderError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}
