//! Error taxonomy for the extraction pipeline.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExtractError>;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("strategy not found: {name}")]
    StrategyNotFound { name: String },

    #[error("invalid strategy '{strategy}': {field}: {reason}")]
    InvalidStrategy {
        strategy: String,
        field: String,
        reason: String,
    },

    #[error("failed to read strategy definitions from {}: {source}", path.display())]
    Definitions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template error: {0}")]
    Template(String),

    #[error("extraction backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Failures at the extraction backend boundary.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ExtractError {
    pub fn invalid(strategy: &str, field: &str, reason: impl Into<String>) -> Self {
        ExtractError::InvalidStrategy {
            strategy: strategy.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Backend failures may succeed on a later attempt; configuration errors never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractError::Backend(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ExtractError::StrategyNotFound { .. }
                | ExtractError::InvalidStrategy { .. }
                | ExtractError::Definitions { .. }
                | ExtractError::Template(_)
        )
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Request(e.to_string())
    }
}
