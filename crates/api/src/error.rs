use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use extract::ExtractError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use visual::VisualError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Visual(#[from] VisualError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("graph database error: {0:#}")]
    Database(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Extract(e) => match e {
                ExtractError::StrategyNotFound { .. } => StatusCode::NOT_FOUND,
                ExtractError::InvalidStrategy { .. } | ExtractError::Template(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ExtractError::Definitions { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                ExtractError::Backend(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Database(_) => StatusCode::BAD_GATEWAY,
            ApiError::Visual(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %message, "Request rejected");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::BackendError;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let not_found = ApiError::from(ExtractError::StrategyNotFound { name: "x".into() });
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let invalid = ApiError::from(ExtractError::invalid("x", "granularity.depth", "bad"));
        assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let backend = ApiError::from(ExtractError::from(BackendError::Timeout(Duration::from_secs(1))));
        assert_eq!(backend.status(), StatusCode::BAD_GATEWAY);

        assert_eq!(ApiError::NotConfigured("Neo4j").status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::NotConfigured("Neo4j").to_string(), "Neo4j is not configured");
    }
}
