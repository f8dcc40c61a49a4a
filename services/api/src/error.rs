//! Error type of the HTTP layer and its mapping from engine errors

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use engine::{EngineError, ErrorKind};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Storage failure; details are logged, never returned
    #[error("Internal server error")]
    InternalServerError,
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::NotFound => ApiError::NotFound(message),
            ErrorKind::InvalidInput => ApiError::BadRequest(message),
            ErrorKind::Conflict => ApiError::Conflict(message),
            ErrorKind::Forbidden => ApiError::Forbidden(message),
            ErrorKind::Storage => {
                error!("Storage failure: {}", message);
                ApiError::InternalServerError
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use engine::StoreError;
    use engine::model::SessionId;

    #[test]
    fn test_engine_errors_map_to_status() {
        let cases = [
            (EngineError::SessionNotFound(SessionId::new()), StatusCode::NOT_FOUND),
            (
                EngineError::InvalidCoordinate { lat: 91.0, lng: 0.0 },
                StatusCode::BAD_REQUEST,
            ),
            (EngineError::SessionClosed(SessionId::new()), StatusCode::CONFLICT),
            (
                EngineError::OutsideHomeRadius {
                    distance_m: 900.0,
                    radius_m: 200.0,
                },
                StatusCode::FORBIDDEN,
            ),
            (
                EngineError::Storage(StoreError::Unavailable("pool timed out".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }
}
