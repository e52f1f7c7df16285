/// Unified error types for Veilgate
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the provisioning core
#[derive(Error, Debug)]
pub enum VeilError {
    /// Malformed operator input (duration, username, protocol)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Username absent on delete/extend
    #[error("Not found: {0}")]
    NotFound(String),

    /// Username (or credential) already taken
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Config document could not be written to its location
    #[error("Failed to publish {}: {source}", .path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config document could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Caller-supplied deadline exceeded
    #[error("Operation timed out: {0}")]
    Timeout(&'static str),

    /// Caller identity is not allowed to operate the service
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VeilError {
    /// Map a unique-constraint violation onto `Duplicate`, keep everything else as a store error
    pub fn from_insert(err: sqlx::Error, username: &str) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                if db_err.message().contains("username") {
                    VeilError::Duplicate(format!("Username {} already exists", username))
                } else {
                    VeilError::Duplicate(format!(
                        "Generated credentials for {} collided with an existing account",
                        username
                    ))
                }
            }
            _ => VeilError::Database(err),
        }
    }
}

impl From<serde_json::Error> for VeilError {
    fn from(err: serde_json::Error) -> Self {
        VeilError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for VeilError {
    fn from(err: serde_yaml::Error) -> Self {
        VeilError::Serialization(err.to_string())
    }
}

/// JSON error body returned by the HTTP adapter
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for VeilError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            VeilError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            VeilError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            VeilError::Duplicate(_) => (StatusCode::CONFLICT, "Duplicate", self.to_string()),
            VeilError::Unauthorized(_) => (
                StatusCode::FORBIDDEN,
                "Forbidden",
                "Access denied.".to_string(),
            ),
            VeilError::Timeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "Timeout",
                self.to_string(),
            ),
            // Don't leak paths, queries or config values
            VeilError::Database(_)
            | VeilError::Publish { .. }
            | VeilError::Serialization(_)
            | VeilError::Config(_)
            | VeilError::Internal(_)
            | VeilError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for Veilgate operations
pub type VeilResult<T> = Result<T, VeilError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    async fn body_of(err: VeilError) -> (StatusCode, ErrorResponse) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_publish_error_hides_path() {
        let err = VeilError::Publish {
            path: PathBuf::from("/etc/xray/config.json"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
        };
        let (status, body) = body_of(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "InternalServerError");
        assert_eq!(body.message, "Internal server error");
    }

    #[tokio::test]
    async fn test_config_error_hides_value() {
        let (status, body) =
            body_of(VeilError::Config("VEILGATE_BOT_TOKEN=secret".to_string())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.message.contains("secret"));
    }

    #[tokio::test]
    async fn test_validation_error_keeps_message() {
        let (status, body) = body_of(VeilError::Validation("Invalid days.".to_string())).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "InvalidRequest");
        assert!(body.message.contains("Invalid days."));
    }
}
