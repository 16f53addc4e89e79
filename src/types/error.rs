//! Error types for CommunityPatch
//!
//! One closed enum for everything a request can fail with. Lower layers keep
//! their own enums (`StoreError`, `TokenError`, `EditError`) and convert at the
//! service boundary.

use hyper::StatusCode;
use tracing::error;

use crate::types::api::ApiResponse;

/// Main error type for CommunityPatch operations
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("Bad Request: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Conflict: {0}")]
    ConcurrentModification(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PatchError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when the caller may repeat the request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_) | Self::Internal(_))
    }

    /// Convert to status code and body tuple for HTTP response
    ///
    /// Internal details are logged and replaced by a generic message.
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = match self {
            Self::Internal(detail) => {
                error!(detail = %detail, "Internal error while handling request");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };
        (status, body)
    }

    /// Standard `{"message": ...}` response for this error
    pub fn into_response(self) -> ApiResponse {
        let (status, message) = self.into_status_code_and_body();
        ApiResponse::message(status, message)
    }
}

impl From<serde_json::Error> for PatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("Invalid JSON: {}", err))
    }
}

impl From<std::io::Error> for PatchError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result type alias for CommunityPatch operations
pub type Result<T> = std::result::Result<T, PatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PatchError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PatchError::ConcurrentModification("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(PatchError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            PatchError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let (status, body) =
            PatchError::Internal("mongo exploded at 10.0.0.4".into()).into_status_code_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Internal Server Error");
    }

    #[test]
    fn test_retryable() {
        assert!(PatchError::ConcurrentModification("x".into()).is_retryable());
        assert!(!PatchError::Conflict("x".into()).is_retryable());
    }
}
