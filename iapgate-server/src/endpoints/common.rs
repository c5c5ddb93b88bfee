//! Common types and utilities for endpoints.

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use iapgate_service::ResolveError;
use thiserror::Error;

use crate::auth::AuthError;

/// Error type for requests that cannot be served.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request did not carry a valid assertion.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// The request path could not be resolved to an object.
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// The object failed before any of its contents could be sent.
    #[error("read error: {0}")]
    Read(#[source] io::Error),
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Returns the status code to respond with.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(_) => StatusCode::FORBIDDEN,
            ApiError::Resolve(ResolveError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Resolve(ResolveError::Backend { .. }) | ApiError::Read(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Creates a plain-text response carrying the reason phrase of `status`.
///
/// Error responses never include details of the underlying error.
pub fn status_response(status: StatusCode) -> Response {
    let reason = status.canonical_reason().unwrap_or_default();
    (status, format!("{reason}\n")).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        status_response(self.status())
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn error_bodies_are_reason_phrases() {
        let response = ApiError::Auth(AuthError::MissingAssertion).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body(response).await, "Forbidden\n");

        let err = ResolveError::NotFound {
            name: "secret/path".into(),
            source: iapgate_service::Error::NotFound,
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body(response).await, "Not Found\n");

        let response = ApiError::Read(io::Error::other("disk on fire")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(response).await, "Internal Server Error\n");
    }
}
