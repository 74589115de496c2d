//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use chunkline_protocol::{ErrorCode, ErrorResponse};
use chunkline_transfer::TransferError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request the transfer layer never saw (bad JSON, bad multipart).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl ApiError {
    /// Error code for programmatic handling.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::Transfer(e) => match e {
                TransferError::InvalidRequest(_) | TransferError::ChecksumMismatch { .. } => {
                    ErrorCode::InvalidRequest
                }
                TransferError::SessionNotFound(_) => ErrorCode::SessionNotFound,
                TransferError::IncompleteUpload { .. } => ErrorCode::IncompleteUpload,
                TransferError::Storage(_) => ErrorCode::StorageError,
                TransferError::Assembly(_) => ErrorCode::AssemblyError,
            },
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self.code() {
            ErrorCode::InvalidRequest | ErrorCode::IncompleteUpload => StatusCode::BAD_REQUEST,
            ErrorCode::SessionNotFound => StatusCode::NOT_FOUND,
            ErrorCode::StorageError | ErrorCode::AssemblyError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        if status.is_server_error() {
            error!(%code, error = %self, "request failed");
        } else {
            warn!(%code, error = %self, "request rejected");
        }

        let missing = match &self {
            Self::Transfer(TransferError::IncompleteUpload { missing }) => missing.clone(),
            _ => Vec::new(),
        };
        let body = ErrorResponse {
            code,
            message: self.to_string(),
            missing,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (ApiError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (
                TransferError::SessionNotFound("s".into()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                TransferError::IncompleteUpload { missing: vec![1] }.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                TransferError::ChecksumMismatch { index: 0 }.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                TransferError::Storage(std::io::Error::other("disk")).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                TransferError::Assembly("x".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{err}");
        }
    }

    #[tokio::test]
    async fn incomplete_upload_body_lists_missing() {
        let err: ApiError = TransferError::IncompleteUpload {
            missing: vec![2, 5],
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.code, ErrorCode::IncompleteUpload);
        assert_eq!(body.missing, vec![2, 5]);
    }
}
