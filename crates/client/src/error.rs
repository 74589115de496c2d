//! Client error types.

use chunkline_protocol::{ErrorCode, ErrorResponse};

/// Errors produced while driving a transfer.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("incomplete upload: missing {} chunk(s)", missing.len())]
    IncompleteUpload { missing: Vec<u64> },

    #[error("server storage error: {0}")]
    Storage(String),

    #[error("assembly failed: {0}")]
    Assembly(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkline_transfer::TransferError),

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The session vanished after a completion request whose response was
    /// lost. The server may have assembled the artifact.
    #[error("session {0} is gone after a completion request whose response was lost; the artifact may already exist")]
    CompletionUnconfirmed(String),
}

impl ClientError {
    /// Builds the error a server response describes.
    pub fn from_response(status: u16, body: ErrorResponse) -> Self {
        match body.code {
            ErrorCode::InvalidRequest => Self::InvalidRequest(body.message),
            ErrorCode::SessionNotFound => Self::SessionNotFound(body.message),
            ErrorCode::IncompleteUpload => Self::IncompleteUpload {
                missing: body.missing,
            },
            ErrorCode::StorageError => Self::Storage(body.message),
            ErrorCode::AssemblyError => Self::Assembly(body.message),
            ErrorCode::InternalError => Self::Server {
                status,
                message: body.message,
            },
        }
    }

    /// Returns `true` if sending the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Storage(_) | Self::Assembly(_) => true,
            Self::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}
