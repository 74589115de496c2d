use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a new upload session.
///
/// `filesize` is accepted as an alias of `declaredSize` for older clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub filename: String,
    #[serde(alias = "filesize")]
    pub declared_size: u64,
}

/// Finalizes a session.
///
/// When `filename` is absent the name given at session creation is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Returned by `POST /session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub chunk_size: u64,
    pub filename: String,
    pub declared_size: u64,
    pub total_chunks: u64,
}

/// Returned by `POST /chunk` once the payload is durably stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAccepted {
    pub accepted: bool,
    pub chunk_index: u64,
}

/// Returned by `POST /complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub artifact_path: String,
    pub size: u64,
}

/// Returned by `GET /session/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    pub filename: String,
    pub declared_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub received_indices: Vec<u64>,
    pub missing_indices: Vec<u64>,
    pub created_at: DateTime<Utc>,
}

impl SessionStatus {
    /// Highest index `i` such that every index in `0..=i` was received.
    ///
    /// `None` when chunk 0 is still missing.
    pub fn last_contiguous_index(&self) -> Option<u64> {
        let mut last = None;
        for (expected, &index) in self.received_indices.iter().enumerate() {
            if index != expected as u64 {
                break;
            }
            last = Some(index);
        }
        last
    }
}

/// Returned by `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub active_sessions: usize,
    pub chunk_size: u64,
    pub session_ttl_secs: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Machine-readable error category carried in [`ErrorResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    SessionNotFound,
    IncompleteUpload,
    StorageError,
    AssemblyError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::SessionNotFound => "session_not_found",
            Self::IncompleteUpload => "incomplete_upload",
            Self::StorageError => "storage_error",
            Self::AssemblyError => "assembly_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    /// Indices still missing, set only for `incomplete_upload`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<u64>,
}
