use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use chunkline_protocol::{CreateSessionResponse, SessionStatus};

use crate::TransferError;
use crate::chunked::{chunk_count, expected_chunk_len};

/// Session id length in bytes (produces 32 hex characters).
pub(crate) const SESSION_ID_BYTES: usize = 16;

/// Opaque upload session identifier.
///
/// Always 32 lowercase hex characters, so it is safe to use as a directory
/// name and as an artifact filename prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generates a new id from a CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        rand::thread_rng().fill(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Parses a client-supplied id.
    pub fn parse(raw: &str) -> Result<Self, TransferError> {
        let raw = raw.trim();
        if raw.len() != SESSION_ID_BYTES * 2 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TransferError::InvalidRequest(format!(
                "malformed session id: {raw:?}"
            )));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = TransferError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Snapshot of one upload session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub filename: String,
    pub declared_size: u64,
    /// Fixed at creation for the session's whole lifetime.
    pub chunk_size: u64,
    pub received: BTreeSet<u64>,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub(crate) fn new(filename: String, declared_size: u64, chunk_size: u64) -> Self {
        Self {
            id: SessionId::generate(),
            filename,
            declared_size,
            chunk_size,
            received: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn total_chunks(&self) -> u64 {
        chunk_count(self.declared_size, self.chunk_size)
    }

    /// Indices in `[0, total_chunks)` not yet received, ascending.
    pub fn missing_indices(&self) -> Vec<u64> {
        (0..self.total_chunks())
            .filter(|i| !self.received.contains(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        let total = self.total_chunks();
        // `received` only ever holds admitted indices, all below `total`.
        self.received.len() as u64 == total
    }

    /// Checks that a chunk payload fits this session's layout.
    ///
    /// Every chunk must be exactly `chunk_size` bytes except the last,
    /// which must be exactly the remainder.
    pub fn check_chunk(&self, index: u64, len: u64) -> Result<(), TransferError> {
        let total = self.total_chunks();
        let Some(expected) = expected_chunk_len(index, self.declared_size, self.chunk_size) else {
            return Err(TransferError::InvalidRequest(format!(
                "chunk index {index} out of range (session has {total} chunks)"
            )));
        };
        if len != expected {
            return Err(TransferError::InvalidRequest(format!(
                "chunk {index} is {len} bytes, expected {expected}"
            )));
        }
        Ok(())
    }

    pub fn to_create_response(&self) -> CreateSessionResponse {
        CreateSessionResponse {
            session_id: self.id.to_string(),
            chunk_size: self.chunk_size,
            filename: self.filename.clone(),
            declared_size: self.declared_size,
            total_chunks: self.total_chunks(),
        }
    }

    pub fn to_status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.to_string(),
            filename: self.filename.clone(),
            declared_size: self.declared_size,
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks(),
            received_indices: self.received.iter().copied().collect(),
            missing_indices: self.missing_indices(),
            created_at: self.created_at,
        }
    }
}
