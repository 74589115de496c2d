//! Server-side core of resumable chunked uploads.
//!
//! - [`SessionRegistry`] owns session metadata and the set of received
//!   chunk indices.
//! - [`ChunkStore`] owns chunk payloads on disk until assembly.
//! - [`Assembler`] verifies completeness and concatenates chunks into the
//!   final artifact exactly once.
//!
//! The chunk math and [`ChunkReader`] are shared with the client, which
//! slices its source file with the same arithmetic the server admits.

mod assembler;
mod chunked;
mod registry;
mod session;
mod store;
mod validation;

pub use assembler::{AssembledArtifact, Assembler};
pub use chunked::{
    Chunk, ChunkReader, checksum_bytes, chunk_count, chunk_range, expected_chunk_len,
    verify_checksum,
};
pub use registry::SessionRegistry;
pub use session::{SessionId, SessionRecord};
pub use store::{ChunkStore, parse_chunk_file_name, sort_chunk_files};
pub use validation::sanitize_filename;

pub use chunkline_protocol::constants::DEFAULT_CHUNK_SIZE;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("assembly failed: {0}")]
    Assembly(String),

    #[error("incomplete upload: missing {} chunk(s)", missing.len())]
    IncompleteUpload { missing: Vec<u64> },

    #[error("checksum mismatch for chunk {index}")]
    ChecksumMismatch { index: u64 },
}

impl TransferError {
    /// Returns `true` if repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Assembly(_))
    }
}
