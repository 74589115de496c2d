use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verifies `data` against a hex SHA-256 digest (case-insensitive).
pub fn verify_checksum(index: u64, data: &[u8], expected: &str) -> Result<(), TransferError> {
    if checksum_bytes(data).eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(TransferError::ChecksumMismatch { index })
    }
}

// ---------------------------------------------------------------------------
// Chunk layout
// ---------------------------------------------------------------------------

/// Number of chunks needed for `total_size` bytes: `ceil(total_size / chunk_size)`.
pub fn chunk_count(total_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    total_size.div_ceil(chunk_size)
}

/// Byte range `[index*chunk_size, min((index+1)*chunk_size, total_size))`.
///
/// `None` if `index` is past the last chunk.
pub fn chunk_range(index: u64, total_size: u64, chunk_size: u64) -> Option<Range<u64>> {
    if index >= chunk_count(total_size, chunk_size) {
        return None;
    }
    let start = index.checked_mul(chunk_size)?;
    let end = start.saturating_add(chunk_size).min(total_size);
    Some(start..end)
}

/// Exact payload length chunk `index` must have.
pub fn expected_chunk_len(index: u64, total_size: u64, chunk_size: u64) -> Option<u64> {
    chunk_range(index, total_size, chunk_size).map(|r| r.end - r.start)
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// A slice of the source file, ready to upload.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: u64,
    /// Byte offset within the file.
    pub offset: u64,
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

/// Reads a file by chunk index with automatic SHA-256 checksums.
pub struct ChunkReader {
    file: std::fs::File,
    chunk_size: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
    pub fn new(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            file_size,
        })
    }

    /// Reads chunk `index`. Returns `None` past the last chunk.
    pub fn read_chunk(&mut self, index: u64) -> Result<Option<Chunk>, TransferError> {
        let Some(range) = chunk_range(index, self.file_size, self.chunk_size) else {
            return Ok(None);
        };

        self.file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        // The file shrinking underneath us surfaces as UnexpectedEof.
        self.file.read_exact(&mut buf)?;

        let checksum = checksum_bytes(&buf);
        Ok(Some(Chunk {
            index,
            offset: range.start,
            data: buf,
            checksum,
        }))
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn total_chunks(&self) -> u64 {
        chunk_count(self.file_size, self.chunk_size)
    }
}
