//! Protocol constants shared by client and server.

/// Service name reported by `GET /status`.
pub const SERVICE_NAME: &str = "chunkline";

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Creates an upload session.
pub const ROUTE_SESSION: &str = "/session";
/// Inspects or cancels one session (axum path syntax).
pub const ROUTE_SESSION_BY_ID: &str = "/session/{id}";
/// Accepts one chunk as multipart form data.
pub const ROUTE_CHUNK: &str = "/chunk";
/// Assembles a finished session into its artifact.
pub const ROUTE_COMPLETE: &str = "/complete";
/// Service status.
pub const ROUTE_STATUS: &str = "/status";

// ---------------------------------------------------------------------------
// Multipart fields for `POST /chunk`
// ---------------------------------------------------------------------------

pub const FIELD_CHUNK: &str = "chunk";
pub const FIELD_SESSION_ID: &str = "sessionId";
pub const FIELD_CHUNK_INDEX: &str = "chunkIndex";
/// Optional SHA-256 hex digest of the chunk payload.
pub const FIELD_CHECKSUM: &str = "checksum";

// ---------------------------------------------------------------------------
// Sizes
// ---------------------------------------------------------------------------

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Smallest chunk size a server will hand out.
pub const MIN_CHUNK_SIZE: u64 = 64 * 1024;

/// Largest chunk size a server will hand out.
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Most chunks one session may span. Bounds the declared size to
/// `chunk_size * MAX_TOTAL_CHUNKS` (1 TiB at the default chunk size).
pub const MAX_TOTAL_CHUNKS: u64 = 1 << 20;

/// Extra body allowance on `/chunk` for multipart framing and text fields.
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// File extension of a stored chunk (`<index>.part`).
pub const CHUNK_FILE_EXTENSION: &str = "part";

/// Name of the staging directory under the upload root.
pub const STAGING_DIR: &str = "tmp";
