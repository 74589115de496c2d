//! Wire protocol types for Chunkline client/server communication.
//!
//! Everything that crosses the HTTP boundary lives here: route paths,
//! multipart field names, JSON request/response bodies, and the error
//! body returned on failure. Both the server and the client depend on
//! this crate so the two sides cannot drift apart.

pub mod constants;
pub mod messages;

pub use messages::{
    ChunkAccepted, CompleteRequest, CompleteResponse, CreateSessionRequest,
    CreateSessionResponse, ErrorCode, ErrorResponse, ServiceStatus, SessionStatus,
};
