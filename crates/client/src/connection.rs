//! Upload connection trait.
//!
//! `UploadConnection` keeps the orchestrator decoupled from HTTP so it can
//! be tested with mocks. Dropping a returned future aborts the request.

use std::future::Future;
use std::pin::Pin;

use chunkline_protocol::{
    ChunkAccepted, CompleteRequest, CompleteResponse, CreateSessionRequest,
    CreateSessionResponse, ServiceStatus, SessionStatus,
};
use chunkline_transfer::Chunk;

use crate::error::ClientError;

/// Boxed future returned by [`UploadConnection`] methods.
pub type ConnectionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Abstract connection to a Chunkline server.
pub trait UploadConnection: Send + Sync {
    /// `POST /session`
    fn create_session(&self, req: CreateSessionRequest)
    -> ConnectionFuture<'_, CreateSessionResponse>;

    /// `POST /chunk`
    fn upload_chunk(&self, session_id: String, chunk: Chunk) -> ConnectionFuture<'_, ChunkAccepted>;

    /// `POST /complete`
    fn complete(&self, req: CompleteRequest) -> ConnectionFuture<'_, CompleteResponse>;

    /// `GET /session/{id}`
    fn session_status(&self, session_id: String) -> ConnectionFuture<'_, SessionStatus>;

    /// `DELETE /session/{id}`
    fn cancel_session(&self, session_id: String) -> ConnectionFuture<'_, ()>;

    /// `GET /status`
    fn server_status(&self) -> ConnectionFuture<'_, ServiceStatus>;

    /// Identifies the server this connection talks to (its base URL).
    fn endpoint(&self) -> &str;
}
