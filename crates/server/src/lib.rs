//! HTTP server for Chunkline uploads.
//!
//! Exposes the session registry, chunk store and assembler over axum:
//!
//! | Route                  | Purpose                          |
//! |------------------------|----------------------------------|
//! | `POST /session`        | open a session                   |
//! | `POST /chunk`          | store one chunk (multipart)      |
//! | `POST /complete`       | assemble the artifact            |
//! | `GET /session/{id}`    | received / missing indices       |
//! | `DELETE /session/{id}` | cancel and discard               |
//! | `GET /status`          | service status                   |
//!
//! A background sweeper evicts sessions older than the configured TTL.

pub mod config;
mod error;
mod handlers;
mod routes;
mod server;
mod state;
pub mod sweeper;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use server::ChunkServer;
pub use state::AppState;

/// Errors produced by the chunk server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkline_transfer::TransferError),

    #[error("server already running")]
    AlreadyRunning,
}
