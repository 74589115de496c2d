//! Client side of Chunkline uploads.
//!
//! The [`TransferOrchestrator`] drives one file through the protocol:
//! open a session, send chunks strictly in order, then ask the server to
//! assemble. It can be paused (aborting the in-flight chunk), resumed from
//! the last acknowledged chunk, or cancelled.
//!
//! Transport is behind the [`UploadConnection`] trait; [`HttpConnection`]
//! is the reqwest implementation. Tests drive the orchestrator with mocks.
//!
//! [`ResumeStore`] keeps incomplete transfers on disk so a later process
//! can pick them up again.

pub mod connection;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod resume;
pub mod retry;
pub mod types;

pub use connection::{ConnectionFuture, UploadConnection};
pub use error::ClientError;
pub use http::HttpConnection;
pub use orchestrator::TransferOrchestrator;
pub use resume::{ResumeRecord, ResumeStore};
pub use retry::RetryPolicy;
pub use types::{TransferEvent, TransferOutcome, TransferState};
