//! Data types for the transfer flow.

use std::fmt;
use std::time::Duration;

use chunkline_protocol::CompleteResponse;

/// Lifecycle of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Active,
    Paused,
    Success,
    Error,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Success => "success",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// How a call to `start` or `resume` ended without an error.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Completed(CompleteResponse),
    /// Paused by the caller; `resume` continues from the last acknowledged chunk.
    Paused,
    Cancelled,
}

/// Event emitted while a transfer runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    SessionCreated {
        session_id: String,
        chunk_size: u64,
        total_chunks: u64,
    },
    /// A chunk was acknowledged. `progress` is a percentage in `[0, 100]`.
    ///
    /// Within one run it never decreases. It can move backwards only after
    /// a [`Resynced`](Self::Resynced) event.
    Progress {
        chunk_index: u64,
        bytes_sent: u64,
        total_bytes: u64,
        progress: f64,
    },
    Retrying {
        chunk_index: u64,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Paused {
        last_acknowledged_index: Option<u64>,
        progress: f64,
    },
    Resumed {
        next_index: u64,
    },
    /// The server holds a different contiguous prefix than recorded locally,
    /// and the transfer adopted the server's view before resuming.
    Resynced {
        last_acknowledged_index: Option<u64>,
        progress: f64,
    },
    Completed {
        artifact_path: String,
        size: u64,
    },
    /// `resumable` is true when the session was kept and `resume` may succeed.
    Failed {
        error: String,
        resumable: bool,
    },
    Cancelled,
}
