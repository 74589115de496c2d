//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chunkline_protocol::constants::DEFAULT_CHUNK_SIZE;

/// Default session lifetime: 24 hours.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default pause between expiry sweeps: 5 minutes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind: SocketAddr,
    /// Upload root. Chunks are staged under `tmp/`, artifacts land here.
    pub upload_dir: PathBuf,
    /// Chunk size handed to new sessions.
    pub chunk_size: u64,
    /// Sessions older than this are discarded by the sweeper.
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ([127, 0, 0, 1], 3000).into(),
            upload_dir: PathBuf::from("uploads"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            session_ttl: DEFAULT_SESSION_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}
