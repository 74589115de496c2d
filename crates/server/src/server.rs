//! Chunk upload server.
//!
//! Binds a TCP listener, serves the axum router, and runs the expiry
//! sweeper alongside it until the cancellation token fires.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use chunkline_transfer::{ChunkStore, SessionRegistry};

use crate::ServerError;
use crate::config::ServerConfig;
use crate::routes::create_router;
use crate::state::AppState;
use crate::sweeper;

/// The upload server.
pub struct ChunkServer {
    config: ServerConfig,
    state: AppState,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ChunkServer {
    /// Creates a server with a fresh registry.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new(config.chunk_size));
        Self::with_registry(config, registry)
    }

    /// Creates a server around an existing registry.
    pub fn with_registry(config: ServerConfig, registry: Arc<SessionRegistry>) -> Arc<Self> {
        let store = ChunkStore::new(&config.upload_dir);
        let state = AppState::new(registry, store, config.session_ttl);
        Arc::new(Self {
            config,
            state,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Token that stops the server when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.local_addr.lock().await.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        self.state.store.init().await?;

        let listener = TcpListener::bind(self.config.bind).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!(
            upload_dir = %self.config.upload_dir.display(),
            chunk_size = self.state.registry.chunk_size(),
            "chunk server listening on {local_addr}"
        );

        let sweeper = tokio::spawn(sweeper::run(
            self.state.clone(),
            self.config.sweep_interval,
            self.cancel.clone(),
        ));

        let cancel = self.cancel.clone();
        let result = axum::serve(listener, create_router(self.state.clone()))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await;

        // The listener can also fail on its own; stop the sweeper either way.
        self.cancel.cancel();
        let _ = sweeper.await;
        *self.local_addr.lock().await = None;
        tracing::info!("server shutting down");

        result.map_err(ServerError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            bind: ([127, 0, 0, 1], 0).into(),
            upload_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    async fn wait_for_bind(server: &ChunkServer) -> SocketAddr {
        for _ in 0..50 {
            if let Some(addr) = server.local_addr().await {
                return addr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not bind");
    }

    #[tokio::test]
    async fn server_binds_dynamic_port() {
        let dir = tempfile::tempdir().unwrap();
        let server = ChunkServer::new(test_config(dir.path()));
        let server2 = Arc::clone(&server);

        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        let addr = wait_for_bind(&server).await;
        assert_ne!(addr.port(), 0);
        assert_eq!(server.port().await, addr.port());
        assert!(dir.path().join("tmp").is_dir());

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn server_accepts_tcp_connections() {
        let dir = tempfile::tempdir().unwrap();
        let server = ChunkServer::new(test_config(dir.path()));
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move { server2.run().await });

        let addr = wait_for_bind(&server).await;
        let stream = tokio::net::TcpStream::connect(addr).await;
        assert!(stream.is_ok());

        server.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let server = ChunkServer::new(test_config(dir.path()));
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move { server2.run().await });

        wait_for_bind(&server).await;
        assert!(matches!(server.run().await, Err(ServerError::AlreadyRunning)));

        server.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
}
