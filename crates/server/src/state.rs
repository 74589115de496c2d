//! Shared handler state.

use std::sync::Arc;
use std::time::Duration;

use chunkline_transfer::{Assembler, ChunkStore, SessionRegistry};

/// State injected into every handler.
///
/// The registry is constructed by the caller and passed in; there is no
/// process-wide session map.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub store: ChunkStore,
    pub assembler: Assembler,
    pub session_ttl: Duration,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, store: ChunkStore, session_ttl: Duration) -> Self {
        let assembler = Assembler::new(Arc::clone(&registry), store.clone());
        Self {
            registry,
            store,
            assembler,
            session_ttl,
        }
    }
}
