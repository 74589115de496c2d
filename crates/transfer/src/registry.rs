//! In-memory session registry.
//!
//! The map itself sits behind an `RwLock` that is only held long enough to
//! clone an entry's `Arc`. Each entry carries its own `Mutex`, so chunk
//! admission for one session never blocks another session.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

use chunkline_protocol::constants::{
    DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MAX_TOTAL_CHUNKS, MIN_CHUNK_SIZE,
};

use crate::TransferError;
use crate::session::{SessionId, SessionRecord};
use crate::validation::sanitize_filename;

/// Mutable state of one session, guarded by the entry lock.
pub(crate) struct SessionState {
    pub(crate) record: SessionRecord,
    /// Set once the session is assembled or removed. A caller that cloned
    /// the entry before removal observes this instead of a stale record.
    pub(crate) closed: bool,
}

pub(crate) struct SessionEntry {
    state: Mutex<SessionState>,
}

impl SessionEntry {
    pub(crate) async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }
}

/// Owns every live upload session.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    chunk_size: u64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl SessionRegistry {
    /// Creates a registry that hands out `chunk_size` byte chunks.
    ///
    /// The size is clamped to `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]`.
    pub fn new(chunk_size: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            chunk_size: chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
        }
    }

    /// Creates a registry without clamping. Lets tests use tiny chunks.
    #[doc(hidden)]
    pub fn with_exact_chunk_size(chunk_size: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Largest declared size a session may have.
    pub fn max_upload_size(&self) -> u64 {
        self.chunk_size.saturating_mul(MAX_TOTAL_CHUNKS)
    }

    /// Registers a new session with an empty received set.
    pub async fn create_session(
        &self,
        filename: &str,
        declared_size: u64,
    ) -> Result<SessionRecord, TransferError> {
        let filename = sanitize_filename(filename)?;
        if declared_size == 0 {
            return Err(TransferError::InvalidRequest(
                "declared size must be positive".into(),
            ));
        }
        if declared_size > self.max_upload_size() {
            return Err(TransferError::InvalidRequest(format!(
                "declared size {declared_size} exceeds the {} byte limit",
                self.max_upload_size()
            )));
        }

        let record = SessionRecord::new(filename, declared_size, self.chunk_size);
        let entry = Arc::new(SessionEntry {
            state: Mutex::new(SessionState {
                record: record.clone(),
                closed: false,
            }),
        });
        self.sessions.write().await.insert(record.id.clone(), entry);

        info!(
            session_id = %record.id,
            filename = %record.filename,
            declared_size,
            chunk_size = self.chunk_size,
            total_chunks = record.total_chunks(),
            "session created"
        );
        Ok(record)
    }

    /// Marks `index` as received. Idempotent.
    ///
    /// Returns `true` if the index was not already recorded.
    pub async fn record_chunk_received(
        &self,
        id: &SessionId,
        index: u64,
    ) -> Result<bool, TransferError> {
        let entry = self.entry(id).await?;
        let mut state = entry.lock().await;
        if state.closed {
            return Err(TransferError::SessionNotFound(id.to_string()));
        }
        let inserted = state.record.received.insert(index);
        debug!(
            session_id = %id,
            chunk_index = index,
            received = state.record.received.len(),
            duplicate = !inserted,
            "chunk recorded"
        );
        Ok(inserted)
    }

    /// Returns a snapshot of the session.
    pub async fn get_session(&self, id: &SessionId) -> Result<SessionRecord, TransferError> {
        let entry = self.entry(id).await?;
        let state = entry.lock().await;
        if state.closed {
            return Err(TransferError::SessionNotFound(id.to_string()));
        }
        Ok(state.record.clone())
    }

    /// Removes the session. No-op for unknown ids.
    ///
    /// Waits for any in-flight operation holding the session lock (an
    /// assembly, for instance) before returning.
    pub async fn remove_session(&self, id: &SessionId) -> Option<SessionRecord> {
        let entry = self.sessions.write().await.remove(id)?;
        let mut state = entry.lock().await;
        if state.closed {
            return None;
        }
        state.closed = true;
        info!(session_id = %id, "session removed");
        Some(state.record.clone())
    }

    /// Snapshots of every live session.
    pub async fn list_sessions(&self) -> Vec<SessionRecord> {
        let entries: Vec<Arc<SessionEntry>> =
            self.sessions.read().await.values().cloned().collect();

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let state = entry.lock().await;
            if !state.closed {
                records.push(state.record.clone());
            }
        }
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Ids of sessions created before `cutoff`.
    pub async fn expired_before(&self, cutoff: DateTime<Utc>) -> Vec<SessionId> {
        self.list_sessions()
            .await
            .into_iter()
            .filter(|r| r.created_at < cutoff)
            .map(|r| r.id)
            .collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub(crate) async fn entry(&self, id: &SessionId) -> Result<Arc<SessionEntry>, TransferError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TransferError::SessionNotFound(id.to_string()))
    }

    /// Drops the map entry without touching the entry lock.
    ///
    /// For callers that already hold the lock and have marked the
    /// session closed.
    pub(crate) async fn forget(&self, id: &SessionId) {
        self.sessions.write().await.remove(id);
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, id: &SessionId, created_at: DateTime<Utc>) {
        if let Ok(entry) = self.entry(id).await {
            entry.lock().await.record.created_at = created_at;
        }
    }
}
