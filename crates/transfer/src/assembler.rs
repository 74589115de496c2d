//! Final assembly of a completed session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::TransferError;
use crate::registry::SessionRegistry;
use crate::session::SessionId;
use crate::store::ChunkStore;
use crate::validation::{PARTIAL_SUFFIX, sanitize_filename};

/// Result of a successful assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledArtifact {
    pub session_id: SessionId,
    pub path: PathBuf,
    pub size: u64,
}

/// Concatenates a session's chunks into its final artifact.
#[derive(Clone)]
pub struct Assembler {
    registry: Arc<SessionRegistry>,
    store: ChunkStore,
}

impl Assembler {
    pub fn new(registry: Arc<SessionRegistry>, store: ChunkStore) -> Self {
        Self { registry, store }
    }

    /// Where the artifact for `id` lands: `<root>/<sessionId>_<filename>`.
    pub fn artifact_path(&self, id: &SessionId, filename: &str) -> PathBuf {
        self.store.root().join(format!("{id}_{filename}"))
    }

    /// Assembles session `id`.
    ///
    /// The session lock is held for the whole operation, so concurrent
    /// completes of one session run one after the other and only the first
    /// produces the artifact. On failure the session and its chunks are left
    /// in place so completion can be retried.
    ///
    /// `filename` overrides the name given at session creation.
    pub async fn complete(
        &self,
        id: &SessionId,
        filename: Option<&str>,
    ) -> Result<AssembledArtifact, TransferError> {
        let entry = self.registry.entry(id).await?;
        let mut state = entry.lock().await;
        if state.closed {
            return Err(TransferError::SessionNotFound(id.to_string()));
        }

        let missing = state.record.missing_indices();
        if !missing.is_empty() {
            warn!(
                session_id = %id,
                missing = missing.len(),
                total_chunks = state.record.total_chunks(),
                "completion refused: upload incomplete"
            );
            return Err(TransferError::IncompleteUpload { missing });
        }

        let filename = match filename {
            Some(name) => sanitize_filename(name)?,
            None => state.record.filename.clone(),
        };

        let final_path = self.artifact_path(id, &filename);
        let partial_path = partial_path(&final_path);
        let total_chunks = state.record.total_chunks();

        let size = match self.concatenate(id, total_chunks, &partial_path).await {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial_path).await;
                error!(session_id = %id, error = %e, "assembly failed");
                return Err(e);
            }
        };

        if size != state.record.declared_size {
            let _ = tokio::fs::remove_file(&partial_path).await;
            error!(
                session_id = %id,
                size,
                declared_size = state.record.declared_size,
                "assembled size does not match declared size"
            );
            return Err(TransferError::Assembly(format!(
                "assembled {size} bytes, expected {}",
                state.record.declared_size
            )));
        }

        if let Err(e) = tokio::fs::rename(&partial_path, &final_path).await {
            let _ = tokio::fs::remove_file(&partial_path).await;
            error!(session_id = %id, error = %e, "failed to move artifact into place");
            return Err(TransferError::Assembly(format!("finalizing artifact: {e}")));
        }

        // The artifact is complete from here on; cleanup failures are only logged.
        if let Err(e) = self.store.delete_session_chunks(id).await {
            warn!(session_id = %id, error = %e, "failed to delete assembled chunks");
        }
        state.closed = true;
        self.registry.forget(id).await;

        info!(
            session_id = %id,
            path = %final_path.display(),
            size,
            chunks = total_chunks,
            "artifact assembled"
        );

        Ok(AssembledArtifact {
            session_id: id.clone(),
            path: final_path,
            size,
        })
    }

    /// Streams chunks `0..total_chunks` in order into `dest`.
    async fn concatenate(
        &self,
        id: &SessionId,
        total_chunks: u64,
        dest: &Path,
    ) -> Result<u64, TransferError> {
        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(|e| TransferError::Assembly(format!("creating artifact: {e}")))?;

        let mut written = 0u64;
        for index in 0..total_chunks {
            let mut chunk = self
                .store
                .open_chunk(id, index)
                .await
                .map_err(|e| TransferError::Assembly(format!("opening chunk {index}: {e}")))?;
            written += tokio::io::copy(&mut chunk, &mut out)
                .await
                .map_err(|e| TransferError::Assembly(format!("copying chunk {index}: {e}")))?;
        }

        out.flush()
            .await
            .map_err(|e| TransferError::Assembly(format!("flushing artifact: {e}")))?;
        out.sync_all()
            .await
            .map_err(|e| TransferError::Assembly(format!("syncing artifact: {e}")))?;
        Ok(written)
    }
}

fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}
