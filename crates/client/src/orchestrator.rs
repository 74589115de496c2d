//! Transfer orchestrator for one file.
//!
//! Drives `Idle → Active ⇄ Paused → Success` (or `Active → Error`): opens a
//! session, uploads chunk `last_ack + 1` until the file is exhausted, then
//! asks the server to assemble. Exactly one chunk is in flight at a time.
//!
//! Every in-flight request races its own [`CancellationToken`]; `pause`
//! cancels it, which drops the request future and aborts the HTTP call.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chunkline_protocol::{CompleteRequest, CreateSessionRequest};
use chunkline_transfer::{Chunk, ChunkReader, chunk_count, chunk_range};

use crate::connection::UploadConnection;
use crate::error::ClientError;
use crate::resume::ResumeRecord;
use crate::retry::RetryPolicy;
use crate::types::{TransferEvent, TransferOutcome, TransferState};

const EVENT_BUFFER: usize = 256;

struct FileInfo {
    path: PathBuf,
    name: String,
    size: u64,
}

struct SessionInfo {
    id: String,
    chunk_size: u64,
    total_chunks: u64,
}

struct Inner {
    state: TransferState,
    /// Bumped by start, resume, cancel and restore. A run whose generation
    /// is stale stops at its next checkpoint and never touches state.
    generation: u64,
    file: Option<FileInfo>,
    session: Option<SessionInfo>,
    last_ack: Option<u64>,
    bytes_sent: u64,
    progress: f64,
    finalizing: bool,
    /// Ask the server which chunks it holds before resuming.
    needs_sync: bool,
    /// A completion request went out and its outcome is unknown.
    completion_requested: bool,
    last_error: Option<String>,
}

impl Inner {
    fn idle(generation: u64) -> Self {
        Self {
            state: TransferState::Idle,
            generation,
            file: None,
            session: None,
            last_ack: None,
            bytes_sent: 0,
            progress: 0.0,
            finalizing: false,
            needs_sync: false,
            completion_requested: false,
            last_error: None,
        }
    }

    fn next_index(&self) -> u64 {
        self.last_ack.map_or(0, |i| i + 1)
    }

    /// Why a run with `generation` must stop, if it must.
    fn interruption(&self, generation: u64, paused: bool) -> Option<TransferOutcome> {
        if self.generation != generation {
            return Some(if self.state == TransferState::Idle {
                TransferOutcome::Cancelled
            } else {
                TransferOutcome::Paused
            });
        }
        if paused || self.state != TransferState::Active {
            return Some(TransferOutcome::Paused);
        }
        None
    }
}

#[derive(Default)]
struct InFlight {
    next_id: u64,
    current: Option<(u64, CancellationToken)>,
}

/// Immutable view of the transfer a run works on.
struct Plan {
    generation: u64,
    path: PathBuf,
    file_name: String,
    file_size: u64,
    session_id: String,
    chunk_size: u64,
    total_chunks: u64,
}

/// Uploads one file with pause, resume, retry and cancellation.
///
/// Share it behind an `Arc`: one task awaits [`start`](Self::start) or
/// [`resume`](Self::resume) while another calls [`pause`](Self::pause).
pub struct TransferOrchestrator {
    conn: Arc<dyn UploadConnection>,
    retry: RetryPolicy,
    inner: Mutex<Inner>,
    paused: AtomicBool,
    in_flight: Mutex<InFlight>,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransferEvent>>>,
}

impl TransferOrchestrator {
    pub fn new(conn: Arc<dyn UploadConnection>) -> Self {
        Self::with_retry(conn, RetryPolicy::default())
    }

    pub fn with_retry(conn: Arc<dyn UploadConnection>, retry: RetryPolicy) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            conn,
            retry,
            inner: Mutex::new(Inner::idle(0)),
            paused: AtomicBool::new(false),
            in_flight: Mutex::new(InFlight::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Events are dropped rather than stalling the upload when the
    /// receiver falls behind.
    pub fn take_events(&self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn state(&self) -> TransferState {
        self.lock().state
    }

    /// Percentage in `[0, 100]`.
    pub fn progress(&self) -> f64 {
        self.lock().progress
    }

    pub fn last_acknowledged_index(&self) -> Option<u64> {
        self.lock().last_ack
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock().session.as_ref().map(|s| s.id.clone())
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// `true` when [`resume`](Self::resume) is allowed.
    pub fn can_resume(&self) -> bool {
        let inner = self.lock();
        matches!(inner.state, TransferState::Paused | TransferState::Error)
            && inner.session.is_some()
    }

    /// Uploads `path` from scratch in a new session.
    ///
    /// Returns when the upload completes, is paused, or is cancelled.
    pub async fn start(&self, path: impl AsRef<Path>) -> Result<TransferOutcome, ClientError> {
        let path = path.as_ref().to_path_buf();
        let (file_size, file_name) = inspect_file(&path).await?;

        let generation = {
            let mut inner = self.lock();
            match inner.state {
                TransferState::Idle | TransferState::Success | TransferState::Error => {}
                other => {
                    return Err(ClientError::InvalidState(format!(
                        "cannot start a transfer while {other}"
                    )));
                }
            }
            let generation = inner.generation + 1;
            *inner = Inner::idle(generation);
            inner.state = TransferState::Active;
            inner.file = Some(FileInfo {
                path: path.clone(),
                name: file_name.clone(),
                size: file_size,
            });
            generation
        };
        self.paused.store(false, Ordering::SeqCst);

        info!(
            file = %path.display(),
            size = file_size,
            server = %self.conn.endpoint(),
            "starting transfer"
        );

        let req = CreateSessionRequest {
            filename: file_name,
            declared_size: file_size,
        };
        let created = match self.conn.create_session(req).await {
            Ok(created) => created,
            Err(e) => return Err(self.fail(generation, e)),
        };
        if created.chunk_size == 0 {
            let e = ClientError::InvalidState("server returned a zero chunk size".into());
            return Err(self.fail(generation, e));
        }

        let total_chunks = chunk_count(file_size, created.chunk_size);
        let superseded = {
            let mut inner = self.lock();
            if inner.generation == generation {
                inner.session = Some(SessionInfo {
                    id: created.session_id.clone(),
                    chunk_size: created.chunk_size,
                    total_chunks,
                });
                false
            } else {
                true
            }
        };
        if superseded {
            // Cancelled while the session was being created.
            let _ = self.conn.cancel_session(created.session_id).await;
            return Ok(TransferOutcome::Cancelled);
        }

        debug!(
            session_id = %created.session_id,
            chunk_size = created.chunk_size,
            total_chunks,
            "session created"
        );
        self.emit(TransferEvent::SessionCreated {
            session_id: created.session_id,
            chunk_size: created.chunk_size,
            total_chunks,
        });

        self.drive(generation).await
    }

    /// Continues a paused (or retryably failed) transfer from the chunk
    /// after the last acknowledged one, in the same session.
    pub async fn resume(&self) -> Result<TransferOutcome, ClientError> {
        let (generation, needs_sync, session_id, file_path, file_size) = {
            let mut inner = self.lock();
            let resumable = matches!(inner.state, TransferState::Paused | TransferState::Error);
            let (Some(session), Some(file), true) = (&inner.session, &inner.file, resumable) else {
                return Err(ClientError::InvalidState(format!(
                    "nothing to resume while {}",
                    inner.state
                )));
            };
            let snapshot = (
                session.id.clone(),
                file.path.clone(),
                file.size,
            );
            inner.generation += 1;
            inner.state = TransferState::Active;
            inner.last_error = None;
            (
                inner.generation,
                inner.needs_sync,
                snapshot.0,
                snapshot.1,
                snapshot.2,
            )
        };
        self.paused.store(false, Ordering::SeqCst);

        match inspect_file(&file_path).await {
            Ok((size, _)) if size == file_size => {}
            Ok((size, _)) => {
                let e = ClientError::InvalidRequest(format!(
                    "source file changed size ({file_size} -> {size} bytes)"
                ));
                return Err(self.fail(generation, e));
            }
            Err(e) => return Err(self.fail(generation, e)),
        }

        if needs_sync {
            self.sync_with_server(generation, &session_id).await?;
        }

        let next_index = self.lock().next_index();
        info!(session_id = %session_id, next_index, "resuming transfer");
        self.emit(TransferEvent::Resumed { next_index });

        self.drive(generation).await
    }

    /// Pauses an active transfer, aborting the in-flight chunk.
    ///
    /// Returns `false` if there was nothing to pause, including while the
    /// server is assembling the artifact.
    pub fn pause(&self) -> bool {
        let event = {
            let mut inner = self.lock();
            if inner.state != TransferState::Active || inner.finalizing {
                return false;
            }
            self.paused.store(true, Ordering::SeqCst);
            if let Some((_, token)) = &self.in_flight_lock().current {
                token.cancel();
            }
            inner.state = TransferState::Paused;
            TransferEvent::Paused {
                last_acknowledged_index: inner.last_ack,
                progress: inner.progress,
            }
        };

        info!("transfer paused");
        self.emit(event);
        true
    }

    /// Stops the transfer, asks the server to discard the session, and
    /// returns to `Idle`.
    ///
    /// The server call is best effort; its failure is only logged.
    pub async fn cancel(&self) -> Result<(), ClientError> {
        let session_id = {
            let mut inner = self.lock();
            if inner.finalizing {
                return Err(ClientError::InvalidState(
                    "the server is already assembling this upload".into(),
                ));
            }
            self.paused.store(true, Ordering::SeqCst);
            if let Some((_, token)) = &self.in_flight_lock().current {
                token.cancel();
            }
            let session = inner.session.take();
            *inner = Inner::idle(inner.generation + 1);
            session.map(|s| s.id)
        };
        self.emit(TransferEvent::Cancelled);

        if let Some(id) = session_id {
            match self.conn.cancel_session(id.clone()).await {
                Ok(()) => info!(session_id = %id, "transfer cancelled"),
                Err(e) => warn!(session_id = %id, error = %e, "failed to cancel server session"),
            }
        }
        Ok(())
    }

    /// Captures what is needed to resume in another process.
    ///
    /// `None` when no session is held.
    pub fn snapshot(&self) -> Option<ResumeRecord> {
        let inner = self.lock();
        let file = inner.file.as_ref()?;
        let session = inner.session.as_ref()?;
        Some(ResumeRecord {
            session_id: session.id.clone(),
            server_url: self.conn.endpoint().to_string(),
            file_path: file.path.clone(),
            file_name: file.name.clone(),
            file_size: file.size,
            chunk_size: session.chunk_size,
            last_acknowledged_index: inner.last_ack,
            progress: inner.progress,
            completion_requested: inner.completion_requested,
            updated_at: Utc::now(),
        })
    }

    /// Reattaches a persisted transfer. The orchestrator ends up `Paused`;
    /// call [`resume`](Self::resume) to continue. The server is asked which
    /// chunks it holds before the first upload.
    pub fn restore(&self, record: ResumeRecord) -> Result<(), ClientError> {
        if record.chunk_size == 0 || record.file_size == 0 {
            return Err(ClientError::InvalidRequest(
                "resume record has no chunk layout".into(),
            ));
        }

        let mut inner = self.lock();
        if matches!(inner.state, TransferState::Active | TransferState::Paused) {
            return Err(ClientError::InvalidState(format!(
                "cannot restore while {}",
                inner.state
            )));
        }

        let generation = inner.generation + 1;
        *inner = Inner::idle(generation);
        inner.state = TransferState::Paused;
        inner.needs_sync = true;
        inner.completion_requested = record.completion_requested;
        inner.file = Some(FileInfo {
            path: record.file_path,
            name: record.file_name,
            size: record.file_size,
        });
        inner.session = Some(SessionInfo {
            id: record.session_id,
            chunk_size: record.chunk_size,
            total_chunks: chunk_count(record.file_size, record.chunk_size),
        });
        set_acknowledged(&mut inner, record.last_acknowledged_index);
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    async fn drive(&self, generation: u64) -> Result<TransferOutcome, ClientError> {
        let Some(plan) = self.plan(generation) else {
            return Ok(self.interruption(generation));
        };

        loop {
            if let Some(outcome) = self.check_interrupted(generation) {
                return Ok(outcome);
            }
            let index = self.lock().next_index();
            if index >= plan.total_chunks {
                break;
            }

            let chunk = match read_chunk(&plan.path, plan.chunk_size, index).await {
                Ok(chunk) => chunk,
                Err(e) => return Err(self.fail(generation, e)),
            };

            match self.send_chunk(&plan, chunk).await {
                Ok(true) => self.acknowledge(&plan, index),
                Ok(false) => return Ok(self.interruption(generation)),
                Err(e) => return Err(self.fail(generation, e)),
            }
        }

        self.finalize(&plan).await
    }

    fn plan(&self, generation: u64) -> Option<Plan> {
        let inner = self.lock();
        if inner.generation != generation {
            return None;
        }
        let file = inner.file.as_ref()?;
        let session = inner.session.as_ref()?;
        Some(Plan {
            generation,
            path: file.path.clone(),
            file_name: file.name.clone(),
            file_size: file.size,
            session_id: session.id.clone(),
            chunk_size: session.chunk_size,
            total_chunks: session.total_chunks,
        })
    }

    /// Uploads one chunk, retrying retryable failures.
    ///
    /// `Ok(false)` means the attempt was interrupted by pause or cancel.
    async fn send_chunk(&self, plan: &Plan, chunk: Chunk) -> Result<bool, ClientError> {
        let index = chunk.index;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let Some((attempt_id, token)) = self.arm(plan.generation) else {
                return Ok(false);
            };
            let result = tokio::select! {
                biased;

                _ = token.cancelled() => None,
                r = self.conn.upload_chunk(plan.session_id.clone(), chunk.clone()) => Some(r),
            };
            self.disarm(attempt_id);

            let err = match result {
                None => {
                    debug!(chunk_index = index, "chunk upload aborted");
                    return Ok(false);
                }
                Some(Ok(ack)) if ack.accepted && ack.chunk_index == index => return Ok(true),
                Some(Ok(ack)) => {
                    return Err(ClientError::InvalidState(format!(
                        "server acknowledged chunk {} while {index} was sent",
                        ack.chunk_index
                    )));
                }
                Some(Err(e)) => e,
            };

            if !err.is_retryable() || attempt >= self.retry.max_attempts {
                return Err(err);
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                chunk_index = index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "chunk upload failed, retrying"
            );
            self.emit(TransferEvent::Retrying {
                chunk_index: index,
                attempt,
                delay,
                error: err.to_string(),
            });

            let Some((attempt_id, token)) = self.arm(plan.generation) else {
                return Ok(false);
            };
            let interrupted = tokio::select! {
                biased;

                _ = token.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            self.disarm(attempt_id);
            if interrupted {
                return Ok(false);
            }
        }
    }

    fn acknowledge(&self, plan: &Plan, index: u64) {
        let event = {
            let mut inner = self.lock();
            if inner.generation != plan.generation {
                return;
            }
            set_acknowledged(&mut inner, Some(index));
            TransferEvent::Progress {
                chunk_index: index,
                bytes_sent: inner.bytes_sent,
                total_bytes: plan.file_size,
                progress: inner.progress,
            }
        };
        debug!(chunk_index = index, total_chunks = plan.total_chunks, "chunk acknowledged");
        self.emit(event);
    }

    async fn finalize(&self, plan: &Plan) -> Result<TransferOutcome, ClientError> {
        {
            let mut inner = self.lock();
            let paused = self.paused.load(Ordering::SeqCst);
            if let Some(outcome) = inner.interruption(plan.generation, paused) {
                return Ok(outcome);
            }
            inner.finalizing = true;
        }

        let req = CompleteRequest {
            session_id: plan.session_id.clone(),
            filename: Some(plan.file_name.clone()),
        };
        let result = self.conn.complete(req).await;
        self.lock().finalizing = false;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                if e.is_retryable() {
                    // The server may have assembled before the response was
                    // lost, so the next resume asks it first.
                    let mut inner = self.lock();
                    if inner.generation == plan.generation {
                        inner.completion_requested = true;
                        inner.needs_sync = true;
                    }
                }
                return Err(self.fail(plan.generation, e));
            }
        };

        {
            let mut inner = self.lock();
            if inner.generation == plan.generation {
                inner.state = TransferState::Success;
                inner.session = None;
                inner.last_ack = None;
                inner.needs_sync = false;
                inner.completion_requested = false;
                inner.bytes_sent = plan.file_size;
                inner.progress = 100.0;
            }
        }

        info!(
            session_id = %plan.session_id,
            artifact = %resp.artifact_path,
            size = resp.size,
            "transfer completed"
        );
        self.emit(TransferEvent::Completed {
            artifact_path: resp.artifact_path.clone(),
            size: resp.size,
        });
        Ok(TransferOutcome::Completed(resp))
    }

    /// Moves to `Error` and decides whether the session survives.
    ///
    /// Retryable failures keep it so `resume` can continue; an incomplete
    /// upload keeps it and re-syncs from the server on resume. Anything
    /// else drops it, so the next `start` begins fresh. That includes
    /// [`ClientError::CompletionUnconfirmed`], where the artifact may
    /// already exist and uploading again would duplicate it.
    fn fail(&self, generation: u64, e: ClientError) -> ClientError {
        let resumable = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return e;
            }
            let keep = e.is_retryable() || matches!(e, ClientError::IncompleteUpload { .. });
            inner.state = TransferState::Error;
            inner.finalizing = false;
            inner.last_error = Some(e.to_string());
            if matches!(e, ClientError::IncompleteUpload { .. }) {
                inner.needs_sync = true;
            }
            if !keep {
                inner.session = None;
                inner.last_ack = None;
                inner.needs_sync = false;
                inner.completion_requested = false;
            }
            keep && inner.session.is_some()
        };

        error!(error = %e, resumable, "transfer failed");
        self.emit(TransferEvent::Failed {
            error: e.to_string(),
            resumable,
        });
        e
    }

    /// Adopts the server's contiguous prefix as the acknowledged index.
    async fn sync_with_server(&self, generation: u64, session_id: &str) -> Result<(), ClientError> {
        let status = match self.conn.session_status(session_id.to_string()).await {
            Ok(status) => status,
            Err(ClientError::SessionNotFound(_)) if self.lock().completion_requested => {
                let e = ClientError::CompletionUnconfirmed(session_id.to_string());
                return Err(self.fail(generation, e));
            }
            Err(e) => return Err(self.fail(generation, e)),
        };
        let server_ack = status.last_contiguous_index();

        let event = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return Ok(());
            }
            inner.needs_sync = false;
            inner.completion_requested = false;
            if server_ack == inner.last_ack {
                return Ok(());
            }
            warn!(
                session_id,
                local = ?inner.last_ack,
                server = ?server_ack,
                "adopting server view of acknowledged chunks"
            );
            set_acknowledged(&mut inner, server_ack);
            TransferEvent::Resynced {
                last_acknowledged_index: inner.last_ack,
                progress: inner.progress,
            }
        };
        self.emit(event);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Registers a fresh token for the next in-flight operation.
    ///
    /// `None` if a pause is pending or the run was superseded.
    fn arm(&self, generation: u64) -> Option<(u64, CancellationToken)> {
        let token = CancellationToken::new();
        let id = {
            let mut slot = self.in_flight_lock();
            slot.next_id += 1;
            slot.current = Some((slot.next_id, token.clone()));
            slot.next_id
        };
        // The token is stored before the flag is read: a concurrent pause
        // either cancels it or is observed here.
        if self.paused.load(Ordering::SeqCst) || self.lock().generation != generation {
            self.disarm(id);
            return None;
        }
        Some((id, token))
    }

    fn disarm(&self, id: u64) {
        let mut slot = self.in_flight_lock();
        if slot.current.as_ref().is_some_and(|(current, _)| *current == id) {
            slot.current = None;
        }
    }

    fn check_interrupted(&self, generation: u64) -> Option<TransferOutcome> {
        let paused = self.paused.load(Ordering::SeqCst);
        self.lock().interruption(generation, paused)
    }

    fn interruption(&self, generation: u64) -> TransferOutcome {
        self.check_interrupted(generation)
            .unwrap_or(TransferOutcome::Paused)
    }

    fn emit(&self, event: TransferEvent) {
        if self.events_tx.try_send(event).is_err() {
            debug!("transfer event dropped");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight_lock(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sets the acknowledged index and the byte count and progress it implies.
fn set_acknowledged(inner: &mut Inner, last_ack: Option<u64>) {
    let (Some(file), Some(session)) = (&inner.file, &inner.session) else {
        return;
    };
    let bytes_sent = last_ack
        .and_then(|i| chunk_range(i, file.size, session.chunk_size))
        .map_or(0, |r| r.end);
    let progress = percent(bytes_sent, file.size);

    inner.last_ack = last_ack;
    inner.bytes_sent = bytes_sent;
    inner.progress = progress;
}

fn percent(bytes_sent: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (bytes_sent as f64 * 100.0 / total as f64).min(100.0)
}

/// Size and display name of an uploadable file.
async fn inspect_file(path: &Path) -> Result<(u64, String), ClientError> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(ClientError::InvalidRequest(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    if meta.len() == 0 {
        return Err(ClientError::InvalidRequest(format!(
            "{} is empty",
            path.display()
        )));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ClientError::InvalidRequest(format!("{} has no file name", path.display())))?;
    Ok((meta.len(), name))
}

async fn read_chunk(path: &Path, chunk_size: u64, index: u64) -> Result<Chunk, ClientError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut reader = ChunkReader::new(&path, chunk_size)?;
        reader.read_chunk(index)
    })
    .await
    .map_err(|e| ClientError::Io(std::io::Error::other(format!("task join error: {e}"))))??
    .ok_or_else(|| ClientError::InvalidState(format!("chunk {index} is past the end of the file")))
}
