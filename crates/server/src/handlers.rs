//! Request handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use tracing::{debug, info, warn};

use chunkline_protocol::constants::{
    FIELD_CHECKSUM, FIELD_CHUNK, FIELD_CHUNK_INDEX, FIELD_SESSION_ID, SERVICE_NAME,
};
use chunkline_protocol::{
    ChunkAccepted, CompleteRequest, CompleteResponse, CreateSessionRequest,
    CreateSessionResponse, ServiceStatus, SessionStatus,
};
use chunkline_transfer::{SessionId, TransferError, verify_checksum};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Client-supplied ids that are not even well-formed cannot name a live
/// session, so they are reported as not found.
fn lookup_id(raw: &str) -> Result<SessionId, TransferError> {
    SessionId::parse(raw).map_err(|_| TransferError::SessionNotFound(raw.to_string()))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))
}

/// `POST /session`
pub async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> ApiResult<Json<CreateSessionResponse>> {
    let req = json_body(payload)?;
    let record = state
        .registry
        .create_session(&req.filename, req.declared_size)
        .await?;
    Ok(Json(record.to_create_response()))
}

/// Fields collected from a `POST /chunk` form.
#[derive(Default)]
struct ChunkForm {
    session_id: Option<String>,
    chunk_index: Option<String>,
    checksum: Option<String>,
    data: Option<axum::body::Bytes>,
}

async fn read_chunk_form(mut multipart: Multipart) -> ApiResult<ChunkForm> {
    let mut form = ChunkForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FIELD_CHUNK => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
                form.data = Some(bytes);
            }
            FIELD_SESSION_ID | FIELD_CHUNK_INDEX | FIELD_CHECKSUM => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
                match name.as_str() {
                    FIELD_SESSION_ID => form.session_id = Some(text),
                    FIELD_CHUNK_INDEX => form.chunk_index = Some(text),
                    _ => form.checksum = Some(text),
                }
            }
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }
    Ok(form)
}

/// `POST /chunk`
///
/// The index is recorded only after the payload is durably stored.
pub async fn upload_chunk(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<ChunkAccepted>> {
    let form = read_chunk_form(multipart).await?;

    let raw_id = form
        .session_id
        .ok_or_else(|| ApiError::InvalidRequest(format!("missing field {FIELD_SESSION_ID}")))?;
    let id = lookup_id(&raw_id)?;
    let record = state.registry.get_session(&id).await?;

    let raw_index = form
        .chunk_index
        .ok_or_else(|| ApiError::InvalidRequest(format!("missing field {FIELD_CHUNK_INDEX}")))?;
    let index: u64 = raw_index.trim().parse().map_err(|_| {
        ApiError::InvalidRequest(format!(
            "{FIELD_CHUNK_INDEX} must be a non-negative integer, got {raw_index:?}"
        ))
    })?;

    let data = form
        .data
        .ok_or_else(|| ApiError::InvalidRequest(format!("missing field {FIELD_CHUNK}")))?;

    record.check_chunk(index, data.len() as u64)?;
    if let Some(expected) = form.checksum.as_deref().filter(|c| !c.trim().is_empty()) {
        verify_checksum(index, &data, expected)?;
    }

    state.store.write_chunk(&id, index, &data).await?;

    if let Err(e) = state.registry.record_chunk_received(&id, index).await {
        // The session was assembled or cancelled while this chunk was in flight.
        if let Err(cleanup) = state.store.delete_chunk(&id, index).await {
            warn!(session_id = %id, chunk_index = index, error = %cleanup, "failed to discard late chunk");
        }
        return Err(e.into());
    }

    Ok(Json(ChunkAccepted {
        accepted: true,
        chunk_index: index,
    }))
}

/// `POST /complete`
pub async fn complete_upload(
    State(state): State<AppState>,
    payload: Result<Json<CompleteRequest>, JsonRejection>,
) -> ApiResult<Json<CompleteResponse>> {
    let req = json_body(payload)?;
    let id = lookup_id(&req.session_id)?;

    let artifact = state
        .assembler
        .complete(&id, req.filename.as_deref())
        .await?;

    Ok(Json(CompleteResponse {
        artifact_path: artifact.path.display().to_string(),
        size: artifact.size,
    }))
}

/// `GET /session/{id}`
pub async fn get_session(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<SessionStatus>> {
    let id = lookup_id(&raw_id)?;
    let record = state.registry.get_session(&id).await?;
    Ok(Json(record.to_status()))
}

/// `DELETE /session/{id}`
///
/// Idempotent: unknown ids succeed too.
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> StatusCode {
    let Ok(id) = SessionId::parse(&raw_id) else {
        return StatusCode::NO_CONTENT;
    };

    if state.registry.remove_session(&id).await.is_some() {
        info!(session_id = %id, "session cancelled by client");
    }
    if let Err(e) = state.store.delete_session_chunks(&id).await {
        // The sweeper removes orphaned staging directories later.
        warn!(session_id = %id, error = %e, "failed to delete cancelled chunks");
    }
    StatusCode::NO_CONTENT
}

/// `GET /status`
pub async fn service_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        status: "active".into(),
        service: SERVICE_NAME.into(),
        version: env!("CARGO_PKG_VERSION").into(),
        active_sessions: state.registry.session_count().await,
        chunk_size: state.registry.chunk_size(),
        session_ttl_secs: state.session_ttl.as_secs(),
    })
}
