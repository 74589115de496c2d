//! reqwest implementation of [`UploadConnection`].

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use tracing::debug;

use chunkline_protocol::constants::{
    FIELD_CHECKSUM, FIELD_CHUNK, FIELD_CHUNK_INDEX, FIELD_SESSION_ID, ROUTE_CHUNK, ROUTE_COMPLETE,
    ROUTE_SESSION, ROUTE_STATUS,
};
use chunkline_protocol::{
    ChunkAccepted, CompleteRequest, CompleteResponse, CreateSessionRequest,
    CreateSessionResponse, ErrorResponse, ServiceStatus, SessionStatus,
};
use chunkline_transfer::Chunk;

use crate::connection::{ConnectionFuture, UploadConnection};
use crate::error::ClientError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks to a Chunkline server over HTTP.
#[derive(Clone)]
pub struct HttpConnection {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConnection {
    /// Creates a connection to `base_url` (e.g. `http://127.0.0.1:3000`).
    ///
    /// `request_timeout` bounds every request, chunk uploads included.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}{ROUTE_SESSION}/{session_id}", self.base_url)
    }
}

/// Decodes a success body, or turns an error body into a [`ClientError`].
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }

    let bytes = resp.bytes().await?;
    Err(match serde_json::from_slice::<ErrorResponse>(&bytes) {
        Ok(body) => ClientError::from_response(status.as_u16(), body),
        Err(_) => ClientError::Server {
            status: status.as_u16(),
            message: String::from_utf8_lossy(&bytes).into_owned(),
        },
    })
}

impl UploadConnection for HttpConnection {
    fn create_session(
        &self,
        req: CreateSessionRequest,
    ) -> ConnectionFuture<'_, CreateSessionResponse> {
        Box::pin(async move {
            let resp = self
                .client
                .post(self.url(ROUTE_SESSION))
                .json(&req)
                .send()
                .await?;
            decode(resp).await
        })
    }

    fn upload_chunk(&self, session_id: String, chunk: Chunk) -> ConnectionFuture<'_, ChunkAccepted> {
        Box::pin(async move {
            let index = chunk.index;
            let len = chunk.data.len();
            let part = Part::bytes(chunk.data)
                .file_name("blob")
                .mime_str("application/octet-stream")?;
            let form = Form::new()
                .text(FIELD_SESSION_ID, session_id)
                .text(FIELD_CHUNK_INDEX, index.to_string())
                .text(FIELD_CHECKSUM, chunk.checksum)
                .part(FIELD_CHUNK, part);

            let resp = self
                .client
                .post(self.url(ROUTE_CHUNK))
                .multipart(form)
                .send()
                .await?;
            let ack: ChunkAccepted = decode(resp).await?;
            debug!(chunk_index = index, bytes = len, "chunk acknowledged");
            Ok(ack)
        })
    }

    fn complete(&self, req: CompleteRequest) -> ConnectionFuture<'_, CompleteResponse> {
        Box::pin(async move {
            let resp = self
                .client
                .post(self.url(ROUTE_COMPLETE))
                .json(&req)
                .send()
                .await?;
            decode(resp).await
        })
    }

    fn session_status(&self, session_id: String) -> ConnectionFuture<'_, SessionStatus> {
        Box::pin(async move {
            let resp = self.client.get(self.session_url(&session_id)).send().await?;
            decode(resp).await
        })
    }

    fn cancel_session(&self, session_id: String) -> ConnectionFuture<'_, ()> {
        Box::pin(async move {
            let resp = self
                .client
                .delete(self.session_url(&session_id))
                .send()
                .await?;
            if resp.status().is_success() {
                return Ok(());
            }
            match decode::<serde_json::Value>(resp).await {
                // Already gone is what we wanted.
                Err(ClientError::SessionNotFound(_)) => Ok(()),
                Err(e) => Err(e),
                Ok(_) => Ok(()),
            }
        })
    }

    fn server_status(&self) -> ConnectionFuture<'_, ServiceStatus> {
        Box::pin(async move {
            let resp = self.client.get(self.url(ROUTE_STATUS)).send().await?;
            decode(resp).await
        })
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}
