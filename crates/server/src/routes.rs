//! Route configuration.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use chunkline_protocol::constants::{
    MULTIPART_OVERHEAD, ROUTE_CHUNK, ROUTE_COMPLETE, ROUTE_SESSION, ROUTE_SESSION_BY_ID,
    ROUTE_STATUS,
};

use crate::handlers;
use crate::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // One chunk plus multipart framing; anything bigger can never be admitted.
    let chunk_body_limit = (state.registry.chunk_size() + MULTIPART_OVERHEAD) as usize;

    Router::new()
        .route(ROUTE_SESSION, post(handlers::create_session))
        .route(
            ROUTE_SESSION_BY_ID,
            get(handlers::get_session).delete(handlers::cancel_session),
        )
        .route(
            ROUTE_CHUNK,
            post(handlers::upload_chunk).layer(DefaultBodyLimit::max(chunk_body_limit)),
        )
        .route(ROUTE_COMPLETE, post(handlers::complete_upload))
        .route(ROUTE_STATUS, get(handlers::service_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use chunkline_transfer::{ChunkStore, SessionRegistry, checksum_bytes};

    const BOUNDARY: &str = "chunkline-test-boundary";

    struct TestServer {
        dir: TempDir,
        state: AppState,
        router: Router,
    }

    fn test_server(chunk_size: u64) -> TestServer {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::with_exact_chunk_size(chunk_size));
        let store = ChunkStore::new(dir.path());
        let state = AppState::new(registry, store, Duration::from_secs(60));
        let router = create_router(state.clone());
        TestServer { dir, state, router }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn json_request(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        send(router, builder.body(body).unwrap()).await
    }

    /// Builds a multipart body from text fields and an optional chunk payload.
    fn multipart_body(fields: &[(&str, &str)], chunk: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        if let Some(data) = chunk {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                b"Content-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\n",
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn post_chunk(
        router: &Router,
        fields: &[(&str, &str)],
        chunk: Option<&[u8]>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/chunk")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields, chunk)))
            .unwrap();
        send(router, request).await
    }

    async fn create(router: &Router, filename: &str, size: u64) -> String {
        let (status, body) = json_request(
            router,
            "POST",
            "/session",
            Some(json!({"filename": filename, "declaredSize": size})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn create_session_returns_id_and_chunk_size() {
        let server = test_server(4);
        let (status, body) = json_request(
            &server.router,
            "POST",
            "/session",
            Some(json!({"filename": "a.bin", "declaredSize": 10})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chunkSize"], 4);
        assert_eq!(body["totalChunks"], 3);
        assert_eq!(body["sessionId"].as_str().unwrap().len(), 32);
    }

    #[tokio::test]
    async fn create_session_missing_fields_is_bad_request() {
        let server = test_server(4);
        let (status, body) = json_request(
            &server.router,
            "POST",
            "/session",
            Some(json!({"filename": "a.bin"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");

        let (status, _) = json_request(
            &server.router,
            "POST",
            "/session",
            Some(json!({"filename": "a.bin", "declaredSize": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn full_upload_produces_artifact() {
        let server = test_server(4);
        let data = b"0123456789";
        let id = create(&server.router, "digits.txt", 10).await;

        // Out of order on purpose.
        for index in [2u64, 0, 1] {
            let start = index as usize * 4;
            let end = std::cmp::min(start + 4, data.len());
            let idx = index.to_string();
            let (status, body) = post_chunk(
                &server.router,
                &[("sessionId", id.as_str()), ("chunkIndex", idx.as_str())],
                Some(&data[start..end]),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            assert_eq!(body["accepted"], true);
            assert_eq!(body["chunkIndex"], index);
        }

        let (status, body) = json_request(
            &server.router,
            "POST",
            "/complete",
            Some(json!({"sessionId": id, "filename": "digits.txt"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["size"], 10);

        let artifact = server.dir.path().join(format!("{id}_digits.txt"));
        assert_eq!(std::fs::read(artifact).unwrap(), data);

        // Session is gone afterwards.
        let (status, _) =
            json_request(&server.router, "GET", &format!("/session/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chunk_for_unknown_session_is_not_found() {
        let server = test_server(4);
        let unknown = chunkline_transfer::SessionId::generate().to_string();
        let (status, body) = post_chunk(
            &server.router,
            &[("sessionId", unknown.as_str()), ("chunkIndex", "0")],
            Some(b"abcd"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "session_not_found");

        let (status, _) = post_chunk(
            &server.router,
            &[("sessionId", "../../etc"), ("chunkIndex", "0")],
            Some(b"abcd"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chunk_with_bad_index_is_bad_request() {
        let server = test_server(4);
        let id = create(&server.router, "a.bin", 10).await;

        for bad in ["abc", "-1", ""] {
            let (status, body) = post_chunk(
                &server.router,
                &[("sessionId", id.as_str()), ("chunkIndex", bad)],
                Some(b"abcd"),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "index {bad:?}");
            assert_eq!(body["code"], "invalid_request");
        }

        // Missing index field altogether.
        let (status, _) = post_chunk(&server.router, &[("sessionId", id.as_str())], Some(b"abcd")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chunk_outside_layout_is_rejected() {
        let server = test_server(4);
        let id = create(&server.router, "a.bin", 10).await;

        // Index past the end.
        let (status, _) = post_chunk(
            &server.router,
            &[("sessionId", id.as_str()), ("chunkIndex", "3")],
            Some(b"ab"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Wrong size for a middle chunk.
        let (status, _) = post_chunk(
            &server.router,
            &[("sessionId", id.as_str()), ("chunkIndex", "1")],
            Some(b"abc"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Missing payload.
        let (status, _) =
            post_chunk(&server.router, &[("sessionId", id.as_str()), ("chunkIndex", "0")], None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let record = server
            .state
            .registry
            .get_session(&id.parse().unwrap())
            .await
            .unwrap();
        assert!(record.received.is_empty());
    }

    #[tokio::test]
    async fn chunk_checksum_is_verified() {
        let server = test_server(4);
        let id = create(&server.router, "a.bin", 4).await;

        let wrong = checksum_bytes(b"dcba");
        let (status, _) = post_chunk(
            &server.router,
            &[("sessionId", id.as_str()), ("chunkIndex", "0"), ("checksum", wrong.as_str())],
            Some(b"abcd"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let right = checksum_bytes(b"abcd");
        let (status, _) = post_chunk(
            &server.router,
            &[("sessionId", id.as_str()), ("chunkIndex", "0"), ("checksum", right.as_str())],
            Some(b"abcd"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn reupload_is_idempotent() {
        let server = test_server(4);
        let id = create(&server.router, "a.bin", 8).await;

        for payload in [b"aaaa", b"bbbb"] {
            let (status, _) = post_chunk(
                &server.router,
                &[("sessionId", id.as_str()), ("chunkIndex", "0")],
                Some(payload),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) =
            json_request(&server.router, "GET", &format!("/session/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["receivedIndices"], json!([0]));
        assert_eq!(body["missingIndices"], json!([1]));

        let sid = id.parse().unwrap();
        assert_eq!(server.state.store.read_chunk(&sid, 0).await.unwrap(), b"bbbb");
    }

    #[tokio::test]
    async fn incomplete_completion_is_refused() {
        let server = test_server(4);
        let id = create(&server.router, "a.bin", 10).await;
        post_chunk(
            &server.router,
            &[("sessionId", id.as_str()), ("chunkIndex", "0")],
            Some(b"abcd"),
        )
        .await;

        let (status, body) = json_request(
            &server.router,
            "POST",
            "/complete",
            Some(json!({"sessionId": id})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "incomplete_upload");
        assert_eq!(body["missing"], json!([1, 2]));

        // Still resumable.
        let (status, _) =
            json_request(&server.router, "GET", &format!("/session/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn complete_unknown_session_is_not_found() {
        let server = test_server(4);
        let (status, body) = json_request(
            &server.router,
            "POST",
            "/complete",
            Some(json!({"sessionId": "0123456789abcdef0123456789abcdef"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "session_not_found");
    }

    #[tokio::test]
    async fn cancel_discards_session_and_chunks() {
        let server = test_server(4);
        let id = create(&server.router, "a.bin", 8).await;
        post_chunk(
            &server.router,
            &[("sessionId", id.as_str()), ("chunkIndex", "0")],
            Some(b"abcd"),
        )
        .await;

        let (status, _) =
            json_request(&server.router, "DELETE", &format!("/session/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!server.dir.path().join("tmp").join(&id).exists());

        // Idempotent.
        let (status, _) =
            json_request(&server.router, "DELETE", &format!("/session/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = post_chunk(
            &server.router,
            &[("sessionId", id.as_str()), ("chunkIndex", "1")],
            Some(b"efgh"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_reports_sessions() {
        let server = test_server(4);
        create(&server.router, "a.bin", 8).await;

        let (status, body) = json_request(&server.router, "GET", "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "active");
        assert_eq!(body["service"], "chunkline");
        assert_eq!(body["activeSessions"], 1);
        assert_eq!(body["chunkSize"], 4);
        assert_eq!(body["sessionTtlSecs"], 60);
    }
}
