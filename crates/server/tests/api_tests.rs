//! Integration tests for HTTP API endpoints.

mod common;

use axum::body::Body;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use common::{
    FailingRenameStore, TestServer, body_tail, count_files, file_body, multipart_body,
    multipart_content_type, part_head, seeded_bytes,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Send a request and collect the whole response.
async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

/// Helper to make body-less requests that answer with JSON.
async fn json_request(router: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(router, request).await;
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Begin an upload and return its id.
async fn begin(server: &TestServer) -> String {
    let (status, body) = json_request(&server.router, "POST", "/v1/uploads").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    body["upload_id"].as_str().unwrap().to_string()
}

/// POST a complete multipart body to an upload session.
async fn upload(server: &TestServer, upload_id: &str, body: Vec<u8>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/uploads/{upload_id}"))
        .header(CONTENT_TYPE, multipart_content_type())
        .header(CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();
    let (status, _, body) = send(&server.router, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn poll(server: &TestServer, upload_id: &str) -> (StatusCode, Value) {
    json_request(&server.router, "GET", &format!("/v1/uploads/{upload_id}")).await
}

#[tokio::test]
async fn test_begin_upload_returns_distinct_hex_ids() {
    let server = TestServer::new().await;

    let mut ids = Vec::new();
    for _ in 0..20 {
        let id = begin(&server).await;
        assert!(!id.is_empty() && id.len() <= 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(u64::from_str_radix(&id, 16).unwrap(), 0);
        ids.push(id);
    }

    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());
    assert_eq!(server.state.sessions.len(), 20);
}

#[tokio::test]
async fn test_fresh_session_reports_unknown_total() {
    let server = TestServer::new().await;
    let id = begin(&server).await;

    let (status, body) = poll(&server, &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], -1);
    assert_eq!(body["uploaded"], 0);
    assert_eq!(body["completed"], false);
    assert_eq!(body["state"], "idle");
    assert!(body.get("file_id").is_none());

    // Polling an incomplete session leaves it in place.
    let (status, _) = poll(&server, &id).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unclaimed_session_expires_after_grace() {
    let server = TestServer::with_config(|config| {
        config.server.session_grace_secs = 1;
    })
    .await;
    let id = begin(&server).await;

    tokio::time::sleep(Duration::from_millis(1300)).await;

    let (status, body) = poll(&server, &id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = upload(&server, &id, file_body("late.txt", b"too late")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(count_files(&server.staging_dir), 0);
    assert!(server.state.sessions.is_empty());
}

#[tokio::test]
async fn test_upload_download_roundtrip() {
    let server = TestServer::new().await;
    let id = begin(&server).await;
    let data = seeded_bytes(1, 300 * 1024);

    let (status, body) = upload(&server, &id, file_body("résumé.pdf", &data)).await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    assert_eq!(body["status"], "success");
    assert_eq!(body["name"], "résumé.pdf");
    let file_id = body["file_id"].as_i64().unwrap();
    let url = body["url"].as_str().unwrap().to_string();
    assert_eq!(url, format!("/files/{file_id}"));

    // The first poll after completion is the last one.
    let (status, progress) = poll(&server, &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["completed"], true);
    assert_eq!(progress["state"], "committed");
    assert_eq!(progress["uploaded"], data.len() as u64);
    assert_eq!(progress["file_id"], file_id);
    let (status, _) = poll(&server, &id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder().uri(&url).body(Body::empty()).unwrap();
    let (status, headers, body) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, data);
    assert_eq!(
        headers[CONTENT_LENGTH].to_str().unwrap(),
        data.len().to_string()
    );
    assert_eq!(
        headers[CONTENT_DISPOSITION].to_str().unwrap(),
        "attachment; filename=\"r.sum..pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"
    );

    assert_eq!(count_files(&server.staging_dir), 0);
    assert_eq!(count_files(&server.files_dir), 1);
}

#[tokio::test]
async fn test_declared_name_never_reaches_disk_path() {
    let server = TestServer::new().await;
    let id = begin(&server).await;

    let (status, body) = upload(&server, &id, file_body("../../etc/passwd", b"nope")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "passwd");

    let file_id = body["file_id"].as_i64().unwrap();
    assert!(server.files_dir.join(file_id.to_string()).exists());
    assert_eq!(count_files(&server.files_dir), 1);
}

#[tokio::test]
async fn test_large_upload_reports_progress() {
    let server = TestServer::new().await;
    let id = begin(&server).await;

    let data = seeded_bytes(10, 10 * 1024 * 1024);
    let head = part_head("file", Some("big.bin"));
    let tail = body_tail();
    let total = head.len() + data.len() + tail.len();

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(4);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/uploads/{id}"))
        .header(CONTENT_TYPE, multipart_content_type())
        .header(CONTENT_LENGTH, total)
        .body(Body::from_stream(stream))
        .unwrap();
    let router = server.router.clone();
    let transfer = tokio::spawn(async move { router.oneshot(request).await.unwrap() });

    let split = 4 * 1024 * 1024;
    tx.send(Ok(Bytes::from(head))).await.unwrap();
    tx.send(Ok(data.slice(..split))).await.unwrap();

    let mut mid = Value::Null;
    for _ in 0..500 {
        let (status, body) = poll(&server, &id).await;
        assert_eq!(status, StatusCode::OK);
        if body["uploaded"].as_u64().unwrap() > 0 {
            mid = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let uploaded = mid["uploaded"].as_u64().expect("progress never moved");
    assert!(uploaded > 0 && uploaded < total as u64);
    assert_eq!(mid["total"], total as i64);
    assert_eq!(mid["completed"], false);
    assert_eq!(mid["state"], "started");

    for chunk in data.slice(split..).chunks(1024 * 1024) {
        tx.send(Ok(Bytes::copy_from_slice(chunk))).await.unwrap();
    }
    tx.send(Ok(Bytes::from(tail))).await.unwrap();
    drop(tx);

    let response = transfer.await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let (status, done) = poll(&server, &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["completed"], true);
    assert_eq!(done["uploaded"], data.len() as u64);

    let (status, _) = poll(&server, &id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_declared_length_rejected_before_staging() {
    let server = TestServer::with_config(|config| {
        config.server.max_upload_size = 1024;
    })
    .await;
    let id = begin(&server).await;

    let (status, body) = upload(&server, &id, file_body("big.bin", &seeded_bytes(2, 4096))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "payload_too_large");
    assert_eq!(count_files(&server.staging_dir), 0);
    assert_eq!(count_files(&server.files_dir), 0);

    // The session was never claimed, so a conforming upload still works.
    let (status, progress) = poll(&server, &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["uploaded"], 0);

    let (status, _) = upload(&server, &id, file_body("small.bin", b"fits")).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_undeclared_oversized_body_is_cut_off() {
    let server = TestServer::with_config(|config| {
        config.server.max_upload_size = 1024;
    })
    .await;
    let id = begin(&server).await;

    let body = file_body("big.bin", &seeded_bytes(3, 8192));
    let chunks: Vec<Result<Bytes, std::io::Error>> = body
        .chunks(512)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/uploads/{id}"))
        .header(CONTENT_TYPE, multipart_content_type())
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap();

    let (status, _, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(count_files(&server.staging_dir), 0);
    assert_eq!(count_files(&server.files_dir), 0);
    assert_eq!(server.metadata().count_files().await.unwrap(), 0);

    let (status, _) = poll(&server, &id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_second_upload_to_same_session_conflicts() {
    let server = TestServer::new().await;
    let id = begin(&server).await;

    let (status, _) = upload(&server, &id, file_body("a.txt", b"first")).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = upload(&server, &id, file_body("b.txt", b"second")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
    assert_eq!(server.metadata().count_files().await.unwrap(), 1);
}

#[tokio::test]
async fn test_missing_file_part_retires_session() {
    let server = TestServer::new().await;
    let id = begin(&server).await;

    let body = multipart_body(&[("comment", None, b"no file here".as_slice())]);
    let (status, body) = upload(&server, &id, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let (status, _) = poll(&server, &id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(count_files(&server.staging_dir), 0);
}

#[tokio::test]
async fn test_file_part_found_after_other_parts() {
    let server = TestServer::new().await;
    let id = begin(&server).await;

    let body = multipart_body(&[
        ("comment", None, b"ignored".as_slice()),
        ("file", Some("notes.txt"), b"hello depot".as_slice()),
    ]);
    let (status, body) = upload(&server, &id, body).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "notes.txt");
}

#[tokio::test]
async fn test_non_multipart_body_is_bad_request() {
    let server = TestServer::new().await;
    let id = begin(&server).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/uploads/{id}"))
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = poll(&server, &id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_ids_are_bad_requests() {
    let server = TestServer::new().await;

    for uri in [
        "/v1/uploads/not-hex",
        "/v1/uploads/0",
        "/v1/uploads/11112222333344445",
    ] {
        let (status, body) = json_request(&server.router, "GET", uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["code"], "core_error");
    }

    let (status, _) = json_request(&server.router, "GET", "/files/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = json_request(&server.router, "GET", "/files/-3").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_session_and_file_are_not_found() {
    let server = TestServer::new().await;

    let (status, _) = poll(&server, "abcdef").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = upload(&server, "abcdef", file_body("x", b"x")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = json_request(&server.router, "GET", "/files/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_failed_rename_leaves_orphan_record() {
    let server =
        TestServer::with_storage(|backend| Arc::new(FailingRenameStore::new(backend))).await;
    let before = depot_server::metrics::ORPHAN_RECORDS.get();
    let id = begin(&server).await;

    let (status, body) = upload(&server, &id, file_body("lost.bin", b"never lands")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "partial_commit");

    // The record exists, its content does not, and nothing is left staged.
    let row = server.metadata().get_file(1).await.unwrap().unwrap();
    assert_eq!(row.name, "lost.bin");
    assert_eq!(count_files(&server.files_dir), 0);
    assert_eq!(count_files(&server.staging_dir), 0);
    assert!(depot_server::metrics::ORPHAN_RECORDS.get() > before);

    let (status, _) = poll(&server, &id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = json_request(&server.router, "GET", "/files/1").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "internal_error");
}

#[tokio::test]
async fn test_concurrent_uploads_get_distinct_files() {
    let server = TestServer::new().await;

    let mut handles = Vec::new();
    for seed in 0..6u64 {
        let id = begin(&server).await;
        let router = server.router.clone();
        handles.push(tokio::spawn(async move {
            let data = seeded_bytes(seed, 64 * 1024 + seed as usize);
            let body = file_body(&format!("f{seed}.bin"), &data);
            let request = Request::builder()
                .method("POST")
                .uri(format!("/v1/uploads/{id}"))
                .header(CONTENT_TYPE, multipart_content_type())
                .header(CONTENT_LENGTH, body.len())
                .body(Body::from(body))
                .unwrap();
            let (status, _, body) = send(&router, request).await;
            assert_eq!(status, StatusCode::CREATED);
            let json: Value = serde_json::from_slice(&body).unwrap();
            (json["file_id"].as_i64().unwrap(), data)
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let (file_id, data) = handle.await.unwrap();
        let request = Request::builder()
            .uri(format!("/files/{file_id}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&server.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, data);
        ids.push(file_id);
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 6);
    assert_eq!(count_files(&server.staging_dir), 0);
}

#[tokio::test]
async fn test_listing_and_update_feed() {
    let server = TestServer::new().await;

    for name in ["one.txt", "two.txt", "three.txt"] {
        let id = begin(&server).await;
        let (status, _) = upload(&server, &id, file_body(name, name.as_bytes())).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = json_request(&server.router, "GET", "/v1/updates?last_id=1").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![3, 2]);
    assert_eq!(body["last_id"], 3);

    // Nothing new keeps the cursor where it was.
    let (_, body) = json_request(&server.router, "GET", "/v1/updates?last_id=3").await;
    assert_eq!(body["files"].as_array().unwrap().len(), 0);
    assert_eq!(body["last_id"], 3);

    let (status, body) = json_request(&server.router, "GET", "/v1/files?since=0&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["url"], format!("/files/{}", files[0]["id"]));

    let (_, body) = json_request(&server.router, "GET", "/v1/files?since=9999999999").await;
    assert!(body["files"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_update_feed_cursor_delivers_every_file() {
    let server = TestServer::new().await;

    for n in 0..5 {
        let id = begin(&server).await;
        let name = format!("batch-{n}.txt");
        let (status, _) = upload(&server, &id, file_body(&name, name.as_bytes())).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let mut cursor = 0;
    let mut seen = Vec::new();
    loop {
        let uri = format!("/v1/updates?last_id={cursor}&limit=2");
        let (status, body) = json_request(&server.router, "GET", &uri).await;
        assert_eq!(status, StatusCode::OK);
        let page: Vec<i64> = body["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["id"].as_i64().unwrap())
            .collect();
        if page.is_empty() {
            assert_eq!(body["last_id"], cursor);
            break;
        }
        assert!(page.len() <= 2);
        seen.extend(page);
        cursor = body["last_id"].as_i64().unwrap();
    }

    seen.sort();
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_health_and_capabilities() {
    let server = TestServer::new().await;

    let (status, body) = json_request(&server.router, "GET", "/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = json_request(&server.router, "GET", "/v1/capabilities").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["max_upload_size"], 20u64 * 1024 * 1024 * 1024);
    assert_eq!(body["read_chunk_size"], 1024 * 1024);
    assert_eq!(body["session_grace_secs"], 10);
    assert_eq!(body["file_part"], "file");
}

#[tokio::test]
async fn test_metrics_endpoint_toggle() {
    depot_server::metrics::register_metrics();

    let server = TestServer::new().await;
    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let (status, _, body) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).contains("depot_upload_sessions_created_total"));

    let server = TestServer::with_config(|config| config.server.metrics_enabled = false).await;
    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let (status, _, _) = send(&server.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
