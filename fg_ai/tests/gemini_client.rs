//! ABOUTME: Integration tests for the Gemini client against a mocked API
//! ABOUTME: Covers readiness polling, error translation and cancellation

use fg_ai::{AnalysisConfig, AnalysisError, GeminiClient, VideoAnalyzer};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use test_support::SUMMARY;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "test-gemini-key-0123456789";
const FILE_NAME: &str = "files/abc123";
const FILE_PATH: &str = "/v1beta/files/abc123";
const GENERATE_PATH: &str = "/v1beta/models/gemini-2.0-flash-exp:generateContent";

fn client_for(server: &MockServer) -> GeminiClient {
    GeminiClient::new(AnalysisConfig {
        api_key: API_KEY.to_string(),
        base_url: server.uri(),
        poll_interval: Duration::from_millis(10),
        max_processing_time: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap()
}

fn clip() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("clip.mp4");
    std::fs::write(&path, vec![1u8; 4096]).unwrap();
    (dir, path)
}

fn remote_file(state: &str) -> Value {
    json!({
        "name": FILE_NAME,
        "uri": format!("https://generativelanguage.googleapis.com/v1beta/{}", FILE_NAME),
        "mimeType": "video/mp4",
        "state": state,
    })
}

fn generated(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
}

/// Mount the two-step resumable upload
async fn mount_upload(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/upload/v1beta/files"))
        .and(header("x-goog-api-key", API_KEY))
        .and(header("X-Goog-Upload-Command", "start"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-goog-upload-url", format!("{}/upload-session/1", server.uri())),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/upload-session/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "file": remote_file("PROCESSING") })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_generates_once_after_file_becomes_active() {
    let server = MockServer::start().await;
    mount_upload(&server).await;

    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_file("PROCESSING")))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_file("ACTIVE")))
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(generated(SUMMARY)))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, clip) = clip();
    let summary = client_for(&server)
        .analyze(&clip, "Focus on the {label}.", "person", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary, SUMMARY);

    let requests = server.received_requests().await.unwrap();
    let generate_at = requests
        .iter()
        .position(|r| r.url.path() == GENERATE_PATH)
        .unwrap();
    let status_checks_before = requests[..generate_at]
        .iter()
        .filter(|r| r.url.path() == FILE_PATH)
        .count();
    assert_eq!(status_checks_before, 3);

    let body: Value = serde_json::from_slice(&requests[generate_at].body).unwrap();
    let parts = &body["contents"][0]["parts"];
    assert_eq!(parts[0]["file_data"]["mime_type"], "video/mp4");
    assert_eq!(parts[1]["text"], "Focus on the person.");
}

#[tokio::test]
async fn test_failed_processing_never_generates() {
    let server = MockServer::start().await;
    mount_upload(&server).await;

    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_file("FAILED")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(generated(SUMMARY)))
        .expect(0)
        .mount(&server)
        .await;

    let (_dir, clip) = clip();
    let err = client_for(&server)
        .analyze(&clip, "", "person", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::ProcessingFailed(_)));
}

#[tokio::test]
async fn test_unrecognized_state_keeps_polling() {
    let server = MockServer::start().await;
    mount_upload(&server).await;

    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_file("STATE_UNSPECIFIED")))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_file("ACTIVE")))
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(generated(SUMMARY)))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, clip) = clip();
    let summary = client_for(&server)
        .analyze(&clip, "", "dog", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary, SUMMARY);
}

#[tokio::test]
async fn test_readiness_poll_times_out() {
    let server = MockServer::start().await;
    mount_upload(&server).await;

    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_file("PROCESSING")))
        .mount(&server)
        .await;

    let client = GeminiClient::new(AnalysisConfig {
        api_key: API_KEY.to_string(),
        base_url: server.uri(),
        poll_interval: Duration::from_millis(10),
        max_processing_time: Duration::from_millis(60),
        ..Default::default()
    })
    .unwrap();

    let (_dir, clip) = clip();
    let err = client
        .analyze(&clip, "", "person", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::ProcessingTimeout(_)));
}

#[tokio::test]
async fn test_cancellation_stops_polling() {
    let server = MockServer::start().await;
    mount_upload(&server).await;

    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_file("PROCESSING")))
        .mount(&server)
        .await;

    let client = GeminiClient::new(AnalysisConfig {
        api_key: API_KEY.to_string(),
        base_url: server.uri(),
        poll_interval: Duration::from_secs(30),
        max_processing_time: Duration::from_secs(600),
        ..Default::default()
    })
    .unwrap();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let (_dir, clip) = clip();
    let err = client.analyze(&clip, "", "person", &cancel).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Cancelled));
}

#[tokio::test]
async fn test_permission_denied_is_auth_error() {
    let server = MockServer::start().await;
    mount_upload(&server).await;

    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_file("ACTIVE")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 403, "message": "The caller does not have permission", "status": "PERMISSION_DENIED" }
        })))
        .mount(&server)
        .await;

    let (_dir, clip) = clip();
    let err = client_for(&server)
        .analyze(&clip, "", "person", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Auth(_)));
}

#[tokio::test]
async fn test_resource_exhausted_is_quota_error() {
    let server = MockServer::start().await;
    mount_upload(&server).await;

    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_file("ACTIVE")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED" }
        })))
        .mount(&server)
        .await;

    let (_dir, clip) = clip();
    let err = client_for(&server)
        .analyze(&clip, "", "person", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Quota(_)));
}

#[tokio::test]
async fn test_empty_candidates_is_empty_response() {
    let server = MockServer::start().await;
    mount_upload(&server).await;

    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_file("ACTIVE")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&server)
        .await;

    let (_dir, clip) = clip();
    let err = client_for(&server)
        .analyze(&clip, "", "person", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::EmptyResponse));
}

#[tokio::test]
async fn test_upload_failure_fails_fast() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/v1beta/files"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend unavailable"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_file("ACTIVE")))
        .expect(0)
        .mount(&server)
        .await;

    let (_dir, clip) = clip();
    let err = client_for(&server)
        .analyze(&clip, "", "person", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Upload(_)));
}

#[tokio::test]
async fn test_close_drains_pool() {
    let server = MockServer::start().await;
    let client = client_for(&server);

    client.close().await;
    assert!(client.pool().is_closed());

    let (_dir, clip) = clip();
    let err = client
        .analyze(&clip, "", "person", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::PoolClosed));
}
