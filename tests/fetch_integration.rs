//! Integration tests for the mirror access layer.
//!
//! These tests verify fetches, downloads, retry behavior, and mirror
//! fallback against mock HTTP servers.

use std::net::TcpListener;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::TempDir;
use versync_core::{FetchError, MirrorClient};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(retry_times: u32) -> MirrorClient {
    MirrorClient::new(Duration::from_secs(5), Duration::from_secs(5), retry_times)
}

/// Returns a URL whose port was just released, so connections are refused.
fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind throwaway socket");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}/current.txt")
}

#[tokio::test]
async fn test_fetch_text_returns_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/current.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1.4\n"))
        .mount(&mock_server)
        .await;

    let body = client(1)
        .fetch_text(&format!("{}/current.txt", mock_server.uri()))
        .await
        .expect("fetch should succeed");

    assert_eq!(body, "1.4\n");
}

#[tokio::test]
async fn test_fetch_text_non_2xx_carries_body_excerpt() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/current.txt"))
        .respond_with(ResponseTemplate::new(404).set_body_string("channel was renamed"))
        .mount(&mock_server)
        .await;

    let result = client(1)
        .fetch_text(&format!("{}/current.txt", mock_server.uri()))
        .await;

    match result {
        Err(FetchError::HttpStatus {
            status,
            body_excerpt: Some(excerpt),
            ..
        }) => {
            assert_eq!(status, 404);
            assert!(excerpt.contains("channel was renamed"));
        }
        other => panic!("expected HttpStatus with excerpt, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_text_retries_transient_server_error() {
    let mock_server = MockServer::start().await;
    // First attempt gets a 500, the retry gets the real body.
    Mock::given(method("GET"))
        .and(path("/current.txt"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/current.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1.5"))
        .mount(&mock_server)
        .await;

    let body = client(2)
        .fetch_text(&format!("{}/current.txt", mock_server.uri()))
        .await
        .expect("retry should recover");

    assert_eq!(body, "1.5");
}

#[tokio::test]
async fn test_fetch_json_parse_failure_names_document() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v-1.2.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&mock_server)
        .await;

    let result: Result<serde_json::Value, _> = client(1)
        .fetch_json(
            &format!("{}/v-1.2.json", mock_server.uri()),
            "version manifest 1.2",
        )
        .await;

    match result {
        Err(FetchError::Parse { what, url, .. }) => {
            assert_eq!(what, "version manifest 1.2");
            assert!(url.contains("/v-1.2.json"));
        }
        other => panic!("expected Parse error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_text_multiple_falls_back_to_good_mirror() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/current.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1.6"))
        .mount(&mock_server)
        .await;

    let mirrors = vec![
        refused_url(),
        format!("{}/current.txt", mock_server.uri()),
    ];

    let body = client(1)
        .fetch_text_multiple(&mirrors)
        .await
        .expect("fallback mirror should serve the document");

    assert_eq!(body, "1.6");
}

#[tokio::test]
async fn test_fetch_text_multiple_all_bad_raises_last_connectivity_error() {
    let mirrors = vec![refused_url(), refused_url()];

    let result = client(2).fetch_text_multiple(&mirrors).await;

    match result {
        Err(error) => assert!(error.is_connectivity(), "got {error:?}"),
        Ok(body) => panic!("expected failure, got body {body:?}"),
    }
}

#[tokio::test]
async fn test_fetch_text_multiple_http_status_does_not_fall_back() {
    let failing = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/current.txt"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&failing)
        .await;

    let untouched = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/current.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("never served"))
        .expect(0)
        .mount(&untouched)
        .await;

    let mirrors = vec![
        format!("{}/current.txt", failing.uri()),
        format!("{}/current.txt", untouched.uri()),
    ];

    let result = client(2).fetch_text_multiple(&mirrors).await;

    match result {
        Err(FetchError::HttpStatus { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected HttpStatus to propagate, got {other:?}"),
    }
}

#[tokio::test]
async fn test_download_file_streams_content_and_reports_chunks() {
    let content: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/snapshot/data.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let dest = temp_dir.path().join("data.bin");
    let chunk_sum = Mutex::new(0u64);
    let last_seen = Mutex::new((0u64, 0u64));

    client(1)
        .download_file(
            &format!("{}/snapshot/data.bin", mock_server.uri()),
            &dest,
            content.len() as u64,
            |chunk, received, expected| {
                *chunk_sum.lock().unwrap() += chunk;
                *last_seen.lock().unwrap() = (received, expected);
            },
        )
        .await
        .expect("download should succeed");

    let downloaded = std::fs::read(&dest).expect("read downloaded file");
    assert_eq!(downloaded, content);
    assert_eq!(*chunk_sum.lock().unwrap(), content.len() as u64);
    assert_eq!(
        *last_seen.lock().unwrap(),
        (content.len() as u64, content.len() as u64)
    );
}

#[tokio::test]
async fn test_download_file_creates_parent_directories() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/snapshot/mods/deep/a.jar"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jar bytes".to_vec()))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let dest = temp_dir.path().join("mods/deep/a.jar");

    client(1)
        .download_file(
            &format!("{}/snapshot/mods/deep/a.jar", mock_server.uri()),
            &dest,
            9,
            |_, _, _| {},
        )
        .await
        .expect("download should succeed");

    assert_eq!(std::fs::read(&dest).unwrap(), b"jar bytes");
}

#[tokio::test]
async fn test_download_file_multiple_invokes_fallback_callback_once() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/snapshot/data.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let dest = temp_dir.path().join("data.bin");
    let mirrors = vec![
        refused_url(),
        format!("{}/snapshot/data.bin", mock_server.uri()),
    ];
    let fallbacks = Mutex::new(0u32);

    client(1)
        .download_file_multiple(
            &mirrors,
            &dest,
            7,
            |_, _, _| {},
            || *fallbacks.lock().unwrap() += 1,
        )
        .await
        .expect("fallback mirror should serve the file");

    assert_eq!(*fallbacks.lock().unwrap(), 1);
    assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
}
