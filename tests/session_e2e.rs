//! End-to-end tests for the update session.
//!
//! A mock mirror hosts a full channel (newest marker, version list,
//! manifests, file snapshots); the session runs against a temp directory
//! and the tests verify on-disk outcomes and marker durability.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use versync_core::{GlobalOptions, NullSink, SessionError, UpdateSession};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MARKER_FILE: &str = "version.txt";

fn options_for(mock_server: &MockServer) -> GlobalOptions {
    GlobalOptions::from_json(&format!(
        r#"{{
            "server": "{}/channel/current.txt",
            "version-file": "{MARKER_FILE}",
            "retry-times": 1,
            "download-threads": 2
        }}"#,
        mock_server.uri()
    ))
    .expect("valid test config")
}

async fn mount_text(mock_server: &MockServer, at: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(mock_server)
        .await;
}

async fn mount_manifest(
    mock_server: &MockServer,
    version: &str,
    removed_files: &[&str],
    added_files: &[(&str, &[u8])],
) {
    let added: Vec<String> = added_files
        .iter()
        .map(|(name, _)| format!("\"{name}\""))
        .collect();
    let removed: Vec<String> = removed_files.iter().map(|name| format!("\"{name}\"")).collect();
    let sizes: Vec<String> = added_files
        .iter()
        .map(|(name, content)| format!("\"{name}\": {}", content.len()))
        .collect();
    let manifest = format!(
        r#"{{
            "old_files": [{}],
            "new_files": [{}],
            "old_folders": [],
            "new_folders": [],
            "new_files_lengthes": {{{}}}
        }}"#,
        removed.join(", "),
        added.join(", "),
        sizes.join(", ")
    );
    mount_text(mock_server, &format!("/channel/v-{version}.json"), &manifest).await;

    for (name, content) in added_files {
        Mock::given(method("GET"))
            .and(path(format!("/channel/snapshot/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
            .mount(mock_server)
            .await;
    }
}

fn marker_content(dir: &Path) -> Option<String> {
    std::fs::read_to_string(dir.join(MARKER_FILE)).ok()
}

#[tokio::test]
async fn test_full_update_from_none_downloads_union_and_commits_marker() {
    let mock_server = MockServer::start().await;
    mount_text(&mock_server, "/channel/current.txt", "3").await;
    mount_text(&mock_server, "/channel/all-versions.txt", "1\n2\n3\n").await;
    mount_manifest(&mock_server, "1", &[], &[("a.txt", b"alpha")]).await;
    mount_manifest(&mock_server, "2", &[], &[("mods/b.jar", b"beta-bytes")]).await;
    mount_manifest(&mock_server, "3", &[], &[("c.dat", b"gamma")]).await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let session = UpdateSession::new(options_for(&mock_server), dir.path().to_path_buf());

    let summary = session
        .run(Arc::new(NullSink))
        .await
        .expect("session should succeed");

    assert_eq!(summary.current_version, "none");
    assert_eq!(summary.newest_version, "3");
    assert_eq!(summary.files_downloaded, 3);
    assert!(summary.has_changes());

    assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"alpha");
    assert_eq!(
        std::fs::read(dir.path().join("mods/b.jar")).unwrap(),
        b"beta-bytes"
    );
    assert_eq!(std::fs::read(dir.path().join("c.dat")).unwrap(), b"gamma");
    assert_eq!(marker_content(dir.path()).as_deref(), Some("3"));
}

#[tokio::test]
async fn test_equal_markers_end_session_without_update() {
    let mock_server = MockServer::start().await;
    // Only the newest-marker endpoint exists; touching anything else fails.
    mount_text(&mock_server, "/channel/current.txt", "3").await;

    let dir = TempDir::new().expect("failed to create temp dir");
    std::fs::write(dir.path().join(MARKER_FILE), "3").unwrap();

    let session = UpdateSession::new(options_for(&mock_server), dir.path().to_path_buf());
    let summary = session
        .run(Arc::new(NullSink))
        .await
        .expect("session should succeed");

    assert!(!summary.has_changes());
    assert_eq!(marker_content(dir.path()).as_deref(), Some("3"));
}

#[tokio::test]
async fn test_unknown_local_version_fails_without_filesystem_changes() {
    let mock_server = MockServer::start().await;
    mount_text(&mock_server, "/channel/current.txt", "3").await;
    mount_text(&mock_server, "/channel/all-versions.txt", "1\n2\n3\n").await;

    let dir = TempDir::new().expect("failed to create temp dir");
    std::fs::write(dir.path().join(MARKER_FILE), "0.9-beta").unwrap();
    std::fs::write(dir.path().join("untouched.txt"), b"installed").unwrap();

    let session = UpdateSession::new(options_for(&mock_server), dir.path().to_path_buf());
    let result = session.run(Arc::new(NullSink)).await;

    match result {
        Err(SessionError::UnknownVersion { version }) => assert_eq!(version, "0.9-beta"),
        other => panic!("expected UnknownVersion, got {other:?}"),
    }
    assert_eq!(marker_content(dir.path()).as_deref(), Some("0.9-beta"));
    assert!(dir.path().join("untouched.txt").exists());
}

#[tokio::test]
async fn test_intermediate_versions_cancel_out_and_structural_changes_apply() {
    let mock_server = MockServer::start().await;
    mount_text(&mock_server, "/channel/current.txt", "2").await;
    mount_text(&mock_server, "/channel/all-versions.txt", "1\n2\n").await;
    // Version 1 adds keep.txt and temp.txt; version 2 deletes temp.txt
    // and the pre-installed obsolete.txt. The merged change-set must
    // download keep.txt only and never materialize temp.txt.
    mount_manifest(
        &mock_server,
        "1",
        &[],
        &[("keep.txt", b"kept"), ("temp.txt", b"short-lived")],
    )
    .await;
    mount_manifest(&mock_server, "2", &["temp.txt", "obsolete.txt"], &[]).await;

    let dir = TempDir::new().expect("failed to create temp dir");
    std::fs::write(dir.path().join("obsolete.txt"), b"old").unwrap();

    let session = UpdateSession::new(options_for(&mock_server), dir.path().to_path_buf());
    let summary = session
        .run(Arc::new(NullSink))
        .await
        .expect("session should succeed");

    assert_eq!(std::fs::read(dir.path().join("keep.txt")).unwrap(), b"kept");
    assert!(
        !dir.path().join("temp.txt").exists(),
        "cancelled addition must not be downloaded"
    );
    assert!(
        !dir.path().join("obsolete.txt").exists(),
        "removed file must be deleted"
    );
    assert_eq!(summary.files_downloaded, 1);
    assert_eq!(summary.files_removed, 1);
    assert_eq!(marker_content(dir.path()).as_deref(), Some("2"));
}

#[tokio::test]
async fn test_failed_download_leaves_marker_untouched() {
    let mock_server = MockServer::start().await;
    mount_text(&mock_server, "/channel/current.txt", "2").await;
    mount_text(&mock_server, "/channel/all-versions.txt", "1\n2\n").await;
    mount_text(
        &mock_server,
        "/channel/v-2.json",
        r#"{
            "old_files": [],
            "new_files": ["broken.bin"],
            "old_folders": [],
            "new_folders": [],
            "new_files_lengthes": {"broken.bin": 10}
        }"#,
    )
    .await;
    // No snapshot mounted for broken.bin: the mirror answers 404.

    let dir = TempDir::new().expect("failed to create temp dir");
    std::fs::write(dir.path().join(MARKER_FILE), "1").unwrap();

    let session = UpdateSession::new(options_for(&mock_server), dir.path().to_path_buf());
    let result = session.run(Arc::new(NullSink)).await;

    assert!(matches!(result, Err(SessionError::Download(_))), "marker must stay");
    assert_eq!(
        marker_content(dir.path()).as_deref(),
        Some("1"),
        "a failed session must not advance the version marker"
    );
}

#[tokio::test]
async fn test_malformed_manifest_is_a_format_error() {
    let mock_server = MockServer::start().await;
    mount_text(&mock_server, "/channel/current.txt", "2").await;
    mount_text(&mock_server, "/channel/all-versions.txt", "1\n2\n").await;
    mount_text(&mock_server, "/channel/v-2.json", "{truncated").await;

    let dir = TempDir::new().expect("failed to create temp dir");
    std::fs::write(dir.path().join(MARKER_FILE), "1").unwrap();

    let session = UpdateSession::new(options_for(&mock_server), dir.path().to_path_buf());
    let result = session.run(Arc::new(NullSink)).await;

    match result {
        Err(SessionError::Fetch(error)) => {
            let message = error.to_string();
            assert!(message.contains("version manifest 2"), "got: {message}");
        }
        other => panic!("expected Fetch(Parse), got {other:?}"),
    }
    assert_eq!(marker_content(dir.path()).as_deref(), Some("1"));
}
