//! Integration tests for the download module.
//!
//! These tests verify chunked and HLS transfers against mock HTTP servers.

mod support;

use std::path::Path;
use std::time::Duration;

use gwaripper::download::{BackoffPolicy, DownloadError, HttpClient, download_hls};
use gwaripper::{DownloadErrorCode, GwaRipper, RipperConfig, SiteUrls};
use indicatif::ProgressBar;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::socket_guard::start_mock_server_or_skip;

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        factor: 0.001,
        max: Duration::from_millis(10),
        max_consecutive_failures: 3,
    }
}

async fn mount_bytes(server: &MockServer, at: &str, status: u16, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(body.to_vec()))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_download_full_flow_preserves_content() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let content = b"This is the complete audio payload.\nLine 2.\nLine 3.";
    mount_bytes(&server, "/sounds/a.m4a", 200, content).await;
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("a.m4a");

    let client = HttpClient::unthrottled().unwrap();
    let pb = ProgressBar::hidden();
    let written = client
        .download_chunked(&format!("{}/sounds/a.m4a", server.uri()), &dest, Some(&pb))
        .await
        .unwrap();

    assert_eq!(written, content.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), content);
    assert_eq!(pb.position(), content.len() as u64);
}

#[tokio::test]
async fn test_download_http_error_leaves_no_file() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_bytes(&server, "/sounds/gone.m4a", 410, b"").await;
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("gone.m4a");

    let client = HttpClient::unthrottled().unwrap();
    let err = client
        .download_chunked(&format!("{}/sounds/gone.m4a", server.uri()), &dest, None)
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::HttpStatus { status: 410, .. }));
    assert_eq!(err.to_download_code(), DownloadErrorCode::HttpErrGone);
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_download_invalid_url_is_rejected_before_sending() {
    let temp_dir = TempDir::new().unwrap();
    let client = HttpClient::unthrottled().unwrap();
    let err = client
        .download_chunked("not a url", &temp_dir.path().join("x"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::InvalidUrl { .. }));
}

fn no_scratch_left(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .all(|e| !e.file_name().to_string_lossy().ends_with(".hls-parts"))
}

#[tokio::test]
async fn test_hls_fetches_every_segment_then_runs_ffmpeg() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let playlist = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXTINF:10,\nseg0.ts\n#EXTINF:10,\nseg1.ts\n#EXT-X-ENDLIST\n";
    mount_bytes(&server, "/hls/1234/playlist.m3u8", 200, playlist.as_bytes()).await;
    mount_bytes(&server, "/hls/1234/seg0.ts", 200, b"segment zero").await;
    mount_bytes(&server, "/hls/1234/seg1.ts", 200, b"segment one").await;
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("track.m4a");

    let client = HttpClient::unthrottled().unwrap();
    let err = download_hls(
        &client,
        &format!("{}/hls/1234/playlist.m3u8", server.uri()),
        &dest,
        &fast_backoff(),
        Path::new("/nonexistent/bin/ffmpeg"),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DownloadError::Ffmpeg { .. }));
    assert_eq!(err.to_download_code(), DownloadErrorCode::ExternalError);
    assert!(!dest.exists());
    assert!(no_scratch_left(temp_dir.path()));
}

#[tokio::test]
async fn test_hls_missing_segment_is_fatal() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let playlist = "#EXTM3U\n#EXTINF:10,\nseg0.ts\n#EXTINF:10,\nseg1.ts\n";
    mount_bytes(&server, "/hls/9/playlist.m3u8", 200, playlist.as_bytes()).await;
    mount_bytes(&server, "/hls/9/seg0.ts", 404, b"").await;
    let temp_dir = TempDir::new().unwrap();

    let client = HttpClient::unthrottled().unwrap();
    let err = download_hls(
        &client,
        &format!("{}/hls/9/playlist.m3u8", server.uri()),
        &temp_dir.path().join("track.m4a"),
        &fast_backoff(),
        Path::new("ffmpeg"),
    )
    .await
    .unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert!(no_scratch_left(temp_dir.path()));
}

#[tokio::test]
async fn test_failed_hls_transfer_is_not_recorded() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let page = format!(
        r#"<script>var song_data_77 = {{"id": 77, "title": "Stream",
            "file_url": "{}/hls/77/playlist.m3u8", "user": {{"name": "voice"}}}};</script>"#,
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/track/77/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(&server)
        .await;
    let playlist = "#EXTM3U\n#EXTINF:10,\nseg0.ts\n";
    mount_bytes(&server, "/hls/77/playlist.m3u8", 200, playlist.as_bytes()).await;
    mount_bytes(&server, "/hls/77/seg0.ts", 200, b"segment").await;
    let dir = TempDir::new().unwrap();

    let mut config = RipperConfig::with_root(dir.path());
    config.extractor.sites = SiteUrls::all_at(&server.uri());
    config.request_delay = Duration::ZERO;
    config.show_progress = false;
    config.hls_backoff = fast_backoff();
    config.ffmpeg_path = "/nonexistent/bin/ffmpeg".into();
    let mut ripper = GwaRipper::open(config).await.unwrap();

    let report = ripper
        .extract_and_download("https://erocast.me/track/77/stream")
        .await;
    assert_eq!(
        ripper.reports().get(report).download_error,
        DownloadErrorCode::ExternalError
    );

    let pool = ripper.database().unwrap().pool().clone();
    let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audio_file")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
    assert!(!dir.path().join("voice").join("Stream.m4a").exists());
    assert!(no_scratch_left(&dir.path().join("voice")));

    ripper.close().await;
}
