//! Segmented HLS downloads.
//!
//! The playlist is fetched and split into segment URLs, every segment is
//! fetched into a scratch directory next to the destination and ffmpeg joins
//! them with the concat demuxer. Throttling hosts cut segments short or answer
//! 429; both grow a retry counter that drives an exponential pause, while each
//! success shrinks it again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::HttpClient;
use super::error::DownloadError;

/// Where segments come from and how the downloader waits between attempts.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    async fn fetch_playlist(&self, url: &str) -> Result<String, DownloadError>;

    async fn fetch_segment(&self, url: &str, dest: &Path) -> Result<u64, DownloadError>;

    async fn pause(&self, delay: Duration);
}

#[async_trait]
impl SegmentSource for HttpClient {
    async fn fetch_playlist(&self, url: &str) -> Result<String, DownloadError> {
        self.get_text(url).await
    }

    async fn fetch_segment(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        self.download_chunked(url, dest, None).await
    }

    async fn pause(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Seconds for the first retry; doubles with every further retry.
    pub factor: f64,
    pub max: Duration,
    /// Give up once this many attempts in a row failed.
    pub max_consecutive_failures: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            factor: 1.0,
            max: Duration::from_secs(64),
            max_consecutive_failures: 10,
        }
    }
}

impl BackoffPolicy {
    /// `min(max, factor * 2^(retries - 1))`.
    #[must_use]
    pub fn delay(&self, retries: u32) -> Duration {
        let exponent = i32::try_from(retries).unwrap_or(i32::MAX).saturating_sub(1);
        let secs = self.factor * 2f64.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Extracts segment URLs in playback order, resolved against `playlist_url`.
///
/// For a master playlist the variant with the highest bandwidth is returned
/// instead, as a single entry; see [`is_master_playlist`].
///
/// # Errors
///
/// [`DownloadError::Playlist`] if the playlist has no entries or an entry
/// can't be resolved.
pub fn parse_playlist(playlist_url: &str, text: &str) -> Result<Vec<String>, DownloadError> {
    let base = Url::parse(playlist_url).map_err(|_| DownloadError::invalid_url(playlist_url))?;
    let resolve = |entry: &str| {
        base.join(entry)
            .map(String::from)
            .map_err(|_| DownloadError::playlist(playlist_url, format!("bad entry {entry}")))
    };

    if !text.trim_start().starts_with("#EXTM3U") {
        return Err(DownloadError::playlist(playlist_url, "missing #EXTM3U header"));
    }

    if is_master_playlist(text) {
        let mut best: Option<(u64, &str)> = None;
        let mut pending_bandwidth: Option<u64> = None;
        for line in text.lines().map(str::trim) {
            if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
                pending_bandwidth = Some(bandwidth(attrs));
            } else if !line.is_empty() && !line.starts_with('#') {
                if let Some(bw) = pending_bandwidth.take() {
                    if best.is_none_or(|(b, _)| bw > b) {
                        best = Some((bw, line));
                    }
                }
            }
        }
        let (_, variant) =
            best.ok_or_else(|| DownloadError::playlist(playlist_url, "no variant streams"))?;
        return Ok(vec![resolve(variant)?]);
    }

    let segments = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(resolve)
        .collect::<Result<Vec<_>, _>>()?;
    if segments.is_empty() {
        return Err(DownloadError::playlist(playlist_url, "no segments"));
    }
    Ok(segments)
}

/// Whether the playlist lists variant streams rather than media segments.
#[must_use]
pub fn is_master_playlist(text: &str) -> bool {
    text.contains("#EXT-X-STREAM-INF")
}

fn bandwidth(attrs: &str) -> u64 {
    attrs
        .split(',')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| k.trim() == "BANDWIDTH")
        .and_then(|(_, v)| v.trim().parse().ok())
        .unwrap_or(0)
}

fn is_throttled(err: &DownloadError) -> bool {
    matches!(err, DownloadError::ContentTooShort { .. }) || err.status() == Some(429)
}

/// Fetches every segment into `scratch`, returning the written paths in order.
///
/// # Errors
///
/// The first non-throttling failure, or the last throttling failure once
/// `max_consecutive_failures` attempts in a row failed.
pub async fn download_segments<S: SegmentSource + ?Sized>(
    source: &S,
    segments: &[String],
    scratch: &Path,
    policy: &BackoffPolicy,
) -> Result<Vec<PathBuf>, DownloadError> {
    let mut written = Vec::with_capacity(segments.len());
    let mut retries: u32 = 0;
    let mut consecutive_failures: u32 = 0;
    let mut index = 0;

    while index < segments.len() {
        let url = &segments[index];
        let dest = scratch.join(format!("seg_{index:05}.ts"));
        match source.fetch_segment(url, &dest).await {
            Ok(_) => {
                written.push(dest);
                index += 1;
                retries = retries.saturating_sub(1);
                consecutive_failures = 0;
            }
            Err(err) if is_throttled(&err) => {
                retries += 1;
                consecutive_failures += 1;
                warn!(segment = index, retries, error = %err, "segment throttled, retrying");
                if consecutive_failures >= policy.max_consecutive_failures {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
        source.pause(policy.delay(retries)).await;
    }
    Ok(written)
}

/// Writes an ffmpeg concat list; paths always use forward slashes.
///
/// # Errors
///
/// IO failure writing the list.
pub async fn write_concat_list(list_path: &Path, segments: &[PathBuf]) -> Result<(), DownloadError> {
    let mut content = String::new();
    for segment in segments {
        let normalized = segment.to_string_lossy().replace('\\', "/").replace('\'', "'\\''");
        content.push_str("file '");
        content.push_str(&normalized);
        content.push_str("'\n");
    }
    tokio::fs::write(list_path, content)
        .await
        .map_err(|e| DownloadError::io(list_path, e))
}

/// Joins the listed segments into `dest` without re-encoding.
///
/// # Errors
///
/// [`DownloadError::Ffmpeg`] if ffmpeg can't be started or exits non-zero.
#[instrument(skip(ffmpeg), fields(dest = %dest.display()))]
pub async fn concat_segments(ffmpeg: &Path, list_path: &Path, dest: &Path) -> Result<(), DownloadError> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-loglevel", "error", "-f", "concat", "-safe", "0", "-i"])
        .arg(list_path)
        .args(["-vn", "-c", "copy", "-y"])
        .arg(dest)
        .output()
        .await
        .map_err(|e| DownloadError::ffmpeg(format!("could not start {}: {e}", ffmpeg.display())))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DownloadError::ffmpeg(format!(
            "{}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Downloads an HLS stream to `dest`.
///
/// Segments and the concat list live in a scratch directory next to `dest`
/// that is removed on every path. The ffmpeg step is not retried.
///
/// # Errors
///
/// Playlist, segment, IO or ffmpeg failures.
#[instrument(skip(source, policy, ffmpeg), fields(dest = %dest.display()))]
pub async fn download_hls<S: SegmentSource + ?Sized>(
    source: &S,
    playlist_url: &str,
    dest: &Path,
    policy: &BackoffPolicy,
    ffmpeg: &Path,
) -> Result<(), DownloadError> {
    let mut playlist_url = playlist_url.to_string();
    let mut text = source.fetch_playlist(&playlist_url).await?;
    if is_master_playlist(&text) {
        let variant = parse_playlist(&playlist_url, &text)?
            .into_iter()
            .next()
            .ok_or_else(|| DownloadError::playlist(&playlist_url, "no variant streams"))?;
        debug!(variant = %variant, "following variant playlist");
        text = source.fetch_playlist(&variant).await?;
        playlist_url = variant;
    }
    if is_master_playlist(&text) {
        return Err(DownloadError::playlist(&playlist_url, "nested master playlists"));
    }
    let segments = parse_playlist(&playlist_url, &text)?;

    let scratch = scratch_dir(dest);
    tokio::fs::create_dir_all(&scratch)
        .await
        .map_err(|e| DownloadError::io(&scratch, e))?;

    let result = async {
        let files = download_segments(source, &segments, &scratch, policy).await?;
        let list_path = scratch.join("concat.txt");
        write_concat_list(&list_path, &files).await?;
        concat_segments(ffmpeg, &list_path, dest).await
    }
    .await;

    if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
        warn!(dir = %scratch.display(), error = %e, "could not remove HLS scratch dir");
    }
    if result.is_ok() {
        info!(segments = segments.len(), "HLS stream joined");
    }
    result
}

fn scratch_dir(dest: &Path) -> PathBuf {
    let stem = dest
        .file_stem()
        .map_or_else(|| "stream".to_string(), |s| s.to_string_lossy().into_owned());
    dest.with_file_name(format!(".{stem}.hls-parts"))
}
