use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{is_url, MediaResolver, ResolutionError};
use crate::audio::track::TrackDescriptor;

/// Information extracted by `yt-dlp --dump-json`
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    original_url: Option<String>,
    #[serde(default)]
    entries: Vec<YtDlpInfo>,
}

/// Resolves queries with the `yt-dlp` binary.
///
/// URLs are extracted directly; anything else becomes a `ytsearch1:` search.
/// The resulting play handle is the canonical page URL, which songbird's
/// `YoutubeDl` input re-extracts into a fresh stream when playback starts.
pub struct YtDlpResolver {
    max_duration: u64,
    // Limit concurrent extractor processes to avoid rate limiting
    rate_limiter: Semaphore,
}

impl YtDlpResolver {
    pub fn new(max_duration: u64) -> Self {
        Self {
            max_duration,
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Checks that `yt-dlp` is installed, logging its version.
    pub async fn verify_dependencies() -> anyhow::Result<()> {
        let output = Command::new("yt-dlp").arg("--version").output().await?;

        if !output.status.success() {
            anyhow::bail!("yt-dlp is not available");
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!("✅ yt-dlp version: {}", version.trim());
        Ok(())
    }

    fn search_target(query: &str) -> String {
        if is_url(query) {
            query.to_string()
        } else {
            format!("ytsearch1:{}", query)
        }
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<TrackDescriptor, ResolutionError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolutionError::NoMatch(String::new()));
        }

        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolutionError::Extractor(e.to_string()))?;

        let target = Self::search_target(query);
        info!("🔍 Resolving: {}", target);

        let output = Command::new("yt-dlp")
            .args([
                "--dump-json",
                "-f",
                "bestaudio/best",
                "--no-playlist",
                "--no-warnings",
                &target,
            ])
            .output()
            .await
            .map_err(|e| ResolutionError::Extractor(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp failed for '{}': {}", query, stderr.trim());
            return Err(ResolutionError::Extractor(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_output(&stdout, query, self.max_duration)
    }
}

/// Builds a descriptor from `yt-dlp` JSON output.
fn parse_output(
    stdout: &str,
    query: &str,
    max_duration: u64,
) -> Result<TrackDescriptor, ResolutionError> {
    let line = stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| ResolutionError::NoMatch(query.to_string()))?;

    let mut info: YtDlpInfo =
        serde_json::from_str(line).map_err(|e| ResolutionError::Extractor(e.to_string()))?;

    // Playlist-shaped results: take the first entry
    if !info.entries.is_empty() {
        info = info.entries.remove(0);
    }

    let page_url = info
        .webpage_url
        .or(info.original_url)
        .ok_or_else(|| ResolutionError::NoMatch(query.to_string()))?;

    let duration = info.duration.map(|d| d.max(0.0) as u64);
    if let Some(duration) = duration {
        if duration > max_duration {
            return Err(ResolutionError::TooLong {
                duration,
                max: max_duration,
            });
        }
    }

    let title = info.title.unwrap_or_else(|| "Unknown title".to_string());
    debug!("📊 Resolved '{}' to {}", query, page_url);

    let mut track = TrackDescriptor::new(title, page_url.clone()).with_source_url(page_url);
    if let Some(duration) = duration {
        track = track.with_duration_seconds(duration);
    }
    if let Some(uploader) = info.uploader {
        track = track.with_uploader(uploader);
    }
    if let Some(thumbnail) = info.thumbnail {
        track = track.with_thumbnail_url(thumbnail);
    }

    Ok(track)
}
