//! # Sources Module
//!
//! Turns what a user typed after `!play` into a [`TrackDescriptor`].
//!
//! The music core only sees the [`MediaResolver`] trait. The production
//! implementation is [`YtDlpResolver`], which shells out to `yt-dlp` for both
//! direct URLs and free-text searches.

pub mod ytdlp;

use async_trait::async_trait;
use thiserror::Error;

use crate::audio::track::TrackDescriptor;

pub use ytdlp::YtDlpResolver;

/// Why a query could not be turned into a playable track.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("No results found for '{0}'")]
    NoMatch(String),

    #[error("Extractor error: {0}")]
    Extractor(String),

    #[error("Track is too long ({duration}s, max {max}s)")]
    TooLong { duration: u64, max: u64 },
}

/// Resolves a search query or URL to a playable track.
///
/// Resolution has no side effects beyond the remote lookup, and handles are
/// never cached: resolving the same query twice yields two fresh descriptors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<TrackDescriptor, ResolutionError>;
}

/// Whether the query should be treated as a direct link rather than a search.
pub fn is_url(query: &str) -> bool {
    url::Url::parse(query)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_detection() {
        assert!(is_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_url("http://example.com/song.mp3"));
        assert!(!is_url("never gonna give you up"));
        assert!(!is_url("ftp://example.com/song.mp3"));
    }
}
