use std::time::Duration;

/// A resolved, playable piece of media plus the metadata shown to users.
///
/// Descriptors are produced by a [`MediaResolver`](crate::sources::MediaResolver)
/// and never mutated afterwards. The `play_handle` is opaque to the music core:
/// only the voice transport knows how to turn it into audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescriptor {
    title: String,
    play_handle: String,
    duration_seconds: Option<u64>,
    source_url: Option<String>,
    uploader: Option<String>,
    thumbnail_url: Option<String>,
}

impl TrackDescriptor {
    pub fn new(title: impl Into<String>, play_handle: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            play_handle: play_handle.into(),
            duration_seconds: None,
            source_url: None,
            uploader: None,
            thumbnail_url: None,
        }
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn play_handle(&self) -> &str {
        &self.play_handle
    }
    pub fn duration_seconds(&self) -> Option<u64> {
        self.duration_seconds
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration_seconds.map(Duration::from_secs)
    }
    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }
    pub fn uploader(&self) -> Option<&str> {
        self.uploader.as_deref()
    }
    pub fn thumbnail_url(&self) -> Option<&str> {
        self.thumbnail_url.as_deref()
    }

    // Builders, used by resolvers while assembling a descriptor
    pub fn with_duration_seconds(mut self, seconds: u64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = Some(uploader.into());
        self
    }

    pub fn with_thumbnail_url(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }
}

/// Formats a duration as `m:ss`, or `h:mm:ss` once it reaches an hour.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
