//! # Audio Module
//!
//! Per-guild music sessions for Harmony Bot.
//!
//! ## Architecture
//!
//! ### [`session`] - Session state machine
//! - One tokio task per guild owns the queue, the current track, loop mode,
//!   volume and the voice connection
//! - Commands and "track finished" events arrive through the task's mailbox
//!   and are handled one at a time, so `advance` can never race with itself
//! - An idle deadline tears the session down when nothing is playing
//!
//! ### [`registry`] - Session registry
//! - Process-wide `GuildId -> SessionHandle` map with atomic get-or-create
//!
//! ### [`queue`] - Guild queue
//! - Bounded FIFO of upcoming tracks, shuffle, peek
//!
//! ### [`voice`] - Voice transport
//! - Traits the sessions talk to, and the songbird implementation
//!
//! Sessions for different guilds run as independent tasks. Nothing here takes a
//! global lock: serializing work *per session* is what keeps state consistent.
//!
//! ## Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use harmony_bot::audio::{MusicService, registry::SessionRegistry, session::SessionSettings};
//! # use harmony_bot::sources::YtDlpResolver;
//! # use serenity::all::{ChannelId, GuildId};
//! # async fn example(transport: Arc<dyn harmony_bot::audio::voice::VoiceTransport>) -> anyhow::Result<()> {
//! let registry = SessionRegistry::new(transport, SessionSettings::default());
//! let music = MusicService::new(registry, Arc::new(YtDlpResolver::new(3600)));
//! let guild_id = GuildId::new(1);
//!
//! music.join(guild_id, ChannelId::new(2)).await?;
//! music.enqueue(guild_id, "never gonna give you up").await?;
//! music.set_volume(guild_id, 80).await?;
//! # Ok(())
//! # }
//! ```

pub mod queue;
pub mod registry;
pub mod session;
pub mod track;
pub mod voice;

use serenity::model::id::{ChannelId, GuildId};
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::{debug, info};

use crate::sources::{MediaResolver, ResolutionError};

use self::{
    registry::SessionRegistry,
    session::{EnqueueOutcome, QueueSnapshot, SessionHandle},
    track::TrackDescriptor,
};

/// Errors returned to the command surface by music operations
#[derive(Debug, Error)]
pub enum MusicError {
    #[error("Not connected to a voice channel")]
    NotConnected,

    #[error("Could not find that track: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("The queue is full (max {max} tracks)")]
    QueueFull { max: usize },

    #[error("Volume must be between 0 and 100, got {0}")]
    InvalidVolume(i64),

    #[error("Invalid loop mode '{0}', use off, single or queue")]
    InvalidLoopMode(String),

    #[error("Failed to join voice channel: {0}")]
    VoiceConnect(String),

    #[error("Nothing is playing right now")]
    NothingPlaying,

    #[error("Playback is already paused")]
    AlreadyPaused,

    #[error("Playback is not paused")]
    NotPaused,

    #[error("Voice playback error: {0}")]
    Playback(String),
}

/// Result type for music operations
pub type MusicResult<T> = Result<T, MusicError>;

/// What happens to a track once it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    /// Replay the same track until the mode changes or it is skipped
    Single,
    /// Send each finished track to the back of the queue
    Queue,
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Single => write!(f, "single"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

impl FromStr for LoopMode {
    type Err = MusicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "single" => Ok(Self::Single),
            "queue" => Ok(Self::Queue),
            other => Err(MusicError::InvalidLoopMode(other.to_string())),
        }
    }
}

/// Playback gain in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volume(f32);

impl Volume {
    /// Clamps an arbitrary gain into range.
    pub fn new(value: f32) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    /// Accepts a user-facing percentage, `0..=100`.
    pub fn from_percent(percent: i64) -> MusicResult<Self> {
        if !(0..=100).contains(&percent) {
            return Err(MusicError::InvalidVolume(percent));
        }
        Ok(Self(percent as f32 / 100.0))
    }

    pub fn as_f32(self) -> f32 {
        self.0
    }

    pub fn percent(self) -> u8 {
        (self.0 * 100.0).round() as u8
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self(0.5)
    }
}

/// Entry point for the command surface.
///
/// Every method is keyed by guild and returns a typed [`MusicResult`]; rendering
/// errors for users is left to the caller. Only [`MusicService::join`] creates
/// sessions, every other operation requires one to exist already.
#[derive(Clone)]
pub struct MusicService {
    registry: SessionRegistry,
    resolver: Arc<dyn MediaResolver>,
}

impl MusicService {
    pub fn new(registry: SessionRegistry, resolver: Arc<dyn MediaResolver>) -> Self {
        Self { registry, resolver }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Connects the guild's session to a voice channel, creating the session if needed.
    pub async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<()> {
        let session = self.registry.get_or_create(guild_id);
        session.join(channel_id).await
    }

    /// Resolves `query` and appends it to the guild's queue.
    ///
    /// Resolution runs before anything is posted to the session, so a failed
    /// lookup never touches the queue and a slow one never blocks `skip`/`stop`.
    pub async fn enqueue(&self, guild_id: GuildId, query: &str) -> MusicResult<EnqueueOutcome> {
        let session = self.session(guild_id)?;
        let track = self.resolver.resolve(query).await?;
        debug!("🎵 '{}' resolved to '{}'", query, track.title());
        session.enqueue(track).await
    }

    pub async fn pause(&self, guild_id: GuildId) -> MusicResult<()> {
        self.session(guild_id)?.pause().await
    }

    pub async fn resume(&self, guild_id: GuildId) -> MusicResult<()> {
        self.session(guild_id)?.resume().await
    }

    /// Skips the current track and returns it.
    pub async fn skip(&self, guild_id: GuildId) -> MusicResult<TrackDescriptor> {
        self.session(guild_id)?.skip().await
    }

    pub async fn stop(&self, guild_id: GuildId) -> MusicResult<()> {
        self.session(guild_id)?.stop().await
    }

    pub async fn leave(&self, guild_id: GuildId) -> MusicResult<()> {
        self.session(guild_id)?.leave().await
    }

    pub async fn set_volume(&self, guild_id: GuildId, percent: i64) -> MusicResult<Volume> {
        let volume = Volume::from_percent(percent)?;
        self.session(guild_id)?.set_volume(volume).await?;
        Ok(volume)
    }

    pub async fn set_loop_mode(&self, guild_id: GuildId, mode: &str) -> MusicResult<LoopMode> {
        let mode: LoopMode = mode.parse()?;
        self.session(guild_id)?.set_loop_mode(mode).await?;
        Ok(mode)
    }

    /// Shuffles the upcoming tracks; returns how many were queued.
    pub async fn shuffle(&self, guild_id: GuildId) -> MusicResult<usize> {
        self.session(guild_id)?.shuffle().await
    }

    pub async fn queue_snapshot(&self, guild_id: GuildId) -> MusicResult<QueueSnapshot> {
        self.session(guild_id)?.snapshot().await
    }

    /// Whether the guild has a session holding a voice connection. A session
    /// left behind by a failed join exists but is not connected.
    pub async fn is_connected(&self, guild_id: GuildId) -> bool {
        match self.registry.get(guild_id) {
            Some(session) => session
                .snapshot()
                .await
                .map(|snapshot| snapshot.connected)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Called when the gateway reports the bot left voice in this guild.
    /// `left` is the channel it was in, when the cache knew it.
    pub fn voice_disconnected(&self, guild_id: GuildId, left: Option<ChannelId>) {
        if let Some(session) = self.registry.get(guild_id) {
            info!("🔌 Bot disconnected from voice in guild {}", guild_id);
            session.voice_disconnected(left);
        }
    }

    fn session(&self, guild_id: GuildId) -> MusicResult<SessionHandle> {
        self.registry.get(guild_id).ok_or(MusicError::NotConnected)
    }
}
