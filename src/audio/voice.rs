//! Voice transport seam.
//!
//! Sessions only talk to [`VoiceTransport`] and [`VoiceConnection`]. The
//! production implementation drives songbird; tests substitute recording fakes.

use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinError,
    input::YoutubeDl,
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{session::TrackEndNotifier, track::TrackDescriptor, MusicError, MusicResult, Volume};

/// Opens voice connections.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Joins `channel_id`, or moves there if the guild is already connected.
    /// Failures are reported as [`MusicError::VoiceConnect`].
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> MusicResult<Arc<dyn VoiceConnection>>;
}

/// A live voice connection for one guild.
///
/// `play` replaces whatever was playing. When the started track ends for any
/// reason (natural end, `stop`, playback error) the transport calls
/// [`TrackEndNotifier::notify`] exactly as the notifier was handed in.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    async fn play(
        &self,
        track: &TrackDescriptor,
        volume: Volume,
        notifier: TrackEndNotifier,
    ) -> MusicResult<()>;
    fn pause(&self) -> MusicResult<()>;
    fn resume(&self) -> MusicResult<()>;
    fn stop(&self) -> MusicResult<()>;
    fn set_volume(&self, volume: Volume) -> MusicResult<()>;
    async fn disconnect(&self) -> MusicResult<()>;
}

/// Songbird-backed transport.
#[derive(Clone)]
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http_client: reqwest::Client,
    // Keyed by guild rather than per connection so a channel move keeps the handle
    current_tracks: Arc<DashMap<GuildId, TrackHandle>>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            http_client: reqwest::Client::new(),
            current_tracks: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> MusicResult<Arc<dyn VoiceConnection>> {
        let call = self.manager.join(guild_id, channel_id).await.map_err(|e| {
            error!("Error joining voice channel {} in guild {}: {:?}", channel_id, guild_id, e);
            MusicError::VoiceConnect(e.to_string())
        })?;

        info!("🔊 Connected to voice channel {} in guild {}", channel_id, guild_id);

        Ok(Arc::new(SongbirdConnection {
            guild_id,
            call,
            manager: self.manager.clone(),
            http_client: self.http_client.clone(),
            current_tracks: self.current_tracks.clone(),
        }))
    }
}

struct SongbirdConnection {
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    manager: Arc<Songbird>,
    http_client: reqwest::Client,
    current_tracks: Arc<DashMap<GuildId, TrackHandle>>,
}

impl SongbirdConnection {
    fn with_track<F>(&self, action: F) -> MusicResult<()>
    where
        F: FnOnce(&TrackHandle) -> Result<(), songbird::tracks::ControlError>,
    {
        let track = self
            .current_tracks
            .get(&self.guild_id)
            .ok_or(MusicError::NothingPlaying)?;
        action(&track).map_err(|e| MusicError::Playback(e.to_string()))
    }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn play(
        &self,
        track: &TrackDescriptor,
        volume: Volume,
        notifier: TrackEndNotifier,
    ) -> MusicResult<()> {
        let input = YoutubeDl::new(self.http_client.clone(), track.play_handle().to_string());

        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(input.into())
        };

        handle
            .set_volume(volume.as_f32())
            .map_err(|e| MusicError::Playback(e.to_string()))?;

        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackEndHandler {
                        notifier: notifier.clone(),
                    },
                )
                .map_err(|e| MusicError::Playback(format!("failed to add track event: {}", e)))?;
        }

        debug!("🎵 Started '{}' in guild {}", track.title(), self.guild_id);
        self.current_tracks.insert(self.guild_id, handle);
        Ok(())
    }

    fn pause(&self) -> MusicResult<()> {
        self.with_track(|track| track.pause())
    }

    fn resume(&self) -> MusicResult<()> {
        self.with_track(|track| track.play())
    }

    fn stop(&self) -> MusicResult<()> {
        let (_, track) = self
            .current_tracks
            .remove(&self.guild_id)
            .ok_or(MusicError::NothingPlaying)?;
        track.stop().map_err(|e| MusicError::Playback(e.to_string()))
    }

    fn set_volume(&self, volume: Volume) -> MusicResult<()> {
        self.with_track(|track| track.set_volume(volume.as_f32()))
    }

    async fn disconnect(&self) -> MusicResult<()> {
        self.current_tracks.remove(&self.guild_id);

        match self.manager.remove(self.guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => {
                info!("👋 Disconnected from voice in guild {}", self.guild_id);
                Ok(())
            }
            Err(e) => {
                warn!("Error leaving voice in guild {}: {:?}", self.guild_id, e);
                Err(MusicError::Playback(e.to_string()))
            }
        }
    }
}

/// Forwards songbird track end/error events to the owning session.
struct TrackEndHandler {
    notifier: TrackEndNotifier,
}

#[async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(states) = ctx {
            for (state, _) in states.iter() {
                if let songbird::tracks::PlayMode::Errored(e) = &state.playing {
                    warn!("⚠️ Track errored: {:?}", e);
                }
            }
        }

        self.notifier.notify();
        Some(Event::Cancel)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording fakes shared by the unit tests of the audio module.

    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    pub enum VoiceCall {
        Play(String),
        Pause,
        Resume,
        Stop,
        SetVolume(f32),
        Disconnect,
    }

    #[derive(Default)]
    pub struct RecordingConnection {
        calls: SyncMutex<Vec<VoiceCall>>,
        notifier: SyncMutex<Option<TrackEndNotifier>>,
        fail_play: AtomicBool,
        fail_volume: AtomicBool,
    }

    impl RecordingConnection {
        pub fn calls(&self) -> Vec<VoiceCall> {
            self.calls.lock().clone()
        }

        /// Titles passed to `play`, in order.
        pub fn played(&self) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .filter_map(|call| match call {
                    VoiceCall::Play(title) => Some(title.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn disconnects(&self) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|call| **call == VoiceCall::Disconnect)
                .count()
        }

        /// Simulates the playing track reaching its natural end.
        pub fn finish_current(&self) {
            if let Some(notifier) = self.notifier.lock().take() {
                notifier.notify();
            }
        }

        pub fn fail_next_play(&self) {
            self.fail_play.store(true, Ordering::SeqCst);
        }

        pub fn fail_next_volume(&self) {
            self.fail_volume.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl VoiceConnection for RecordingConnection {
        async fn play(
            &self,
            track: &TrackDescriptor,
            _volume: Volume,
            notifier: TrackEndNotifier,
        ) -> MusicResult<()> {
            if self.fail_play.swap(false, Ordering::SeqCst) {
                return Err(MusicError::Playback("stream unavailable".to_string()));
            }
            self.calls.lock().push(VoiceCall::Play(track.title().to_string()));
            *self.notifier.lock() = Some(notifier);
            Ok(())
        }

        fn pause(&self) -> MusicResult<()> {
            self.calls.lock().push(VoiceCall::Pause);
            Ok(())
        }

        fn resume(&self) -> MusicResult<()> {
            self.calls.lock().push(VoiceCall::Resume);
            Ok(())
        }

        fn stop(&self) -> MusicResult<()> {
            self.calls.lock().push(VoiceCall::Stop);
            self.finish_current();
            Ok(())
        }

        fn set_volume(&self, volume: Volume) -> MusicResult<()> {
            if self.fail_volume.swap(false, Ordering::SeqCst) {
                return Err(MusicError::Playback("track handle is gone".to_string()));
            }
            self.calls.lock().push(VoiceCall::SetVolume(volume.as_f32()));
            Ok(())
        }

        async fn disconnect(&self) -> MusicResult<()> {
            self.calls.lock().push(VoiceCall::Disconnect);
            Ok(())
        }
    }

    /// Hands out one [`RecordingConnection`] per guild, reused across joins.
    #[derive(Default)]
    pub struct RecordingTransport {
        connections: DashMap<GuildId, Arc<RecordingConnection>>,
        fail_connect: AtomicBool,
        connects: AtomicUsize,
    }

    impl RecordingTransport {
        pub fn connection(&self, guild_id: GuildId) -> Option<Arc<RecordingConnection>> {
            self.connections.get(&guild_id).map(|c| c.clone())
        }

        pub fn fail_connects(&self, fail: bool) {
            self.fail_connect.store(fail, Ordering::SeqCst);
        }

        pub fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VoiceTransport for RecordingTransport {
        async fn connect(
            &self,
            guild_id: GuildId,
            _channel_id: ChannelId,
        ) -> MusicResult<Arc<dyn VoiceConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(MusicError::VoiceConnect("connection refused".to_string()));
            }
            let connection: Arc<dyn VoiceConnection> =
                self.connections.entry(guild_id).or_default().clone();
            Ok(connection)
        }
    }
}
