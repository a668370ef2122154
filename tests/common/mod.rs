//! Fakes for driving the music core without Discord or yt-dlp.

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use harmony_bot::{
    audio::{
        registry::SessionRegistry,
        session::{SessionSettings, TrackEndNotifier},
        track::TrackDescriptor,
        voice::{VoiceConnection, VoiceTransport},
        MusicError, MusicResult, MusicService, Volume,
    },
    sources::{MediaResolver, ResolutionError},
};
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

pub const GUILD: GuildId = GuildId::new(1);
pub const CHANNEL: ChannelId = ChannelId::new(10);

#[derive(Default)]
pub struct FakeConnection {
    played: Mutex<Vec<String>>,
    notifier: Mutex<Option<TrackEndNotifier>>,
    disconnects: Mutex<usize>,
}

impl FakeConnection {
    pub fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        *self.disconnects.lock()
    }

    /// The playing track reaches its end.
    pub fn finish_current(&self) {
        if let Some(notifier) = self.notifier.lock().take() {
            notifier.notify();
        }
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    async fn play(
        &self,
        track: &TrackDescriptor,
        _volume: Volume,
        notifier: TrackEndNotifier,
    ) -> MusicResult<()> {
        self.played.lock().push(track.title().to_string());
        *self.notifier.lock() = Some(notifier);
        Ok(())
    }

    fn pause(&self) -> MusicResult<()> {
        Ok(())
    }

    fn resume(&self) -> MusicResult<()> {
        Ok(())
    }

    fn stop(&self) -> MusicResult<()> {
        self.finish_current();
        Ok(())
    }

    fn set_volume(&self, _volume: Volume) -> MusicResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> MusicResult<()> {
        *self.disconnects.lock() += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransport {
    connections: DashMap<GuildId, Arc<FakeConnection>>,
    refuse: AtomicBool,
}

impl FakeTransport {
    pub fn connection(&self, guild_id: GuildId) -> Arc<FakeConnection> {
        self.connections.entry(guild_id).or_default().clone()
    }

    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn accept_connections(&self) {
        self.refuse.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        _channel_id: ChannelId,
    ) -> MusicResult<Arc<dyn VoiceConnection>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(MusicError::VoiceConnect("no route to voice server".to_string()));
        }
        let connection: Arc<dyn VoiceConnection> = self.connection(guild_id);
        Ok(connection)
    }
}

/// Resolves any query to a track titled after it; `missing` queries find nothing.
#[derive(Default)]
pub struct FakeResolver {
    missing: Vec<String>,
}

impl FakeResolver {
    pub fn missing(queries: &[&str]) -> Self {
        Self {
            missing: queries.iter().map(|q| q.to_string()).collect(),
        }
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    async fn resolve(&self, query: &str) -> Result<TrackDescriptor, ResolutionError> {
        if self.missing.iter().any(|q| q == query) {
            return Err(ResolutionError::NoMatch(query.to_string()));
        }
        Ok(TrackDescriptor::new(query, format!("https://media.test/{}", query))
            .with_duration_seconds(180))
    }
}

pub fn settings() -> SessionSettings {
    SessionSettings {
        idle_timeout: Duration::from_secs(180),
        ..SessionSettings::default()
    }
}

pub fn service(transport: Arc<FakeTransport>, resolver: FakeResolver) -> MusicService {
    let registry = SessionRegistry::new(transport, settings());
    MusicService::new(registry, Arc::new(resolver))
}

/// Ends the guild's current track and waits until the session has moved on.
pub async fn finish_track(music: &MusicService, transport: &FakeTransport, guild_id: GuildId) {
    transport.connection(guild_id).finish_current();
    let _ = music.queue_snapshot(guild_id).await;
}
