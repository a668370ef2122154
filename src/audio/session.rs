//! Per-guild music session.
//!
//! A session is a tokio task that exclusively owns one guild's queue, current
//! track, loop mode, volume and voice connection. Everything that touches that
//! state arrives as a [`SessionCommand`] on the task's mailbox and is handled to
//! completion before the next one is read. Track-finished notifications from
//! the transport use the same mailbox, so advancing to the next track is
//! serialized with user commands.
//!
//! ```text
//! Idle ──join──▶ Connecting ──▶ Idle (connected) ──enqueue──▶ Playing ⇄ Paused
//!                                   ▲                           │
//!                                   └──── queue drained ────────┘
//! any ──stop / leave / idle timeout / voice lost──▶ Draining ──▶ Destroyed
//! ```

use serenity::model::id::{ChannelId, GuildId};
use std::{fmt, sync::Arc, time::Duration};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender},
        oneshot,
    },
    time::{sleep_until, Instant},
};
use tracing::{debug, error, info, warn};

use super::{
    queue::{GuildQueue, DEFAULT_MAX_QUEUE_SIZE},
    registry::{Deregistration, SessionSeed},
    track::TrackDescriptor,
    voice::{VoiceConnection, VoiceTransport},
    LoopMode, MusicError, MusicResult, Volume,
};

/// Tunables every session is created with.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_queue_size: usize,
    pub idle_timeout: Duration,
    pub default_volume: Volume,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            idle_timeout: Duration::from_secs(180),
            default_volume: Volume::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Playing,
    Paused,
    Draining,
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Draining => "draining",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// What `enqueue` did with the track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The session was idle and started playing it right away
    Playing(TrackDescriptor),
    /// Appended behind the current track, at this 1-based position
    Queued {
        track: TrackDescriptor,
        position: usize,
    },
}

/// Point-in-time view of a session for display.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub current: Option<TrackDescriptor>,
    pub upcoming: Vec<TrackDescriptor>,
    pub loop_mode: LoopMode,
    pub volume: Volume,
    pub state: SessionState,
    pub connected: bool,
}

type Reply<T> = oneshot::Sender<MusicResult<T>>;

pub(crate) enum SessionCommand {
    Join {
        channel_id: ChannelId,
        reply: Reply<()>,
    },
    Enqueue {
        track: TrackDescriptor,
        reply: Reply<EnqueueOutcome>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    Skip {
        reply: Reply<TrackDescriptor>,
    },
    Stop {
        reply: Reply<()>,
    },
    Leave {
        reply: Reply<()>,
    },
    SetVolume {
        volume: Volume,
        reply: Reply<()>,
    },
    SetLoopMode {
        mode: LoopMode,
        reply: Reply<()>,
    },
    Shuffle {
        reply: Reply<usize>,
    },
    Snapshot {
        reply: Reply<QueueSnapshot>,
    },
    TrackFinished {
        play_id: u64,
    },
    /// `channel_id` is the channel the bot was seen leaving, when known.
    VoiceDisconnected {
        channel_id: Option<ChannelId>,
    },
}

/// Handed to the transport with every `play`; fires the session's
/// "track finished" event for that particular play.
///
/// Holds only a weak reference to the mailbox, so a notifier kept alive by
/// the voice driver never keeps a session alive.
#[derive(Clone)]
pub struct TrackEndNotifier {
    mailbox: WeakUnboundedSender<SessionCommand>,
    play_id: u64,
}

impl TrackEndNotifier {
    pub fn play_id(&self) -> u64 {
        self.play_id
    }

    pub fn notify(&self) {
        if let Some(mailbox) = self.mailbox.upgrade() {
            let _ = mailbox.send(SessionCommand::TrackFinished {
                play_id: self.play_id,
            });
        }
    }
}

/// Cheap, cloneable address of a running session.
///
/// Every request waits for the session's reply. A session that has already
/// been destroyed answers [`MusicError::NotConnected`].
#[derive(Clone)]
pub struct SessionHandle {
    guild_id: GuildId,
    session_id: u64,
    mailbox: UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// True once the session task has exited.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub async fn join(&self, channel_id: ChannelId) -> MusicResult<()> {
        self.request(|reply| SessionCommand::Join { channel_id, reply })
            .await
    }

    pub async fn enqueue(&self, track: TrackDescriptor) -> MusicResult<EnqueueOutcome> {
        self.request(|reply| SessionCommand::Enqueue { track, reply })
            .await
    }

    pub async fn pause(&self) -> MusicResult<()> {
        self.request(|reply| SessionCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> MusicResult<()> {
        self.request(|reply| SessionCommand::Resume { reply }).await
    }

    pub async fn skip(&self) -> MusicResult<TrackDescriptor> {
        self.request(|reply| SessionCommand::Skip { reply }).await
    }

    pub async fn stop(&self) -> MusicResult<()> {
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    pub async fn leave(&self) -> MusicResult<()> {
        self.request(|reply| SessionCommand::Leave { reply }).await
    }

    pub async fn set_volume(&self, volume: Volume) -> MusicResult<()> {
        self.request(|reply| SessionCommand::SetVolume { volume, reply })
            .await
    }

    pub async fn set_loop_mode(&self, mode: LoopMode) -> MusicResult<()> {
        self.request(|reply| SessionCommand::SetLoopMode { mode, reply })
            .await
    }

    pub async fn shuffle(&self) -> MusicResult<usize> {
        self.request(|reply| SessionCommand::Shuffle { reply }).await
    }

    pub async fn snapshot(&self) -> MusicResult<QueueSnapshot> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Fire-and-forget: the gateway says the bot left `channel_id` and is no
    /// longer in voice. A departure from some other channel than the one this
    /// session joined is ignored.
    pub fn voice_disconnected(&self, channel_id: Option<ChannelId>) {
        let _ = self
            .mailbox
            .send(SessionCommand::VoiceDisconnected { channel_id });
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> MusicResult<T> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(command(reply))
            .map_err(|_| MusicError::NotConnected)?;
        response.await.map_err(|_| MusicError::NotConnected)?
    }
}

/// State owned by a session task.
pub struct Session {
    guild_id: GuildId,
    session_id: u64,
    queue: GuildQueue,
    current: Option<TrackDescriptor>,
    loop_mode: LoopMode,
    volume: Volume,
    state: SessionState,
    connection: Option<Arc<dyn VoiceConnection>>,
    channel_id: Option<ChannelId>,
    transport: Arc<dyn VoiceTransport>,
    idle_timeout: Duration,
    idle_deadline: Option<Instant>,
    // Incremented on every play; finish events carrying an older id are stale
    play_id: u64,
    skip_requested: bool,
    mailbox: WeakUnboundedSender<SessionCommand>,
    deregistration: Option<Deregistration>,
}

impl Session {
    /// Spawns the session task and returns its handle.
    ///
    /// The idle timer starts armed: a session nobody joins is reclaimed too.
    pub fn spawn(
        seed: SessionSeed,
        transport: Arc<dyn VoiceTransport>,
        settings: SessionSettings,
    ) -> SessionHandle {
        let (sender, receiver) = mpsc::unbounded_channel();

        let session = Session {
            guild_id: seed.guild_id,
            session_id: seed.session_id,
            queue: GuildQueue::new(settings.max_queue_size),
            current: None,
            loop_mode: LoopMode::Off,
            volume: settings.default_volume,
            state: SessionState::Idle,
            connection: None,
            channel_id: None,
            transport,
            idle_timeout: settings.idle_timeout,
            idle_deadline: Some(Instant::now() + settings.idle_timeout),
            play_id: 0,
            skip_requested: false,
            mailbox: sender.downgrade(),
            deregistration: Some(seed.deregistration),
        };

        tokio::spawn(session.run(receiver));

        SessionHandle {
            guild_id: seed.guild_id,
            session_id: seed.session_id,
            mailbox: sender,
        }
    }

    async fn run(mut self, mut mailbox: UnboundedReceiver<SessionCommand>) {
        info!(
            "🎶 Session {} started for guild {}",
            self.session_id, self.guild_id
        );

        loop {
            let command = match self.idle_deadline {
                Some(deadline) => tokio::select! {
                    command = mailbox.recv() => command,
                    _ = sleep_until(deadline) => {
                        info!("💤 Guild {} idle for {:?}, leaving", self.guild_id, self.idle_timeout);
                        self.teardown(true).await;
                        break;
                    }
                },
                None => mailbox.recv().await,
            };

            let Some(command) = command else {
                debug!("📪 Session {} mailbox closed", self.session_id);
                self.teardown(true).await;
                break;
            };

            self.handle(command).await;

            if self.state == SessionState::Destroyed {
                break;
            }
        }
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Join { channel_id, reply } => {
                let result = self.join(channel_id).await;
                let _ = reply.send(result);
            }
            SessionCommand::Enqueue { track, reply } => {
                let result = self.enqueue(track).await;
                let _ = reply.send(result);
            }
            SessionCommand::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            SessionCommand::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            SessionCommand::Skip { reply } => {
                let result = self.skip().await;
                let _ = reply.send(result);
            }
            SessionCommand::Stop { reply } => {
                let result = self.stop().await;
                let _ = reply.send(result);
            }
            SessionCommand::Leave { reply } => {
                let result = self.leave().await;
                let _ = reply.send(result);
            }
            SessionCommand::SetVolume { volume, reply } => {
                let _ = reply.send(self.set_volume(volume));
            }
            SessionCommand::SetLoopMode { mode, reply } => {
                info!("🔁 Loop mode set to {} in guild {}", mode, self.guild_id);
                self.loop_mode = mode;
                let _ = reply.send(Ok(()));
            }
            SessionCommand::Shuffle { reply } => {
                self.queue.shuffle();
                let _ = reply.send(Ok(self.queue.len()));
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            SessionCommand::TrackFinished { play_id } => {
                self.on_track_finished(play_id).await;
            }
            SessionCommand::VoiceDisconnected { channel_id } => {
                self.on_voice_disconnected(channel_id).await;
            }
        }
    }

    async fn join(&mut self, channel_id: ChannelId) -> MusicResult<()> {
        let previous = self.state;
        self.state = SessionState::Connecting;

        match self.transport.connect(self.guild_id, channel_id).await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.channel_id = Some(channel_id);
                self.state = match previous {
                    SessionState::Playing | SessionState::Paused => previous,
                    _ => SessionState::Idle,
                };
                if self.current.is_none() {
                    self.arm_idle_timer();
                }
                Ok(())
            }
            Err(e) => {
                warn!("❌ Could not join {} in guild {}: {}", channel_id, self.guild_id, e);
                // An existing connection (if any) is left untouched
                self.state = previous;
                Err(e)
            }
        }
    }

    async fn enqueue(&mut self, track: TrackDescriptor) -> MusicResult<EnqueueOutcome> {
        if self.connection.is_none() {
            return Err(MusicError::NotConnected);
        }

        let position = self.queue.enqueue(track.clone())?;

        if self.current.is_none() {
            if let Some(started) = self.advance(None).await? {
                return Ok(EnqueueOutcome::Playing(started));
            }
        }

        Ok(EnqueueOutcome::Queued { track, position })
    }

    fn pause(&mut self) -> MusicResult<()> {
        match self.state {
            SessionState::Playing => {
                self.connection()?.pause()?;
                self.state = SessionState::Paused;
                info!("⏸️ Paused in guild {}", self.guild_id);
                Ok(())
            }
            SessionState::Paused => Err(MusicError::AlreadyPaused),
            _ => Err(MusicError::NothingPlaying),
        }
    }

    fn resume(&mut self) -> MusicResult<()> {
        match self.state {
            SessionState::Paused => {
                self.connection()?.resume()?;
                self.state = SessionState::Playing;
                info!("▶️ Resumed in guild {}", self.guild_id);
                Ok(())
            }
            SessionState::Playing => Err(MusicError::NotPaused),
            _ => Err(MusicError::NothingPlaying),
        }
    }

    /// Stops the current track. The transport's finish event then advances,
    /// so skip and natural end share a single path.
    async fn skip(&mut self) -> MusicResult<TrackDescriptor> {
        let skipped = self.current.clone().ok_or(MusicError::NothingPlaying)?;
        let connection = self.connection()?;

        self.skip_requested = true;
        info!("⏭️ Skipping '{}' in guild {}", skipped.title(), self.guild_id);

        if let Err(e) = connection.stop() {
            // No finish event will come for a track the transport could not stop
            warn!("Stop failed during skip ({}), advancing directly", e);
            self.on_track_finished(self.play_id).await;
        }

        Ok(skipped)
    }

    async fn stop(&mut self) -> MusicResult<()> {
        if self.connection.is_none() {
            return Err(MusicError::NotConnected);
        }
        if self.current.is_none() {
            return Err(MusicError::NothingPlaying);
        }
        self.teardown(true).await;
        Ok(())
    }

    async fn leave(&mut self) -> MusicResult<()> {
        if self.connection.is_none() {
            return Err(MusicError::NotConnected);
        }
        self.teardown(true).await;
        Ok(())
    }

    fn set_volume(&mut self, volume: Volume) -> MusicResult<()> {
        let connection = self.connection()?;
        if self.current.is_some() {
            connection.set_volume(volume)?;
        }
        self.volume = volume;
        info!("🔊 Volume set to {}% in guild {}", volume.percent(), self.guild_id);
        Ok(())
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            upcoming: self.queue.peek_all(),
            loop_mode: self.loop_mode,
            volume: self.volume,
            state: self.state,
            connected: self.connection.is_some(),
        }
    }

    async fn on_voice_disconnected(&mut self, left: Option<ChannelId>) {
        if self.connection.is_none() {
            return;
        }
        // Late event from an earlier connection
        if let (Some(left), Some(joined)) = (left, self.channel_id) {
            if left != joined {
                debug!(
                    "Ignoring disconnect from {} in guild {} (session is in {})",
                    left, self.guild_id, joined
                );
                return;
            }
        }
        warn!("🔌 Lost voice connection in guild {}", self.guild_id);
        self.teardown(false).await;
    }

    async fn on_track_finished(&mut self, play_id: u64) {
        if play_id != self.play_id {
            debug!("Ignoring stale finish event {} (current {})", play_id, self.play_id);
            return;
        }
        let Some(finished) = self.current.take() else {
            return;
        };

        let skipped = std::mem::take(&mut self.skip_requested);
        debug!("🏁 Finished '{}' in guild {}", finished.title(), self.guild_id);

        // A skipped track is not replayed by single-track loop
        let requeue = !(skipped && self.loop_mode == LoopMode::Single);

        if let Err(e) = self.advance(requeue.then_some(finished)).await {
            error!("Error advancing queue in guild {}: {}", self.guild_id, e);
        }
    }

    /// Re-inserts `finished` according to the loop mode and starts the next
    /// track. Returns the started track, or `None` when the queue is drained.
    async fn advance(
        &mut self,
        finished: Option<TrackDescriptor>,
    ) -> MusicResult<Option<TrackDescriptor>> {
        if let Some(track) = finished {
            match self.loop_mode {
                LoopMode::Single => self.queue.requeue_front(track),
                LoopMode::Queue => self.queue.requeue_back(track),
                LoopMode::Off => {}
            }
        }

        let Some(next) = self.queue.dequeue_front() else {
            self.current = None;
            self.state = SessionState::Idle;
            self.arm_idle_timer();
            info!("📭 Queue finished in guild {}", self.guild_id);
            return Ok(None);
        };

        let connection = match self.connection() {
            Ok(connection) => connection,
            Err(e) => {
                self.teardown(false).await;
                return Err(e);
            }
        };

        self.play_id += 1;
        let notifier = TrackEndNotifier {
            mailbox: self.mailbox.clone(),
            play_id: self.play_id,
        };

        match connection.play(&next, self.volume, notifier).await {
            Ok(()) => {
                info!("🎵 Now playing in guild {}: {}", self.guild_id, next.title());
                self.current = Some(next.clone());
                self.state = SessionState::Playing;
                self.idle_deadline = None;
                Ok(Some(next))
            }
            Err(e) => {
                error!("Failed to play '{}' in guild {}: {}", next.title(), self.guild_id, e);
                self.teardown(true).await;
                Err(e)
            }
        }
    }

    /// Clears everything, optionally leaves voice, and deregisters. Runs at
    /// most once per session.
    async fn teardown(&mut self, disconnect: bool) {
        if matches!(self.state, SessionState::Draining | SessionState::Destroyed) {
            return;
        }
        self.state = SessionState::Draining;

        let had_track = self.current.take().is_some();
        self.queue.clear();
        self.idle_deadline = None;
        self.skip_requested = false;
        self.play_id += 1;

        self.channel_id = None;
        if let Some(connection) = self.connection.take() {
            if disconnect {
                if had_track {
                    if let Err(e) = connection.stop() {
                        debug!("Stop during teardown failed: {}", e);
                    }
                }
                if let Err(e) = connection.disconnect().await {
                    warn!("Error disconnecting guild {}: {}", self.guild_id, e);
                }
            }
        }

        self.state = SessionState::Destroyed;
        if let Some(deregistration) = self.deregistration.take() {
            deregistration.run();
        }
        info!(
            "🛑 Session {} for guild {} destroyed",
            self.session_id, self.guild_id
        );
    }

    fn connection(&self) -> MusicResult<Arc<dyn VoiceConnection>> {
        self.connection.clone().ok_or(MusicError::NotConnected)
    }

    fn arm_idle_timer(&mut self) {
        self.idle_deadline = Some(Instant::now() + self.idle_timeout);
    }
}
