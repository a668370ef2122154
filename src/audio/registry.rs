use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::GuildId;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use tracing::debug;

use super::{
    session::{Session, SessionHandle, SessionSettings},
    voice::VoiceTransport,
};

/// Everything a factory needs to build a session.
pub struct SessionSeed {
    pub guild_id: GuildId,
    pub session_id: u64,
    pub deregistration: Deregistration,
}

/// Removes one specific session from the registry when it tears down.
///
/// The entry is only removed if it still belongs to `session_id`, so a dying
/// session never evicts a newer one created for the same guild.
pub struct Deregistration {
    sessions: Weak<DashMap<GuildId, SessionHandle>>,
    guild_id: GuildId,
    session_id: u64,
}

impl Deregistration {
    pub fn run(self) {
        let Some(sessions) = self.sessions.upgrade() else {
            return;
        };
        let removed = sessions
            .remove_if(&self.guild_id, |_, handle| {
                handle.session_id() == self.session_id
            })
            .is_some();
        if removed {
            debug!(
                "🗑️ Session {} deregistered for guild {}",
                self.session_id, self.guild_id
            );
        }
    }
}

pub type SessionFactory = Arc<dyn Fn(SessionSeed) -> SessionHandle + Send + Sync>;

/// Process-wide map of live sessions, at most one per guild.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<GuildId, SessionHandle>>,
    factory: SessionFactory,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new(transport: Arc<dyn VoiceTransport>, settings: SessionSettings) -> Self {
        Self::with_factory(Arc::new(move |seed| {
            Session::spawn(seed, transport.clone(), settings.clone())
        }))
    }

    pub fn with_factory(factory: SessionFactory) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            factory,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns the guild's live session, creating it if there is none.
    ///
    /// Check and insert happen under the map's shard lock, so concurrent
    /// callers for one guild construct exactly one session. An entry whose
    /// task has already exited is replaced in the same step.
    pub fn get_or_create(&self, guild_id: GuildId) -> SessionHandle {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() {
                    return entry.get().clone();
                }
                debug!("♻️ Replacing finished session for guild {}", guild_id);
                let handle = self.construct(guild_id);
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.construct(guild_id);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions
            .get(&guild_id)
            .filter(|handle| !handle.is_closed())
            .map(|handle| handle.clone())
    }

    /// Drops the registry's reference. Removing an absent guild is a no-op.
    pub fn remove(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions.remove(&guild_id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn construct(&self, guild_id: GuildId) -> SessionHandle {
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("🆕 Creating session {} for guild {}", session_id, guild_id);
        (self.factory)(SessionSeed {
            guild_id,
            session_id,
            deregistration: Deregistration {
                sessions: Arc::downgrade(&self.sessions),
                guild_id,
                session_id,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{voice::testing::RecordingTransport, MusicError};
    use serenity::model::id::ChannelId;
    use std::sync::atomic::AtomicUsize;

    fn counting_registry() -> (SessionRegistry, Arc<AtomicUsize>) {
        let transport: Arc<dyn VoiceTransport> = Arc::new(RecordingTransport::default());
        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = constructed.clone();
        let registry = SessionRegistry::with_factory(Arc::new(move |seed| {
            counter.fetch_add(1, Ordering::SeqCst);
            Session::spawn(seed, transport.clone(), SessionSettings::default())
        }));
        (registry, constructed)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_create_constructs_once() {
        let (registry, constructed) = counting_registry();
        let guild_id = GuildId::new(1);

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_create(guild_id).session_id() })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_get_does_not_create() {
        let (registry, constructed) = counting_registry();
        assert!(registry.get(GuildId::new(5)).is_none());
        assert_eq!(constructed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (registry, _) = counting_registry();
        let guild_id = GuildId::new(2);
        registry.get_or_create(guild_id);

        assert!(registry.remove(guild_id).is_some());
        assert!(registry.remove(guild_id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_destroyed_session_is_replaced() {
        let (registry, constructed) = counting_registry();
        let guild_id = GuildId::new(3);

        let first = registry.get_or_create(guild_id);
        first.join(ChannelId::new(30)).await.unwrap();
        first.leave().await.unwrap();
        assert!(matches!(first.snapshot().await, Err(MusicError::NotConnected)));

        let second = registry.get_or_create(guild_id);

        assert_ne!(first.session_id(), second.session_id());
        assert_eq!(constructed.load(Ordering::SeqCst), 2);
        assert!(second.snapshot().await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_deregistration_keeps_newer_session() {
        let (registry, _) = counting_registry();
        let guild_id = GuildId::new(4);
        let old = registry.get_or_create(guild_id);
        registry.remove(guild_id);
        let newer = registry.get_or_create(guild_id);

        Deregistration {
            sessions: Arc::downgrade(&registry.sessions),
            guild_id,
            session_id: old.session_id(),
        }
        .run();

        assert_eq!(
            registry.get(guild_id).map(|h| h.session_id()),
            Some(newer.session_id())
        );
    }
}
