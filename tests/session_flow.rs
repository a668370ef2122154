//! End-to-end flows through `MusicService` with fake voice and media.

mod common;

use common::{finish_track, service, FakeResolver, FakeTransport, CHANNEL, GUILD};
use harmony_bot::{
    audio::{session::EnqueueOutcome, session::SessionState, LoopMode, MusicError},
    sources::ResolutionError,
};
use pretty_assertions::assert_eq;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};

#[tokio::test]
async fn queue_drains_in_order_then_goes_idle() {
    let transport = Arc::new(FakeTransport::default());
    let music = service(transport.clone(), FakeResolver::default());
    music.join(GUILD, CHANNEL).await.unwrap();

    let first = music.enqueue(GUILD, "A").await.unwrap();
    assert!(matches!(first, EnqueueOutcome::Playing(ref t) if t.title() == "A"));
    for (query, position) in [("B", 1), ("C", 2)] {
        match music.enqueue(GUILD, query).await.unwrap() {
            EnqueueOutcome::Queued { track, position: p } => {
                assert_eq!(track.title(), query);
                assert_eq!(p, position);
            }
            other => panic!("expected {} to be queued, got {:?}", query, other),
        }
    }

    let connection = transport.connection(GUILD);
    for _ in 0..3 {
        finish_track(&music, &transport, GUILD).await;
    }

    let snapshot = music.queue_snapshot(GUILD).await.unwrap();
    assert_eq!(connection.played(), vec!["A", "B", "C"]);
    assert!(snapshot.current.is_none());
    assert!(snapshot.upcoming.is_empty());
    assert_eq!(snapshot.state, SessionState::Idle);
}

#[tokio::test]
async fn single_loop_repeats_until_turned_off() {
    let transport = Arc::new(FakeTransport::default());
    let music = service(transport.clone(), FakeResolver::default());
    music.join(GUILD, CHANNEL).await.unwrap();

    music.enqueue(GUILD, "A").await.unwrap();
    music.enqueue(GUILD, "B").await.unwrap();
    assert_eq!(music.set_loop_mode(GUILD, "single").await.unwrap(), LoopMode::Single);

    let connection = transport.connection(GUILD);
    finish_track(&music, &transport, GUILD).await;
    finish_track(&music, &transport, GUILD).await;
    music.set_loop_mode(GUILD, "off").await.unwrap();
    finish_track(&music, &transport, GUILD).await;

    let snapshot = music.queue_snapshot(GUILD).await.unwrap();
    assert_eq!(connection.played(), vec!["A", "A", "A", "B"]);
    assert_eq!(snapshot.current.map(|t| t.title().to_string()), Some("B".to_string()));
}

#[tokio::test]
async fn queue_loop_rotates_back_to_the_start() {
    let transport = Arc::new(FakeTransport::default());
    let music = service(transport.clone(), FakeResolver::default());
    music.join(GUILD, CHANNEL).await.unwrap();

    for query in ["A", "B", "C"] {
        music.enqueue(GUILD, query).await.unwrap();
    }
    music.set_loop_mode(GUILD, "QUEUE").await.unwrap();

    let connection = transport.connection(GUILD);
    for _ in 0..3 {
        finish_track(&music, &transport, GUILD).await;
    }

    let snapshot = music.queue_snapshot(GUILD).await.unwrap();
    assert_eq!(connection.played(), vec!["A", "B", "C", "A"]);
    let upcoming: Vec<&str> = snapshot.upcoming.iter().map(|t| t.title()).collect();
    assert_eq!(upcoming, vec!["B", "C"]);
}

#[tokio::test]
async fn failed_resolution_leaves_queue_untouched() {
    let transport = Arc::new(FakeTransport::default());
    let music = service(transport.clone(), FakeResolver::missing(&["nothing here"]));
    music.join(GUILD, CHANNEL).await.unwrap();
    music.enqueue(GUILD, "A").await.unwrap();

    let err = music.enqueue(GUILD, "nothing here").await.unwrap_err();
    assert!(matches!(err, MusicError::Resolution(ResolutionError::NoMatch(_))));

    let snapshot = music.queue_snapshot(GUILD).await.unwrap();
    assert!(snapshot.upcoming.is_empty());
    assert_eq!(snapshot.current.map(|t| t.title().to_string()), Some("A".to_string()));
}

#[tokio::test]
async fn commands_without_a_session_are_rejected() {
    let transport = Arc::new(FakeTransport::default());
    let music = service(transport, FakeResolver::default());

    assert!(matches!(music.enqueue(GUILD, "A").await, Err(MusicError::NotConnected)));
    assert!(matches!(music.skip(GUILD).await, Err(MusicError::NotConnected)));
    assert!(matches!(music.set_volume(GUILD, 150).await, Err(MusicError::InvalidVolume(150))));
    assert!(music.registry().is_empty());
}

#[tokio::test]
async fn refused_voice_connection_is_reported() {
    let transport = Arc::new(FakeTransport::default());
    transport.refuse_connections();
    let music = service(transport, FakeResolver::default());

    let err = music.join(GUILD, CHANNEL).await.unwrap_err();
    assert!(matches!(err, MusicError::VoiceConnect(_)));
    assert!(matches!(music.enqueue(GUILD, "A").await, Err(MusicError::NotConnected)));
}

#[tokio::test]
async fn failed_join_does_not_count_as_connected() {
    let transport = Arc::new(FakeTransport::default());
    transport.refuse_connections();
    let music = service(transport.clone(), FakeResolver::default());
    assert!(music.join(GUILD, CHANNEL).await.is_err());
    transport.accept_connections();

    // What `play` does: join first unless already in voice
    assert!(music.registry().get(GUILD).is_some());
    assert!(!music.is_connected(GUILD).await);
    music.join(GUILD, CHANNEL).await.unwrap();

    let outcome = music.enqueue(GUILD, "A").await.unwrap();
    assert!(matches!(outcome, EnqueueOutcome::Playing(_)));
    assert_eq!(transport.connection(GUILD).played(), vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn enqueue_inside_idle_window_keeps_session() {
    let transport = Arc::new(FakeTransport::default());
    let music = service(transport.clone(), FakeResolver::default());
    music.join(GUILD, CHANNEL).await.unwrap();
    music.enqueue(GUILD, "A").await.unwrap();
    finish_track(&music, &transport, GUILD).await;

    tokio::time::sleep(Duration::from_secs(170)).await;
    music.enqueue(GUILD, "B").await.unwrap();
    finish_track(&music, &transport, GUILD).await;
    tokio::time::sleep(Duration::from_secs(170)).await;

    assert!(music.registry().get(GUILD).is_some());
    assert_eq!(transport.connection(GUILD).disconnects(), 0);
}

#[tokio::test]
async fn guilds_are_independent() {
    let other = GuildId::new(2);
    let transport = Arc::new(FakeTransport::default());
    let music = service(transport.clone(), FakeResolver::default());

    music.join(GUILD, CHANNEL).await.unwrap();
    music.join(other, CHANNEL).await.unwrap();
    music.enqueue(GUILD, "A").await.unwrap();
    music.enqueue(other, "X").await.unwrap();

    music.stop(GUILD).await.unwrap();

    assert!(music.registry().get(GUILD).is_none());
    let snapshot = music.queue_snapshot(other).await.unwrap();
    assert_eq!(snapshot.current.map(|t| t.title().to_string()), Some("X".to_string()));
    assert_eq!(transport.connection(GUILD).disconnects(), 1);
    assert_eq!(transport.connection(other).disconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn idle_session_leaves_once_and_deregisters() {
    let transport = Arc::new(FakeTransport::default());
    let music = service(transport.clone(), FakeResolver::default());
    music.join(GUILD, CHANNEL).await.unwrap();
    music.enqueue(GUILD, "A").await.unwrap();
    finish_track(&music, &transport, GUILD).await;

    tokio::time::sleep(Duration::from_secs(179)).await;
    assert!(music.registry().get(GUILD).is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(music.registry().get(GUILD).is_none());
    assert!(music.registry().is_empty());
    assert_eq!(transport.connection(GUILD).disconnects(), 1);

    // A later join starts a fresh session
    music.join(GUILD, CHANNEL).await.unwrap();
    assert_eq!(music.queue_snapshot(GUILD).await.unwrap().state, SessionState::Idle);
}
