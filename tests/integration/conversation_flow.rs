// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::significant_drop_tightening
)]

//! End-to-end conversation between two live sessions.
//!
//! Two [`ConversationSession`]s (ana and ben) talk through an in-process dev
//! server over real HTTP and WebSocket connections:
//! 1. ana sends "Hola"; ben's session receives it over the socket.
//! 2. ana's copy is promoted to delivered shortly after it is shown.
//! 3. ben sees it; ana receives the read receipt.
//! 4. ana unsends it inside the window; it leaves both lists.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use tandem::session::{ConversationSession, RemovalReason, SessionConfig, SessionEvent};
use tandem::status::visibility::VisibilityEntry;
use tandem::store::http::HttpMessageStore;
use tandem::transport::ConnectionState;
use tandem::transport::reconnect::ReconnectPolicy;
use tandem::transport::websocket::{ChannelConfig, WsChannel};
use tandem_devserver::DevState;
use tandem_proto::message::{ConversationId, MessageStatus, UserId};

type Session = ConversationSession<HttpMessageStore, WsChannel>;

// =============================================================================
// Helpers
// =============================================================================

async fn start_backend() -> (std::net::SocketAddr, Arc<DevState>, ConversationId) {
    let state = Arc::new(DevState::new());
    let conversation = state
        .create_conversation(UserId::new("ana"), UserId::new("ben"))
        .await
        .unwrap();
    let (addr, _handle) = tandem_devserver::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start dev server");
    (addr, state, conversation.id)
}

/// Start a session for `user` and wait until its socket is open.
async fn open_session(
    addr: std::net::SocketAddr,
    backend: &DevState,
    conversation: &ConversationId,
    user: &str,
    config: SessionConfig,
) -> (Arc<Session>, broadcast::Receiver<SessionEvent>) {
    let store = HttpMessageStore::new(
        &format!("http://{addr}"),
        Arc::new(user.to_string()),
        Duration::from_secs(5),
    )
    .unwrap();

    let mut channel_config = ChannelConfig::new(format!("ws://{addr}/ws"));
    channel_config.token = Some(user.to_string());
    channel_config.reconnect = ReconnectPolicy::Fixed {
        delay: Duration::from_millis(100),
    };
    let (channel, channel_events) = WsChannel::new(channel_config);
    let channel = Arc::new(channel);

    let session = Arc::new(ConversationSession::start(
        conversation.clone(),
        UserId::new(user),
        Arc::new(store),
        Arc::clone(&channel),
        channel_events,
        config,
    ));
    let mut events = session.subscribe();
    channel.connect();
    wait_for_event(&mut events, "connection open", |e| {
        matches!(e, SessionEvent::Connection(ConnectionState::Open))
    })
    .await;
    wait_registered(backend, user).await;
    (session, events)
}

/// The client sees the socket open before the server has registered it.
async fn wait_registered(backend: &DevState, user: &str) {
    let user = UserId::new(user);
    for _ in 0..100 {
        if backend.is_online(&user).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{user} never registered with the server");
}

/// Wait for a session event matching a predicate, skipping others.
async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<SessionEvent>,
    description: &str,
    pred: F,
) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) if pred(&event) => return event,
            Ok(Ok(_) | Err(broadcast::error::RecvError::Lagged(_))) => {}
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                panic!("event stream closed while waiting for {description}")
            }
            Err(_) => panic!("timeout waiting for {description}"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn hola_is_delivered_read_and_unsent() {
    let (addr, state, conv) = start_backend().await;
    let (ana, mut ana_events) = open_session(addr, &state, &conv, "ana", SessionConfig::default()).await;
    let (ben, mut ben_events) = open_session(addr, &state, &conv, "ben", SessionConfig::default()).await;

    // 1. ana sends; ben receives it over the socket.
    let hola = ana.send_message("Hola").await.unwrap();
    assert_eq!(hola.status, MessageStatus::Sent);
    assert!(ana.unsend_remaining(&hola.id).is_some());

    let received = wait_for_event(&mut ben_events, "new message", |e| {
        matches!(e, SessionEvent::MessageAdded(m) if m.id == hola.id)
    })
    .await;
    let SessionEvent::MessageAdded(received) = received else {
        unreachable!()
    };
    assert_eq!(received.content, "Hola");
    assert_eq!(ben.messages().len(), 1);

    // 2. ana's copy is promoted to delivered.
    wait_for_event(&mut ana_events, "delivered", |e| {
        matches!(e, SessionEvent::StatusChanged(c)
            if c.message_id == hola.id && c.status == MessageStatus::Delivered)
    })
    .await;

    // 3. ben sees it; ana hears the receipt.
    let read = ben
        .observe_visibility(&[VisibilityEntry::new(hola.id.clone(), 0.8)])
        .await;
    assert_eq!(read, vec![hola.id.clone()]);
    wait_for_event(&mut ana_events, "read receipt", |e| {
        matches!(e, SessionEvent::StatusChanged(c)
            if c.message_id == hola.id && c.status == MessageStatus::Read)
    })
    .await;
    assert_eq!(ana.status_of(&hola.id), Some(MessageStatus::Read));
    assert_eq!(
        state.message(&hola.id).await.unwrap().status,
        MessageStatus::Read
    );

    // Seeing it again does not send another update.
    assert!(
        ben.observe_visibility(&[VisibilityEntry::new(hola.id.clone(), 1.0)])
            .await
            .is_empty()
    );

    // 4. ana unsends inside the window; both lists drop it.
    let left = ana.unsend_remaining(&hola.id).unwrap();
    assert!(left > Duration::ZERO && left <= Duration::from_secs(5));
    assert!(ana.unsend(&hola.id).await);
    assert!(ana.messages().is_empty());
    assert!(state.message(&hola.id).await.is_none());

    let removed = wait_for_event(&mut ben_events, "removal", |e| {
        matches!(e, SessionEvent::MessageRemoved { message_id, .. } if *message_id == hola.id)
    })
    .await;
    assert_eq!(
        removed,
        SessionEvent::MessageRemoved {
            message_id: hola.id.clone(),
            reason: RemovalReason::Deleted,
        }
    );
    assert!(ben.messages().is_empty());

    // A second unsend does nothing.
    assert!(!ana.unsend(&hola.id).await);
}

#[tokio::test]
async fn below_threshold_visibility_does_not_mark_read() {
    let (addr, state, conv) = start_backend().await;
    let (ana, _ana_events) = open_session(addr, &state, &conv, "ana", SessionConfig::default()).await;
    let (ben, mut ben_events) = open_session(addr, &state, &conv, "ben", SessionConfig::default()).await;

    let hola = ana.send_message("Hola").await.unwrap();
    wait_for_event(&mut ben_events, "new message", |e| {
        matches!(e, SessionEvent::MessageAdded(m) if m.id == hola.id)
    })
    .await;

    let read = ben
        .observe_visibility(&[VisibilityEntry::new(hola.id.clone(), 0.3)])
        .await;
    assert!(read.is_empty());
    assert_ne!(
        state.message(&hola.id).await.unwrap().status,
        MessageStatus::Read
    );

    // Once it scrolls into view it is read.
    let read = ben
        .observe_visibility(&[VisibilityEntry::new(hola.id.clone(), 0.5)])
        .await;
    assert_eq!(read, vec![hola.id]);
}

#[tokio::test]
async fn unsend_window_closes() {
    let (addr, state, conv) = start_backend().await;
    let config = SessionConfig {
        unsend_timeout: Duration::from_millis(300),
        ..SessionConfig::default()
    };
    let (ana, _ana_events) = open_session(addr, &state, &conv, "ana", config).await;

    let hola = ana.send_message("Hola").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(ana.unsend_remaining(&hola.id).is_none());
    assert!(!ana.unsend(&hola.id).await);
    assert_eq!(ana.messages().len(), 1);
}

#[tokio::test]
async fn history_is_merged_in_order_without_duplicates() {
    let (addr, state, conv) = start_backend().await;
    let (ana, _ana_events) = open_session(addr, &state, &conv, "ana", SessionConfig::default()).await;
    for text in ["uno", "dos", "tres"] {
        ana.send_message(text).await.unwrap();
    }

    let config = SessionConfig {
        page_size: 2,
        ..SessionConfig::default()
    };
    let (ben, _ben_events) = open_session(addr, &state, &conv, "ben", config).await;
    let newest = ben.refresh().await.unwrap();
    assert_eq!(newest.len(), 2);

    let older = ben.load_history(2, 2).await.unwrap();
    assert_eq!(older.len(), 1);

    // Reloading the newest page adds nothing new.
    ben.refresh().await.unwrap();
    let contents: Vec<_> = ben.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, ["uno", "dos", "tres"]);
}

#[tokio::test]
async fn invalid_content_is_rejected_before_the_store() {
    let (addr, state, conv) = start_backend().await;
    let (ana, _ana_events) = open_session(addr, &state, &conv, "ana", SessionConfig::default()).await;

    assert!(ana.send_message("   ").await.is_err());
    assert!(ana.messages().is_empty());
    assert!(
        state
            .history(&conv, &UserId::new("ana"), 10, 0)
            .await
            .unwrap()
            .is_empty()
    );
}
