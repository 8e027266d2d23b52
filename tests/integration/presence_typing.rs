// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for typing indicators and presence over the dev server.
//!
//! Verifies:
//! 1. A keystroke on one side shows the user as typing on the other.
//! 2. Explicit stop, inactivity, and sending a message all clear it.
//! 3. Presence follows the other participant's socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use tandem::session::{ConversationSession, SessionConfig, SessionEvent};
use tandem::store::http::HttpMessageStore;
use tandem::transport::ConnectionState;
use tandem::transport::websocket::{ChannelConfig, WsChannel};
use tandem::typing::TypingConfig;
use tandem_devserver::DevState;
use tandem_proto::message::{ConversationId, UserId};
use tandem_proto::presence::PresenceStatus;

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

/// Short typing timings so inactivity fits in a test.
fn fast_typing() -> SessionConfig {
    SessionConfig {
        typing: TypingConfig {
            typing_timeout: Duration::from_millis(300),
            throttle: Duration::from_millis(100),
            ..TypingConfig::default()
        },
        ..SessionConfig::default()
    }
}

async fn open_session(
    addr: std::net::SocketAddr,
    backend: &DevState,
    conversation: &ConversationId,
    user: &str,
) -> (Arc<Session>, broadcast::Receiver<SessionEvent>) {
    let store = HttpMessageStore::new(
        &format!("http://{addr}"),
        Arc::new(user.to_string()),
        Duration::from_secs(5),
    )
    .unwrap();
    let mut channel_config = ChannelConfig::new(format!("ws://{addr}/ws"));
    channel_config.token = Some(user.to_string());
    let (channel, channel_events) = WsChannel::new(channel_config);
    let channel = Arc::new(channel);

    let session = Arc::new(ConversationSession::start(
        conversation.clone(),
        UserId::new(user),
        Arc::new(store),
        Arc::clone(&channel),
        channel_events,
        fast_typing(),
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

fn typing_is(users: &[&str]) -> impl Fn(&SessionEvent) -> bool {
    let expected: Vec<UserId> = users.iter().map(|u| UserId::new(*u)).collect();
    move |e| matches!(e, SessionEvent::TypingChanged(now) if *now == expected)
}

// =============================================================================
// Typing
// =============================================================================

#[tokio::test]
async fn keystroke_shows_typing_and_stop_clears_it() {
    let (addr, state, conv) = start_backend().await;
    let (ana, mut ana_events) = open_session(addr, &state, &conv, "ana").await;
    let (ben, _ben_events) = open_session(addr, &state, &conv, "ben").await;

    ben.keystroke();
    wait_for_event(&mut ana_events, "ben typing", typing_is(&["ben"])).await;
    assert_eq!(ana.typing_users(), vec![UserId::new("ben")]);

    ben.stop_typing();
    wait_for_event(&mut ana_events, "ben stopped", typing_is(&[])).await;
    assert!(ana.typing_users().is_empty());
}

#[tokio::test]
async fn inactivity_ends_typing() {
    let (addr, state, conv) = start_backend().await;
    let (ana, mut ana_events) = open_session(addr, &state, &conv, "ana").await;
    let (ben, mut ben_events) = open_session(addr, &state, &conv, "ben").await;

    ben.keystroke();
    wait_for_event(&mut ben_events, "local typing", |e| {
        matches!(e, SessionEvent::LocalTyping(true))
    })
    .await;
    wait_for_event(&mut ana_events, "ben typing", typing_is(&["ben"])).await;

    // No further keystrokes: the 300 ms inactivity timer ends it.
    wait_for_event(&mut ben_events, "local typing ended", |e| {
        matches!(e, SessionEvent::LocalTyping(false))
    })
    .await;
    wait_for_event(&mut ana_events, "ben stopped", typing_is(&[])).await;
    assert!(ana.typing_users().is_empty());
}

#[tokio::test]
async fn sending_a_message_ends_typing() {
    let (addr, state, conv) = start_backend().await;
    let (_ana, mut ana_events) = open_session(addr, &state, &conv, "ana").await;
    let (ben, _ben_events) = open_session(addr, &state, &conv, "ben").await;

    ben.keystroke();
    wait_for_event(&mut ana_events, "ben typing", typing_is(&["ben"])).await;

    let sent = ben.send_message("¿Qué tal?").await.unwrap();

    // The stop frame and the message travel different paths; accept either order.
    let stopped = typing_is(&[]);
    let (mut saw_stop, mut saw_message) = (false, false);
    while !(saw_stop && saw_message) {
        let event = wait_for_event(&mut ana_events, "stop and message", |e| {
            stopped(e) || matches!(e, SessionEvent::MessageAdded(m) if m.id == sent.id)
        })
        .await;
        if stopped(&event) {
            saw_stop = true;
        } else {
            saw_message = true;
        }
    }
}

// =============================================================================
// Presence
// =============================================================================

#[tokio::test]
async fn presence_follows_the_other_socket() {
    let (addr, state, conv) = start_backend().await;
    let (ana, mut ana_events) = open_session(addr, &state, &conv, "ana").await;
    let ben_id = UserId::new("ben");
    assert_eq!(ana.presence(&ben_id), None);

    let (ben, _ben_events) = open_session(addr, &state, &conv, "ben").await;
    wait_for_event(&mut ana_events, "ben online", |e| {
        matches!(e, SessionEvent::Presence { user_id, status: PresenceStatus::Online } if *user_id == ben_id)
    })
    .await;
    assert!(ana.is_online(&ben_id));

    // The newcomer learns who was already there.
    let ana_id = UserId::new("ana");
    for _ in 0..50 {
        if ben.is_online(&ana_id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(ben.is_online(&ana_id));

    ben.transport().disconnect();
    wait_for_event(&mut ana_events, "ben offline", |e| {
        matches!(e, SessionEvent::Presence { user_id, status: PresenceStatus::Offline } if *user_id == ben_id)
    })
    .await;
    assert_eq!(ana.presence(&ben_id), Some(PresenceStatus::Offline));
}
