// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the realtime channel's reconnect behaviour against
//! the dev server.
//!
//! ## Disconnect simulation
//!
//! [`DevState::close_all_connections`] sends a Close frame without a status
//! code to every socket, which the client treats as abnormal. Aborting the
//! server task additionally drops the listener so reconnect attempts fail.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use tandem::transport::reconnect::{BackoffConfig, ReconnectPolicy};
use tandem::transport::websocket::{ChannelConfig, WsChannel};
use tandem::transport::{ChannelEvent, ConnectionState, Transport};
use tandem_devserver::DevState;
use tandem_proto::envelope::{InboundEvent, OutboundEvent};
use tandem_proto::message::{ConversationId, UserId};

// =============================================================================
// Helpers
// =============================================================================

async fn start_backend() -> (
    std::net::SocketAddr,
    Arc<DevState>,
    ConversationId,
    tokio::task::JoinHandle<()>,
) {
    let state = Arc::new(DevState::new());
    let conversation = state
        .create_conversation(UserId::new("ana"), UserId::new("ben"))
        .await
        .unwrap();
    let (addr, handle) = tandem_devserver::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start dev server");
    (addr, state, conversation.id, handle)
}

fn channel_for(
    addr: std::net::SocketAddr,
    user: &str,
    reconnect: ReconnectPolicy,
) -> (WsChannel, mpsc::UnboundedReceiver<ChannelEvent>) {
    let mut config = ChannelConfig::new(format!("ws://{addr}/ws"));
    config.token = Some(user.to_string());
    config.connect_timeout = Duration::from_secs(2);
    config.reconnect = reconnect;
    WsChannel::new(config)
}

fn fixed(ms: u64) -> ReconnectPolicy {
    ReconnectPolicy::Fixed {
        delay: Duration::from_millis(ms),
    }
}

/// Wait for a channel event matching a predicate, skipping others.
async fn wait_for_event<F>(
    rx: &mut mpsc::UnboundedReceiver<ChannelEvent>,
    description: &str,
    pred: F,
) -> ChannelEvent
where
    F: Fn(&ChannelEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(event)) if pred(&event) => return event,
            Ok(Some(_)) => {}
            Ok(None) => panic!("channel closed while waiting for {description}"),
            Err(_) => panic!("timeout waiting for {description}"),
        }
    }
}

async fn wait_for_open(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) {
    wait_for_event(rx, "open", |e| {
        matches!(e, ChannelEvent::State(ConnectionState::Open))
    })
    .await;
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn reconnects_after_server_closes_without_status() {
    let (addr, state, _conv, _handle) = start_backend().await;
    let (channel, mut events) = channel_for(addr, "ana", fixed(100));
    channel.connect();
    wait_for_open(&mut events).await;

    state.close_all_connections().await;

    wait_for_event(&mut events, "closed", |e| {
        matches!(e, ChannelEvent::State(ConnectionState::Closed))
    })
    .await;
    let scheduled = wait_for_event(&mut events, "reconnect scheduled", |e| {
        matches!(e, ChannelEvent::ReconnectScheduled { .. })
    })
    .await;
    assert_eq!(
        scheduled,
        ChannelEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_millis(100),
        }
    );
    wait_for_open(&mut events).await;
    assert_eq!(channel.state(), ConnectionState::Open);
}

#[tokio::test]
async fn frames_flow_again_after_reconnect() {
    let (addr, state, conv, _handle) = start_backend().await;
    let (ana, mut ana_events) = channel_for(addr, "ana", fixed(100));
    let (ben, mut ben_events) = channel_for(addr, "ben", fixed(100));
    ana.connect();
    ben.connect();
    wait_for_open(&mut ana_events).await;
    wait_for_open(&mut ben_events).await;

    state.close_all_connections().await;
    wait_for_event(&mut ana_events, "ana reconnect", |e| {
        matches!(e, ChannelEvent::ReconnectScheduled { .. })
    })
    .await;
    wait_for_open(&mut ana_events).await;
    wait_for_open(&mut ben_events).await;
    // Let the server register the new sockets.
    tokio::time::sleep(Duration::from_millis(200)).await;

    ana.send(&OutboundEvent::typing(conv.clone())).unwrap();
    let frame = wait_for_event(&mut ben_events, "typing frame", |e| {
        matches!(e, ChannelEvent::Inbound(InboundEvent::Typing(_)))
    })
    .await;
    let ChannelEvent::Inbound(InboundEvent::Typing(notice)) = frame else {
        unreachable!()
    };
    assert_eq!(notice.user_id, UserId::new("ana"));
    assert_eq!(notice.conversation_id, conv);
}

#[tokio::test]
async fn backoff_gives_up_when_server_is_gone() {
    let (addr, state, _conv, handle) = start_backend().await;
    let policy = ReconnectPolicy::Backoff(BackoffConfig {
        initial: Duration::from_millis(50),
        max: Duration::from_millis(200),
        multiplier: 2.0,
        jitter: 0.0,
        max_attempts: Some(2),
    });
    let (channel, mut events) = channel_for(addr, "ana", policy);
    channel.connect();
    wait_for_open(&mut events).await;

    // Stop accepting, then drop the live socket.
    handle.abort();
    let _ = handle.await;
    state.close_all_connections().await;

    let gave_up = wait_for_event(&mut events, "give up", |e| {
        matches!(e, ChannelEvent::ReconnectGaveUp { .. })
    })
    .await;
    assert_eq!(gave_up, ChannelEvent::ReconnectGaveUp { attempts: 2 });
    assert_eq!(channel.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn disconnect_is_final() {
    let (addr, state, _conv, _handle) = start_backend().await;
    let (channel, mut events) = channel_for(addr, "ana", fixed(50));
    channel.connect();
    wait_for_open(&mut events).await;

    channel.disconnect();
    assert_eq!(channel.state(), ConnectionState::Closed);

    tokio::time::sleep(Duration::from_millis(300)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event,
                ChannelEvent::ReconnectScheduled { .. } | ChannelEvent::State(ConnectionState::Open)
            ),
            "unexpected {event:?} after disconnect"
        );
    }
    assert_eq!(state.connection_count().await, 0);
    assert!(!state.is_online(&UserId::new("ana")).await);
}

#[tokio::test]
async fn send_while_closed_is_rejected() {
    let (addr, _state, conv, _handle) = start_backend().await;
    let (channel, _events) = channel_for(addr, "ana", fixed(50));

    let err = channel.send(&OutboundEvent::typing(conv)).unwrap_err();
    assert!(err.to_string().contains("closed"), "{err}");
}
