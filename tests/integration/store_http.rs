// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the REST message store client.
//!
//! Runs [`HttpMessageStore`] against an in-process dev server and checks the
//! contract the sync layer relies on:
//! - history pages are oldest first and `offset` skips the newest messages
//! - status updates never move backwards
//! - only the author can delete, and errors keep their HTTP status
//! - missing tokens and unreachable servers map to distinct errors

use std::sync::Arc;
use std::time::Duration;

use tandem::store::http::HttpMessageStore;
use tandem::store::{MessageStore, StoreError};
use tandem_devserver::DevState;
use tandem_proto::message::{ConversationId, MessageId, MessageStatus, UserId};

// =============================================================================
// Helpers
// =============================================================================

/// Start a dev server with one ana/ben conversation.
async fn start_backend() -> (String, Arc<DevState>, ConversationId) {
    let state = Arc::new(DevState::new());
    let conversation = state
        .create_conversation(UserId::new("ana"), UserId::new("ben"))
        .await
        .unwrap();
    let (addr, _handle) = tandem_devserver::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start dev server");
    (format!("http://{addr}"), state, conversation.id)
}

fn store_for(base: &str, user: &str) -> HttpMessageStore {
    HttpMessageStore::new(base, Arc::new(user.to_string()), Duration::from_secs(5)).unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn history_pages_oldest_first_from_the_newest_end() {
    let (base, _state, conv) = start_backend().await;
    let ana = store_for(&base, "ana");

    let mut sent = Vec::new();
    for text in ["uno", "dos", "tres", "cuatro"] {
        sent.push(ana.post_message(&conv, text).await.unwrap());
    }
    assert!(sent.iter().all(|m| m.status == MessageStatus::Sent));
    assert!(sent.iter().all(|m| m.sender_id == UserId::new("ana")));

    let latest = ana.fetch_history(&conv, 2, 0).await.unwrap();
    let contents: Vec<_> = latest.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["tres", "cuatro"]);

    let older = ana.fetch_history(&conv, 2, 2).await.unwrap();
    let contents: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["uno", "dos"]);

    assert!(ana.fetch_history(&conv, 2, 4).await.unwrap().is_empty());
}

#[tokio::test]
async fn recipient_moves_status_forward_only() {
    let (base, state, conv) = start_backend().await;
    let ana = store_for(&base, "ana");
    let ben = store_for(&base, "ben");

    let message = ana.post_message(&conv, "Hola").await.unwrap();
    ben.set_message_status(&message.id, MessageStatus::Read)
        .await
        .unwrap();
    ben.set_message_status(&message.id, MessageStatus::Delivered)
        .await
        .unwrap();

    assert_eq!(
        state.message(&message.id).await.unwrap().status,
        MessageStatus::Read
    );
}

#[tokio::test]
async fn mark_conversation_read_covers_received_messages_only() {
    let (base, _state, conv) = start_backend().await;
    let ana = store_for(&base, "ana");
    let ben = store_for(&base, "ben");

    ana.post_message(&conv, "Hola").await.unwrap();
    ben.post_message(&conv, "¡Hola!").await.unwrap();
    ben.mark_conversation_read(&conv).await.unwrap();

    let page = ana.fetch_history(&conv, 10, 0).await.unwrap();
    let ana_msg = page.iter().find(|m| m.content == "Hola").unwrap();
    let ben_msg = page.iter().find(|m| m.content == "¡Hola!").unwrap();
    assert_eq!(ana_msg.status, MessageStatus::Read);
    assert_eq!(ben_msg.status, MessageStatus::Sent);
}

#[tokio::test]
async fn delete_is_author_only_and_keeps_status_codes() {
    let (base, state, conv) = start_backend().await;
    let ana = store_for(&base, "ana");
    let ben = store_for(&base, "ben");
    let message = ana.post_message(&conv, "Hola").await.unwrap();

    let err = ben.delete_message(&message.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Http { status: 403, .. }), "{err:?}");

    ana.delete_message(&message.id).await.unwrap();
    assert!(state.message(&message.id).await.is_none());

    let err = ana.delete_message(&message.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Http { status: 404, .. }), "{err:?}");
}

#[tokio::test]
async fn outsider_cannot_post() {
    let (base, _state, conv) = start_backend().await;
    let eve = store_for(&base, "eve");

    let err = eve.post_message(&conv, "hola").await.unwrap_err();
    assert!(matches!(err, StoreError::Http { status: 403, .. }), "{err:?}");

    let err = eve
        .fetch_history(&ConversationId::new("no-such-conversation"), 10, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Http { status: 404, .. }), "{err:?}");
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let (base, _state, conv) = start_backend().await;
    let anonymous =
        HttpMessageStore::new(&base, Arc::new(None::<String>), Duration::from_secs(5)).unwrap();

    let err = anonymous.fetch_history(&conv, 10, 0).await.unwrap_err();
    assert_eq!(err, StoreError::Unauthorized);
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = store_for(&format!("http://{addr}"), "ana");
    let err = store
        .set_message_status(&MessageId::new("m-1"), MessageStatus::Read)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Network(_)), "{err:?}");
}
