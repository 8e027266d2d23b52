//! Shared dev server state: conversations, messages, and live connections.
//!
//! Every mutation that the other participant should hear about is pushed to
//! their open sockets as an [`InboundEvent`] frame. A user may hold several
//! sockets at once; presence flips only on the first connect and the last
//! disconnect.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use axum::extract::ws::Message as WsMessage;
use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use tandem_proto::codec;
use tandem_proto::envelope::{InboundEvent, OutboundEvent};
use tandem_proto::message::{
    Conversation, ConversationId, Message, MessageId, MessageStatus, MessageType, UserId,
    validate_content,
};
use tandem_proto::presence::{DeletedNotice, PresenceNotice, ReadReceipt};
use tandem_proto::typing::TypingNotice;

/// Errors surfaced to REST callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DevError {
    /// No bearer token on the request.
    #[error("missing bearer token")]
    Unauthorized,
    /// Caller is not allowed to touch the resource.
    #[error("{0}")]
    Forbidden(&'static str),
    /// Resource does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),
    /// Failure injected through [`DevState::fail_next_deletes`].
    #[error("injected failure")]
    Injected,
}

/// Handle to one open socket.
pub type ConnectionId = u64;

#[derive(Default)]
struct Data {
    conversations: HashMap<ConversationId, Conversation>,
    /// All messages, in creation order.
    messages: Vec<Message>,
}

/// In-memory backend shared by the REST routes and the socket handler.
#[derive(Default)]
pub struct DevState {
    data: RwLock<Data>,
    connections: RwLock<HashMap<UserId, HashMap<ConnectionId, mpsc::UnboundedSender<WsMessage>>>>,
    next_connection: AtomicU64,
    failing_deletes: AtomicU32,
}

impl DevState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a conversation between two users with a fresh id.
    pub async fn create_conversation(&self, a: UserId, b: UserId) -> Result<Conversation, DevError> {
        if a == b {
            return Err(DevError::BadRequest(
                "a conversation needs two distinct participants".into(),
            ));
        }
        let conversation = Conversation {
            id: ConversationId::new(Uuid::now_v7().to_string()),
            participant_ids: [a, b],
            last_message_at: None,
            unread_count: 0,
        };
        self.insert_conversation(conversation.clone()).await;
        Ok(conversation)
    }

    /// Inserts or replaces a conversation with a caller-chosen id.
    pub async fn insert_conversation(&self, conversation: Conversation) {
        tracing::info!(
            conversation = %conversation.id,
            a = %conversation.participant_ids[0],
            b = %conversation.participant_ids[1],
            "conversation created"
        );
        self.data
            .write()
            .await
            .conversations
            .insert(conversation.id.clone(), conversation);
    }

    /// Looks up a conversation.
    pub async fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.data.read().await.conversations.get(id).cloned()
    }

    /// Looks up a message.
    pub async fn message(&self, id: &MessageId) -> Option<Message> {
        self.data
            .read()
            .await
            .messages
            .iter()
            .find(|m| m.id == *id)
            .cloned()
    }

    /// One page of history, oldest first. `offset` skips the newest messages.
    pub async fn history(
        &self,
        conversation_id: &ConversationId,
        caller: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, DevError> {
        let data = self.data.read().await;
        participant(&data, conversation_id, caller)?;
        let all: Vec<&Message> = data
            .messages
            .iter()
            .filter(|m| m.conversation_id == *conversation_id)
            .collect();
        let end = all.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        Ok(all[start..end].iter().map(|m| (*m).clone()).collect())
    }

    /// Stores a new message and pushes it to the other participant.
    pub async fn post_message(
        &self,
        conversation_id: &ConversationId,
        sender: &UserId,
        content: String,
        message_type: MessageType,
    ) -> Result<Message, DevError> {
        validate_content(&content).map_err(|e| DevError::BadRequest(e.to_string()))?;

        let (message, recipient) = {
            let mut data = self.data.write().await;
            let recipient = participant(&data, conversation_id, sender)?.clone();
            let message = Message {
                id: MessageId::new(Uuid::now_v7().to_string()),
                conversation_id: conversation_id.clone(),
                sender_id: sender.clone(),
                content,
                message_type,
                status: MessageStatus::Sent,
                created_at: Utc::now(),
            };
            if let Some(conversation) = data.conversations.get_mut(conversation_id) {
                conversation.last_message_at = Some(message.created_at);
                conversation.unread_count = conversation.unread_count.saturating_add(1);
            }
            data.messages.push(message.clone());
            (message, recipient)
        };

        tracing::debug!(message = %message.id, conversation = %conversation_id, from = %sender, "message posted");
        self.push(&recipient, &InboundEvent::NewMessage(message.clone()))
            .await;
        Ok(message)
    }

    /// Marks every message the reader received in the conversation as read.
    ///
    /// The author hears a conversation-wide `message_read` if anything moved.
    pub async fn mark_conversation_read(
        &self,
        conversation_id: &ConversationId,
        reader: &UserId,
    ) -> Result<(), DevError> {
        let (changed, author) = {
            let mut data = self.data.write().await;
            let author = participant(&data, conversation_id, reader)?.clone();
            let mut changed = 0usize;
            for message in data
                .messages
                .iter_mut()
                .filter(|m| m.conversation_id == *conversation_id && !m.is_from(reader))
            {
                if message.status.advance(MessageStatus::Read) {
                    changed += 1;
                }
            }
            if let Some(conversation) = data.conversations.get_mut(conversation_id) {
                conversation.unread_count = 0;
            }
            (changed, author)
        };

        tracing::debug!(conversation = %conversation_id, reader = %reader, changed, "conversation read");
        if changed > 0 {
            let receipt = ReadReceipt {
                conversation_id: conversation_id.clone(),
                user_id: reader.clone(),
                message_id: None,
            };
            self.push(&author, &InboundEvent::MessageRead(receipt)).await;
        }
        Ok(())
    }

    /// Moves a message's status forward. Moving to `read` notifies the author.
    pub async fn set_status(
        &self,
        message_id: &MessageId,
        status: MessageStatus,
        caller: &UserId,
    ) -> Result<(), DevError> {
        let receipt = {
            let mut data = self.data.write().await;
            let Some(index) = data.messages.iter().position(|m| m.id == *message_id) else {
                return Err(DevError::NotFound("message"));
            };
            let conversation_id = data.messages[index].conversation_id.clone();
            participant(&data, &conversation_id, caller)?;

            let message = &mut data.messages[index];
            let changed = message.status.advance(status);
            (changed && status == MessageStatus::Read && !message.is_from(caller)).then(|| {
                (
                    message.sender_id.clone(),
                    ReadReceipt {
                        conversation_id,
                        user_id: caller.clone(),
                        message_id: Some(message_id.clone()),
                    },
                )
            })
        };

        if let Some((author, receipt)) = receipt {
            self.push(&author, &InboundEvent::MessageRead(receipt)).await;
        }
        Ok(())
    }

    /// Deletes a message. Only its author may do so.
    pub async fn delete_message(&self, message_id: &MessageId, caller: &UserId) -> Result<(), DevError> {
        if self
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            tracing::warn!(message = %message_id, "delete failed by injection");
            return Err(DevError::Injected);
        }

        let (notice, recipient) = {
            let mut data = self.data.write().await;
            let Some(index) = data.messages.iter().position(|m| m.id == *message_id) else {
                return Err(DevError::NotFound("message"));
            };
            if !data.messages[index].is_from(caller) {
                return Err(DevError::Forbidden("only the author can delete a message"));
            }
            let message = data.messages.remove(index);
            let recipient = participant(&data, &message.conversation_id, caller)?.clone();
            (
                DeletedNotice {
                    conversation_id: message.conversation_id,
                    message_id: message.id,
                },
                recipient,
            )
        };

        tracing::info!(message = %message_id, by = %caller, "message deleted");
        self.push(&recipient, &InboundEvent::MessageDeleted(notice))
            .await;
        Ok(())
    }

    /// Makes the next `count` deletes fail with a server error.
    pub fn fail_next_deletes(&self, count: u32) {
        self.failing_deletes.store(count, Ordering::SeqCst);
    }

    /// Registers a socket for `user`.
    ///
    /// The first socket of a user announces them online to everyone they
    /// share a conversation with, and learns who of those is already online.
    pub async fn connect(&self, user: &UserId) -> (ConnectionId, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let first = {
            let mut connections = self.connections.write().await;
            let sockets = connections.entry(user.clone()).or_default();
            sockets.insert(id, tx.clone());
            sockets.len() == 1
        };
        tracing::info!(user = %user, connection = id, first, "socket connected");

        if first {
            let peers = self.peers_of(user).await;
            for peer in &peers {
                if self.is_online(peer).await {
                    send_frame(
                        &tx,
                        &InboundEvent::UserOnline(PresenceNotice {
                            user_id: peer.clone(),
                        }),
                    );
                    self.push(
                        peer,
                        &InboundEvent::UserOnline(PresenceNotice {
                            user_id: user.clone(),
                        }),
                    )
                    .await;
                }
            }
        }
        (id, rx)
    }

    /// Removes a socket. The last socket of a user announces them offline.
    pub async fn disconnect(&self, user: &UserId, connection: ConnectionId) {
        let last = {
            let mut connections = self.connections.write().await;
            let Some(sockets) = connections.get_mut(user) else {
                return;
            };
            if sockets.remove(&connection).is_none() {
                return;
            }
            let last = sockets.is_empty();
            if last {
                connections.remove(user);
            }
            last
        };
        tracing::info!(user = %user, connection, last, "socket disconnected");

        if last {
            for peer in self.peers_of(user).await {
                self.push(
                    &peer,
                    &InboundEvent::UserOffline(PresenceNotice {
                        user_id: user.clone(),
                    }),
                )
                .await;
            }
        }
    }

    /// Relays a client typing frame to the other participant, stamped with
    /// the sender's id.
    pub async fn relay_typing(&self, user: &UserId, frame: &OutboundEvent) {
        let conversation_id = frame.conversation_id();
        let recipient = {
            let data = self.data.read().await;
            match participant(&data, conversation_id, user) {
                Ok(other) => other.clone(),
                Err(e) => {
                    tracing::warn!(user = %user, conversation = %conversation_id, err = %e, "typing frame dropped");
                    return;
                }
            }
        };
        let notice = |is_typing| TypingNotice {
            conversation_id: conversation_id.clone(),
            user_id: user.clone(),
            is_typing,
        };
        let event = match frame {
            OutboundEvent::Typing(update) => InboundEvent::Typing(notice(update.is_typing)),
            OutboundEvent::StopTyping(_) => InboundEvent::StopTyping(notice(false)),
        };
        self.push(&recipient, &event).await;
    }

    /// Returns `true` if the user has at least one open socket.
    pub async fn is_online(&self, user: &UserId) -> bool {
        self.connections.read().await.contains_key(user)
    }

    /// Number of open sockets across all users.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.values().map(HashMap::len).sum()
    }

    /// Sends a Close frame without a status code to every open socket.
    pub async fn close_all_connections(&self) {
        let connections = self.connections.read().await;
        for (user, sockets) in connections.iter() {
            tracing::info!(user = %user, sockets = sockets.len(), "closing sockets");
            for sender in sockets.values() {
                let _ = sender.send(WsMessage::Close(None));
            }
        }
    }

    /// Pushes a frame to every socket of `user`. Offline users miss it.
    async fn push(&self, user: &UserId, event: &InboundEvent) {
        let connections = self.connections.read().await;
        let Some(sockets) = connections.get(user) else {
            tracing::debug!(user = %user, kind = event.kind(), "recipient offline, frame dropped");
            return;
        };
        for sender in sockets.values() {
            send_frame(sender, event);
        }
    }

    /// Users sharing at least one conversation with `user`.
    async fn peers_of(&self, user: &UserId) -> HashSet<UserId> {
        self.data
            .read()
            .await
            .conversations
            .values()
            .filter_map(|c| c.other_participant(user).cloned())
            .collect()
    }
}

/// Checks that `user` takes part in the conversation and returns the other
/// participant.
fn participant<'a>(
    data: &'a Data,
    conversation_id: &ConversationId,
    user: &UserId,
) -> Result<&'a UserId, DevError> {
    let conversation = data
        .conversations
        .get(conversation_id)
        .ok_or(DevError::NotFound("conversation"))?;
    conversation
        .other_participant(user)
        .ok_or(DevError::Forbidden("not a participant of this conversation"))
}

fn send_frame(sender: &mpsc::UnboundedSender<WsMessage>, event: &InboundEvent) {
    match codec::encode_inbound(event) {
        Ok(text) => {
            let _ = sender.send(WsMessage::Text(text.into()));
        }
        Err(e) => tracing::error!(err = %e, kind = event.kind(), "failed to encode frame"),
    }
}
