//! In-process message store for tests and offline use.
//!
//! Behaves like the REST store for a single caller: messages get
//! server-style ids and timestamps, status only moves forward, and only the
//! author can delete. Every call is recorded, and failures can be injected
//! per operation to exercise rollback paths.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use tandem_proto::message::{
    ConversationId, Message, MessageId, MessageStatus, MessageType, UserId,
};

use super::{MessageStore, StoreError};

/// Store operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// [`MessageStore::fetch_history`].
    FetchHistory,
    /// [`MessageStore::post_message`].
    PostMessage,
    /// [`MessageStore::mark_conversation_read`].
    MarkConversationRead,
    /// [`MessageStore::set_message_status`].
    SetMessageStatus,
    /// [`MessageStore::delete_message`].
    DeleteMessage,
}

/// One recorded call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// History fetch.
    FetchHistory {
        /// Conversation fetched.
        conversation_id: ConversationId,
        /// Page size.
        limit: usize,
        /// Newest messages skipped.
        offset: usize,
    },
    /// New message.
    PostMessage {
        /// Target conversation.
        conversation_id: ConversationId,
        /// Message body.
        content: String,
    },
    /// Conversation-wide read mark.
    MarkConversationRead {
        /// Conversation marked.
        conversation_id: ConversationId,
    },
    /// Single status update.
    SetMessageStatus {
        /// Message updated.
        message_id: MessageId,
        /// Requested status.
        status: MessageStatus,
    },
    /// Deletion.
    DeleteMessage {
        /// Message deleted.
        message_id: MessageId,
    },
}

impl StoreCall {
    /// Returns the operation this call belongs to.
    #[must_use]
    pub const fn op(&self) -> StoreOp {
        match self {
            Self::FetchHistory { .. } => StoreOp::FetchHistory,
            Self::PostMessage { .. } => StoreOp::PostMessage,
            Self::MarkConversationRead { .. } => StoreOp::MarkConversationRead,
            Self::SetMessageStatus { .. } => StoreOp::SetMessageStatus,
            Self::DeleteMessage { .. } => StoreOp::DeleteMessage,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    /// All messages in insertion order.
    messages: Vec<Message>,
    calls: Vec<StoreCall>,
    /// Remaining injected failures per operation.
    failures: HashMap<StoreOp, usize>,
    next_id: u64,
}

/// In-memory [`MessageStore`] acting on behalf of one user.
pub struct InMemoryStore {
    current_user: UserId,
    latency: Mutex<Duration>,
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    /// Creates an empty store for `current_user`.
    pub fn new(current_user: impl Into<UserId>) -> Self {
        Self {
            current_user: current_user.into(),
            latency: Mutex::new(Duration::ZERO),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Adds a message as if someone had posted it earlier.
    pub fn seed(&self, message: Message) {
        self.state.lock().messages.push(message);
    }

    /// Makes the next `count` calls of `op` fail with HTTP 500.
    pub fn fail_next(&self, op: StoreOp, count: usize) {
        self.state.lock().failures.insert(op, count);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Returns every call made so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().calls.clone()
    }

    /// Returns how many calls of `op` were made.
    #[must_use]
    pub fn count(&self, op: StoreOp) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    /// Returns the stored copy of a message.
    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.state
            .lock()
            .messages
            .iter()
            .find(|m| &m.id == id)
            .cloned()
    }

    /// Records `call` and consumes an injected failure for its operation.
    async fn enter(&self, call: StoreCall) -> Result<(), StoreError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let op = call.op();
        let mut state = self.state.lock();
        state.calls.push(call);
        if let Some(remaining) = state.failures.get_mut(&op)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(StoreError::Http {
                status: 500,
                body: format!("injected {op:?} failure"),
            });
        }
        Ok(())
    }
}

impl MessageStore for InMemoryStore {
    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.enter(StoreCall::FetchHistory {
            conversation_id: conversation_id.clone(),
            limit,
            offset,
        })
        .await?;

        let state = self.state.lock();
        let mut matching: Vec<&Message> = state
            .messages
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .collect();
        matching.sort_by_key(|m| m.created_at);
        let end = matching.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        Ok(matching[start..end].iter().map(|m| (*m).clone()).collect())
    }

    async fn post_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> Result<Message, StoreError> {
        self.enter(StoreCall::PostMessage {
            conversation_id: conversation_id.clone(),
            content: content.to_string(),
        })
        .await?;

        let mut state = self.state.lock();
        state.next_id += 1;
        let message = Message {
            id: MessageId::new(format!("mem-{}", state.next_id)),
            conversation_id: conversation_id.clone(),
            sender_id: self.current_user.clone(),
            content: content.to_string(),
            message_type: MessageType::Text,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
        };
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), StoreError> {
        self.enter(StoreCall::MarkConversationRead {
            conversation_id: conversation_id.clone(),
        })
        .await?;

        let mut state = self.state.lock();
        for message in state
            .messages
            .iter_mut()
            .filter(|m| &m.conversation_id == conversation_id && m.sender_id != self.current_user)
        {
            message.status.advance(MessageStatus::Read);
        }
        Ok(())
    }

    async fn set_message_status(
        &self,
        message_id: &MessageId,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        self.enter(StoreCall::SetMessageStatus {
            message_id: message_id.clone(),
            status,
        })
        .await?;

        let mut state = self.state.lock();
        let message = state
            .messages
            .iter_mut()
            .find(|m| &m.id == message_id)
            .ok_or_else(|| StoreError::Http {
                status: 404,
                body: format!("message {message_id} not found"),
            })?;
        message.status.advance(status);
        Ok(())
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<(), StoreError> {
        self.enter(StoreCall::DeleteMessage {
            message_id: message_id.clone(),
        })
        .await?;

        let mut state = self.state.lock();
        let Some(index) = state.messages.iter().position(|m| &m.id == message_id) else {
            return Err(StoreError::Http {
                status: 404,
                body: format!("message {message_id} not found"),
            });
        };
        if state.messages[index].sender_id != self.current_user {
            return Err(StoreError::Http {
                status: 403,
                body: "only the author can delete a message".into(),
            });
        }
        state.messages.remove(index);
        Ok(())
    }
}
