//! Presence and read-receipt payloads.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, MessageId, UserId};

/// Presence status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// User has at least one live connection.
    Online,
    /// User has disconnected.
    Offline,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Payload of `user_online` / `user_offline` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceNotice {
    /// The user whose presence changed.
    pub user_id: UserId,
}

/// Payload of a `message_read` frame.
///
/// Sent to a message's author when the other participant reads it. When
/// `message_id` is absent the whole conversation was marked read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// Conversation the receipt applies to.
    pub conversation_id: ConversationId,
    /// The reader.
    pub user_id: UserId,
    /// The specific message read, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
}

/// Payload of a `message_deleted` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedNotice {
    /// Conversation the message belonged to.
    pub conversation_id: ConversationId,
    /// The retracted message.
    pub message_id: MessageId,
}
