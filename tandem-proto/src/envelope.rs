//! Realtime channel envelopes.
//!
//! Every frame on the WebSocket is a JSON text frame of the form
//! `{ "type": <snake_case name>, "data": <payload> }`. Server-to-client
//! frames decode into [`InboundEvent`]; client-to-server frames are
//! [`OutboundEvent`].

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, Message};
use crate::presence::{DeletedNotice, PresenceNotice, ReadReceipt};
use crate::typing::{TypingNotice, TypingUpdate};

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A message was posted to a conversation the user takes part in.
    NewMessage(Message),
    /// The other participant read one or all of the user's messages.
    MessageRead(ReadReceipt),
    /// Another user started (or refreshed) typing.
    Typing(TypingNotice),
    /// Another user stopped typing.
    StopTyping(TypingNotice),
    /// A user came online.
    UserOnline(PresenceNotice),
    /// A user went offline.
    UserOffline(PresenceNotice),
    /// A message was retracted by its author.
    MessageDeleted(DeletedNotice),
}

impl InboundEvent {
    /// Returns the wire `type` of this frame.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::MessageRead(_) => "message_read",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop_typing",
            Self::UserOnline(_) => "user_online",
            Self::UserOffline(_) => "user_offline",
            Self::MessageDeleted(_) => "message_deleted",
        }
    }
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// The local user is typing.
    Typing(TypingUpdate),
    /// The local user stopped typing.
    StopTyping(TypingUpdate),
}

impl OutboundEvent {
    /// Builds a `typing` frame for `conversation_id`.
    #[must_use]
    pub const fn typing(conversation_id: ConversationId) -> Self {
        Self::Typing(TypingUpdate {
            conversation_id,
            is_typing: true,
        })
    }

    /// Builds a `stop_typing` frame for `conversation_id`.
    #[must_use]
    pub const fn stop_typing(conversation_id: ConversationId) -> Self {
        Self::StopTyping(TypingUpdate {
            conversation_id,
            is_typing: false,
        })
    }

    /// Returns the wire `type` of this frame.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop_typing",
        }
    }

    /// Returns the conversation this frame refers to.
    #[must_use]
    pub const fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::Typing(update) | Self::StopTyping(update) => &update.conversation_id,
        }
    }
}
