//! Message and conversation types for the Tandem wire format.
//!
//! These are the JSON shapes exchanged with the message store over REST and
//! carried inside `new_message` frames on the realtime channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum allowed message content size in bytes (64 KB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Declares a string-backed identifier newtype.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from its string form.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the string form of this identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Server-assigned identifier of a message.
    MessageId
);

string_id!(
    /// Identifier of a one-to-one conversation.
    ConversationId
);

string_id!(
    /// Identifier of a user (message sender, typing peer, participant).
    UserId
);

/// Delivery lifecycle of a message.
///
/// Variants are declared in lifecycle order so the derived `Ord` gives
/// `Sent < Delivered < Read`. Status only ever moves forward; use
/// [`MessageStatus::advance`] rather than assigning directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Accepted by the store.
    Sent,
    /// Rendered on the recipient side.
    Delivered,
    /// Seen by the recipient.
    Read,
}

impl MessageStatus {
    /// Moves `self` forward to `to` if `to` is later in the lifecycle.
    ///
    /// Returns `true` if the status changed. Moving to the same or an
    /// earlier status is a no-op, which is what keeps every local projection
    /// monotonic. `Sent -> Read` is accepted directly: read subsumes
    /// delivered.
    pub fn advance(&mut self, to: Self) -> bool {
        if to > *self {
            *self = to;
            true
        } else {
            false
        }
    }

    /// Returns the lowercase wire name of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of message content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text.
    #[default]
    Text,
}

/// A chat message as held by the message store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Message body.
    pub content: String,
    /// Kind of content.
    #[serde(default)]
    pub message_type: MessageType,
    /// Current delivery status.
    pub status: MessageStatus,
    /// Creation time assigned by the store.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Returns `true` if `user` authored this message.
    #[must_use]
    pub fn is_from(&self, user: &UserId) -> bool {
        self.sender_id == *user
    }
}

/// A one-to-one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation identifier.
    pub id: ConversationId,
    /// The two participants.
    pub participant_ids: [UserId; 2],
    /// Time of the newest message, if any.
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Unread messages for the requesting user.
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// Returns `true` if `user` takes part in this conversation.
    #[must_use]
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participant_ids.iter().any(|p| p == user)
    }

    /// Returns the participant that is not `user`.
    #[must_use]
    pub fn other_participant(&self, user: &UserId) -> Option<&UserId> {
        if !self.has_participant(user) {
            return None;
        }
        self.participant_ids.iter().find(|p| *p != user)
    }
}

/// Error returned when outgoing content fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty or whitespace only.
    #[error("message content is empty")]
    Empty,
    /// Content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Validates message content before it is posted.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for blank content, or
/// [`ValidationError::TooLarge`] if it exceeds [`MAX_MESSAGE_SIZE`].
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = content.len();
    if size > MAX_MESSAGE_SIZE {
        return Err(ValidationError::TooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}
