//! Typing indicator payloads for real-time keystroke status.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, UserId};

/// Typing update sent by the local client.
///
/// The server stamps the sender's identity when fanning it out, so the
/// outbound form carries no user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingUpdate {
    /// Conversation where typing is occurring.
    pub conversation_id: ConversationId,
    /// Whether the user is currently typing (`true`) or stopped (`false`).
    pub is_typing: bool,
}

/// Typing signal received from the server about another user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    /// Conversation where typing is occurring.
    pub conversation_id: ConversationId,
    /// The user who is typing (or stopped typing).
    pub user_id: UserId,
    /// Whether the user is currently typing.
    ///
    /// Older servers omit this field on `typing` frames; the frame type is
    /// authoritative when it is missing.
    #[serde(default = "default_is_typing")]
    pub is_typing: bool,
}

const fn default_is_typing() -> bool {
    true
}
