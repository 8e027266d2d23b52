//! Request and response bodies of the message store REST contract.
//!
//! | Operation | Route | Body | Response |
//! |---|---|---|---|
//! | history | `GET /conversations/{id}/messages?limit&offset` | none | [`HistoryResponse`] |
//! | post | `POST /conversations/{id}/messages` | [`PostMessageRequest`] | [`Message`] |
//! | mark read | `PUT /conversations/{id}/messages/read` | none | 204 |
//! | status | `PUT /messages/{id}/status` | [`StatusUpdateRequest`] | 204 |
//! | delete | `DELETE /messages/{id}` | none | 204 |

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageStatus, MessageType, UserId};

/// Response of the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResponse {
    /// A page of messages, oldest first.
    pub messages: Vec<Message>,
}

/// Query parameters of the history endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Page size.
    pub limit: usize,
    /// Number of newest messages to skip.
    pub offset: usize,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Body of the post-message endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMessageRequest {
    /// Message body.
    pub content: String,
    /// Kind of content.
    #[serde(default)]
    pub message_type: MessageType,
}

/// Body of the status-update endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    /// The requested status.
    pub status: MessageStatus,
}

/// Body of the dev server's create-conversation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    /// The two participants.
    pub participant_ids: [UserId; 2],
}
