//! Message store abstraction.
//!
//! The message store is the system of record for messages and their status.
//! [`MessageStore`] is the seam the session layer talks through; concrete
//! implementations:
//! - [`http::HttpMessageStore`]: REST client for a real store
//! - [`memory::InMemoryStore`]: in-process store for tests, with call
//!   recording and failure injection

pub mod http;
pub mod memory;

use std::future::Future;

use tandem_proto::message::{ConversationId, Message, MessageId, MessageStatus};

/// Errors returned by a message store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The store rejected the credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// The store answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, for logging.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected response body: {0}")]
    Decode(String),
}

/// Supplies the bearer token attached to every store request.
pub trait AuthProvider: Send + Sync {
    /// Returns the current token, or `None` to send unauthenticated.
    fn token(&self) -> Option<String>;
}

impl AuthProvider for String {
    fn token(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl AuthProvider for Option<String> {
    fn token(&self) -> Option<String> {
        self.clone()
    }
}

/// Async access to the message store.
///
/// Every operation is a single request; none is retried here. Callers
/// decide how a failure affects their local projection.
pub trait MessageStore: Send + Sync {
    /// Fetches a page of history, oldest first.
    ///
    /// `offset` skips that many of the newest messages, so `offset = 0`
    /// returns the latest `limit` messages.
    fn fetch_history(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
        offset: usize,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Posts a new text message and returns it as stored.
    fn post_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> impl Future<Output = Result<Message, StoreError>> + Send;

    /// Marks every message the caller received in the conversation as read.
    fn mark_conversation_read(
        &self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Moves one message to `status`. The store never moves a status back.
    fn set_message_status(
        &self,
        message_id: &MessageId,
        status: MessageStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Deletes a message authored by the caller.
    fn delete_message(
        &self,
        message_id: &MessageId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
