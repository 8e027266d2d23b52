//! REST client for the message store.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use tandem_proto::api::{HistoryResponse, PostMessageRequest, StatusUpdateRequest};
use tandem_proto::message::{ConversationId, Message, MessageId, MessageStatus, MessageType};

use super::{AuthProvider, MessageStore, StoreError};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP implementation of [`MessageStore`].
#[derive(Clone)]
pub struct HttpMessageStore {
    client: Client,
    base_url: url::Url,
    auth: Arc<dyn AuthProvider>,
}

impl std::fmt::Debug for HttpMessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMessageStore")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpMessageStore {
    /// Creates a client for the store at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Network`] if the URL does not parse or the
    /// HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        auth: Arc<dyn AuthProvider>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let base_url = url::Url::parse(base_url)
            .map_err(|e| StoreError::Network(format!("invalid base URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Network(format!(
                "base URL {base_url} cannot carry a path"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    /// Returns the base URL requests are made against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Joins path segments onto the base URL, percent-encoding each.
    fn url(&self, segments: &[&str]) -> url::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let rb = self.client.request(method, self.url(segments));
        match self.auth.token() {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn send(rb: RequestBuilder) -> Result<Response, StoreError> {
        let resp = rb
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(StoreError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            return Err(StoreError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, StoreError> {
        let text = resp
            .text()
            .await
            .map_err(|e| StoreError::Network(format!("failed to read body: {e}")))?;
        serde_json::from_str(&text).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

impl MessageStore for HttpMessageStore {
    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let rb = self
            .request(
                Method::GET,
                &["conversations", conversation_id.as_str(), "messages"],
            )
            .query(&[("limit", limit), ("offset", offset)]);
        let resp = Self::send(rb).await?;
        let page: HistoryResponse = Self::json(resp).await?;
        tracing::debug!(
            conversation = %conversation_id,
            count = page.messages.len(),
            offset,
            "fetched history page"
        );
        Ok(page.messages)
    }

    async fn post_message(
        &self,
        conversation_id: &ConversationId,
        content: &str,
    ) -> Result<Message, StoreError> {
        let body = PostMessageRequest {
            content: content.to_string(),
            message_type: MessageType::Text,
        };
        let rb = self
            .request(
                Method::POST,
                &["conversations", conversation_id.as_str(), "messages"],
            )
            .json(&body);
        let message: Message = Self::json(Self::send(rb).await?).await?;
        tracing::debug!(message_id = %message.id, "message posted");
        Ok(message)
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), StoreError> {
        let rb = self.request(
            Method::PUT,
            &["conversations", conversation_id.as_str(), "messages", "read"],
        );
        Self::send(rb).await?;
        Ok(())
    }

    async fn set_message_status(
        &self,
        message_id: &MessageId,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        let rb = self
            .request(Method::PUT, &["messages", message_id.as_str(), "status"])
            .json(&StatusUpdateRequest { status });
        Self::send(rb).await?;
        Ok(())
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<(), StoreError> {
        let rb = self.request(Method::DELETE, &["messages", message_id.as_str()]);
        Self::send(rb).await?;
        Ok(())
    }
}
