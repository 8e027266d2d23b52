//! Conversation session: the composition root of the sync layer.
//!
//! A [`ConversationSession`] owns, for one conversation:
//! - the ordered message list (history plus live messages),
//! - a [`StatusTracker`], a [`TypingCoordinator`] and an [`UnsendManager`],
//! - a dispatcher task that routes realtime [`ChannelEvent`]s to them,
//! - peer presence and the last known connection state.
//!
//! Consumers read snapshots through [`messages`](ConversationSession::messages)
//! and follow changes through [`subscribe`](ConversationSession::subscribe).
//! [`close`](ConversationSession::close) cancels every timer and task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use tandem_proto::envelope::InboundEvent;
use tandem_proto::message::{
    ConversationId, Message, MessageId, MessageStatus, UserId, ValidationError, validate_content,
};
use tandem_proto::presence::{DeletedNotice, PresenceStatus};

use crate::status::visibility::VisibilityEntry;
use crate::status::{ReceiptConfig, StatusChanged, StatusTracker};
use crate::store::{MessageStore, StoreError};
use crate::transport::{ChannelEvent, ConnectionState, Transport};
use crate::typing::{TypingConfig, TypingCoordinator, TypingEvent};
use crate::unsend::{DEFAULT_UNSEND_TIMEOUT, UnsendEvent, UnsendManager};

/// Default history page size.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Tuning of a [`ConversationSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Typing indicator timings.
    pub typing: TypingConfig,
    /// Delivered/read detection.
    pub receipts: ReceiptConfig,
    /// Retraction window of sent messages.
    pub unsend_timeout: Duration,
    /// Page size of [`ConversationSession::refresh`].
    pub page_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            typing: TypingConfig::default(),
            receipts: ReceiptConfig::default(),
            unsend_timeout: DEFAULT_UNSEND_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Why a message left the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The local user retracted it.
    Unsent,
    /// The author deleted it elsewhere.
    Deleted,
}

/// Everything observable about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A message entered the list.
    MessageAdded(Message),
    /// A message left the list.
    MessageRemoved {
        /// Removed message.
        message_id: MessageId,
        /// Why it was removed.
        reason: RemovalReason,
    },
    /// A message's status advanced.
    StatusChanged(StatusChanged),
    /// Remote typers changed; sorted by user id.
    TypingChanged(Vec<UserId>),
    /// The local typing state changed.
    LocalTyping(bool),
    /// Retraction lifecycle of an own message.
    Unsend(UnsendEvent),
    /// A user's presence changed.
    Presence {
        /// User concerned.
        user_id: UserId,
        /// New presence.
        status: PresenceStatus,
    },
    /// The realtime connection changed state.
    Connection(ConnectionState),
    /// The realtime channel gave up reconnecting.
    ReconnectGaveUp,
    /// A recoverable failure worth surfacing.
    Error(String),
}

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The message content was rejected before sending.
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationError),

    /// The message store call failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// State shared with the dispatcher task.
struct SessionState {
    conversation_id: ConversationId,
    current_user: UserId,
    /// Ordered by `created_at`, unique by id.
    messages: Mutex<Vec<Message>>,
    presence: Mutex<HashMap<UserId, PresenceStatus>>,
    connection: Mutex<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionState {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Inserts in `created_at` order. Returns `false` for a duplicate id.
    fn insert(&self, message: &Message) -> bool {
        let mut list = self.messages.lock();
        if list.iter().any(|m| m.id == message.id) {
            return false;
        }
        let at = list.partition_point(|m| m.created_at <= message.created_at);
        list.insert(at, message.clone());
        true
    }

    fn remove(&self, message_id: &MessageId) -> bool {
        let mut list = self.messages.lock();
        let before = list.len();
        list.retain(|m| &m.id != message_id);
        list.len() != before
    }
}

/// Sync layer for one conversation.
pub struct ConversationSession<S, T> {
    state: Arc<SessionState>,
    config: SessionConfig,
    store: Arc<S>,
    transport: Arc<T>,
    tracker: Arc<StatusTracker<S>>,
    typing: Arc<TypingCoordinator<T>>,
    unsend: Arc<UnsendManager<S>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, T> ConversationSession<S, T>
where
    S: MessageStore + 'static,
    T: Transport + 'static,
{
    /// Starts a session and its background tasks.
    ///
    /// `channel_events` is the event stream of `transport`. Must be called
    /// inside a tokio runtime.
    pub fn start(
        conversation_id: ConversationId,
        current_user: UserId,
        store: Arc<S>,
        transport: Arc<T>,
        channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let state = Arc::new(SessionState {
            conversation_id: conversation_id.clone(),
            current_user: current_user.clone(),
            messages: Mutex::new(Vec::new()),
            presence: Mutex::new(HashMap::new()),
            connection: Mutex::new(transport.state()),
            events,
        });
        let tracker = Arc::new(StatusTracker::new(
            Arc::clone(&store),
            current_user.clone(),
            conversation_id.clone(),
            config.receipts,
        ));
        let typing = Arc::new(TypingCoordinator::new(
            Arc::clone(&transport),
            conversation_id,
            current_user,
            config.typing,
        ));
        let unsend = Arc::new(UnsendManager::new(Arc::clone(&store), config.unsend_timeout));
        typing.start();

        let tasks = vec![
            tokio::spawn(forward(tracker.subscribe(), Arc::clone(&state), |e| {
                Some(SessionEvent::StatusChanged(e))
            })),
            tokio::spawn(forward(typing.subscribe(), Arc::clone(&state), |e| {
                Some(match e {
                    TypingEvent::Remote(users) => SessionEvent::TypingChanged(users),
                    TypingEvent::Local(typing) => SessionEvent::LocalTyping(typing),
                })
            })),
            tokio::spawn(forward(unsend.subscribe(), Arc::clone(&state), |e| {
                Some(SessionEvent::Unsend(e))
            })),
            tokio::spawn(dispatch(
                channel_events,
                Arc::clone(&state),
                Arc::clone(&tracker),
                Arc::clone(&typing),
            )),
        ];

        tracing::info!(conversation = %state.conversation_id, user = %state.current_user, "session started");
        Self {
            state,
            config,
            store,
            transport,
            tracker,
            typing,
            unsend,
            tasks: Mutex::new(tasks),
        }
    }

    /// Subscribes to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.state.events.subscribe()
    }

    /// The conversation this session follows.
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.state.conversation_id
    }

    /// The local user.
    #[must_use]
    pub fn current_user(&self) -> &UserId {
        &self.state.current_user
    }

    /// Loads one page of history and merges it into the list.
    ///
    /// Returns the page as received, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the fetch fails; the list is left
    /// unchanged.
    pub async fn load_history(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, SessionError> {
        let page = self
            .store
            .fetch_history(&self.state.conversation_id, limit, offset)
            .await
            .inspect_err(|e| tracing::warn!(err = %e, "history fetch failed"))?;
        for message in &page {
            self.admit(message);
        }
        Ok(page)
    }

    /// Reloads the newest page of history.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the fetch fails.
    pub async fn refresh(&self) -> Result<Vec<Message>, SessionError> {
        self.load_history(self.config.page_size, 0).await
    }

    /// Sends a text message.
    ///
    /// Stops local typing, posts the message, adds it to the list, and opens
    /// its retraction window.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Invalid`] for empty or oversized content, or
    /// [`SessionError::Store`] if the store rejects the post.
    pub async fn send_message(&self, content: &str) -> Result<Message, SessionError> {
        validate_content(content)?;
        self.typing.stop();
        let message = self
            .store
            .post_message(&self.state.conversation_id, content)
            .await
            .inspect_err(|e| tracing::warn!(err = %e, "send failed"))?;
        tracing::info!(message_id = %message.id, "message sent");
        self.admit(&message);
        self.unsend.add(message.clone());
        Ok(message)
    }

    /// Retracts one of the user's messages while its window is open.
    ///
    /// Returns `true` if the store deleted it; the message then leaves the
    /// list. See [`UnsendManager::unsend`] for the `false` cases.
    pub async fn unsend(&self, message_id: &MessageId) -> bool {
        if !self.unsend.unsend(message_id).await {
            return false;
        }
        self.tracker.untrack(message_id);
        if self.state.remove(message_id) {
            self.state.emit(SessionEvent::MessageRemoved {
                message_id: message_id.clone(),
                reason: RemovalReason::Unsent,
            });
        }
        true
    }

    /// Feeds visibility observations of rendered messages.
    ///
    /// Returns the messages newly marked read.
    pub async fn observe_visibility(&self, entries: &[VisibilityEntry]) -> Vec<MessageId> {
        self.tracker.observe(entries).await
    }

    /// Records a keystroke in the composer.
    pub fn keystroke(&self) {
        self.typing.keystroke();
    }

    /// Stops local typing now.
    pub fn stop_typing(&self) {
        self.typing.stop();
    }

    /// Snapshot of the message list, oldest first, with current statuses.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        let mut list = self.state.messages.lock().clone();
        for message in &mut list {
            if let Some(status) = self.tracker.status_of(&message.id) {
                message.status = status;
            }
        }
        list
    }

    /// Current status of one message.
    #[must_use]
    pub fn status_of(&self, message_id: &MessageId) -> Option<MessageStatus> {
        self.tracker.status_of(message_id)
    }

    /// Remote users currently typing.
    #[must_use]
    pub fn typing_users(&self) -> Vec<UserId> {
        self.typing.typing_users()
    }

    /// Time left to retract a message, if it is still retractable.
    #[must_use]
    pub fn unsend_remaining(&self, message_id: &MessageId) -> Option<Duration> {
        self.unsend.remaining(message_id)
    }

    /// Own messages still retractable, longest window first.
    #[must_use]
    pub fn retractable(&self) -> Vec<(MessageId, Duration)> {
        self.unsend.pending()
    }

    /// The most recently sent message that can still be retracted.
    #[must_use]
    pub fn newest_retractable(&self) -> Option<MessageId> {
        self.unsend.pending().into_iter().next().map(|(id, _)| id)
    }

    /// Last known presence of a user; `None` if never reported.
    #[must_use]
    pub fn presence(&self, user_id: &UserId) -> Option<PresenceStatus> {
        self.state.presence.lock().get(user_id).copied()
    }

    /// Returns `true` if the user was last reported online.
    #[must_use]
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.presence(user_id) == Some(PresenceStatus::Online)
    }

    /// Last connection state reported by the channel.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.connection.lock()
    }

    /// The transport the session sends through.
    #[must_use]
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Stops typing, cancels every timer, and ends background tasks.
    pub fn close(&self) {
        self.typing.close();
        self.unsend.clear();
        self.tracker.clear();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!(conversation = %self.state.conversation_id, "session closed");
    }

    /// Adds a message to the list and tracker; emits on first sight.
    fn admit(&self, message: &Message) {
        admit(&self.state, &self.tracker, message);
    }
}

impl<S, T> Drop for ConversationSession<S, T> {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

fn admit<S: MessageStore + 'static>(
    state: &SessionState,
    tracker: &StatusTracker<S>,
    message: &Message,
) {
    if message.conversation_id != state.conversation_id {
        return;
    }
    tracker.track(message);
    if state.insert(message) {
        state.emit(SessionEvent::MessageAdded(message.clone()));
    }
}

/// Re-emits a component's events as session events.
async fn forward<E: Clone>(
    mut rx: broadcast::Receiver<E>,
    state: Arc<SessionState>,
    map: impl Fn(E) -> Option<SessionEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(event) = map(event) {
                    state.emit(event);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "session event forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Routes channel events to the session's components.
async fn dispatch<S, T>(
    mut rx: mpsc::UnboundedReceiver<ChannelEvent>,
    state: Arc<SessionState>,
    tracker: Arc<StatusTracker<S>>,
    typing: Arc<TypingCoordinator<T>>,
) where
    S: MessageStore + 'static,
    T: Transport + 'static,
{
    while let Some(event) = rx.recv().await {
        match event {
            ChannelEvent::Inbound(frame) => {
                tracing::trace!(kind = frame.kind(), "inbound frame");
                handle_inbound(frame, &state, &tracker, &typing);
            }
            ChannelEvent::State(connection) => {
                *state.connection.lock() = connection;
                state.emit(SessionEvent::Connection(connection));
            }
            ChannelEvent::Error(err) => {
                state.emit(SessionEvent::Error(err));
            }
            ChannelEvent::ReconnectScheduled { attempt, delay } => {
                tracing::debug!(attempt, delay_ms = delay.as_millis(), "reconnect pending");
            }
            ChannelEvent::ReconnectGaveUp { attempts } => {
                tracing::warn!(attempts, "realtime channel gave up");
                state.emit(SessionEvent::ReconnectGaveUp);
            }
        }
    }
    tracing::debug!("channel event stream ended");
}

fn handle_inbound<S, T>(
    frame: InboundEvent,
    state: &SessionState,
    tracker: &StatusTracker<S>,
    typing: &TypingCoordinator<T>,
) where
    S: MessageStore + 'static,
    T: Transport + 'static,
{
    match frame {
        InboundEvent::NewMessage(message) => admit(state, tracker, &message),
        InboundEvent::MessageRead(receipt) => {
            tracker.apply_read_receipt(&receipt);
        }
        InboundEvent::Typing(notice) => typing.on_remote(&notice, notice.is_typing),
        InboundEvent::StopTyping(notice) => typing.on_remote(&notice, false),
        InboundEvent::UserOnline(notice) => {
            set_presence(state, notice.user_id, PresenceStatus::Online);
        }
        InboundEvent::UserOffline(notice) => {
            set_presence(state, notice.user_id, PresenceStatus::Offline);
        }
        InboundEvent::MessageDeleted(DeletedNotice {
            conversation_id,
            message_id,
        }) => {
            if conversation_id != state.conversation_id {
                return;
            }
            tracker.untrack(&message_id);
            if state.remove(&message_id) {
                state.emit(SessionEvent::MessageRemoved {
                    message_id,
                    reason: RemovalReason::Deleted,
                });
            }
        }
    }
}

fn set_presence(state: &SessionState, user_id: UserId, status: PresenceStatus) {
    let previous = state.presence.lock().insert(user_id.clone(), status);
    if previous != Some(status) {
        state.emit(SessionEvent::Presence { user_id, status });
    }
}
