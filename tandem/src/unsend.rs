//! Time-boxed retraction of own messages.
//!
//! Every message the user sends is retractable for a window (five seconds
//! by default). [`UnsendManager::unsend`] removes the message from the
//! pending set before the delete request goes out, so a second unsend of
//! the same message is a no-op. If the store rejects the delete, the
//! message comes back with a fresh window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use tandem_proto::message::{Message, MessageId};

use crate::store::MessageStore;
use crate::timers::TimerArena;

/// Default retraction window.
pub const DEFAULT_UNSEND_TIMEOUT: Duration = Duration::from_millis(5000);

/// Lifecycle of a retractable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsendEvent {
    /// The message became retractable.
    Added(MessageId),
    /// The window closed without a retraction.
    Expired(MessageId),
    /// The message left the pending set because an unsend started.
    Removed(MessageId),
    /// The store confirmed the deletion.
    Unsent(MessageId),
    /// The store rejected the deletion; the message is retractable again.
    RolledBack {
        /// Message restored to the pending set.
        message_id: MessageId,
        /// Why the deletion failed.
        reason: String,
    },
}

/// Tracks which of the user's messages can still be retracted.
pub struct UnsendManager<S> {
    store: Arc<S>,
    timeout: Duration,
    pending: TimerArena<MessageId, Message>,
    events: broadcast::Sender<UnsendEvent>,
}

impl<S: MessageStore + 'static> UnsendManager<S> {
    /// Creates a manager with the given retraction window.
    pub fn new(store: Arc<S>, timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            timeout,
            pending: TimerArena::new(),
            events,
        }
    }

    /// Subscribes to retraction lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<UnsendEvent> {
        self.events.subscribe()
    }

    /// Opens a retraction window for a freshly sent message.
    ///
    /// Adding a message that is already pending restarts its window.
    pub fn add(&self, message: Message) {
        let message_id = message.id.clone();
        self.arm(message);
        tracing::debug!(%message_id, window_ms = self.timeout.as_millis(), "message retractable");
        let _ = self.events.send(UnsendEvent::Added(message_id));
    }

    fn arm(&self, message: Message) {
        let events = self.events.clone();
        self.pending.insert(
            message.id.clone(),
            message,
            self.timeout,
            move |message_id, _| async move {
                tracing::debug!(%message_id, "retraction window closed");
                let _ = events.send(UnsendEvent::Expired(message_id));
            },
        );
    }

    /// Retracts a pending message.
    ///
    /// Returns `true` once the store confirms the deletion. Returns `false`
    /// if the message is not pending (never added, expired, or already being
    /// unsent) or if the store rejected the deletion, in which case the
    /// message is pending again with a fresh window.
    pub async fn unsend(&self, message_id: &MessageId) -> bool {
        let Some(message) = self.pending.remove(message_id) else {
            tracing::debug!(%message_id, "unsend ignored: not retractable");
            return false;
        };
        let _ = self.events.send(UnsendEvent::Removed(message_id.clone()));

        match self.store.delete_message(message_id).await {
            Ok(()) => {
                tracing::info!(%message_id, "message unsent");
                let _ = self.events.send(UnsendEvent::Unsent(message_id.clone()));
                true
            }
            Err(e) => {
                tracing::warn!(%message_id, err = %e, "unsend failed, restoring message");
                self.arm(message);
                let _ = self.events.send(UnsendEvent::RolledBack {
                    message_id: message_id.clone(),
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Returns `true` if the message can still be retracted.
    #[must_use]
    pub fn can_unsend(&self, message_id: &MessageId) -> bool {
        self.pending.contains(message_id)
    }

    /// Time left in the message's window, or `None` if not pending.
    #[must_use]
    pub fn remaining(&self, message_id: &MessageId) -> Option<Duration> {
        self.pending.remaining(message_id)
    }

    /// Pending messages with their remaining windows, longest first.
    #[must_use]
    pub fn pending(&self) -> Vec<(MessageId, Duration)> {
        self.pending.entries_by_remaining()
    }

    /// Closes every window without retracting anything.
    pub fn clear(&self) {
        let dropped = self.pending.clear();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "cleared retractable messages");
        }
    }
}
