//! Delivery and read status tracking for one conversation.
//!
//! [`StatusTracker`] keeps a local, monotonic projection of every message's
//! status and drives the store's status endpoints:
//!
//! - Own messages in `sent` are promoted to `delivered` a short delay after
//!   they are first tracked (rendered).
//! - Received messages are marked `read` once a visibility observation says
//!   at least half of them is on screen. Each message is submitted at most
//!   once per session; a failed submission is forgotten so the next
//!   observation retries it.
//! - `message_read` receipts from the peer promote own messages to `read`.
//!
//! Status never moves backward, whatever order updates arrive in.

pub mod visibility;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use tandem_proto::message::{ConversationId, Message, MessageId, MessageStatus, UserId};
use tandem_proto::presence::ReadReceipt;

use crate::store::MessageStore;
use crate::timers::TimerArena;

use visibility::{DEFAULT_VISIBILITY_THRESHOLD, VisibilityEntry};

/// Default delay before an own message is promoted to delivered.
pub const DEFAULT_DELIVERED_DELAY: Duration = Duration::from_millis(500);

/// Tuning of a [`StatusTracker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceiptConfig {
    /// Visible fraction at which a received message counts as read.
    pub visibility_threshold: f64,
    /// Delay between tracking an own `sent` message and promoting it.
    pub delivered_delay: Duration,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: DEFAULT_VISIBILITY_THRESHOLD,
            delivered_delay: DEFAULT_DELIVERED_DELAY,
        }
    }
}

/// A status change of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChanged {
    /// Message whose status moved.
    pub message_id: MessageId,
    /// New status.
    pub status: MessageStatus,
}

struct Tracked {
    sender_id: UserId,
    status: MessageStatus,
}

#[derive(Default)]
struct TrackerState {
    tracked: HashMap<MessageId, Tracked>,
    /// Received messages already submitted as read.
    processed: HashSet<MessageId>,
}

/// State shared with delivered-timer callbacks.
struct Shared {
    state: Mutex<TrackerState>,
    events: broadcast::Sender<StatusChanged>,
}

impl Shared {
    fn status(&self, id: &MessageId) -> Option<MessageStatus> {
        self.state.lock().tracked.get(id).map(|t| t.status)
    }

    /// Advances `id` to `status` if tracked, emitting on change.
    fn advance(&self, id: &MessageId, status: MessageStatus) -> bool {
        let changed = self
            .state
            .lock()
            .tracked
            .get_mut(id)
            .is_some_and(|t| t.status.advance(status));
        if changed {
            let _ = self.events.send(StatusChanged {
                message_id: id.clone(),
                status,
            });
        }
        changed
    }
}

/// Tracks delivery and read status of one conversation's messages.
pub struct StatusTracker<S> {
    store: Arc<S>,
    current_user: UserId,
    conversation_id: ConversationId,
    config: ReceiptConfig,
    shared: Arc<Shared>,
    delivered_timers: TimerArena<MessageId, ()>,
}

impl<S: MessageStore + 'static> StatusTracker<S> {
    /// Creates a tracker for `conversation_id` seen by `current_user`.
    pub fn new(
        store: Arc<S>,
        current_user: UserId,
        conversation_id: ConversationId,
        config: ReceiptConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            current_user,
            conversation_id,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(TrackerState::default()),
                events,
            }),
            delivered_timers: TimerArena::new(),
        }
    }

    /// Subscribes to status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChanged> {
        self.shared.events.subscribe()
    }

    /// Starts tracking a rendered message, or merges a newer copy of it.
    ///
    /// Messages of other conversations are ignored. An own message still in
    /// `sent` gets a delivered timer.
    pub fn track(&self, message: &Message) {
        if message.conversation_id != self.conversation_id {
            return;
        }
        let status = {
            let mut state = self.shared.state.lock();
            let entry = state
                .tracked
                .entry(message.id.clone())
                .or_insert_with(|| Tracked {
                    sender_id: message.sender_id.clone(),
                    status: message.status,
                });
            entry.status.advance(message.status);
            entry.status
        };

        if !message.is_from(&self.current_user) {
            return;
        }
        if status > MessageStatus::Sent {
            self.delivered_timers.remove(&message.id);
        } else if !self.delivered_timers.contains(&message.id) {
            self.schedule_delivered(message.id.clone());
        }
    }

    /// Stops tracking a message that left the list.
    pub fn untrack(&self, message_id: &MessageId) {
        self.delivered_timers.remove(message_id);
        self.shared.state.lock().tracked.remove(message_id);
    }

    /// Current status of a tracked message.
    #[must_use]
    pub fn status_of(&self, message_id: &MessageId) -> Option<MessageStatus> {
        self.shared
            .state
            .lock()
            .tracked
            .get(message_id)
            .map(|t| t.status)
    }

    /// Returns `true` if the message was already submitted as read.
    #[must_use]
    pub fn is_processed(&self, message_id: &MessageId) -> bool {
        self.shared.state.lock().processed.contains(message_id)
    }

    fn schedule_delivered(&self, message_id: MessageId) {
        let store = Arc::clone(&self.store);
        let shared = Arc::clone(&self.shared);
        self.delivered_timers.insert(
            message_id,
            (),
            self.config.delivered_delay,
            move |id, ()| async move {
                if shared.status(&id) != Some(MessageStatus::Sent) {
                    return;
                }
                match store.set_message_status(&id, MessageStatus::Delivered).await {
                    Ok(()) => {
                        shared.advance(&id, MessageStatus::Delivered);
                    }
                    Err(e) => {
                        tracing::warn!(message_id = %id, err = %e, "delivered update failed");
                    }
                }
            },
        );
    }

    /// Processes a batch of visibility observations.
    ///
    /// Every received message at or above the threshold that is not yet
    /// read or submitted is marked read: one conversation-wide call, then
    /// one status call per message. Returns the ids that were promoted.
    pub async fn observe(&self, entries: &[VisibilityEntry]) -> Vec<MessageId> {
        let candidates: Vec<MessageId> = {
            let mut state = self.shared.state.lock();
            let TrackerState { tracked, processed } = &mut *state;
            entries
                .iter()
                .filter(|e| e.ratio >= self.config.visibility_threshold)
                .filter(|e| {
                    tracked.get(&e.message_id).is_some_and(|t| {
                        t.sender_id != self.current_user && t.status != MessageStatus::Read
                    })
                })
                .filter(|e| processed.insert(e.message_id.clone()))
                .map(|e| e.message_id.clone())
                .collect()
        };
        if candidates.is_empty() {
            return candidates;
        }

        tracing::debug!(count = candidates.len(), "marking messages read");
        if let Err(e) = self.store.mark_conversation_read(&self.conversation_id).await {
            tracing::warn!(conversation = %self.conversation_id, err = %e, "mark read failed");
        }

        let mut promoted = Vec::with_capacity(candidates.len());
        for id in candidates {
            match self.store.set_message_status(&id, MessageStatus::Read).await {
                Ok(()) => {
                    self.shared.advance(&id, MessageStatus::Read);
                    promoted.push(id);
                }
                Err(e) => {
                    tracing::warn!(message_id = %id, err = %e, "read update failed, will retry");
                    self.shared.state.lock().processed.remove(&id);
                }
            }
        }
        promoted
    }

    /// Applies a `message_read` receipt from the peer.
    ///
    /// With a message id, that one own message becomes read; without, every
    /// own message of the conversation does. Returns the ids promoted.
    pub fn apply_read_receipt(&self, receipt: &ReadReceipt) -> Vec<MessageId> {
        if receipt.conversation_id != self.conversation_id || receipt.user_id == self.current_user
        {
            return Vec::new();
        }
        let targets: Vec<MessageId> = {
            let state = self.shared.state.lock();
            state
                .tracked
                .iter()
                .filter(|(id, t)| {
                    t.sender_id == self.current_user
                        && receipt.message_id.as_ref().is_none_or(|target| target == *id)
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        targets
            .into_iter()
            .filter(|id| {
                self.delivered_timers.remove(id);
                self.shared.advance(id, MessageStatus::Read)
            })
            .collect()
    }

    /// Cancels timers and forgets all tracked messages.
    pub fn clear(&self) {
        self.delivered_timers.clear();
        let mut state = self.shared.state.lock();
        state.tracked.clear();
        state.processed.clear();
    }
}
