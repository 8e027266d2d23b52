//! Typing indicators for one conversation.
//!
//! Local side: keystrokes put the user in the typing state and broadcast a
//! `typing` frame, throttled to one per second while typing continues. After
//! three seconds without a keystroke, or on an explicit stop, a single
//! `stop_typing` frame is sent.
//!
//! Remote side: `typing` frames from other users add or refresh them in the
//! typing set, `stop_typing` removes them, and a periodic sweep evicts anyone
//! not refreshed within the stale threshold.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use tandem_proto::envelope::OutboundEvent;
use tandem_proto::message::{ConversationId, UserId};
use tandem_proto::typing::TypingNotice;

use crate::timers::TimerArena;
use crate::transport::Transport;

/// Timing parameters of a [`TypingCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingConfig {
    /// Inactivity after which the local user stops typing.
    pub typing_timeout: Duration,
    /// Minimum spacing of local `typing` broadcasts.
    pub throttle: Duration,
    /// Remote typers not refreshed for longer than this are evicted.
    pub stale_threshold: Duration,
    /// Period of the stale sweep.
    pub sweep_interval: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            typing_timeout: Duration::from_millis(3000),
            throttle: Duration::from_millis(1000),
            stale_threshold: Duration::from_millis(5000),
            sweep_interval: Duration::from_millis(1000),
        }
    }
}

/// Change in who is typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingEvent {
    /// The set of remote typers changed; sorted by user id.
    Remote(Vec<UserId>),
    /// The local typing state changed.
    Local(bool),
}

#[derive(Default)]
struct LocalTyping {
    typing: bool,
    last_broadcast: Option<Instant>,
    last_keystroke: Option<Instant>,
}

/// Remote typers, shared with the sweep task.
struct RemoteTypers {
    last_seen: Mutex<HashMap<UserId, Instant>>,
    stale_threshold: Duration,
    events: broadcast::Sender<TypingEvent>,
}

impl RemoteTypers {
    fn snapshot(map: &HashMap<UserId, Instant>) -> Vec<UserId> {
        let mut users: Vec<UserId> = map.keys().cloned().collect();
        users.sort();
        users
    }

    fn set(&self, user_id: &UserId, typing: bool) {
        let mut map = self.last_seen.lock();
        let changed = if typing {
            map.insert(user_id.clone(), Instant::now()).is_none()
        } else {
            map.remove(user_id).is_some()
        };
        if changed {
            let users = Self::snapshot(&map);
            drop(map);
            let _ = self.events.send(TypingEvent::Remote(users));
        }
    }

    fn sweep(&self) -> Vec<UserId> {
        let now = Instant::now();
        let mut map = self.last_seen.lock();
        let stale: Vec<UserId> = map
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > self.stale_threshold)
            .map(|(user, _)| user.clone())
            .collect();
        if stale.is_empty() {
            return stale;
        }
        for user in &stale {
            map.remove(user);
        }
        let users = Self::snapshot(&map);
        drop(map);
        tracing::debug!(evicted = stale.len(), "evicted stale typers");
        let _ = self.events.send(TypingEvent::Remote(users));
        stale
    }

    fn clear(&self) {
        let had_any = {
            let mut map = self.last_seen.lock();
            let had_any = !map.is_empty();
            map.clear();
            had_any
        };
        if had_any {
            let _ = self.events.send(TypingEvent::Remote(Vec::new()));
        }
    }
}

/// Coordinates local and remote typing state for one conversation.
pub struct TypingCoordinator<T> {
    transport: Arc<T>,
    conversation_id: ConversationId,
    current_user: UserId,
    config: TypingConfig,
    local: Arc<Mutex<LocalTyping>>,
    inactivity: TimerArena<(), ()>,
    remote: Arc<RemoteTypers>,
    events: broadcast::Sender<TypingEvent>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static> TypingCoordinator<T> {
    /// Creates a coordinator. Call [`start`](Self::start) to run the sweep.
    pub fn new(
        transport: Arc<T>,
        conversation_id: ConversationId,
        current_user: UserId,
        config: TypingConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let remote = Arc::new(RemoteTypers {
            last_seen: Mutex::new(HashMap::new()),
            stale_threshold: config.stale_threshold,
            events: events.clone(),
        });
        Self {
            transport,
            conversation_id,
            current_user,
            config,
            local: Arc::new(Mutex::new(LocalTyping::default())),
            inactivity: TimerArena::new(),
            remote,
            events,
            sweeper: Mutex::new(None),
        }
    }

    /// Subscribes to typing changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TypingEvent> {
        self.events.subscribe()
    }

    /// Starts the periodic stale sweep. Calling it again is a no-op.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let remote = Arc::clone(&self.remote);
        let period = self.config.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                remote.sweep();
            }
        }));
    }

    /// Records a local keystroke.
    pub fn keystroke(&self) {
        let now = Instant::now();
        let (broadcast, started) = {
            let mut local = self.local.lock();
            let started = !local.typing;
            local.typing = true;
            local.last_keystroke = Some(now);
            let due = local
                .last_broadcast
                .is_none_or(|at| now.duration_since(at) >= self.config.throttle);
            if due {
                local.last_broadcast = Some(now);
            }
            (due, started)
        };

        if started {
            let _ = self.events.send(TypingEvent::Local(true));
        }
        if broadcast {
            self.send(OutboundEvent::typing(self.conversation_id.clone()));
        }

        let local = Arc::clone(&self.local);
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        let conversation_id = self.conversation_id.clone();
        let timeout = self.config.typing_timeout;
        self.inactivity
            .insert((), (), timeout, move |(), ()| async move {
                if leave_typing_if_idle(&local, timeout) {
                    let _ = events.send(TypingEvent::Local(false));
                    send_frame(&*transport, &OutboundEvent::stop_typing(conversation_id));
                }
            });
    }

    /// Stops local typing now, e.g. when the message is sent.
    pub fn stop(&self) {
        self.inactivity.remove(&());
        if leave_typing(&self.local) {
            let _ = self.events.send(TypingEvent::Local(false));
            self.send(OutboundEvent::stop_typing(self.conversation_id.clone()));
        }
    }

    /// Returns `true` while the local user is typing.
    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.local.lock().typing
    }

    /// Applies a remote `typing` (`typing = true`) or `stop_typing` frame.
    pub fn on_remote(&self, notice: &TypingNotice, typing: bool) {
        if notice.conversation_id != self.conversation_id || notice.user_id == self.current_user {
            return;
        }
        self.remote.set(&notice.user_id, typing);
    }

    /// Evicts stale remote typers now. Returns who was evicted.
    pub fn sweep(&self) -> Vec<UserId> {
        self.remote.sweep()
    }

    /// Remote users currently typing, sorted by id.
    #[must_use]
    pub fn typing_users(&self) -> Vec<UserId> {
        RemoteTypers::snapshot(&self.remote.last_seen.lock())
    }

    /// Stops local typing, cancels timers, and forgets remote typers.
    pub fn close(&self) {
        self.stop();
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.remote.clear();
    }

    fn send(&self, frame: OutboundEvent) {
        send_frame(&*self.transport, &frame);
    }
}

impl<T> Drop for TypingCoordinator<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Leaves the typing state. Returns `true` if the user was typing.
fn leave_typing(local: &Mutex<LocalTyping>) -> bool {
    let mut local = local.lock();
    let was = local.typing;
    local.typing = false;
    local.last_broadcast = None;
    local.last_keystroke = None;
    was
}

/// Like [`leave_typing`], but only after `timeout` without a keystroke.
///
/// An expiring timer can race a keystroke that already armed its
/// successor; the keystroke wins.
fn leave_typing_if_idle(local: &Mutex<LocalTyping>, timeout: Duration) -> bool {
    let mut local = local.lock();
    if local.last_keystroke.is_some_and(|at| at.elapsed() < timeout) {
        return false;
    }
    let was = local.typing;
    local.typing = false;
    local.last_broadcast = None;
    local.last_keystroke = None;
    was
}

fn send_frame<T: Transport + ?Sized>(transport: &T, frame: &OutboundEvent) {
    if let Err(e) = transport.send(frame) {
        tracing::debug!(kind = frame.kind(), err = %e, "typing frame not sent");
    }
}

/// Renders the "who is typing" label from display names.
#[must_use]
pub fn typing_label(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [one] => format!("{one} is typing..."),
        [first, second] => format!("{first} and {second} are typing..."),
        [first, rest @ ..] => format!("{first} and {} others are typing...", rest.len()),
    }
}
