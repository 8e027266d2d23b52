//! WebSocket realtime channel.
//!
//! [`WsChannel`] owns at most one live WebSocket connection at a time and
//! reports everything through a [`ChannelEvent`] stream:
//!
//! - [`WsChannel::connect`] is a no-op unless the channel is closed.
//! - A close with code 1000 (normal) is final. Any other close, a read
//!   error, or a failed connect schedules exactly one reconnect according to
//!   the [`ReconnectPolicy`].
//! - [`WsChannel::disconnect`] closes with code 1000 and cancels any pending
//!   reconnect.
//!
//! Every connection attempt runs under an epoch number. `disconnect` and
//! each new attempt bump the epoch, so a stale task (an old reader, a timer
//! that already woke up) sees a mismatched epoch and does nothing. A
//! superseded reader forwards no frames and lingers only until the close
//! handshake finishes or times out.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use tandem_proto::codec;
use tandem_proto::envelope::{InboundEvent, OutboundEvent};

use super::reconnect::ReconnectPolicy;
use super::{ChannelEvent, ConnectionState, Transport, TransportError, decode_frame};

/// Default timeout for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a superseded connection waits for the server to acknowledge
/// the close before it is dropped.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Close code of a normal, final close.
const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the peer closed without a status.
const NO_STATUS: u16 = 1005;

/// Close code reported when the connection dropped without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Connection parameters of a [`WsChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Endpoint URL (`ws://` or `wss://`).
    pub url: String,
    /// Bearer token, sent as the `token` query parameter.
    pub token: Option<String>,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Delay policy after abnormal closes.
    pub reconnect: ReconnectPolicy,
}

impl ChannelConfig {
    /// Creates a config with default timeout and reconnect policy.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Returns the URL to dial, with the token appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured URL does not parse.
    pub fn endpoint(&self) -> Result<url::Url, url::ParseError> {
        let mut url = url::Url::parse(&self.url)?;
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

/// Mutable connection bookkeeping, guarded by one lock.
struct ChannelState {
    connection: ConnectionState,
    epoch: u64,
    /// Frames for the writer task of the open connection.
    outbound: Option<mpsc::UnboundedSender<Message>>,
    /// Handshake and reader task of the current attempt.
    session_task: Option<AbortHandle>,
    reconnect_task: Option<AbortHandle>,
    /// Reconnect attempts since the last successful open.
    attempts: u32,
}

struct ChannelInner {
    config: ChannelConfig,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: Mutex<ChannelState>,
}

/// WebSocket channel implementing [`Transport`].
pub struct WsChannel {
    inner: Arc<ChannelInner>,
}

impl WsChannel {
    /// Creates a closed channel and the receiver for its events.
    ///
    /// Nothing is dialed until [`connect`](Self::connect) is called.
    #[must_use]
    pub fn new(config: ChannelConfig) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = ChannelInner {
            config,
            events,
            state: Mutex::new(ChannelState {
                connection: ConnectionState::Closed,
                epoch: 0,
                outbound: None,
                session_task: None,
                reconnect_task: None,
                attempts: 0,
            }),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Starts a connection attempt if the channel is closed.
    ///
    /// Calling this while connecting or open does nothing. A reconnect that
    /// was scheduled is replaced by this immediate attempt.
    pub fn connect(&self) {
        let mut st = self.inner.state.lock();
        if st.connection != ConnectionState::Closed {
            tracing::debug!(state = %st.connection, "connect ignored");
            return;
        }
        if let Some(handle) = st.reconnect_task.take() {
            handle.abort();
        }
        self.inner.begin_connect(&mut st);
    }

    /// Closes the connection with code 1000 and cancels any pending reconnect.
    pub fn disconnect(&self) {
        let mut st = self.inner.state.lock();
        if let Some(handle) = st.reconnect_task.take() {
            handle.abort();
        }
        st.epoch += 1;
        st.attempts = 0;

        let was = st.connection;
        match st.outbound.take() {
            Some(tx) => {
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                })));
                // The reader stays until the close is acknowledged or times out.
                st.session_task = None;
            }
            None => {
                if let Some(handle) = st.session_task.take() {
                    handle.abort();
                }
            }
        }
        st.connection = ConnectionState::Closed;
        drop(st);

        if was != ConnectionState::Closed {
            tracing::info!(url = %self.inner.config.url, "channel disconnected");
            self.inner.emit(ChannelEvent::State(ConnectionState::Closed));
        }
    }

    /// Returns the configured endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.config.url
    }
}

impl Transport for WsChannel {
    fn send(&self, frame: &OutboundEvent) -> Result<(), TransportError> {
        let st = self.inner.state.lock();
        let state = st.connection;
        let Some(tx) = st.outbound.as_ref().filter(|_| state == ConnectionState::Open) else {
            tracing::warn!(kind = frame.kind(), %state, "dropping frame: channel not open");
            return Err(TransportError::NotConnected(state));
        };
        let text = codec::encode_outbound(frame)?;
        tx.send(Message::text(text))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl ChannelInner {
    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.state.lock().epoch == epoch
    }

    /// Forwards an inbound frame unless its connection was superseded.
    fn emit_inbound(&self, epoch: u64, event: InboundEvent) {
        let st = self.state.lock();
        if st.epoch == epoch {
            self.emit(ChannelEvent::Inbound(event));
        } else {
            tracing::debug!(kind = event.kind(), "dropping frame from superseded connection");
        }
    }

    /// Starts a new attempt under a fresh epoch. Caller holds the state lock.
    fn begin_connect(self: &Arc<Self>, st: &mut ChannelState) {
        st.epoch += 1;
        st.connection = ConnectionState::Connecting;
        self.emit(ChannelEvent::State(ConnectionState::Connecting));

        let task = tokio::spawn(run_connection(Arc::clone(self), st.epoch));
        st.session_task = Some(task.abort_handle());
    }

    /// Records the end of the connection of `epoch` and schedules a reconnect
    /// unless the close was normal.
    fn connection_lost(self: &Arc<Self>, epoch: u64, code: u16, error: Option<String>) {
        let mut st = self.state.lock();
        if st.epoch != epoch {
            return;
        }
        st.connection = ConnectionState::Closed;
        st.outbound = None;
        st.session_task = None;
        self.emit(ChannelEvent::State(ConnectionState::Closed));

        if let Some(err) = error {
            self.emit(ChannelEvent::Error(err));
        }

        if code == NORMAL_CLOSURE {
            tracing::info!(url = %self.config.url, "channel closed normally");
            return;
        }

        st.attempts += 1;
        let attempt = st.attempts;
        let Some(delay) = self.config.reconnect.delay_for(attempt) else {
            tracing::warn!(attempts = attempt - 1, "reconnect attempts exhausted");
            self.emit(ChannelEvent::ReconnectGaveUp {
                attempts: attempt - 1,
            });
            return;
        };

        tracing::info!(code, attempt, delay_ms = delay.as_millis(), "scheduling reconnect");
        self.emit(ChannelEvent::ReconnectScheduled { attempt, delay });

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            reconnect_fire(&weak, epoch);
        });
        st.reconnect_task = Some(task.abort_handle());
    }
}

/// Starts the scheduled reconnect unless it was cancelled in the meantime.
fn reconnect_fire(weak: &Weak<ChannelInner>, scheduled_epoch: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let mut st = inner.state.lock();
    if st.epoch != scheduled_epoch || st.connection != ConnectionState::Closed {
        return;
    }
    st.reconnect_task = None;
    inner.begin_connect(&mut st);
}

/// Handshake, then read frames until the connection ends.
async fn run_connection(inner: Arc<ChannelInner>, epoch: u64) {
    let endpoint = match inner.config.endpoint() {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(url = %inner.config.url, err = %e, "invalid channel URL");
            inner.connection_lost(epoch, ABNORMAL_CLOSURE, Some(format!("invalid URL: {e}")));
            return;
        }
    };

    let connected =
        tokio::time::timeout(inner.config.connect_timeout, connect_async(endpoint.as_str())).await;
    let ws_stream = match connected {
        Ok(Ok((ws_stream, _response))) => ws_stream,
        Ok(Err(e)) => {
            tracing::warn!(url = %inner.config.url, err = %e, "channel connect failed");
            inner.connection_lost(epoch, ABNORMAL_CLOSURE, Some(e.to_string()));
            return;
        }
        Err(_) => {
            tracing::warn!(url = %inner.config.url, "channel connect timed out");
            inner.connection_lost(epoch, ABNORMAL_CLOSURE, Some("connect timed out".into()));
            return;
        }
    };

    let (mut sink, mut stream) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let superseded = {
        let mut st = inner.state.lock();
        if st.epoch == epoch {
            st.connection = ConnectionState::Open;
            st.outbound = Some(tx);
            st.attempts = 0;
            inner.emit(ChannelEvent::State(ConnectionState::Open));
            false
        } else {
            true
        }
    };
    if superseded {
        tracing::debug!("connection superseded during handshake, closing");
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })))
            .await;
        return;
    }
    tracing::info!(url = %inner.config.url, "channel open");

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = sink.send(msg).await {
                tracing::debug!(err = %e, "channel write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let mut code = ABNORMAL_CLOSURE;
    let mut error = None;
    // Set once the connection is superseded; the reader then only waits for
    // the close handshake, up to this deadline.
    let mut drain_deadline = None;
    loop {
        if drain_deadline.is_none() && !inner.is_current(epoch) {
            drain_deadline = Some(tokio::time::Instant::now() + CLOSE_HANDSHAKE_TIMEOUT);
        }
        let next = match drain_deadline {
            None => stream.next().await,
            Some(deadline) => {
                let Ok(next) = tokio::time::timeout_at(deadline, stream.next()).await else {
                    tracing::debug!("close not acknowledged, dropping connection");
                    break;
                };
                next
            }
        };
        let Some(frame) = next else {
            break;
        };
        match frame {
            Ok(Message::Text(text)) => {
                if let Some(event) = decode_frame(text.as_str()) {
                    inner.emit_inbound(epoch, event);
                }
            }
            Ok(Message::Close(close)) => {
                code = close.map_or(NO_STATUS, |frame| u16::from(frame.code));
                tracing::info!(code, "channel closed by server");
                break;
            }
            Ok(Message::Binary(data)) => {
                tracing::debug!(len = data.len(), "ignoring binary channel frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "channel read error");
                error = Some(e.to_string());
                break;
            }
        }
    }

    writer.abort();
    inner.connection_lost(epoch, code, error);
}
