//! Loopback transport for testing.
//!
//! Records every frame the session sends and lets a test push server frames
//! into the session's event stream, without any socket. Created via
//! [`LoopbackTransport::new`], which returns the transport and the receiver
//! a session consumes.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use tandem_proto::envelope::{InboundEvent, OutboundEvent};

use super::{ChannelEvent, ConnectionState, Transport, TransportError, decode_frame};

/// In-process transport backed by a `tokio::sync::mpsc` channel.
pub struct LoopbackTransport {
    /// Current simulated connection state.
    state: Mutex<ConnectionState>,
    /// Frames accepted by [`Transport::send`], oldest first.
    sent: Mutex<Vec<OutboundEvent>>,
    /// Feeds the owner's event stream.
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl LoopbackTransport {
    /// Creates an open loopback transport and its event receiver.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            state: Mutex::new(ConnectionState::Open),
            sent: Mutex::new(Vec::new()),
            events,
        };
        (transport, rx)
    }

    /// Moves the simulated connection to `state` and reports it.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
        let _ = self.events.send(ChannelEvent::State(state));
    }

    /// Delivers a server frame to the owner.
    pub fn inject(&self, event: InboundEvent) {
        let _ = self.events.send(ChannelEvent::Inbound(event));
    }

    /// Delivers raw frame text, dropping it if malformed.
    ///
    /// Returns `true` if the text decoded into a frame.
    pub fn inject_raw(&self, text: &str) -> bool {
        match decode_frame(text) {
            Some(event) => {
                self.inject(event);
                true
            }
            None => false,
        }
    }

    /// Returns every frame sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundEvent> {
        self.sent.lock().clone()
    }

    /// Returns and forgets every frame sent so far.
    pub fn take_sent(&self) -> Vec<OutboundEvent> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, frame: &OutboundEvent) -> Result<(), TransportError> {
        let state = *self.state.lock();
        if state != ConnectionState::Open {
            tracing::warn!(kind = frame.kind(), %state, "dropping frame: channel not open");
            return Err(TransportError::NotConnected(state));
        }
        self.sent.lock().push(frame.clone());
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }
}
