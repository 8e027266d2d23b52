//! Realtime channel abstraction for Tandem.
//!
//! Defines the [`Transport`] trait the session layer sends typing frames
//! through, and the [`ChannelEvent`] stream every implementation feeds.
//! Concrete implementations:
//! - [`websocket::WsChannel`]: WebSocket connection with reconnect policy
//! - [`loopback::LoopbackTransport`]: in-process transport for testing

pub mod loopback;
pub mod reconnect;
pub mod websocket;

use std::fmt;
use std::time::Duration;

use tandem_proto::codec::{self, CodecError};
use tandem_proto::envelope::{InboundEvent, OutboundEvent};

/// Lifecycle of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting,
    /// Frames can be sent and received.
    Open,
    /// No connection; a reconnect may be scheduled.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Everything a channel reports to its owner, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A decoded server frame.
    Inbound(InboundEvent),
    /// The connection moved to a new state.
    State(ConnectionState),
    /// A transport-level failure (connect error, read error).
    Error(String),
    /// A reconnect attempt was scheduled after an abnormal close.
    ReconnectScheduled {
        /// 1-based attempt number since the last successful open.
        attempt: u32,
        /// Delay before the attempt starts.
        delay: Duration,
    },
    /// The reconnect policy ran out of attempts; the channel stays closed.
    ReconnectGaveUp {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Errors that can occur while sending a frame.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The channel is not open; the frame was dropped.
    #[error("channel is {0}, frame dropped")]
    NotConnected(ConnectionState),

    /// The connection went away while the frame was being handed off.
    #[error("connection closed")]
    ConnectionClosed,

    /// The frame could not be encoded.
    #[error("frame encoding failed: {0}")]
    Codec(#[from] CodecError),
}

/// Sending side of a realtime channel.
///
/// `send` is fire-and-forget: it hands the frame to the connection and
/// returns without waiting for the network. Frames are never queued across
/// reconnects; sending while the channel is not [`ConnectionState::Open`]
/// drops the frame and returns [`TransportError::NotConnected`].
pub trait Transport: Send + Sync {
    /// Sends a client frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] when the channel is not open.
    fn send(&self, frame: &OutboundEvent) -> Result<(), TransportError>;

    /// Returns the current connection state.
    fn state(&self) -> ConnectionState;
}

/// Decodes a text frame, logging and dropping anything malformed.
pub(crate) fn decode_frame(text: &str) -> Option<InboundEvent> {
    match codec::decode_inbound(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(err = %e, len = text.len(), "malformed channel frame, dropping");
            None
        }
    }
}
