//! Tandem: realtime sync layer for one-to-one conversations.
//!
//! Keeps a conversation's message list in step with a REST message store
//! and a WebSocket event channel: delivery and read receipts, typing
//! indicators, presence, and time-boxed unsend.

pub mod config;
pub mod session;
pub mod status;
pub mod store;
pub mod timers;
pub mod transport;
pub mod typing;
pub mod unsend;
