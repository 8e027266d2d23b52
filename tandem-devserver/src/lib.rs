//! Tandem development backend.
//!
//! An in-memory message store behind the REST contract the client expects,
//! plus the realtime socket that fans out new messages, read receipts,
//! deletions, typing and presence. Used for local runs and as the peer in
//! the client's integration tests.

pub mod config;
pub mod server;
pub mod state;
pub mod ws;

pub use server::{router, start_server, start_server_with_state};
pub use state::{DevError, DevState};
