//! Shared protocol definitions for the Tandem wire format.

pub mod api;
pub mod codec;
pub mod envelope;
pub mod message;
pub mod presence;
pub mod typing;
