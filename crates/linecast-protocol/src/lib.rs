//! Linecast — Protocol Types
//!
//! Wire-level types for the Linecast line server. This crate has no I/O;
//! it owns the newline framing rules, the session identifier type, and
//! the events the server hands to its consumer.

pub mod error;
pub mod events;
pub mod framer;
pub mod id;

pub use error::FrameError;
pub use events::{DisconnectReason, ServerEvent};
pub use framer::{DELIMITER, LineFramer, Messages, encode_line};
pub use id::SessionId;
