//! Linecast Transport Layer
//!
//! Plain TCP transport for newline-delimited text. The transport handles:
//! - Listener lifecycle (open, close) and the accept loop
//! - One receive loop per session, reassembling lines with the framer
//! - The live session registry used for broadcast and unicast sends
//! - Delivery of session and message events to a single consumer
//!
//! The host application drives a [`LineServer`] and drains its
//! [`EventReceiver`].

pub mod dispatch;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use dispatch::EventReceiver;
pub use error::ServerError;
pub use registry::SessionRegistry;
pub use server::{LineServer, ServerConfig};
pub use session::{SessionHandle, SessionInfo, SessionState};

pub use linecast_protocol::{DisconnectReason, ServerEvent, SessionId};
