//! Transport error taxonomy.
//!
//! Only `open`, `send_to` and `broadcast` hand errors back to the caller.
//! Accept and receive failures are logged where they happen; they are
//! still typed here so the loops log them uniformly.

use std::io;

use linecast_protocol::{FrameError, SessionId};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    BindFailure {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server is already open on port {port}")]
    AlreadyOpen { port: u16 },

    #[error("accept failed: {0}")]
    AcceptFailure(#[source] io::Error),

    #[error("receive failed for session {session_id}: {source}")]
    ReceiveFailure {
        session_id: SessionId,
        #[source]
        source: io::Error,
    },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("send to session {session_id} failed: {source}")]
    SendFailure {
        session_id: SessionId,
        #[source]
        source: io::Error,
    },

    #[error("invalid message: {0}")]
    InvalidMessage(#[from] FrameError),
}
