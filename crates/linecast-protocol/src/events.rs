//! Events delivered from the server to its single consumer.
//!
//! For any one session the consumer sees `SessionConnected`, then zero or
//! more `MessageReceived`, then exactly one `SessionDisconnected`.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::id::SessionId;

/// Why a session left the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DisconnectReason {
    /// The peer closed its side (zero-length read).
    PeerClosed,
    /// Reading from the connection failed.
    ReceiveFailed { error: String },
    /// The server was closed while the session was open.
    ServerClosed,
}

/// A session lifecycle or message notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    SessionConnected { session_id: SessionId, peer: SocketAddr },
    #[serde(rename_all = "camelCase")]
    SessionDisconnected {
        session_id: SessionId,
        reason: DisconnectReason,
    },
    #[serde(rename_all = "camelCase")]
    MessageReceived { session_id: SessionId, text: String },
}

impl ServerEvent {
    /// The session this event belongs to.
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::SessionConnected { session_id, .. }
            | Self::SessionDisconnected { session_id, .. }
            | Self::MessageReceived { session_id, .. } => *session_id,
        }
    }
}
