//! Operator console — stdin commands in, event lines out.
//!
//! Anything typed that does not start with `/` is broadcast verbatim.

use linecast_protocol::{DisconnectReason, ServerEvent, SessionId};
use linecast_transport::SessionInfo;

pub const HELP: &str = "\
Commands:
  <text>                 broadcast text to every session
  /to <session-id> <text> send text to one session
  /list                  list open sessions
  /help                  show this help
  /quit                  close the server and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Broadcast(String),
    SendTo { session_id: SessionId, text: String },
    List,
    Help,
    Quit,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: /{0} (try /help)")]
    Unknown(String),
    #[error("usage: /to <session-id> <text>")]
    MissingSessionId,
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}

/// Parse one line of operator input.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let Some(rest) = line.strip_prefix('/') else {
        if line.is_empty() {
            return Ok(Command::Empty);
        }
        return Ok(Command::Broadcast(line.to_string()));
    };

    let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
    match name {
        "to" => {
            let (id, text) = args.split_once(' ').unwrap_or((args, ""));
            if id.is_empty() {
                return Err(CommandError::MissingSessionId);
            }
            let session_id = id
                .parse()
                .map_err(|_| CommandError::InvalidSessionId(id.to_string()))?;
            Ok(Command::SendTo {
                session_id,
                text: text.to_string(),
            })
        }
        "list" => Ok(Command::List),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// Render an event for the console, either as text or as one JSON object.
pub fn format_event(event: &ServerEvent, json: bool) -> String {
    if json {
        return serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));
    }
    match event {
        ServerEvent::SessionConnected { session_id, peer } => {
            format!("[+] {session_id} connected from {peer}")
        }
        ServerEvent::SessionDisconnected { session_id, reason } => {
            let why = match reason {
                DisconnectReason::PeerClosed => "peer closed".to_string(),
                DisconnectReason::ServerClosed => "server closed".to_string(),
                DisconnectReason::ReceiveFailed { error } => format!("receive failed: {error}"),
            };
            format!("[-] {session_id} disconnected ({why})")
        }
        ServerEvent::MessageReceived { session_id, text } => format!("[{session_id}] {text}"),
    }
}

/// One line of `/list` output.
pub fn format_session(info: &SessionInfo) -> String {
    format!(
        "  {}  {}  since {}",
        info.session_id,
        info.peer,
        info.connected_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}
