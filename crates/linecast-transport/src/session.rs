//! Session state and the per-session receive loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use linecast_protocol::{DisconnectReason, LineFramer, ServerEvent, SessionId};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::dispatch::EventDispatcher;
use crate::error::ServerError;
use crate::registry::SessionRegistry;

/// Lifecycle of a session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum SessionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Snapshot of a session for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub peer: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub state: SessionState,
}

/// Shared half of a session: identity, state and the write side of the
/// connection. Held by the registry and by in-flight sends.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    connected_at: DateTime<Utc>,
    state: AtomicU8,
    writer: Mutex<OwnedWriteHalf>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            peer,
            connected_at: Utc::now(),
            state: AtomicU8::new(SessionState::Open as u8),
            writer: Mutex::new(writer),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Move to `next` unless the session is already at or past it.
    /// Returns whether the state changed.
    pub(crate) fn advance(&self, next: SessionState) -> bool {
        let previous = self.state.fetch_max(next as u8, Ordering::AcqRel);
        previous < next as u8
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id,
            peer: self.peer,
            connected_at: self.connected_at,
            state: self.state(),
        }
    }

    /// Write one encoded frame. Fails fast once the session is no longer open.
    pub(crate) async fn send(&self, frame: &[u8], write_timeout: Duration) -> io::Result<()> {
        if !self.is_open() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("session {} is {:?}", self.id, self.state()),
            ));
        }
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(write_timeout, writer.write_all(frame)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write timed out after {}ms", write_timeout.as_millis()),
            )),
        }
    }

    /// Shut down the write side; the peer sees end-of-stream.
    pub(crate) async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of session {} writer failed: {e}", self.id);
        }
    }
}

/// What a receive loop needs from its server.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub registry: Arc<SessionRegistry>,
    pub events: EventDispatcher,
    pub shutdown: watch::Receiver<bool>,
    pub read_buffer_size: usize,
}

/// Receiving half of a session, consumed by [`Session::run`].
pub(crate) struct Session {
    handle: Arc<SessionHandle>,
    reader: OwnedReadHalf,
    framer: LineFramer,
}

impl Session {
    pub(crate) fn new(handle: Arc<SessionHandle>, reader: OwnedReadHalf, framer: LineFramer) -> Self {
        Self { handle, reader, framer }
    }

    /// Receive until end-of-stream, a read error, or shutdown; then remove
    /// the session from the registry, close the connection and announce
    /// the disconnect.
    pub(crate) async fn run(mut self, mut ctx: SessionContext) {
        let id = self.handle.id();
        let mut buf = vec![0u8; ctx.read_buffer_size.max(1)];

        let reason = loop {
            tokio::select! {
                biased;

                _ = shutdown_raised(&mut ctx.shutdown) => {
                    break DisconnectReason::ServerClosed;
                }

                read = self.reader.read(&mut buf) => {
                    match read {
                        Ok(0) => break DisconnectReason::PeerClosed,
                        Ok(n) => {
                            self.framer.push(&buf[..n]);
                            for text in self.framer.messages() {
                                debug!("Message from {id}: {} bytes", text.len());
                                ctx.events.emit(ServerEvent::MessageReceived { session_id: id, text });
                            }
                            if let Err(e) = self.framer.check_limit() {
                                let err = ServerError::ReceiveFailure {
                                    session_id: id,
                                    source: io::Error::new(io::ErrorKind::InvalidData, e),
                                };
                                warn!("{err}");
                                break DisconnectReason::ReceiveFailed { error: err.to_string() };
                            }
                        }
                        Err(source) => {
                            let err = ServerError::ReceiveFailure { session_id: id, source };
                            warn!("{err}");
                            break DisconnectReason::ReceiveFailed { error: err.to_string() };
                        }
                    }
                }
            }
        };

        if !self.framer.is_empty() {
            debug!(
                "Session {id} closed with {} unterminated bytes buffered",
                self.framer.buffered_len()
            );
        }

        ctx.registry.remove(&id);
        self.handle.advance(SessionState::Closed);
        self.handle.shutdown().await;
        info!("Session disconnected: {id} ({reason:?}, total: {})", ctx.registry.len());
        ctx.events.emit(ServerEvent::SessionDisconnected { session_id: id, reason });
    }
}

/// Resolves once the shutdown signal is raised or its sender is gone.
pub(crate) async fn shutdown_raised(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use linecast_protocol::SessionId;
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::net::{TcpListener, TcpStream};

    use super::SessionHandle;

    /// A server-side handle over a real loopback connection, plus the
    /// client end and the server's read half.
    pub(crate) async fn loopback_session() -> (Arc<SessionHandle>, OwnedReadHalf, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();
        let (reader, writer) = server_side.into_split();
        let handle = Arc::new(SessionHandle::new(SessionId::new(), peer, writer));
        (handle, reader, client)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::loopback_session;
    use super::*;
    use crate::dispatch::EventReceiver;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn context(registry: Arc<SessionRegistry>) -> (SessionContext, EventReceiver, watch::Sender<bool>) {
        let (events, receiver) = EventDispatcher::channel();
        let (shutdown_tx, shutdown) = watch::channel(false);
        let ctx = SessionContext {
            registry,
            events,
            shutdown,
            read_buffer_size: 1024,
        };
        (ctx, receiver, shutdown_tx)
    }

    async fn next_event(events: &mut EventReceiver) -> ServerEvent {
        timeout(WAIT, events.recv())
            .await
            .expect("Timeout waiting for event")
            .expect("Event channel closed")
    }

    #[tokio::test]
    async fn state_only_moves_forward() {
        let (handle, _reader, _client) = loopback_session().await;
        assert_eq!(handle.state(), SessionState::Open);
        assert!(handle.advance(SessionState::Closing));
        assert!(!handle.advance(SessionState::Open));
        assert_eq!(handle.state(), SessionState::Closing);
        assert!(handle.advance(SessionState::Closed));
        assert!(!handle.advance(SessionState::Closing));
        assert_eq!(handle.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn send_writes_frame_to_peer() {
        let (handle, _reader, mut client) = loopback_session().await;
        handle.send(b"ping\n", WAIT).await.unwrap();

        let mut buf = [0u8; 5];
        timeout(WAIT, client.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf, b"ping\n");
    }

    #[tokio::test]
    async fn send_refused_once_closing() {
        let (handle, _reader, _client) = loopback_session().await;
        handle.advance(SessionState::Closing);
        let err = handle.send(b"late\n", WAIT).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn info_reflects_handle() {
        let (handle, _reader, client) = loopback_session().await;
        let info = handle.info();
        assert_eq!(info.session_id, handle.id());
        assert_eq!(info.peer, client.local_addr().unwrap());
        assert_eq!(info.state, SessionState::Open);
    }

    #[tokio::test]
    async fn receive_loop_emits_every_message_then_disconnects() {
        let registry = Arc::new(SessionRegistry::new());
        let (handle, reader, mut client) = loopback_session().await;
        let id = handle.id();
        assert!(registry.insert(handle.clone()));

        let (ctx, mut events, _shutdown_tx) = context(registry.clone());
        let task = tokio::spawn(Session::new(handle.clone(), reader, LineFramer::new()).run(ctx));

        client.write_all(b"a\nb\npart").await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::MessageReceived { session_id: id, text: "a".into() }
        );
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::MessageReceived { session_id: id, text: "b".into() }
        );

        client.write_all(b"ial\n").await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::MessageReceived { session_id: id, text: "partial".into() }
        );

        drop(client);
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::SessionDisconnected { session_id: id, reason: DisconnectReason::PeerClosed }
        );
        timeout(WAIT, task).await.unwrap().unwrap();
        assert!(!registry.contains(&id));
        assert_eq!(handle.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn receive_loop_stops_on_shutdown_signal() {
        let registry = Arc::new(SessionRegistry::new());
        let (handle, reader, mut client) = loopback_session().await;
        let id = handle.id();
        registry.insert(handle.clone());

        let (ctx, mut events, shutdown_tx) = context(registry.clone());
        let task = tokio::spawn(Session::new(handle, reader, LineFramer::new()).run(ctx));

        shutdown_tx.send_replace(true);
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::SessionDisconnected { session_id: id, reason: DisconnectReason::ServerClosed }
        );
        timeout(WAIT, task).await.unwrap().unwrap();
        assert!(registry.is_empty());

        // The client sees end-of-stream.
        let mut buf = [0u8; 8];
        let n = timeout(WAIT, client.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn overlong_line_ends_session_as_receive_failure() {
        let registry = Arc::new(SessionRegistry::new());
        let (handle, reader, mut client) = loopback_session().await;
        let id = handle.id();
        registry.insert(handle.clone());

        let (ctx, mut events, _shutdown_tx) = context(registry.clone());
        let framer = LineFramer::with_max_line_length(8);
        let task = tokio::spawn(Session::new(handle, reader, framer).run(ctx));

        client.write_all(b"ok\nthis line never ends").await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::MessageReceived { session_id: id, text: "ok".into() }
        );
        match next_event(&mut events).await {
            ServerEvent::SessionDisconnected {
                session_id,
                reason: DisconnectReason::ReceiveFailed { error },
            } => {
                assert_eq!(session_id, id);
                assert!(error.contains("exceeds 8 bytes"), "unexpected error: {error}");
            }
            other => panic!("Expected receive failure, got {other:?}"),
        }
        timeout(WAIT, task).await.unwrap().unwrap();
        assert!(!registry.contains(&id));
    }
}
