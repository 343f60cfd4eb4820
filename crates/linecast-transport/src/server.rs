//! TCP line server.
//!
//! Owns the listener, the accept loop, the session registry and the
//! shutdown signal. One tokio task accepts; one tokio task per session
//! receives. Sends go straight to the registered sessions' write halves.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use linecast_protocol::{DisconnectReason, LineFramer, ServerEvent, SessionId, encode_line};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::dispatch::{EventDispatcher, EventReceiver};
use crate::error::ServerError;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionContext, SessionHandle, SessionInfo, SessionState, shutdown_raised};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub hostname: String,
    /// Bytes requested per socket read
    pub read_buffer_size: usize,
    /// Upper bound on a single write to one session
    pub write_timeout: Duration,
    /// Maximum concurrent sessions; extra connections are closed on accept
    pub max_connections: Option<usize>,
    /// Longest unterminated line a session may buffer before it is dropped
    pub max_line_length: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".into(),
            read_buffer_size: 1024,
            write_timeout: Duration::from_secs(5),
            max_connections: None,
            max_line_length: None,
        }
    }
}

/// State that exists only while the server is open.
struct Listening {
    port: u16,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// The line server. Build with [`LineServer::new`], then `open`/`close`
/// as often as needed; events for every open period go to the same
/// [`EventReceiver`].
pub struct LineServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    events: EventDispatcher,
    listening: Mutex<Option<Listening>>,
    /// Bound port, 0 while closed
    port: AtomicU16,
}

impl LineServer {
    /// Create an idle server and the receiver for its events.
    pub fn new(config: ServerConfig) -> (Self, EventReceiver) {
        let (events, receiver) = EventDispatcher::channel();
        let server = Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            events,
            listening: Mutex::new(None),
            port: AtomicU16::new(0),
        };
        (server, receiver)
    }

    /// Bind `hostname:port` and start accepting. Port 0 picks a free port.
    /// Returns the bound port.
    pub async fn open(&self, port: u16) -> Result<u16, ServerError> {
        let mut listening = self.listening.lock().await;
        if let Some(current) = listening.as_ref() {
            return Err(ServerError::AlreadyOpen { port: current.port });
        }

        let addr = format!("{}:{}", self.config.hostname, port);
        let listener = TcpListener::bind((self.config.hostname.as_str(), port))
            .await
            .map_err(|source| ServerError::BindFailure { addr: addr.clone(), source })?;
        let actual_port = listener
            .local_addr()
            .map_err(|source| ServerError::BindFailure { addr, source })?
            .port();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let acceptor = Acceptor {
            config: self.config.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
            shutdown: shutdown_rx,
        };
        let accept_task = tokio::spawn(acceptor.run(listener));

        info!("Linecast server listening on {}:{actual_port}", self.config.hostname);

        *listening = Some(Listening {
            port: actual_port,
            shutdown_tx,
            accept_task,
        });
        self.port.store(actual_port, Ordering::Release);
        Ok(actual_port)
    }

    /// Stop accepting, close every session and wait for all loops to end.
    /// Does nothing if the server is not open.
    pub async fn close(&self) {
        let mut listening = self.listening.lock().await;
        let Some(current) = listening.take() else {
            debug!("Close requested while not open");
            return;
        };

        info!("Linecast server on port {} closing", current.port);
        current.shutdown_tx.send_replace(true);
        for session in self.registry.snapshot() {
            session.advance(SessionState::Closing);
        }

        if let Err(e) = current.accept_task.await {
            error!("Accept loop ended abnormally: {e}");
        }

        // Receive loops remove themselves; anything left had its task die.
        for session in self.registry.clear() {
            warn!("Session {} still registered after shutdown", session.id());
            session.advance(SessionState::Closed);
            session.shutdown().await;
            self.events.emit(ServerEvent::SessionDisconnected {
                session_id: session.id(),
                reason: DisconnectReason::ServerClosed,
            });
        }

        self.port.store(0, Ordering::Release);
        info!("Linecast server on port {} stopped", current.port);
    }

    /// Send `text` to every open session. Delivery failures are logged per
    /// session and do not stop the others. Returns how many sessions the
    /// message was written to.
    pub async fn broadcast(&self, text: &str) -> Result<usize, ServerError> {
        let frame = encode_line(text)?;
        let sessions: Vec<Arc<SessionHandle>> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|s| s.is_open())
            .collect();
        if sessions.is_empty() {
            return Ok(0);
        }

        let timeout = self.config.write_timeout;
        let results = join_all(sessions.iter().map(|s| s.send(&frame, timeout))).await;

        let mut delivered = 0;
        for (session, result) in sessions.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(source) => {
                    let err = ServerError::SendFailure { session_id: session.id(), source };
                    warn!("Broadcast delivery failed: {err}");
                }
            }
        }
        debug!("Broadcast {} bytes to {delivered}/{} sessions", frame.len(), sessions.len());
        Ok(delivered)
    }

    /// Send `text` to one session.
    pub async fn send_to(&self, id: SessionId, text: &str) -> Result<(), ServerError> {
        let frame = encode_line(text)?;
        let session = self
            .registry
            .get(&id)
            .filter(|s| s.is_open())
            .ok_or(ServerError::SessionNotFound(id))?;
        session
            .send(&frame, self.config.write_timeout)
            .await
            .map_err(|source| ServerError::SendFailure { session_id: id, source })
    }

    /// Open sessions, oldest first.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.infos()
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn contains_session(&self, id: &SessionId) -> bool {
        self.registry.contains(id)
    }

    /// Bound port while open.
    pub fn local_port(&self) -> Option<u16> {
        match self.port.load(Ordering::Acquire) {
            0 => None,
            port => Some(port),
        }
    }

    pub fn is_open(&self) -> bool {
        self.local_port().is_some()
    }
}

impl Drop for LineServer {
    /// Without an explicit `close` the loops are only signalled, not awaited.
    fn drop(&mut self) {
        if let Some(current) = self.listening.get_mut().take() {
            current.shutdown_tx.send_replace(true);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Accept loop
// ─────────────────────────────────────────────────────────────────────────────

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Source of incoming connections for the accept loop.
pub(crate) trait Accept: Send + Sync + 'static {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

struct Acceptor {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    events: EventDispatcher,
    shutdown: watch::Receiver<bool>,
}

impl Acceptor {
    async fn run<L: Accept>(mut self, listener: L) {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_raised(&mut self.shutdown) => break,

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Session task failed: {e}");
                    }
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.admit(stream, peer, &mut sessions),
                        Err(source) => {
                            warn!("{}", ServerError::AcceptFailure(source));
                            tokio::select! {
                                _ = shutdown_raised(&mut self.shutdown) => break,
                                _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                            }
                        }
                    }
                }
            }
        }

        drop(listener);
        debug!("Listener closed, waiting for {} session tasks", sessions.len());
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Session task failed: {e}");
            }
        }
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr, sessions: &mut JoinSet<()>) {
        if let Some(max) = self.config.max_connections {
            if self.registry.len() >= max {
                warn!("Connection from {peer} rejected: max connections reached ({max})");
                return;
            }
        }

        let (reader, writer) = stream.into_split();

        // Only this loop inserts, so an id absent here stays free until insert.
        let id = loop {
            let id = SessionId::new();
            if !self.registry.contains(&id) {
                break id;
            }
        };
        let handle = Arc::new(SessionHandle::new(id, peer, writer));
        if !self.registry.insert(handle.clone()) {
            error!("Session id {id} already registered, dropping connection from {peer}");
            return;
        }

        info!("Session connected: {id} from {peer} (total: {})", self.registry.len());
        self.events.emit(ServerEvent::SessionConnected { session_id: id, peer });

        let framer = match self.config.max_line_length {
            Some(limit) => LineFramer::with_max_line_length(limit),
            None => LineFramer::new(),
        };
        let ctx = SessionContext {
            registry: self.registry.clone(),
            events: self.events.clone(),
            shutdown: self.shutdown.clone(),
            read_buffer_size: self.config.read_buffer_size,
        };
        sessions.spawn(Session::new(handle, reader, framer).run(ctx));
    }
}
