//! WebSocket collaboration server.
//!
//! ```text
//!  TCP accept ──► upgrade (/api/arena/{boardId}, cookie userId | ?token=)
//!                    │
//!                    ├─ unknown credential ────────► close 4001
//!                    ├─ unknown board / bad path ──► close 4004
//!                    ├─ live session on board ─────► close 4003
//!                    ▼
//!        admission (serialised): join ─► init ─► Hub.register ─► user_joined
//!                    ▼
//!             ConnectionSession::run  (two pumps, one cleanup)
//! ```
//!
//! The hub, router and presence tracker are built once per server and handed
//! to every session; there is no process-global state.

use futures_util::StreamExt;
use std::collections::HashSet;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storyboard_core::PresenceEntry;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::gateway::{GatewayError, PersistenceGateway};
use crate::hub::{Hub, SessionHandle};
use crate::presence::{joined_event, PresenceTracker};
use crate::protocol::{
    Envelope, OutboundEvent, ProtocolError, CLOSE_DUPLICATE_SESSION, CLOSE_NOT_FOUND,
    CLOSE_UNAUTHORIZED, TAG_INIT,
};
use crate::router::EventRouter;
use crate::session::{
    ConnectionSession, SessionConfig, TeardownSignal, MIN_OUTBOUND_CAPACITY,
};
use crate::storage::StoreError;

const ARENA_PATH: &str = "/api/arena/";
const CREDENTIAL_COOKIE: &str = "userId";
const CREDENTIAL_QUERY: &str = "token";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Per-session outbound queue length before the session is dropped
    pub outbound_capacity: usize,
    /// Largest inbound message or frame accepted
    pub max_message_bytes: usize,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub write_wait: Duration,
    /// RocksDB directory (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            outbound_capacity: session.outbound_capacity,
            max_message_bytes: session.max_message_bytes,
            pong_wait: session.pong_wait,
            ping_period: session.ping_period,
            write_wait: session.write_wait,
            storage_path: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`; unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("LISTEN_ADDR").filter(|a| !a.trim().is_empty()) {
            config.bind_addr = addr.trim().to_string();
        } else if let Some(port) = parse_var::<u16>(&lookup, "PORT") {
            config.bind_addr = format!("0.0.0.0:{port}");
        }
        if let Some(capacity) = parse_var::<usize>(&lookup, "OUTBOUND_QUEUE_CAPACITY") {
            if capacity < MIN_OUTBOUND_CAPACITY {
                log::warn!(
                    "OUTBOUND_QUEUE_CAPACITY={capacity} cannot hold the join greeting; using {MIN_OUTBOUND_CAPACITY}"
                );
            }
            config.outbound_capacity = capacity.max(MIN_OUTBOUND_CAPACITY);
        }
        if let Some(bytes) = parse_var(&lookup, "MAX_MESSAGE_BYTES") {
            config.max_message_bytes = bytes;
        }
        if let Some(secs) = parse_var(&lookup, "PONG_WAIT_SECS") {
            config.pong_wait = Duration::from_secs(secs);
            config.ping_period = config.pong_wait * 9 / 10;
        }
        if let Some(secs) = parse_var(&lookup, "PING_PERIOD_SECS") {
            config.ping_period = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "WRITE_WAIT_SECS") {
            config.write_wait = Duration::from_secs(secs);
        }
        if let Some(path) = lookup("STORAGE_PATH").filter(|p| !p.trim().is_empty()) {
            config.storage_path = Some(PathBuf::from(path));
        }

        if config.ping_period >= config.pong_wait {
            log::warn!(
                "Ping period {:?} is not shorter than pong wait {:?}; idle peers will time out",
                config.ping_period,
                config.pong_wait
            );
        }
        config
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            outbound_capacity: self.outbound_capacity,
            max_message_bytes: self.max_message_bytes,
            pong_wait: self.pong_wait,
            ping_period: self.ping_period,
            write_wait: self.write_wait,
        }
    }

    fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_bytes))
            .max_frame_size(Some(self.max_message_bytes))
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Ignoring {key}={raw:?}: {e}");
            None
        }
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_handshakes: u64,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_handshakes: AtomicU64,
}

/// What the upgrade request told us.
#[derive(Debug, Clone, Default, PartialEq)]
struct HandshakeRequest {
    path: String,
    query: Option<String>,
    cookies: Vec<String>,
}

impl HandshakeRequest {
    fn from_request(request: &Request) -> Self {
        Self {
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            cookies: request
                .headers()
                .get_all(COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .map(str::to_string)
                .collect(),
        }
    }

    fn board_id(&self) -> Option<Uuid> {
        let id = self.path.strip_prefix(ARENA_PATH)?.trim_end_matches('/');
        Uuid::parse_str(id).ok()
    }

    /// The `userId` cookie, falling back to the `token` query parameter.
    fn credential(&self) -> Option<String> {
        let from_cookie = self
            .cookies
            .iter()
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == CREDENTIAL_COOKIE)
            .map(|(_, value)| value.trim().to_string());

        from_cookie
            .or_else(|| {
                self.query
                    .as_deref()?
                    .split('&')
                    .filter_map(|pair| pair.split_once('='))
                    .find(|(name, _)| *name == CREDENTIAL_QUERY)
                    .map(|(_, value)| value.to_string())
            })
            .filter(|credential| !credential.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    Unauthorized,
    NotFound,
    DuplicateSession,
    Internal,
}

impl Rejection {
    fn close_frame(self) -> CloseFrame {
        let (code, reason) = match self {
            Rejection::Unauthorized => (CLOSE_UNAUTHORIZED, "unauthorized"),
            Rejection::NotFound => (CLOSE_NOT_FOUND, "storyboard not found"),
            Rejection::DuplicateSession => (CLOSE_DUPLICATE_SESSION, "duplicate session"),
            Rejection::Internal => (1011, "internal error"),
        };
        CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        }
    }
}

/// A session that passed the handshake and is already registered.
struct Admission {
    conn_id: Uuid,
    board_id: Uuid,
    user_id: Uuid,
    outbound: mpsc::Receiver<Arc<Envelope>>,
    teardown: TeardownSignal,
}

struct ServerInner {
    config: ServerConfig,
    hub: Arc<Hub>,
    gateway: Arc<dyn PersistenceGateway>,
    router: Arc<EventRouter>,
    presence: PresenceTracker,
    /// `(board, user)` pairs with a session that has not finished cleanup.
    /// Holding the lock serialises duplicate check → join → register.
    admission: Mutex<HashSet<(Uuid, Uuid)>>,
    stats: AtomicServerStats,
}

pub struct CollabServer {
    inner: Arc<ServerInner>,
}

impl CollabServer {
    pub fn new(config: ServerConfig, gateway: Arc<dyn PersistenceGateway>) -> Self {
        let router = Arc::new(EventRouter::new(gateway.clone()));
        let presence = PresenceTracker::new(gateway.clone());
        Self {
            inner: Arc::new(ServerInner {
                config,
                hub: Arc::new(Hub::new()),
                gateway,
                router,
                presence,
                admission: Mutex::new(HashSet::new()),
                stats: AtomicServerStats::default(),
            }),
        }
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.inner.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        log::info!("Storyboard hub listening on {}", listener.local_addr()?);
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");
            let inner = self.inner.clone();
            tokio::spawn(async move {
                inner.handle_connection(stream, addr).await;
            });
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.inner.hub
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> ServerStats {
        let stats = &self.inner.stats;
        ServerStats {
            total_connections: stats.total_connections.load(Ordering::Relaxed),
            active_connections: stats.active_connections.load(Ordering::Relaxed),
            rejected_handshakes: stats.rejected_handshakes.load(Ordering::Relaxed),
        }
    }
}

impl ServerInner {
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);

        let mut request = HandshakeRequest::default();
        let capture = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
            request = HandshakeRequest::from_request(req);
            Ok(response)
        };
        let ws = match tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            capture,
            Some(self.config.websocket_config()),
        )
        .await
        {
            Ok(ws) => ws,
            Err(e) => {
                log::debug!("WebSocket upgrade from {addr} failed: {e}");
                return;
            }
        };

        let admission = match self.admit(&request).await {
            Ok(admission) => admission,
            Err(rejection) => {
                self.stats.rejected_handshakes.fetch_add(1, Ordering::Relaxed);
                log::info!("Rejected {addr} on {}: {rejection:?}", request.path);
                reject(ws, rejection).await;
                return;
            }
        };

        log::info!(
            "User {} joined board {} from {addr} (session {})",
            admission.user_id,
            admission.board_id,
            admission.conn_id
        );
        self.stats.active_connections.fetch_add(1, Ordering::Relaxed);

        let session = ConnectionSession {
            conn_id: admission.conn_id,
            board_id: admission.board_id,
            user_id: admission.user_id,
            config: self.config.session_config(),
            hub: self.hub.clone(),
            router: self.router.clone(),
            presence: self.presence.clone(),
            teardown: admission.teardown,
        };
        session.run(ws, admission.outbound).await;
        self.release(admission.board_id, admission.user_id).await;

        self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    async fn admit(&self, request: &HandshakeRequest) -> Result<Admission, Rejection> {
        let credential = request.credential().ok_or(Rejection::Unauthorized)?;
        let user = self.gateway.resolve_user(&credential).map_err(|e| {
            log::debug!("Credential rejected: {e}");
            Rejection::Unauthorized
        })?;
        let board_id = request.board_id().ok_or(Rejection::NotFound)?;
        self.gateway
            .board_snapshot(board_id)
            .map_err(|_| Rejection::NotFound)?;

        let mut live = self.admission.lock().await;
        if live.contains(&(board_id, user.id)) {
            return Err(Rejection::DuplicateSession);
        }
        // A failed leave can leave the stored flag set with nobody connected.
        if matches!(self.gateway.member(board_id, user.id), Ok(Some(m)) if m.active) {
            log::warn!("User {} was still marked active on board {board_id}", user.id);
        }

        let users = self.presence.join(board_id, user.id).map_err(|e| {
            log::warn!("Failed to join {} to board {board_id}: {e}", user.id);
            Rejection::NotFound
        })?;

        let (init, joined) = match self.greetings(board_id, user.id, &users) {
            Ok(greetings) => greetings,
            Err(e) => {
                log::error!("Failed to build greeting for board {board_id}: {e}");
                if let Err(e) = self.presence.leave(board_id, user.id) {
                    log::warn!("Failed to undo join of {}: {e}", user.id);
                }
                return Err(Rejection::Internal);
            }
        };

        let conn_id = Uuid::new_v4();
        let teardown = TeardownSignal::new();
        let capacity = self.config.outbound_capacity.max(MIN_OUTBOUND_CAPACITY);
        let (tx, outbound) = mpsc::channel(capacity);
        // A fresh queue has room for `init` and `user_joined`, in that order.
        if tx.try_send(Arc::new(init)).is_err() {
            log::error!("Could not queue init for session {conn_id}");
        }

        self.hub
            .register(
                board_id,
                SessionHandle::new(conn_id, user.id, tx, teardown.clone()),
            )
            .await;
        self.hub.broadcast(board_id, Arc::new(joined)).await;
        live.insert((board_id, user.id));

        Ok(Admission {
            conn_id,
            board_id,
            user_id: user.id,
            outbound,
            teardown,
        })
    }

    /// Allow the user back onto the board once their session has cleaned up.
    async fn release(&self, board_id: Uuid, user_id: Uuid) {
        self.admission.lock().await.remove(&(board_id, user_id));
    }

    /// `init` for the joiner and `user_joined` for the board.
    fn greetings(
        &self,
        board_id: Uuid,
        user_id: Uuid,
        users: &[PresenceEntry],
    ) -> Result<(Envelope, Envelope), GreetingError> {
        let snapshot = self.gateway.board_snapshot(board_id)?;
        let init = OutboundEvent::with_value(TAG_INIT, &snapshot, Some(user_id))?;
        let joined = joined_event(user_id, users)?;
        Ok((
            Envelope::new(board_id, &init)?,
            Envelope::new(board_id, &joined)?,
        ))
    }
}

#[derive(Debug, Error)]
enum GreetingError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Send the rejection close frame, give the peer a moment to answer, drop.
async fn reject(mut ws: WebSocketStream<TcpStream>, rejection: Rejection) {
    if let Err(e) = ws.close(Some(rejection.close_frame())).await {
        log::debug!("Failed to send rejection: {e}");
        return;
    }
    let drain = async { while let Some(Ok(_)) = ws.next().await {} };
    let _ = tokio::time::timeout(Duration::from_secs(1), drain).await;
}
