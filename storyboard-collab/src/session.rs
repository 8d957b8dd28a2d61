//! One live board connection: two pumps and a single teardown.
//!
//! ```text
//!            ┌──────────────┐  dispatch   ┌─────────────┐  broadcast  ┌─────┐
//! socket ──► │ inbound pump │ ──────────► │ EventRouter │ ──────────► │ Hub │
//!            └──────┬───────┘             └─────────────┘             └──┬──┘
//!                   │ teardown signal                                    │
//!            ┌──────┴───────┐   bounded queue (Arc<Envelope>)            │
//! socket ◄── │ outbound pump│ ◄──────────────────────────────────────────┘
//!            └──────────────┘   + ping every `ping_period`
//! ```
//!
//! Each pump runs in its own task. Whichever stops first triggers the shared
//! [`TeardownSignal`]; the other observes it and stops too. Once both tasks
//! have joined (a panic surfaces as a `JoinError` and stays local to this
//! connection), cleanup runs exactly once: presence leave, `user_retreated`
//! broadcast, hub unregister, close frame.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::hub::Hub;
use crate::presence::{retreated_event, PresenceTracker};
use crate::protocol::{Envelope, InboundFrame, CLOSE_ABANDONED};
use crate::router::{Dispatch, EventRouter};

/// Why a session ended. The first reason recorded wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    PeerClosed,
    TransportError,
    ReadTimeout,
    WriteFailed,
    Oversized,
    Saturated,
    Abandoned,
}

impl TeardownReason {
    pub fn close_code(self) -> u16 {
        match self {
            TeardownReason::Oversized => 1009,
            TeardownReason::Saturated => 1013,
            TeardownReason::Abandoned => CLOSE_ABANDONED,
            TeardownReason::PeerClosed
            | TeardownReason::TransportError
            | TeardownReason::ReadTimeout
            | TeardownReason::WriteFailed => 1000,
        }
    }

    fn close_reason(self) -> &'static str {
        match self {
            TeardownReason::Oversized => "message too big",
            TeardownReason::Saturated => "outbound queue saturated",
            TeardownReason::Abandoned => "abandoned",
            _ => "",
        }
    }
}

/// Shared stop flag observed by both pumps.
#[derive(Clone, Debug)]
pub struct TeardownSignal {
    tx: Arc<watch::Sender<Option<TeardownReason>>>,
}

impl Default for TeardownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl TeardownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record `reason` unless another reason was recorded first.
    pub fn trigger(&self, reason: TeardownReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn reason(&self) -> Option<TeardownReason> {
        *self.tx.borrow()
    }

    /// Resolves once a reason has been recorded.
    pub async fn triggered(&self) -> TeardownReason {
        let mut rx = self.tx.subscribe();
        // Copy out before `rx` drops; the `Ref` borrows from it.
        let reason = rx.wait_for(Option::is_some).await.map(|reason| *reason);
        match reason {
            Ok(reason) => reason.unwrap_or(TeardownReason::TransportError),
            // The sender lives in `self`, so this arm is unreachable in practice.
            Err(_) => TeardownReason::TransportError,
        }
    }
}

/// Triggers teardown when a pump exits, including by panic.
struct TriggerOnDrop {
    signal: TeardownSignal,
    fallback: TeardownReason,
}

impl Drop for TriggerOnDrop {
    fn drop(&mut self) {
        self.signal.trigger(self.fallback);
    }
}

/// Smallest usable outbound queue: a joiner is sent `init` and its own
/// `user_joined` before its outbound pump starts draining.
pub const MIN_OUTBOUND_CAPACITY: usize = 2;

/// Timing and size limits for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub outbound_capacity: usize,
    pub max_message_bytes: usize,
    /// Read deadline, refreshed by every pong.
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub write_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            outbound_capacity: 256,
            max_message_bytes: 1024 * 1024,
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(10),
        }
    }
}

/// Everything a session needs besides its socket.
pub struct ConnectionSession {
    pub conn_id: Uuid,
    pub board_id: Uuid,
    pub user_id: Uuid,
    pub config: SessionConfig,
    pub hub: Arc<Hub>,
    pub router: Arc<EventRouter>,
    pub presence: PresenceTracker,
    pub teardown: TeardownSignal,
}

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;

impl ConnectionSession {
    /// Drive the connection until teardown, then clean up.
    ///
    /// The session must already be registered with the hub; `outbound` is the
    /// receiving end of the queue the hub delivers into.
    pub async fn run<S>(
        self,
        ws: WebSocketStream<S>,
        outbound: mpsc::Receiver<Arc<Envelope>>,
    ) -> TeardownReason
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();

        let inbound = tokio::spawn(inbound_pump(
            stream,
            self.board_id,
            self.user_id,
            self.config.pong_wait,
            self.hub.clone(),
            self.router.clone(),
            self.teardown.clone(),
        ));
        let outbound = tokio::spawn(outbound_pump(
            sink,
            outbound,
            self.config.ping_period,
            self.config.write_wait,
            self.teardown.clone(),
        ));

        let (inbound_result, outbound_result) = tokio::join!(inbound, outbound);
        if let Err(e) = inbound_result {
            log::error!("Inbound pump for session {} failed: {e}", self.conn_id);
        }
        let sink = match outbound_result {
            Ok(sink) => Some(sink),
            Err(e) => {
                log::error!("Outbound pump for session {} failed: {e}", self.conn_id);
                None
            }
        };

        let reason = self.teardown.reason().unwrap_or(TeardownReason::TransportError);
        self.cleanup(reason, sink).await;
        reason
    }

    async fn cleanup<S>(&self, reason: TeardownReason, sink: Option<WsSink<S>>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let users = match self.presence.leave(self.board_id, self.user_id) {
            Ok(users) => users,
            Err(e) => {
                log::warn!(
                    "Failed to record leave of {} on board {}: {e}",
                    self.user_id,
                    self.board_id
                );
                self.presence.snapshot(self.board_id).unwrap_or_default()
            }
        };
        match retreated_event(self.user_id, &users).and_then(|e| Envelope::new(self.board_id, &e)) {
            Ok(envelope) => {
                self.hub.broadcast(self.board_id, Arc::new(envelope)).await;
            }
            Err(e) => log::error!("Failed to encode user_retreated: {e}"),
        }

        self.hub.unregister(self.board_id, self.conn_id).await;

        if let Some(mut sink) = sink {
            let frame = CloseFrame {
                code: CloseCode::from(reason.close_code()),
                reason: reason.close_reason().into(),
            };
            let closing = async {
                sink.send(Message::Close(Some(frame))).await?;
                sink.close().await
            };
            // Best effort: the peer may already be gone.
            let _ = time::timeout(self.config.write_wait, closing).await;
        }

        log::info!(
            "Session {} (user {}) left board {} ({reason:?})",
            self.conn_id,
            self.user_id,
            self.board_id
        );
    }
}

async fn inbound_pump<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    board_id: Uuid,
    user_id: Uuid,
    pong_wait: Duration,
    hub: Arc<Hub>,
    router: Arc<EventRouter>,
    teardown: TeardownSignal,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _guard = TriggerOnDrop {
        signal: teardown.clone(),
        fallback: TeardownReason::TransportError,
    };
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = tokio::select! {
            biased;
            _ = teardown.triggered() => return,
            next = time::timeout_at(deadline, stream.next()) => next,
        };

        let text = match next {
            Err(_) => {
                log::info!("Read deadline expired for {user_id} on board {board_id}");
                teardown.trigger(TeardownReason::ReadTimeout);
                return;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => {
                teardown.trigger(TeardownReason::PeerClosed);
                return;
            }
            Ok(Some(Err(WsError::Capacity(e)))) => {
                log::warn!("Oversized message from {user_id} on board {board_id}: {e}");
                teardown.trigger(TeardownReason::Oversized);
                return;
            }
            Ok(Some(Err(e))) => {
                log::debug!("Transport error for {user_id} on board {board_id}: {e}");
                teardown.trigger(TeardownReason::TransportError);
                return;
            }
            Ok(Some(Ok(Message::Pong(_)))) => {
                deadline = Instant::now() + pong_wait;
                log::trace!("Pong from {user_id}");
                continue;
            }
            Ok(Some(Ok(Message::Text(text)))) => text.as_str().to_owned(),
            Ok(Some(Ok(Message::Binary(data)))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    log::warn!("Dropping non-UTF-8 binary frame from {user_id}");
                    continue;
                }
            },
            Ok(Some(Ok(_))) => continue,
        };

        let frame = match InboundFrame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Dropping frame from {user_id} on board {board_id}: {e}");
                continue;
            }
        };

        match router.dispatch(board_id, user_id, &frame) {
            Dispatch::Broadcast(event) => match Envelope::new(board_id, &event) {
                Ok(envelope) => {
                    hub.broadcast(board_id, Arc::new(envelope)).await;
                }
                Err(e) => log::error!("Failed to encode {}: {e}", event.tag),
            },
            Dispatch::Silent => {}
            Dispatch::Abandon => {
                teardown.trigger(TeardownReason::Abandoned);
                return;
            }
        }
    }
}

async fn outbound_pump<S>(
    mut sink: WsSink<S>,
    mut queue: mpsc::Receiver<Arc<Envelope>>,
    ping_period: Duration,
    write_wait: Duration,
    teardown: TeardownSignal,
) -> WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _guard = TriggerOnDrop {
        signal: teardown.clone(),
        fallback: TeardownReason::WriteFailed,
    };
    let mut ping = time::interval_at(Instant::now() + ping_period, ping_period);

    loop {
        let message = tokio::select! {
            biased;
            _ = teardown.triggered() => break,
            envelope = queue.recv() => match envelope {
                Some(envelope) => Message::text(envelope.payload.clone()),
                None => {
                    teardown.trigger(TeardownReason::PeerClosed);
                    break;
                }
            },
            _ = ping.tick() => Message::Ping(Default::default()),
        };

        // A stalled peer must not hold the pump past a teardown raised elsewhere.
        let written = tokio::select! {
            biased;
            _ = teardown.triggered() => break,
            written = time::timeout(write_wait, sink.send(message)) => written,
        };
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::debug!("Write failed: {e}");
                teardown.trigger(TeardownReason::WriteFailed);
                break;
            }
            Err(_) => {
                log::warn!("Write deadline expired");
                teardown.trigger(TeardownReason::WriteFailed);
                break;
            }
        }
    }
    sink
}
