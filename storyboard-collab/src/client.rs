//! WebSocket client for a single board.
//!
//! Used by tooling and the integration tests. The socket is split into a
//! writer task fed by an mpsc queue and a reader task that turns server
//! frames into [`ClientEvent`]s; the reader always finishes with exactly one
//! `Closed` event unless the client was aborted.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{BoardCommand, OutboundEvent, ProtocolError};

const EVENT_QUEUE: usize = 256;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Connection closed")]
    ConnectionClosed,
}

/// What the server told us.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Event(OutboundEvent),
    /// The connection ended; `code` is the close code if the server sent one.
    Closed { code: Option<u16> },
}

enum Outgoing {
    Text(String),
    Close,
}

pub struct BoardClient {
    board_id: Uuid,
    outgoing: mpsc::Sender<Outgoing>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl BoardClient {
    /// Connect to `{base_url}/api/arena/{board_id}` presenting `credential`
    /// as the `userId` cookie.
    pub async fn connect(
        base_url: &str,
        board_id: Uuid,
        credential: &str,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), ClientError> {
        let mut request = arena_url(base_url, board_id).into_client_request()?;
        let cookie = HeaderValue::from_str(&format!("userId={credential}"))
            .map_err(|e| ClientError::InvalidHeader(e.to_string()))?;
        request.headers_mut().insert(COOKIE, cookie);

        let (ws, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Outgoing>(EVENT_QUEUE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);

        let writer = tokio::spawn(async move {
            while let Some(outgoing) = out_rx.recv().await {
                let message = match outgoing {
                    Outgoing::Text(text) => Message::Text(text.into()),
                    Outgoing::Close => Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    })),
                };
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    log::debug!("Client write failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            let mut code = None;
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match OutboundEvent::decode(&text) {
                        Ok(event) => {
                            if event_tx.send(ClientEvent::Event(event)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => log::warn!("Ignoring undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(frame)) => {
                        code = frame.map(|f| u16::from(f.code));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::debug!("Client read failed: {e}");
                        break;
                    }
                }
            }
            let _ = event_tx.send(ClientEvent::Closed { code }).await;
        });

        Ok((
            Self {
                board_id,
                outgoing: out_tx,
                reader,
                writer,
            },
            event_rx,
        ))
    }

    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    /// Encode `command` as an inbound frame and send it.
    pub async fn send(&self, command: &BoardCommand) -> Result<(), ClientError> {
        let text = command.to_frame()?.encode()?;
        self.send_raw(text).await
    }

    /// Send arbitrary text, valid or not.
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.outgoing
            .send(Outgoing::Text(text.into()))
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Send a normal close frame; the server's reply ends the event stream.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.outgoing
            .send(Outgoing::Close)
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Drop the socket without a close frame.
    pub fn abort(self) {
        self.writer.abort();
        self.reader.abort();
    }
}

fn arena_url(base_url: &str, board_id: Uuid) -> String {
    format!("{}/api/arena/{board_id}", base_url.trim_end_matches('/'))
}
