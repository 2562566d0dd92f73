//! WebSocket transport for the collaboration channel.
//!
//! [`connect`] opens the socket and spawns two tasks:
//! - a writer draining a bounded queue of outgoing frames, so
//!   [`WsTransport::send_text`] never blocks the caller
//! - a reader forwarding text and close frames as [`InboundFrame`]s
//!
//! The auth token, if any, is sent as an `Authorization: Bearer` header on
//! the upgrade request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};

use crate::adapter::Transport;
use crate::config::ConnectionParams;
use crate::error::CollabError;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// What the reader task hands to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// The socket closed. `None` when it dropped without a close frame.
    Closed(Option<u16>),
}

enum Outgoing {
    Text(String),
    Close,
}

/// Sending half of an open WebSocket.
pub struct WsTransport {
    outgoing_tx: mpsc::Sender<Outgoing>,
    open: Arc<AtomicBool>,
}

impl Transport for WsTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outgoing_tx.is_closed()
    }

    fn send_text(&mut self, frame: String) -> Result<(), CollabError> {
        self.outgoing_tx
            .try_send(Outgoing::Text(frame))
            .map_err(|e| match e {
                TrySendError::Full(_) => CollabError::Connection("outgoing queue full".into()),
                TrySendError::Closed(_) => CollabError::ChannelClosed,
            })
    }

    fn close(&mut self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.outgoing_tx.try_send(Outgoing::Close);
        }
    }
}

/// An open channel: the transport plus the inbound frame stream.
pub struct Connection {
    pub transport: WsTransport,
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// Open a WebSocket to `params.url`.
pub async fn connect(
    params: &ConnectionParams,
    token: Option<&str>,
    outgoing_capacity: usize,
) -> Result<Connection, CollabError> {
    let mut request = params
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| CollabError::Connection(e.to_string()))?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| CollabError::Connection(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| CollabError::Connection(e.to_string()))?;
    log::info!("WebSocket open: {}", params.label());

    let (mut ws_writer, mut ws_reader) = ws_stream.split();
    let open = Arc::new(AtomicBool::new(true));

    // Writer task: forward outgoing queue to the socket
    let (out_tx, mut out_rx) = mpsc::channel::<Outgoing>(outgoing_capacity.max(1));
    tokio::spawn(async move {
        while let Some(outgoing) = out_rx.recv().await {
            match outgoing {
                Outgoing::Text(text) => {
                    if ws_writer.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outgoing::Close => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: Utf8Bytes::from_static(""),
                    };
                    let _ = ws_writer.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    // Reader task: forward text and close frames
    let (in_tx, in_rx) = mpsc::channel::<InboundFrame>(outgoing_capacity.max(1));
    let reader_open = open.clone();
    tokio::spawn(async move {
        let mut code = None;
        while let Some(msg) = ws_reader.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if in_tx.send(InboundFrame::Text(text.as_str().to_owned())).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    code = frame.map(|f| u16::from(f.code));
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    log::debug!("WebSocket read error: {e}");
                    break;
                }
            }
        }
        reader_open.store(false, Ordering::Release);
        let _ = in_tx.send(InboundFrame::Closed(code)).await;
    });

    Ok(Connection {
        transport: WsTransport {
            outgoing_tx: out_tx,
            open,
        },
        inbound: in_rx,
    })
}
