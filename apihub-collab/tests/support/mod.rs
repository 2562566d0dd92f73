//! In-test collaboration server and helpers.
//!
//! The server keeps one document room: it sequences client operations by
//! transforming them against everything applied since their base revision,
//! broadcasts the result to every session (the sender included, which is
//! its ack) and relays presence.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use apihub_collab::presence::fallback_color;
use apihub_collab::{
    ClientMessage, CollabError, CollabEvent, CollabSession, ConnectionParams, Cursor,
    CursorChange, EventKind, Operation, PlainTextWidget, ReconnectPolicy, ServerMessage,
    SessionConfig, SessionHandle, TextWidget, UserInfo,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use uuid::Uuid;

/// Revision of the initial document, so tests don't start at zero.
pub const BASE_REVISION: u64 = 10;

struct Client {
    user: UserInfo,
    color: String,
    tx: mpsc::UnboundedSender<Message>,
}

struct Room {
    content: String,
    history: Vec<Operation>,
    clients: HashMap<String, Client>,
    auth_headers: Vec<Option<String>>,
    connections: usize,
    /// While paused, operations queue up here instead of being sequenced.
    paused: bool,
    pending: Vec<(String, u64, Operation)>,
    /// Sent verbatim instead of the snapshot when set.
    raw_snapshot: Option<String>,
}

impl Room {
    fn revision(&self) -> u64 {
        BASE_REVISION + self.history.len() as u64
    }

    fn send_to(tx: &mpsc::UnboundedSender<Message>, message: &ServerMessage) {
        let _ = tx.send(Message::Text(message.encode().unwrap().into()));
    }

    fn broadcast(&self, message: &ServerMessage, except: Option<&str>) {
        for (session_id, client) in &self.clients {
            if Some(session_id.as_str()) != except {
                Self::send_to(&client.tx, message);
            }
        }
    }

    fn receive(&mut self, session_id: &str, revision: u64, mut operation: Operation) {
        let start = (revision - BASE_REVISION) as usize;
        for concurrent in &self.history[start..] {
            operation = operation.transform(concurrent).unwrap().0;
        }
        self.content = operation.apply(&self.content).unwrap();
        let applied_at = self.revision();
        self.history.push(operation.clone());
        self.broadcast(
            &ServerMessage::UserOperation {
                revision: applied_at,
                operation,
                session_id: Some(session_id.to_owned()),
            },
            None,
        );
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    room: Arc<Mutex<Room>>,
}

impl MockServer {
    pub async fn start(initial: &str) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let room = Arc::new(Mutex::new(Room {
            content: initial.to_owned(),
            history: Vec::new(),
            clients: HashMap::new(),
            auth_headers: Vec::new(),
            connections: 0,
            paused: false,
            pending: Vec::new(),
            raw_snapshot: None,
        }));

        let accept_room = room.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, accept_room.clone()));
            }
        });

        MockServer { addr, room }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn content(&self) -> String {
        self.room.lock().unwrap().content.clone()
    }

    pub fn revision(&self) -> u64 {
        self.room.lock().unwrap().revision()
    }

    pub fn client_count(&self) -> usize {
        self.room.lock().unwrap().clients.len()
    }

    /// Total connections accepted so far.
    pub fn connections(&self) -> usize {
        self.room.lock().unwrap().connections
    }

    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.room.lock().unwrap().auth_headers.clone()
    }

    /// Hold incoming operations without sequencing them.
    pub fn pause(&self) {
        self.room.lock().unwrap().paused = true;
    }

    /// Sequence held operations in arrival order and stop holding.
    pub fn resume(&self) {
        let mut room = self.room.lock().unwrap();
        room.paused = false;
        for (session_id, revision, operation) in std::mem::take(&mut room.pending) {
            room.receive(&session_id, revision, operation);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.room.lock().unwrap().pending.len()
    }

    /// Close every connection with `code`.
    pub fn close_all(&self, code: u16) {
        let room = self.room.lock().unwrap();
        for client in room.clients.values() {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: Utf8Bytes::from_static("test"),
            };
            let _ = client.tx.send(Message::Close(Some(frame)));
        }
    }

    /// Greet every later connection with `frame` instead of a snapshot.
    pub fn set_raw_snapshot(&self, frame: &str) {
        self.room.lock().unwrap().raw_snapshot = Some(frame.to_owned());
    }

    /// Send a raw text frame to every session.
    pub fn broadcast_raw(&self, frame: &str) {
        let room = self.room.lock().unwrap();
        for client in room.clients.values() {
            let _ = client.tx.send(Message::Text(frame.to_owned().into()));
        }
    }
}

async fn handle_connection(stream: TcpStream, room: Arc<Mutex<Room>>) {
    let auth = Arc::new(Mutex::new(None));
    let seen = auth.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        *seen.lock().unwrap() = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Ok(resp)
    };
    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let session_id = Uuid::new_v4().to_string();

    {
        let mut room = room.lock().unwrap();
        room.connections += 1;
        let header = auth.lock().unwrap().clone();
        room.auth_headers.push(header);

        let user = UserInfo {
            id: format!("user-{}", room.connections),
            name: format!("User {}", room.connections),
        };
        let color = fallback_color(&session_id);

        match &room.raw_snapshot {
            Some(frame) => {
                let _ = tx.send(Message::Text(frame.clone().into()));
            }
            None => Room::send_to(
                &tx,
                &ServerMessage::Snapshot {
                    revision: room.revision(),
                    document: Operation::new().insert(&room.content),
                    session_id: Some(session_id.clone()),
                },
            ),
        }
        for (id, client) in &room.clients {
            Room::send_to(
                &tx,
                &ServerMessage::UserConnected {
                    session_id: id.clone(),
                    user: client.user.clone(),
                    cursor_color: client.color.clone(),
                },
            );
        }
        room.broadcast(
            &ServerMessage::UserConnected {
                session_id: session_id.clone(),
                user: user.clone(),
                cursor_color: color.clone(),
            },
            None,
        );
        room.clients.insert(
            session_id.clone(),
            Client {
                user,
                color,
                tx,
            },
        );
    }

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let mut room = room.lock().unwrap();
        match ClientMessage::decode(text.as_str()) {
            Ok(ClientMessage::Operation { operation, revision }) => {
                if room.paused {
                    room.pending.push((session_id.clone(), revision, operation));
                } else {
                    room.receive(&session_id, revision, operation);
                }
            }
            Ok(ClientMessage::Cursor {
                position,
                selection_end,
            }) => {
                room.broadcast(
                    &ServerMessage::UserCursor {
                        session_id: session_id.clone(),
                        cursor: Some(Cursor {
                            position,
                            selection_end,
                        }),
                    },
                    Some(&session_id),
                );
            }
            Err(_) => {}
        }
    }

    {
        let mut room = room.lock().unwrap();
        room.clients.remove(&session_id);
        room.broadcast(
            &ServerMessage::UserDisconnected {
                session_id: session_id.clone(),
            },
            None,
        );
    }
    writer.abort();
}

/// Widget shared between the session task and the test.
#[derive(Clone, Default)]
pub struct SharedWidget(pub Arc<Mutex<PlainTextWidget>>);

impl SharedWidget {
    pub fn current_text(&self) -> String {
        self.0.lock().unwrap().as_str().to_owned()
    }

    pub fn cursor_count(&self) -> usize {
        self.0.lock().unwrap().cursors().count()
    }

    pub fn cursors(&self) -> Vec<CursorChange> {
        self.0.lock().unwrap().cursors().cloned().collect()
    }

    pub fn read_only(&self) -> bool {
        self.0.lock().unwrap().is_read_only()
    }

    pub fn undo_depth(&self) -> usize {
        self.0.lock().unwrap().undo_depth()
    }
}

impl TextWidget for SharedWidget {
    fn text(&self) -> String {
        self.current_text()
    }

    fn set_text(&mut self, text: &str) {
        self.0.lock().unwrap().set_text(text);
    }

    fn render_cursor(&mut self, change: &CursorChange) {
        self.0.lock().unwrap().render_cursor(change);
    }

    fn remove_cursor(&mut self, session_id: &str) {
        self.0.lock().unwrap().remove_cursor(session_id);
    }

    fn clear_history(&mut self) {
        self.0.lock().unwrap().clear_history();
    }

    fn set_read_only(&mut self, read_only: bool) {
        self.0.lock().unwrap().set_read_only(read_only);
    }
}

/// Collect every event of `kind` the session emits.
pub fn record(
    session: &mut CollabSession<SharedWidget>,
    kind: EventKind,
) -> Arc<Mutex<Vec<CollabEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    session.on(kind, move |e| sink.lock().unwrap().push(e.clone()));
    events
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// Session config pointing at `server`, with a short reconnect interval.
pub fn session_config(server: &MockServer) -> SessionConfig {
    let mut config = SessionConfig::new(ConnectionParams::new(server.url()).with_document("doc-1"));
    config.reconnect = ReconnectPolicy::new(Duration::from_millis(100));
    config
}

/// A session running on its own task.
pub struct Running {
    pub widget: SharedWidget,
    pub handle: SessionHandle,
    pub task: JoinHandle<Result<(), CollabError>>,
}

pub fn spawn(
    mut session: CollabSession<SharedWidget>,
    widget: SharedWidget,
    handle: SessionHandle,
) -> Running {
    let task = tokio::spawn(async move { session.run().await });
    Running {
        widget,
        handle,
        task,
    }
}

pub async fn start_session(server: &MockServer) -> Running {
    let widget = SharedWidget::default();
    let (session, handle) = CollabSession::new(session_config(server), widget.clone());
    spawn(session, widget, handle)
}

pub async fn stop(running: Running) {
    running.handle.shutdown().await.unwrap();
    timeout(Duration::from_secs(2), running.task)
        .await
        .expect("session should stop")
        .unwrap()
        .unwrap();
}
