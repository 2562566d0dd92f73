//! Session driver: connects, pumps frames and UI commands, reconnects.
//!
//! Everything runs on the task that awaits [`CollabSession::run`]; the UI
//! talks to it through a cloneable [`SessionHandle`].
//!
//! Close handling:
//! - normal closure (1000) ends the session
//! - any other close, or a dropped socket, resets sync state and presence
//!   and reconnects after the fixed interval
//! - a consistency fault closes the channel from our side and reconnects
//!   immediately for a fresh snapshot; if that connection faults again
//!   before becoming ready, the next attempt waits the fixed interval

use tokio::sync::mpsc;

use crate::binding::{EditorBinding, TextWidget};
use crate::client::{self, ConnectionState, InboundFrame, WsTransport};
use crate::config::{resolve_token, SessionConfig, SharedTokenProvider};
use crate::error::CollabError;
use crate::events::{CollabEvent, EventKind, ListenerId};
use crate::operation::Operation;
use crate::protocol::Cursor;

const COMMAND_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// The widget now shows this text.
    ContentChanged(String),
    /// The widget applied this delta.
    LocalOperation(Operation),
    Cursor(Cursor),
    Shutdown,
}

/// Cloneable command sender for a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn content_changed(&self, text: impl Into<String>) -> Result<(), CollabError> {
        self.send(SessionCommand::ContentChanged(text.into())).await
    }

    pub async fn local_operation(&self, op: Operation) -> Result<(), CollabError> {
        self.send(SessionCommand::LocalOperation(op)).await
    }

    pub async fn cursor(&self, cursor: Cursor) -> Result<(), CollabError> {
        self.send(SessionCommand::Cursor(cursor)).await
    }

    pub async fn shutdown(&self) -> Result<(), CollabError> {
        self.send(SessionCommand::Shutdown).await
    }

    async fn send(&self, command: SessionCommand) -> Result<(), CollabError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CollabError::ChannelClosed)
    }
}

/// Why the frame pump returned.
enum Exit {
    Shutdown,
    Closed(Option<u16>),
    Resync,
}

pub struct CollabSession<W: TextWidget> {
    config: SessionConfig,
    token_provider: Option<SharedTokenProvider>,
    binding: EditorBinding<W, WsTransport>,
    commands: mpsc::Receiver<SessionCommand>,
    state: ConnectionState,
    /// Reconnected after a fault and not ready since.
    resyncing: bool,
}

impl<W: TextWidget> CollabSession<W> {
    pub fn new(config: SessionConfig, widget: W) -> (Self, SessionHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let session = Self {
            config,
            token_provider: None,
            binding: EditorBinding::new(widget),
            commands,
            state: ConnectionState::Disconnected,
            resyncing: false,
        };
        (session, SessionHandle { tx })
    }

    /// Ask `provider` for a token on every (re)connect.
    pub fn with_token_provider(mut self, provider: SharedTokenProvider) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn on<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&CollabEvent) + Send + 'static,
    {
        self.binding.on(kind, listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.binding.off(id)
    }

    pub fn binding(&self) -> &EditorBinding<W, WsTransport> {
        &self.binding
    }

    pub fn widget(&self) -> &W {
        self.binding.widget()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Run until shutdown or a normal close.
    pub async fn run(&mut self) -> Result<(), CollabError> {
        let mut attempt = ConnectionState::Connecting;

        loop {
            self.set_state(attempt);
            attempt = ConnectionState::Reconnecting;

            let token = resolve_token(&self.config.params, self.token_provider.as_deref());
            let connection = match client::connect(
                &self.config.params,
                token.as_deref(),
                self.config.outgoing_capacity,
            )
            .await
            {
                Ok(connection) => connection,
                Err(e) => {
                    log::warn!("Connecting to {} failed: {e}", self.config.params.label());
                    self.set_state(ConnectionState::Reconnecting);
                    if !self.wait_before_retry().await {
                        return self.finish();
                    }
                    continue;
                }
            };

            self.binding.attach(connection.transport);
            self.set_state(ConnectionState::Connected);

            match self.pump(connection.inbound).await {
                Exit::Shutdown => {
                    self.binding.close();
                    return self.finish();
                }
                Exit::Closed(code) => {
                    self.binding.handle_close(code);
                    if !self.config.reconnect.should_reconnect(code) {
                        return self.finish();
                    }
                    self.binding.reset();
                    self.set_state(ConnectionState::Reconnecting);
                    if !self.wait_before_retry().await {
                        return self.finish();
                    }
                }
                Exit::Resync => {
                    self.binding.close();
                    self.binding.reset();
                    if self.resyncing {
                        log::warn!(
                            "{} faulted again before becoming ready",
                            self.config.params.label()
                        );
                        self.set_state(ConnectionState::Reconnecting);
                        if !self.wait_before_retry().await {
                            return self.finish();
                        }
                    } else {
                        log::warn!("Resynchronizing {}", self.config.params.label());
                        self.resyncing = true;
                    }
                }
            }
        }
    }

    async fn pump(&mut self, mut inbound: mpsc::Receiver<InboundFrame>) -> Exit {
        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(InboundFrame::Text(text)) => {
                        self.binding.handle_frame(&text);
                    }
                    Some(InboundFrame::Closed(code)) => return Exit::Closed(code),
                    None => return Exit::Closed(None),
                },
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => return Exit::Shutdown,
                    Some(command) => self.handle_command(command),
                },
            }

            if self.binding.is_desynced() {
                return Exit::Resync;
            }
            if self.resyncing && self.binding.adapter().is_ready() {
                self.resyncing = false;
            }
        }
    }

    /// Sleep for the reconnect interval, still serving commands. Returns
    /// `false` if shutdown was requested meanwhile.
    async fn wait_before_retry(&mut self) -> bool {
        let interval = self.config.reconnect.interval();
        log::info!("Reconnecting in {}ms", interval.as_millis());

        let sleep = tokio::time::sleep(interval);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => return false,
                    Some(command) => self.handle_command(command),
                },
            }
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        let result = match command {
            SessionCommand::ContentChanged(text) => self.binding.set_text(&text),
            SessionCommand::LocalOperation(op) => self.binding.handle_local_operation(op),
            SessionCommand::Cursor(cursor) => {
                self.binding.handle_local_cursor(cursor);
                Ok(())
            }
            SessionCommand::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            log::warn!("Local edit not applied: {e}");
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.binding
                .adapter_mut()
                .notify(CollabEvent::ConnectionChanged(state));
        }
    }

    fn finish(&mut self) -> Result<(), CollabError> {
        self.set_state(ConnectionState::Disconnected);
        log::info!("Session for {} ended", self.config.params.label());
        Ok(())
    }
}
