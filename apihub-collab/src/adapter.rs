//! Channel adapter: one duplex connection scoped to one document session.
//!
//! Inbound frames are decoded once into [`ServerMessage`] and dispatched
//! to the [`SyncClient`] and [`PresenceTracker`]; the resulting
//! [`CollabEvent`]s go to the registered listeners and are also returned
//! to the caller, which is how the editor binding applies them.
//!
//! The adapter is transport-agnostic: anything implementing [`Transport`]
//! can carry the frames. The WebSocket transport lives in
//! [`crate::client`].

use crate::error::CollabError;
use crate::events::{CollabEvent, ConsistencyFault, EventKind, ListenerId, Listeners};
use crate::operation::Operation;
use crate::presence::{CursorChange, PresenceTracker};
use crate::protocol::{ClientMessage, Cursor, ServerMessage};
use crate::sync::{LocalOutcome, Origin, ServerOutcome, SyncClient, SyncStatus};

/// Outbound half of a duplex channel.
pub trait Transport {
    fn is_open(&self) -> bool;

    /// Queue a text frame. Must not block.
    fn send_text(&mut self, frame: String) -> Result<(), CollabError>;

    /// Close with the normal closure code.
    fn close(&mut self) {}
}

pub struct ChannelAdapter<T: Transport> {
    transport: Option<T>,
    sync: SyncClient,
    presence: PresenceTracker,
    listeners: Listeners,
    /// Session id the server assigned us in the last snapshot.
    local_session_id: Option<String>,
    ready: bool,
    /// Set by a consistency fault, cleared by the next snapshot.
    desynced: bool,
}

impl<T: Transport> Default for ChannelAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> ChannelAdapter<T> {
    pub fn new() -> Self {
        Self {
            transport: None,
            sync: SyncClient::new(),
            presence: PresenceTracker::new(),
            listeners: Listeners::new(),
            local_session_id: None,
            ready: false,
            desynced: false,
        }
    }

    /// Attach a freshly opened channel. The document arrives later as a
    /// snapshot; until then the synchronization state is uninitialized.
    pub fn connect(&mut self, transport: T) {
        if let Some(mut old) = self.transport.replace(transport) {
            old.close();
        }
        self.sync.reset();
        self.ready = false;
        self.desynced = false;
    }

    pub fn on<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&CollabEvent) + Send + 'static,
    {
        self.listeners.on(kind, listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    /// Deliver an event produced outside the adapter (e.g. connection
    /// state changes) to the listeners.
    pub fn notify(&mut self, event: CollabEvent) {
        self.listeners.emit(&event);
    }

    pub fn sync(&self) -> &SyncClient {
        &self.sync
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn is_open(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_open)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    pub fn local_session_id(&self) -> Option<&str> {
        self.local_session_id.as_deref()
    }

    /// Handle one inbound text frame. Frames that do not decode are
    /// ignored.
    pub fn handle_frame(&mut self, frame: &str) -> Vec<CollabEvent> {
        match ServerMessage::decode(frame) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                log::debug!("Ignoring inbound frame: {e}");
                Vec::new()
            }
        }
    }

    pub fn handle_message(&mut self, message: ServerMessage) -> Vec<CollabEvent> {
        let mut events = Vec::new();
        let before = self.sync.status();

        match message {
            ServerMessage::Snapshot {
                revision,
                document,
                session_id,
            } => match self.sync.apply_snapshot(revision, &document) {
                Ok(()) => {
                    self.presence.set_local_session(session_id.clone());
                    self.local_session_id = session_id;
                    self.desynced = false;
                    self.ready = true;
                    events.push(CollabEvent::InitialRevision(revision));
                    events.push(CollabEvent::Operation(document));
                    events.push(CollabEvent::Ready(true));
                }
                Err(e) => self.fault(e, Some(document), &mut events),
            },

            ServerMessage::UserConnected {
                session_id,
                user,
                cursor_color,
            } => {
                if self.presence.join(&session_id, &user, &cursor_color) {
                    log::info!("Peer {} ({session_id}) connected", user.name);
                }
            }

            ServerMessage::UserDisconnected { session_id } => {
                if self.local_session_id.as_deref() != Some(session_id.as_str()) {
                    self.presence.leave(&session_id);
                    log::info!("Peer {session_id} disconnected");
                    events.push(CollabEvent::CursorChanged(CursorChange::removed(session_id)));
                }
            }

            ServerMessage::UserCursor { session_id, cursor } => {
                if let Some(peer) = self.presence.update_cursor(&session_id, cursor) {
                    log::trace!("Cursor of {session_id}: {cursor:?}");
                    events.push(CollabEvent::CursorChanged(peer.cursor_change()));
                }
            }

            ServerMessage::UserOperation {
                revision,
                operation,
                session_id,
            } => self.handle_operation(revision, operation, session_id, &mut events),
        }

        self.finish(before, events)
    }

    fn handle_operation(
        &mut self,
        revision: u64,
        operation: Operation,
        session_id: Option<String>,
        events: &mut Vec<CollabEvent>,
    ) {
        if self.desynced {
            // Waiting for a fresh snapshot; anything before it is stale.
            return;
        }

        let origin = match (session_id.as_deref(), self.local_session_id.as_deref()) {
            (Some(from), Some(own)) if from == own => Origin::Own,
            (Some(_), Some(_)) => Origin::Peer,
            _ => Origin::Unknown,
        };

        match self.sync.apply_server(revision, &operation, origin) {
            Ok(ServerOutcome::Acknowledged { next: Some(next) }) => {
                if let Err(e) = self.transmit(&next.operation, events) {
                    if !self.desynced {
                        self.fault(e, Some(next.operation), events);
                    }
                }
            }
            Ok(ServerOutcome::Acknowledged { next: None }) => {}
            Ok(ServerOutcome::Remote { operation }) => {
                let moved = self.presence.transform_cursors(&operation);
                events.push(CollabEvent::Operation(operation));
                events.extend(moved.into_iter().map(CollabEvent::CursorChanged));
            }
            Err(e) => self.fault(e, Some(operation), events),
        }
    }

    /// Submit a local edit made against the visible document.
    ///
    /// Sent immediately when nothing is in flight, buffered otherwise.
    /// Rejected with [`CollabError::ChannelClosed`] while the channel is
    /// down. A consistency error, or a send that fails once the edit is
    /// recorded as in flight, stops synchronization and is returned after
    /// the error event has been emitted.
    pub fn submit(&mut self, op: Operation) -> Result<Vec<CollabEvent>, CollabError> {
        if self.desynced {
            return Err(CollabError::NotInitialized);
        }
        if !self.is_open() {
            return Err(CollabError::ChannelClosed);
        }

        let before = self.sync.status();
        let mut events = Vec::new();

        match self.sync.apply_local(op.clone()) {
            Ok(LocalOutcome::Send(in_flight)) => {
                if let Err(e) = self.transmit(&in_flight.operation, &mut events) {
                    // No ack can arrive for an operation that never left.
                    if !self.desynced {
                        self.fault(e.clone(), Some(in_flight.operation), &mut events);
                    }
                    self.finish(before, events);
                    return Err(e);
                }
            }
            Ok(LocalOutcome::Buffered) => {}
            Err(e) if e.is_consistency_fault() => {
                self.fault(e.clone(), Some(op), &mut events);
                self.finish(before, events);
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        events.extend(
            self.presence
                .transform_cursors(&op)
                .into_iter()
                .map(CollabEvent::CursorChanged),
        );
        Ok(self.finish(before, events))
    }

    /// Send an operation to the server, stamped with the current revision.
    ///
    /// Returns `false` if the channel is not open or the operation does
    /// not apply to the current document. The latter is a programming
    /// error and additionally raises an error event.
    pub fn send_operation(&mut self, op: &Operation) -> bool {
        let before = self.sync.status();
        let mut events = Vec::new();
        let sent = self.transmit(op, &mut events);
        self.finish(before, events);
        sent.is_ok()
    }

    /// Faults on a base length mismatch; transport errors are returned
    /// to the caller.
    fn transmit(&mut self, op: &Operation, events: &mut Vec<CollabEvent>) -> Result<(), CollabError> {
        if !self.is_open() {
            log::warn!("Channel not open, operation not sent");
            return Err(CollabError::ChannelClosed);
        }

        let Some(document) = self.sync.document() else {
            return Err(CollabError::NotInitialized);
        };
        if !document.accepts(op) {
            let error = CollabError::InvalidOperation(format!(
                "operation base length {} does not match document length {}",
                op.base_len(),
                document.len()
            ));
            self.fault(error.clone(), Some(op.clone()), events);
            return Err(error);
        }

        let message = ClientMessage::Operation {
            operation: op.clone(),
            revision: document.revision(),
        };
        self.send_message(&message)
    }

    /// Send our cursor. Silently dropped when the channel is not open.
    pub fn send_cursor(&mut self, cursor: Cursor) {
        if self.is_open() {
            // Cursors are fire-and-forget; the next one supersedes it.
            let _ = self.send_message(&ClientMessage::cursor(cursor));
        }
    }

    fn send_message(&mut self, message: &ClientMessage) -> Result<(), CollabError> {
        let frame = message.encode()?;
        let transport = self.transport.as_mut().ok_or(CollabError::ChannelClosed)?;
        transport.send_text(frame).inspect_err(|e| log::warn!("Send failed: {e}"))
    }

    /// The channel closed. Presence is left as is; the reconnect path
    /// clears it through [`ChannelAdapter::reset`].
    pub fn handle_close(&mut self, code: Option<u16>) -> Vec<CollabEvent> {
        log::info!("Channel closed (code {code:?})");
        self.transport = None;
        self.ready = false;
        let before = self.sync.status();
        self.finish(before, vec![CollabEvent::Ready(false)])
    }

    /// Forget all session state before reconnecting: pending edits are
    /// discarded and every peer cursor is removed.
    pub fn reset(&mut self) -> Vec<CollabEvent> {
        let before = self.sync.status();
        self.sync.reset();
        self.desynced = false;
        self.ready = false;
        self.local_session_id = None;
        self.presence.set_local_session(None);
        let events = self
            .presence
            .clear()
            .into_iter()
            .map(|id| CollabEvent::CursorChanged(CursorChange::removed(id)))
            .collect();
        self.finish(before, events)
    }

    /// Close the channel from our side with a normal closure.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.ready = false;
    }

    /// Close the channel and drop listeners and peers. Safe to call twice.
    pub fn dispose(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.listeners.clear();
        self.presence.clear();
        self.sync.reset();
        self.ready = false;
    }

    fn fault(&mut self, error: CollabError, operation: Option<Operation>, events: &mut Vec<CollabEvent>) {
        log::error!("Synchronization stopped: {error}");
        let document = self.sync.document().cloned();
        events.push(CollabEvent::Error(ConsistencyFault {
            error,
            operation,
            document,
        }));
        self.sync.reset();
        self.desynced = true;
        if self.ready {
            self.ready = false;
            events.push(CollabEvent::Ready(false));
        }
    }

    fn finish(&mut self, before: SyncStatus, mut events: Vec<CollabEvent>) -> Vec<CollabEvent> {
        let after = self.sync.status();
        if after != before {
            events.push(CollabEvent::StatusChanged(after));
        }
        for event in &events {
            self.listeners.emit(event);
        }
        events
    }
}
