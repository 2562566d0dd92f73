//! Typed events and the listener registry.
//!
//! Listeners subscribe to one [`EventKind`]; several may share a kind and
//! each can be removed through the [`ListenerId`] returned by
//! [`Listeners::on`].

use std::collections::HashMap;
use std::fmt;

use crate::client::ConnectionState;
use crate::document::DocumentState;
use crate::error::CollabError;
use crate::operation::Operation;
use crate::presence::CursorChange;
use crate::sync::SyncStatus;

/// Everything the collaboration core reports to the editor and the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum CollabEvent {
    /// A snapshot arrived; the document restarts at this revision.
    InitialRevision(u64),
    /// Apply this operation to the visible document. After
    /// `InitialRevision` it is the whole snapshot as an insert.
    Operation(Operation),
    /// Whether the channel is ready for editing.
    Ready(bool),
    CursorChanged(CursorChange),
    StatusChanged(SyncStatus),
    ConnectionChanged(ConnectionState),
    /// Local and server state may have diverged; synchronization has
    /// stopped until a fresh snapshot arrives.
    Error(ConsistencyFault),
}

impl CollabEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CollabEvent::InitialRevision(_) => EventKind::InitialRevision,
            CollabEvent::Operation(_) => EventKind::Operation,
            CollabEvent::Ready(_) => EventKind::Ready,
            CollabEvent::CursorChanged(_) => EventKind::CursorChanged,
            CollabEvent::StatusChanged(_) => EventKind::StatusChanged,
            CollabEvent::ConnectionChanged(_) => EventKind::ConnectionChanged,
            CollabEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Discriminant of [`CollabEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    InitialRevision,
    Operation,
    Ready,
    CursorChanged,
    StatusChanged,
    ConnectionChanged,
    Error,
}

/// Diagnostics for a consistency error.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyFault {
    pub error: CollabError,
    /// The operation that could not be sent or composed.
    pub operation: Option<Operation>,
    /// Server-confirmed document at the time of the fault.
    pub document: Option<DocumentState>,
}

pub type Listener = Box<dyn FnMut(&CollabEvent) + Send>;

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener registry keyed by event kind.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `listener` to events of `kind`.
    pub fn on<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&CollabEvent) + Send + 'static,
    {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_kind
            .entry(kind)
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    /// Unsubscribe. Returns `false` if the id was not registered.
    pub fn off(&mut self, id: ListenerId) -> bool {
        for listeners in self.by_kind.values_mut() {
            if let Some(pos) = listeners.iter().position(|(lid, _)| *lid == id) {
                drop(listeners.remove(pos));
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every listener of its kind, in subscription order.
    pub fn emit(&mut self, event: &CollabEvent) {
        if let Some(listeners) = self.by_kind.get_mut(&event.kind()) {
            for (_, listener) in listeners.iter_mut() {
                listener(event);
            }
        }
    }

    pub fn clear(&mut self) {
        self.by_kind.clear();
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}
