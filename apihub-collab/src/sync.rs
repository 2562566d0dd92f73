//! Client-side operational-transform state machine.
//!
//! ```text
//!                 snapshot
//! Uninitialized ───────────► Synced
//!                              │ local edit (sent)
//!                              ▼
//!          ack (no buffer) AwaitingAck ◄─────────────┐
//!     Synced ◄──────────────── │ local edit          │ ack (buffer sent)
//!                              ▼                     │
//!                  AwaitingAckWithBuffer ────────────┘
//! ```
//!
//! At most one local operation is in flight. Edits made while waiting for
//! its acknowledgment are composed into a single buffered operation and
//! sent when the ack arrives.
//!
//! A remote operation arriving while local edits are pending is
//! transformed twice: against the in-flight operation and then against
//! the buffer. The result is what the editor must apply to the visible
//! document; the rebased in-flight and buffered operations stay valid on
//! top of the new server document. Clients that see the same server order
//! converge regardless of edit timing.
//!
//! Transitions are computed from a borrowed state into a new value, so a
//! failed transition leaves the previous state untouched.

use crate::document::DocumentState;
use crate::error::CollabError;
use crate::operation::Operation;

/// Coarse state, reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Uninitialized,
    Synced,
    AwaitingAck,
    AwaitingAckWithBuffer,
}

/// The local operation waiting for server acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    /// Document revision the operation applies to. Advanced as remote
    /// operations are transformed past it.
    pub revision: u64,
    pub operation: Operation,
}

/// Full synchronization state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    Uninitialized,
    Synced {
        document: DocumentState,
    },
    AwaitingAck {
        document: DocumentState,
        in_flight: InFlight,
    },
    AwaitingAckWithBuffer {
        document: DocumentState,
        in_flight: InFlight,
        buffer: Operation,
    },
}

/// Who produced an inbound operation, as far as the adapter can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The server says it is ours: an acknowledgment.
    Own,
    /// The server says it came from another session.
    Peer,
    /// The server did not say; compare against the in-flight record.
    Unknown,
}

/// What to do after a local edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalOutcome {
    /// Send this operation now.
    Send(InFlight),
    /// Held in the buffer until the in-flight operation is acknowledged.
    Buffered,
}

/// What to do after an inbound operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOutcome {
    /// Our in-flight operation was confirmed; `next` is the buffer to send.
    Acknowledged { next: Option<InFlight> },
    /// Apply `operation` to the visible document.
    Remote { operation: Operation },
}

impl SyncState {
    pub fn status(&self) -> SyncStatus {
        match self {
            SyncState::Uninitialized => SyncStatus::Uninitialized,
            SyncState::Synced { .. } => SyncStatus::Synced,
            SyncState::AwaitingAck { .. } => SyncStatus::AwaitingAck,
            SyncState::AwaitingAckWithBuffer { .. } => SyncStatus::AwaitingAckWithBuffer,
        }
    }

    pub fn document(&self) -> Option<&DocumentState> {
        match self {
            SyncState::Uninitialized => None,
            SyncState::Synced { document }
            | SyncState::AwaitingAck { document, .. }
            | SyncState::AwaitingAckWithBuffer { document, .. } => Some(document),
        }
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        match self {
            SyncState::AwaitingAck { in_flight, .. }
            | SyncState::AwaitingAckWithBuffer { in_flight, .. } => Some(in_flight),
            _ => None,
        }
    }

    pub fn buffer(&self) -> Option<&Operation> {
        match self {
            SyncState::AwaitingAckWithBuffer { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    /// Length of the document as the user sees it (server document plus
    /// pending local edits).
    pub fn local_len(&self) -> Option<usize> {
        match self {
            SyncState::Uninitialized => None,
            SyncState::Synced { document } => Some(document.len()),
            SyncState::AwaitingAck { in_flight, .. } => Some(in_flight.operation.target_len()),
            SyncState::AwaitingAckWithBuffer { buffer, .. } => Some(buffer.target_len()),
        }
    }

    /// Any state becomes `Synced` on a snapshot; pending edits are dropped.
    pub fn on_snapshot(revision: u64, document: &Operation) -> Result<SyncState, CollabError> {
        Ok(SyncState::Synced {
            document: DocumentState::from_snapshot(revision, document)?,
        })
    }

    /// A local edit against the visible document.
    pub fn on_local(&self, op: Operation) -> Result<(SyncState, LocalOutcome), CollabError> {
        match self {
            SyncState::Uninitialized => Err(CollabError::NotInitialized),

            SyncState::Synced { document } => {
                if !document.accepts(&op) {
                    return Err(CollabError::InvalidOperation(format!(
                        "local operation base length {} does not match document length {}",
                        op.base_len(),
                        document.len()
                    )));
                }
                let in_flight = InFlight {
                    revision: document.revision(),
                    operation: op,
                };
                Ok((
                    SyncState::AwaitingAck {
                        document: document.clone(),
                        in_flight: in_flight.clone(),
                    },
                    LocalOutcome::Send(in_flight),
                ))
            }

            SyncState::AwaitingAck { document, in_flight } => {
                if !in_flight.operation.can_merge_with(&op) {
                    return Err(CollabError::InvalidOperation(format!(
                        "local operation base length {} does not follow pending length {}",
                        op.base_len(),
                        in_flight.operation.target_len()
                    )));
                }
                Ok((
                    SyncState::AwaitingAckWithBuffer {
                        document: document.clone(),
                        in_flight: in_flight.clone(),
                        buffer: op,
                    },
                    LocalOutcome::Buffered,
                ))
            }

            SyncState::AwaitingAckWithBuffer {
                document,
                in_flight,
                buffer,
            } => Ok((
                SyncState::AwaitingAckWithBuffer {
                    document: document.clone(),
                    in_flight: in_flight.clone(),
                    buffer: buffer.compose(&op)?,
                },
                LocalOutcome::Buffered,
            )),
        }
    }

    /// An operation sequenced by the server at `revision`.
    pub fn on_server_operation(
        &self,
        revision: u64,
        op: &Operation,
        origin: Origin,
    ) -> Result<(SyncState, ServerOutcome), CollabError> {
        let document = self.document().ok_or(CollabError::NotInitialized)?;
        if revision != document.revision() {
            return Err(CollabError::OutOfOrderRevision {
                expected: document.revision(),
                received: revision,
            });
        }

        let in_flight = match self.in_flight() {
            None => {
                if origin == Origin::Own {
                    return Err(CollabError::UnexpectedAck(revision));
                }
                let mut document = document.clone();
                document.compose(op)?;
                return Ok((
                    SyncState::Synced { document },
                    ServerOutcome::Remote {
                        operation: op.clone(),
                    },
                ));
            }
            Some(in_flight) => in_flight,
        };

        let is_ack = match origin {
            Origin::Own => true,
            Origin::Peer => false,
            Origin::Unknown => in_flight.revision == revision && in_flight.operation == *op,
        };

        if is_ack {
            if in_flight.operation != *op {
                return Err(CollabError::InvalidOperation(format!(
                    "acknowledged operation {op} differs from in-flight {}",
                    in_flight.operation
                )));
            }
            let mut document = document.clone();
            document.compose(&in_flight.operation)?;

            return Ok(match self.buffer() {
                Some(buffer) => {
                    let next = InFlight {
                        revision: document.revision(),
                        operation: buffer.clone(),
                    };
                    (
                        SyncState::AwaitingAck {
                            document,
                            in_flight: next.clone(),
                        },
                        ServerOutcome::Acknowledged { next: Some(next) },
                    )
                }
                None => (
                    SyncState::Synced { document },
                    ServerOutcome::Acknowledged { next: None },
                ),
            });
        }

        let mut document = document.clone();
        document.compose(op)?;

        let (pending, remote) = in_flight.operation.transform(op)?;
        let in_flight = InFlight {
            revision: document.revision(),
            operation: pending,
        };

        Ok(match self.buffer() {
            Some(buffer) => {
                let (buffer, remote) = buffer.transform(&remote)?;
                (
                    SyncState::AwaitingAckWithBuffer {
                        document,
                        in_flight,
                        buffer,
                    },
                    ServerOutcome::Remote { operation: remote },
                )
            }
            None => (
                SyncState::AwaitingAck {
                    document,
                    in_flight,
                },
                ServerOutcome::Remote { operation: remote },
            ),
        })
    }
}

/// Owns the [`SyncState`] of one document session.
#[derive(Debug, Default)]
pub struct SyncClient {
    state: SyncState,
}

impl SyncClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn status(&self) -> SyncStatus {
        self.state.status()
    }

    pub fn document(&self) -> Option<&DocumentState> {
        self.state.document()
    }

    pub fn revision(&self) -> Option<u64> {
        self.state.document().map(DocumentState::revision)
    }

    /// True until an operation has ever been composed into the document.
    pub fn is_history_empty(&self) -> bool {
        self.revision().unwrap_or(0) == 0
    }

    /// Back to `Uninitialized`, discarding pending edits.
    pub fn reset(&mut self) {
        self.state = SyncState::Uninitialized;
    }

    pub fn apply_snapshot(&mut self, revision: u64, document: &Operation) -> Result<(), CollabError> {
        self.state = SyncState::on_snapshot(revision, document)?;
        log::info!("Synced at revision {revision}");
        Ok(())
    }

    pub fn apply_local(&mut self, op: Operation) -> Result<LocalOutcome, CollabError> {
        let (state, outcome) = self.state.on_local(op)?;
        self.state = state;
        Ok(outcome)
    }

    pub fn apply_server(
        &mut self,
        revision: u64,
        op: &Operation,
        origin: Origin,
    ) -> Result<ServerOutcome, CollabError> {
        let (state, outcome) = self.state.on_server_operation(revision, op, origin)?;
        self.state = state;
        if let ServerOutcome::Acknowledged { next } = &outcome {
            log::debug!(
                "Ack at revision {revision}, {}",
                if next.is_some() { "flushing buffer" } else { "synced" }
            );
        }
        Ok(outcome)
    }
}
