//! Error types shared across the collaboration core.

use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors raised by the collaboration core.
///
/// `InvalidOperation`, `OutOfOrderRevision` and `UnexpectedAck` are
/// consistency errors: once one of them is observed the session's
/// synchronization state can no longer be trusted and must be rebuilt
/// from a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollabError {
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Out-of-order revision: expected {expected}, received {received}")]
    OutOfOrderRevision { expected: u64, received: u64 },

    #[error("Unexpected acknowledgment at revision {0}")]
    UnexpectedAck(u64),

    #[error("Document not initialized (no snapshot received)")]
    NotInitialized,

    #[error("Channel is not open")]
    ChannelClosed,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl CollabError {
    /// Whether this error means local and server state may have diverged.
    pub fn is_consistency_fault(&self) -> bool {
        matches!(
            self,
            Self::InvalidOperation(_) | Self::OutOfOrderRevision { .. } | Self::UnexpectedAck(_)
        )
    }
}
