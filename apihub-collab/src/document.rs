//! Server-confirmed document state.

use crate::error::CollabError;
use crate::operation::{char_len, Operation};

/// Document content plus the number of operations applied to it.
///
/// Tracks the document as the server has confirmed it. Local edits that
/// are still in flight or buffered are not part of it; only operations
/// the server has sequenced are composed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentState {
    content: String,
    revision: u64,
}

impl DocumentState {
    /// Empty document at revision 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a server snapshot. The snapshot document is an operation
    /// over the empty document.
    pub fn from_snapshot(revision: u64, document: &Operation) -> Result<Self, CollabError> {
        if document.base_len() != 0 {
            return Err(CollabError::InvalidOperation(format!(
                "snapshot document must apply to the empty document, base length is {}",
                document.base_len()
            )));
        }
        Ok(Self {
            content: document.apply("")?,
            revision,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        char_len(&self.content)
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Whether `op` applies cleanly to the current content.
    pub fn accepts(&self, op: &Operation) -> bool {
        op.base_len() == self.len()
    }

    /// Apply a sequenced operation, advancing the revision by exactly one.
    ///
    /// On error the state is left untouched.
    pub fn compose(&mut self, op: &Operation) -> Result<(), CollabError> {
        self.content = op.apply(&self.content)?;
        self.revision += 1;
        Ok(())
    }
}
