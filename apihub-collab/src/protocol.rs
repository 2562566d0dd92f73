//! JSON wire protocol for the collaboration channel.
//!
//! Every frame is a JSON object discriminated by its `type` field:
//!
//! ```text
//! server → client
//!   {"type":"snapshot",          "revision", "document", "sessionId"?}
//!   {"type":"user:connected",    "sessionId", "user":{"id","name"}, "cursorColor"}
//!   {"type":"user:disconnected", "sessionId"}
//!   {"type":"user:cursor",       "sessionId", "cursor":{"position","selectionEnd"}|null}
//!   {"type":"user:operation",    "revision", "operation", "sessionId"?}
//!
//! client → server
//!   {"type":"operation", "operation", "revision"}
//!   {"type":"cursor",    "position", "selectionEnd"}
//! ```
//!
//! Frames are decoded once at the boundary into [`ServerMessage`]; an
//! unknown `type` is reported as [`ProtocolError::UnknownMessageType`] so the
//! caller can skip it without treating it as fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::operation::Operation;

/// Cursor or selection in character offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub position: usize,
    pub selection_end: usize,
}

impl Cursor {
    /// Collapsed cursor (no selection).
    pub fn at(position: usize) -> Self {
        Self {
            position,
            selection_end: position,
        }
    }

    pub fn has_selection(&self) -> bool {
        self.position != self.selection_end
    }

    /// Shift both ends through an operation applied to the document.
    pub fn transform(&self, op: &Operation) -> Self {
        Self {
            position: op.transform_index(self.position),
            selection_end: op.transform_index(self.selection_end),
        }
    }
}

/// User identity attached to a peer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Full document at a revision; first message of every connection.
    #[serde(rename = "snapshot", rename_all = "camelCase")]
    Snapshot {
        revision: u64,
        document: Operation,
        /// Session id the server assigned to the receiving connection.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    #[serde(rename = "user:connected", rename_all = "camelCase")]
    UserConnected {
        session_id: String,
        user: UserInfo,
        cursor_color: String,
    },

    #[serde(rename = "user:disconnected", rename_all = "camelCase")]
    UserDisconnected { session_id: String },

    #[serde(rename = "user:cursor", rename_all = "camelCase")]
    UserCursor {
        session_id: String,
        #[serde(default)]
        cursor: Option<Cursor>,
    },

    /// A sequenced operation. `revision` is the document revision it
    /// applies to.
    #[serde(rename = "user:operation", rename_all = "camelCase")]
    UserOperation {
        revision: u64,
        operation: Operation,
        /// Originating session, when the server reports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl ServerMessage {
    /// Every `type` tag this client understands.
    pub const KINDS: [&'static str; 5] = [
        "snapshot",
        "user:connected",
        "user:disconnected",
        "user:cursor",
        "user:operation",
    ];

    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;
        if !Self::KINDS.contains(&kind) {
            return Err(ProtocolError::UnknownMessageType(kind.to_owned()));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Session the message refers to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Snapshot { session_id, .. }
            | ServerMessage::UserOperation { session_id, .. } => session_id.as_deref(),
            ServerMessage::UserConnected { session_id, .. }
            | ServerMessage::UserDisconnected { session_id }
            | ServerMessage::UserCursor { session_id, .. } => Some(session_id.as_str()),
        }
    }
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// A local operation based on `revision`.
    Operation { operation: Operation, revision: u64 },

    #[serde(rename_all = "camelCase")]
    Cursor {
        position: usize,
        selection_end: usize,
    },
}

impl ClientMessage {
    pub fn cursor(cursor: Cursor) -> Self {
        ClientMessage::Cursor {
            position: cursor.position,
            selection_end: cursor.selection_end,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Wire format errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Message has no type field")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_snapshot() {
        let msg = ServerMessage::decode(
            r#"{"type":"snapshot","revision":5,"document":["abc"],"sessionId":"s-1"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ServerMessage::Snapshot {
                revision: 5,
                document: Operation::new().insert("abc"),
                session_id: Some("s-1".into()),
            }
        );
    }

    #[test]
    fn test_decode_snapshot_without_session() {
        let msg = ServerMessage::decode(r#"{"type":"snapshot","revision":0,"document":[]}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Snapshot { session_id: None, .. }));
        assert_eq!(msg.session_id(), None);
    }

    #[test]
    fn test_decode_user_connected() {
        let msg = ServerMessage::decode(
            r##"{"type":"user:connected","sessionId":"s-2","user":{"id":"u-7","name":"Alice"},"cursorColor":"#ff8800"}"##,
        )
        .unwrap();
        match msg {
            ServerMessage::UserConnected { session_id, user, cursor_color } => {
                assert_eq!(session_id, "s-2");
                assert_eq!(user.id, "u-7");
                assert_eq!(user.name, "Alice");
                assert_eq!(cursor_color, "#ff8800");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_decode_user_cursor() {
        let msg = ServerMessage::decode(
            r#"{"type":"user:cursor","sessionId":"s-2","cursor":{"position":3,"selectionEnd":5}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ServerMessage::UserCursor {
                session_id: "s-2".into(),
                cursor: Some(Cursor { position: 3, selection_end: 5 }),
            }
        );

        let cleared =
            ServerMessage::decode(r#"{"type":"user:cursor","sessionId":"s-2","cursor":null}"#).unwrap();
        assert!(matches!(cleared, ServerMessage::UserCursor { cursor: None, .. }));
    }

    #[test]
    fn test_decode_user_operation() {
        let msg = ServerMessage::decode(
            r#"{"type":"user:operation","revision":5,"operation":[3,"Y"]}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ServerMessage::UserOperation {
                revision: 5,
                operation: Operation::new().retain(3).insert("Y"),
                session_id: None,
            }
        );
    }

    #[test]
    fn test_decode_user_disconnected() {
        let msg = ServerMessage::decode(r#"{"type":"user:disconnected","sessionId":"s-9"}"#).unwrap();
        assert_eq!(msg.session_id(), Some("s-9"));
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = ServerMessage::decode(r#"{"type":"user:typing","sessionId":"s"}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownMessageType("user:typing".into()));
    }

    #[test]
    fn test_decode_malformed() {
        assert_eq!(
            ServerMessage::decode(r#"{"revision":1}"#).unwrap_err(),
            ProtocolError::MissingType
        );
        assert!(matches!(
            ServerMessage::decode("not json"),
            Err(ProtocolError::Deserialization(_))
        ));
        assert!(matches!(
            ServerMessage::decode(r#"{"type":"user:operation","revision":"x","operation":[]}"#),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_encode_client_operation() {
        let msg = ClientMessage::Operation {
            operation: Operation::new().retain(1).insert("X").retain(2),
            revision: 5,
        };
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "operation", "operation": [1, "X", 2], "revision": 5})
        );
    }

    #[test]
    fn test_encode_client_cursor() {
        let msg = ClientMessage::cursor(Cursor { position: 2, selection_end: 4 });
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "cursor", "position": 2, "selectionEnd": 4})
        );
        assert_eq!(ClientMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_server_message_encode_shape() {
        let msg = ServerMessage::UserOperation {
            revision: 6,
            operation: Operation::new().delete(1).retain(2),
            session_id: Some("s-1".into()),
        };
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "user:operation", "revision": 6, "operation": [-1, 2], "sessionId": "s-1"})
        );
    }

    #[test]
    fn test_cursor_transform() {
        let cursor = Cursor { position: 2, selection_end: 4 };
        let op = Operation::new().insert("ab").retain(5);
        assert_eq!(cursor.transform(&op), Cursor { position: 4, selection_end: 6 });
        assert!(cursor.has_selection());
        assert!(!Cursor::at(3).has_selection());
    }
}
