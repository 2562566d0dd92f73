//! # apihub-collab: Real-time collaborative text editing client
//!
//! Keeps a shared text document consistent across concurrent editors using
//! operational transformation against a central sequencing server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  local edit   ┌───────────────┐  send/buffer  ┌────────────────┐
//! │ TextWidget   │ ────────────► │ EditorBinding │ ────────────► │ ChannelAdapter │
//! │ (editor UI)  │ ◄──────────── │ (diff, apply) │ ◄──────────── │ (decode, emit) │
//! └──────────────┘  remote delta └───────────────┘  CollabEvent  └───────┬────────┘
//!                                                                       │
//!                                        ┌──────────────┐               │
//!                                        │ SyncClient   │ ◄─────────────┤
//!                                        │ (OT state)   │               │ JSON frames
//!                                        └──────────────┘               ▼
//!                                                               ┌────────────────┐
//!                                                               │ WebSocket      │
//!                                                               │ (client.rs)    │
//!                                                               └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`operation`]: Retain/insert/delete operations: apply, compose, transform
//! - [`document`]: Server-confirmed document state and revision
//! - [`sync`]: Client state machine (synced / awaiting ack / buffered)
//! - [`protocol`]: JSON wire messages
//! - [`presence`]: Peer sessions and remote cursors
//! - [`events`]: Typed events and listener registry
//! - [`adapter`]: One channel scoped to one document session
//! - [`binding`]: Widget glue with feedback-loop suppression
//! - [`client`]: WebSocket transport
//! - [`session`]: Reconnecting driver for a whole editing session
//! - [`config`]: Connection parameters and reconnect policy

pub mod adapter;
pub mod binding;
pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod operation;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod sync;

// Re-exports for convenience
pub use adapter::{ChannelAdapter, Transport};
pub use binding::{EditorBinding, PlainTextWidget, TextWidget};
pub use client::{ConnectionState, InboundFrame, WsTransport};
pub use config::{
    ConnectionParams, ReconnectPolicy, SessionConfig, TokenProvider, DEFAULT_RECONNECT_INTERVAL,
    NORMAL_CLOSE_CODE,
};
pub use document::DocumentState;
pub use error::CollabError;
pub use events::{CollabEvent, ConsistencyFault, EventKind, ListenerId, Listeners};
pub use operation::{Component, Operation};
pub use presence::{CursorChange, Peer, PresenceTracker};
pub use protocol::{ClientMessage, Cursor, ProtocolError, ServerMessage, UserInfo};
pub use session::{CollabSession, SessionCommand, SessionHandle};
pub use sync::{InFlight, LocalOutcome, Origin, ServerOutcome, SyncClient, SyncState, SyncStatus};
