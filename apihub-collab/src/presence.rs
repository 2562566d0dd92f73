//! Peer presence: who else is editing the document and where their
//! cursors are.
//!
//! ## Data flow
//!
//! ```text
//! user:connected ──► PresenceTracker::join()
//! user:cursor    ──► PresenceTracker::update_cursor() ──► CursorChange
//! user:operation ──► PresenceTracker::transform_cursors() ──► CursorChange*
//! user:disconnected / channel reset ──► leave() / clear() ──► CursorChange { cursor: None }
//! ```
//!
//! Peers are keyed by session id, not user id: one user may hold several
//! sessions. Removing a peer always produces a `cursor: None` change so
//! the editor can drop its decoration; leaving entries behind shows up as
//! ghost cursors.

use std::collections::HashMap;

use crate::operation::Operation;
use crate::protocol::{Cursor, UserInfo};

/// A remote editing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub session_id: String,
    pub user_id: String,
    pub display_name: String,
    /// CSS color string as sent by the server (e.g. `#e5484d`).
    pub cursor_color: String,
    pub cursor: Option<Cursor>,
}

impl Peer {
    /// Peer first seen through a cursor update, before its join arrived.
    fn placeholder(session_id: &str) -> Self {
        let short: String = session_id.chars().take(8).collect();
        Self {
            session_id: session_id.to_owned(),
            user_id: String::new(),
            display_name: format!("Peer-{short}"),
            cursor_color: fallback_color(session_id),
            cursor: None,
        }
    }

    pub fn cursor_change(&self) -> CursorChange {
        CursorChange {
            session_id: self.session_id.clone(),
            display_name: self.display_name.clone(),
            cursor_color: self.cursor_color.clone(),
            cursor: self.cursor,
        }
    }
}

/// Notification that a peer's cursor moved, appeared or went away.
///
/// `cursor: None` means the decoration for `session_id` must be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorChange {
    pub session_id: String,
    pub display_name: String,
    pub cursor_color: String,
    pub cursor: Option<Cursor>,
}

impl CursorChange {
    pub fn removed(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            display_name: String::new(),
            cursor_color: String::new(),
            cursor: None,
        }
    }
}

/// Tracks every remote session in the document room.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// Our own session, whose echoes are ignored.
    local_session_id: Option<String>,
    peers: HashMap<String, Peer>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local_session(&mut self, session_id: Option<String>) {
        self.local_session_id = session_id;
    }

    pub fn local_session_id(&self) -> Option<&str> {
        self.local_session_id.as_deref()
    }

    fn is_local(&self, session_id: &str) -> bool {
        self.local_session_id.as_deref() == Some(session_id)
    }

    /// Register a peer. Returns `false` for our own session.
    ///
    /// A re-join keeps the last known cursor.
    pub fn join(&mut self, session_id: &str, user: &UserInfo, cursor_color: &str) -> bool {
        if self.is_local(session_id) {
            return false;
        }
        let cursor = self.peers.get(session_id).and_then(|p| p.cursor);
        self.peers.insert(
            session_id.to_owned(),
            Peer {
                session_id: session_id.to_owned(),
                user_id: user.id.clone(),
                display_name: user.name.clone(),
                cursor_color: cursor_color.to_owned(),
                cursor,
            },
        );
        true
    }

    /// Remove a peer, returning it if it was known.
    pub fn leave(&mut self, session_id: &str) -> Option<Peer> {
        self.peers.remove(session_id)
    }

    /// Record a cursor update. Unknown sessions get a placeholder entry;
    /// our own session is ignored.
    pub fn update_cursor(&mut self, session_id: &str, cursor: Option<Cursor>) -> Option<&Peer> {
        if self.is_local(session_id) {
            return None;
        }
        let peer = self
            .peers
            .entry(session_id.to_owned())
            .or_insert_with(|| Peer::placeholder(session_id));
        peer.cursor = cursor;
        Some(peer)
    }

    /// Shift every known cursor through an operation applied to the
    /// visible document. Returns the changes for cursors that moved.
    pub fn transform_cursors(&mut self, op: &Operation) -> Vec<CursorChange> {
        let mut changes = Vec::new();
        for peer in self.peers.values_mut() {
            if let Some(cursor) = peer.cursor {
                let moved = cursor.transform(op);
                if moved != cursor {
                    peer.cursor = Some(moved);
                    changes.push(peer.cursor_change());
                }
            }
        }
        changes
    }

    /// Drop every peer, returning the removed session ids.
    pub fn clear(&mut self) -> Vec<String> {
        self.peers.drain().map(|(id, _)| id).collect()
    }

    pub fn peer(&self, session_id: &str) -> Option<&Peer> {
        self.peers.get(session_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Stable, visually distinct color for a session without a server color.
pub fn fallback_color(session_id: &str) -> String {
    // FNV-1a: stable across runs and platforms.
    let hash = session_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3));
    let hue = (hash % 360) as f32 / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
    format!(
        "#{:02x}{:02x}{:02x}",
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8
    )
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserInfo {
        UserInfo {
            id: "u-1".into(),
            name: "Alice".into(),
        }
    }

    #[test]
    fn test_join_and_leave() {
        let mut presence = PresenceTracker::new();
        assert!(presence.join("s-1", &alice(), "#ff0000"));
        assert_eq!(presence.peer_count(), 1);

        let peer = presence.peer("s-1").unwrap();
        assert_eq!(peer.display_name, "Alice");
        assert_eq!(peer.user_id, "u-1");
        assert_eq!(peer.cursor_color, "#ff0000");
        assert!(peer.cursor.is_none());

        let removed = presence.leave("s-1").unwrap();
        assert_eq!(removed.session_id, "s-1");
        assert!(presence.is_empty());
        assert!(presence.leave("s-1").is_none());
    }

    #[test]
    fn test_same_user_multiple_sessions() {
        let mut presence = PresenceTracker::new();
        presence.join("s-1", &alice(), "#ff0000");
        presence.join("s-2", &alice(), "#00ff00");
        assert_eq!(presence.peer_count(), 2);

        presence.leave("s-1");
        assert!(presence.peer("s-2").is_some());
    }

    #[test]
    fn test_ignores_local_session() {
        let mut presence = PresenceTracker::new();
        presence.set_local_session(Some("me".into()));
        assert!(!presence.join("me", &alice(), "#000"));
        assert!(presence.update_cursor("me", Some(Cursor::at(1))).is_none());
        assert!(presence.is_empty());
    }

    #[test]
    fn test_cursor_update() {
        let mut presence = PresenceTracker::new();
        presence.join("s-1", &alice(), "#ff0000");
        let peer = presence
            .update_cursor("s-1", Some(Cursor { position: 2, selection_end: 4 }))
            .unwrap();
        assert_eq!(peer.cursor, Some(Cursor { position: 2, selection_end: 4 }));

        let change = peer.cursor_change();
        assert_eq!(change.display_name, "Alice");
        assert_eq!(change.cursor_color, "#ff0000");
    }

    #[test]
    fn test_cursor_from_unknown_session_creates_placeholder() {
        let mut presence = PresenceTracker::new();
        let peer = presence
            .update_cursor("0123456789abcdef", Some(Cursor::at(3)))
            .unwrap();
        assert_eq!(peer.display_name, "Peer-01234567");
        assert!(peer.cursor_color.starts_with('#'));
        assert_eq!(presence.peer_count(), 1);

        // A later join fills in identity and keeps the cursor.
        presence.join("0123456789abcdef", &alice(), "#123456");
        let peer = presence.peer("0123456789abcdef").unwrap();
        assert_eq!(peer.display_name, "Alice");
        assert_eq!(peer.cursor, Some(Cursor::at(3)));
    }

    #[test]
    fn test_transform_cursors() {
        let mut presence = PresenceTracker::new();
        presence.join("s-1", &alice(), "#f00");
        presence.join("s-2", &alice(), "#0f0");
        presence.update_cursor("s-1", Some(Cursor::at(1)));
        presence.update_cursor("s-2", Some(Cursor::at(4)));

        // Insert two chars at offset 2 of a 5-char document.
        let op = Operation::new().retain(2).insert("zz").retain(3);
        let changes = presence.transform_cursors(&op);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].session_id, "s-2");
        assert_eq!(changes[0].cursor, Some(Cursor::at(6)));
        assert_eq!(presence.peer("s-1").unwrap().cursor, Some(Cursor::at(1)));
    }

    #[test]
    fn test_clear_returns_sessions() {
        let mut presence = PresenceTracker::new();
        presence.join("s-1", &alice(), "#f00");
        presence.join("s-2", &alice(), "#0f0");
        let mut removed = presence.clear();
        removed.sort();
        assert_eq!(removed, vec!["s-1".to_string(), "s-2".to_string()]);
        assert!(presence.is_empty());
    }

    #[test]
    fn test_fallback_color_stable() {
        assert_eq!(fallback_color("abc"), fallback_color("abc"));
        let color = fallback_color("session-42");
        assert_eq!(color.len(), 7);
        assert!(color.starts_with('#'));
    }

    #[test]
    fn test_hsl_to_rgb_red() {
        let (r, g, b) = hsl_to_rgb(0.0, 1.0, 0.5);
        assert!((r - 1.0).abs() < 0.01);
        assert!(g.abs() < 0.01);
        assert!(b.abs() < 0.01);
    }

    #[test]
    fn test_hsl_to_rgb_achromatic() {
        let (r, g, b) = hsl_to_rgb(0.3, 0.0, 0.5);
        assert_eq!((r, g, b), (0.5, 0.5, 0.5));
    }
}
