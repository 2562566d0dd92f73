//! Glue between a text-editing widget and the channel adapter.
//!
//! The binding keeps a shadow copy of the text it last synchronized with
//! the widget. Local changes are diffed against the shadow and submitted;
//! remote operations are applied to both. A remote edit reported back by
//! the widget diffs to a no-op, which is what breaks the feedback loop.

use std::collections::BTreeMap;

use crate::adapter::{ChannelAdapter, Transport};
use crate::error::CollabError;
use crate::events::{CollabEvent, EventKind, ListenerId};
use crate::operation::Operation;
use crate::presence::CursorChange;
use crate::protocol::Cursor;

/// The editing surface the binding drives.
pub trait TextWidget {
    fn text(&self) -> String;

    fn set_text(&mut self, text: &str);

    /// Apply a delta in place. Widgets with native delta support should
    /// override this to keep selections and scroll position.
    fn apply_delta(&mut self, delta: &Operation) -> Result<(), CollabError> {
        let next = delta.apply(&self.text())?;
        self.set_text(&next);
        Ok(())
    }

    fn render_cursor(&mut self, change: &CursorChange);

    fn remove_cursor(&mut self, session_id: &str);

    fn clear_history(&mut self);

    fn set_read_only(&mut self, read_only: bool);
}

/// Headless widget holding plain text, an undo stack and peer cursors.
#[derive(Debug, Default, Clone)]
pub struct PlainTextWidget {
    text: String,
    undo: Vec<String>,
    cursors: BTreeMap<String, CursorChange>,
    read_only: bool,
}

impl PlainTextWidget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    /// Restore the previous text. Returns `false` when history is empty.
    pub fn undo(&mut self) -> bool {
        match self.undo.pop() {
            Some(previous) => {
                self.text = previous;
                true
            }
            None => false,
        }
    }

    pub fn cursor(&self, session_id: &str) -> Option<&CursorChange> {
        self.cursors.get(session_id)
    }

    pub fn cursors(&self) -> impl Iterator<Item = &CursorChange> {
        self.cursors.values()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl TextWidget for PlainTextWidget {
    fn text(&self) -> String {
        self.text.clone()
    }

    fn set_text(&mut self, text: &str) {
        if self.text != text {
            let previous = std::mem::replace(&mut self.text, text.to_owned());
            self.undo.push(previous);
        }
    }

    fn render_cursor(&mut self, change: &CursorChange) {
        self.cursors.insert(change.session_id.clone(), change.clone());
    }

    fn remove_cursor(&mut self, session_id: &str) {
        self.cursors.remove(session_id);
    }

    fn clear_history(&mut self) {
        self.undo.clear();
    }

    fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }
}

pub struct EditorBinding<W: TextWidget, T: Transport> {
    widget: W,
    adapter: ChannelAdapter<T>,
    /// Text as last synchronized with the widget.
    shadow: String,
    read_only: bool,
    clear_history_on_ready: bool,
    /// The widget text no longer matches the synchronized document.
    diverged: bool,
    disposed: bool,
}

impl<W: TextWidget, T: Transport> EditorBinding<W, T> {
    /// Wrap a widget. It stays read-only until the first snapshot.
    pub fn new(mut widget: W) -> Self {
        widget.set_read_only(true);
        Self {
            shadow: widget.text(),
            widget,
            adapter: ChannelAdapter::new(),
            read_only: true,
            // The initial load should not be undoable either.
            clear_history_on_ready: true,
            diverged: false,
            disposed: false,
        }
    }

    pub fn widget(&self) -> &W {
        &self.widget
    }

    pub fn widget_mut(&mut self) -> &mut W {
        &mut self.widget
    }

    pub fn adapter(&self) -> &ChannelAdapter<T> {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut ChannelAdapter<T> {
        &mut self.adapter
    }

    pub fn on<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&CollabEvent) + Send + 'static,
    {
        self.adapter.on(kind, listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.adapter.off(id)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// A fresh snapshot is needed before editing can resume.
    pub fn is_desynced(&self) -> bool {
        self.diverged || self.adapter.is_desynced()
    }

    pub fn text(&self) -> String {
        self.widget.text()
    }

    /// Replace the text through the local edit path.
    pub fn set_text(&mut self, text: &str) -> Result<(), CollabError> {
        self.widget.set_text(text);
        self.handle_content_changed()
    }

    pub fn clear_history(&mut self) {
        self.widget.clear_history();
    }

    /// True when the document has no revisions or no snapshot yet.
    pub fn is_history_empty(&self) -> bool {
        self.adapter.sync().is_history_empty()
    }

    pub fn attach(&mut self, transport: T) {
        self.adapter.connect(transport);
    }

    /// The widget reported a content change.
    pub fn handle_content_changed(&mut self) -> Result<(), CollabError> {
        let current = self.widget.text();
        let op = Operation::from_diff(&self.shadow, &current);
        if op.is_noop() {
            return Ok(());
        }
        self.submit_local(op, current)
    }

    /// The widget reported a delta against the last synchronized text.
    /// The widget is brought in line if it does not show the edit yet.
    pub fn handle_local_operation(&mut self, op: Operation) -> Result<(), CollabError> {
        let next = op.apply(&self.shadow)?;
        if self.widget.text() != next {
            self.widget.set_text(&next);
        }
        if op.is_noop() {
            return Ok(());
        }
        self.submit_local(op, next)
    }

    pub fn handle_local_cursor(&mut self, cursor: Cursor) {
        self.adapter.send_cursor(cursor);
    }

    fn submit_local(&mut self, op: Operation, next: String) -> Result<(), CollabError> {
        if self.read_only {
            log::warn!("Edit rejected: editor is read-only");
            self.widget.set_text(&self.shadow);
            return Err(CollabError::ChannelClosed);
        }

        match self.adapter.submit(op) {
            Ok(events) => {
                self.shadow = next;
                self.apply_events(events);
                Ok(())
            }
            Err(e) if e.is_consistency_fault() || self.adapter.is_desynced() => {
                self.clear_history_on_ready = true;
                self.set_read_only(true);
                Err(e)
            }
            Err(e) => {
                self.widget.set_text(&self.shadow);
                Err(e)
            }
        }
    }

    pub fn handle_frame(&mut self, frame: &str) -> Vec<CollabEvent> {
        let events = self.adapter.handle_frame(frame);
        self.apply_events(events.clone());
        events
    }

    pub fn handle_close(&mut self, code: Option<u16>) {
        let events = self.adapter.handle_close(code);
        self.apply_events(events);
    }

    /// Drop session state ahead of a reconnect.
    pub fn reset(&mut self) {
        let events = self.adapter.reset();
        self.diverged = false;
        self.apply_events(events);
    }

    /// Close the channel normally from our side.
    pub fn close(&mut self) {
        self.adapter.close();
        self.set_read_only(true);
        self.clear_history_on_ready = true;
    }

    /// Detach from the widget and close the channel. Safe to call twice.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let sessions: Vec<String> = self
            .adapter
            .presence()
            .peers()
            .map(|p| p.session_id.clone())
            .collect();
        for session_id in sessions {
            self.widget.remove_cursor(&session_id);
        }
        self.adapter.dispose();
        self.set_read_only(true);
        self.disposed = true;
    }

    fn apply_events(&mut self, events: Vec<CollabEvent>) {
        for event in events {
            match event {
                CollabEvent::InitialRevision(revision) => {
                    log::debug!("Loading snapshot at revision {revision}");
                    self.widget.set_text("");
                    self.shadow.clear();
                    self.diverged = false;
                }
                CollabEvent::Operation(op) => self.apply_remote(&op),
                CollabEvent::Ready(true) => {
                    if self.clear_history_on_ready {
                        self.widget.clear_history();
                        self.clear_history_on_ready = false;
                    }
                    self.set_read_only(self.diverged);
                }
                CollabEvent::Ready(false) => {
                    self.clear_history_on_ready = true;
                    self.set_read_only(true);
                }
                CollabEvent::CursorChanged(change) => match change.cursor {
                    Some(_) => self.widget.render_cursor(&change),
                    None => self.widget.remove_cursor(&change.session_id),
                },
                CollabEvent::Error(_) => {
                    self.clear_history_on_ready = true;
                    self.set_read_only(true);
                }
                CollabEvent::StatusChanged(_) | CollabEvent::ConnectionChanged(_) => {}
            }
        }
    }

    fn apply_remote(&mut self, op: &Operation) {
        let next = match op.apply(&self.shadow) {
            Ok(next) => next,
            Err(e) => {
                log::error!("Remote operation does not fit the editor text: {e}");
                self.diverged = true;
                self.clear_history_on_ready = true;
                self.set_read_only(true);
                return;
            }
        };
        if let Err(e) = self.widget.apply_delta(op) {
            log::warn!("Widget rejected delta ({e}), replacing text");
            self.widget.set_text(&next);
        }
        self.shadow = next;
    }

    fn set_read_only(&mut self, read_only: bool) {
        if self.read_only != read_only {
            self.read_only = read_only;
            self.widget.set_read_only(read_only);
        }
    }
}
