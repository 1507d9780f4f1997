//! The visible conversation: rendered nodes, typing indicator, status line
//! and scroll position.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::render::RenderedMarkup;
use crate::state::ChatRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub text: String,
}

impl Status {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Error,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Info,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Success,
            text: text.into(),
        }
    }
}

/// Surface the conversation controller writes into.
pub trait TranscriptView: Send {
    fn append(&mut self, role: ChatRole, markup: RenderedMarkup) -> NodeId;
    fn update(&mut self, node: NodeId, markup: RenderedMarkup);
    fn show_typing(&mut self);
    fn hide_typing(&mut self);
    fn set_status(&mut self, status: Status);
    fn clear_status(&mut self);
    fn clear(&mut self);
    /// Rows between the bottom of the viewport and the end of the content.
    fn distance_from_bottom(&self) -> u16;
    fn scroll_to_bottom(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptNode {
    pub id: NodeId,
    pub role: ChatRole,
    pub markup: RenderedMarkup,
}

#[derive(Debug)]
pub struct Transcript {
    nodes: Vec<TranscriptNode>,
    next_id: u64,
    typing: bool,
    status: Option<Status>,
    scroll_offset: u16,
    viewport_height: u16,
    content_height: u16,
    pinned: bool,
}

impl Default for Transcript {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            next_id: 0,
            typing: false,
            status: None,
            scroll_offset: 0,
            viewport_height: 0,
            content_height: 0,
            pinned: true,
        }
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[TranscriptNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&TranscriptNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn scroll_offset(&self) -> u16 {
        self.scroll_offset
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    fn max_offset(&self) -> u16 {
        self.content_height.saturating_sub(self.viewport_height)
    }

    /// Called by the front end after laying the content out.
    pub fn set_layout(&mut self, viewport_height: u16, content_height: u16) {
        self.viewport_height = viewport_height;
        self.content_height = content_height;
        if self.pinned {
            self.scroll_offset = self.max_offset();
        } else {
            self.scroll_offset = self.scroll_offset.min(self.max_offset());
        }
    }

    pub fn scroll_up(&mut self, rows: u16) {
        self.scroll_offset = self.scroll_offset.saturating_sub(rows);
        self.pinned = self.scroll_offset >= self.max_offset();
    }

    pub fn scroll_down(&mut self, rows: u16) {
        self.scroll_offset = self.scroll_offset.saturating_add(rows).min(self.max_offset());
        self.pinned = self.scroll_offset >= self.max_offset();
    }
}

impl TranscriptView for Transcript {
    fn append(&mut self, role: ChatRole, markup: RenderedMarkup) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.push(TranscriptNode { id, role, markup });
        id
    }

    fn update(&mut self, node: NodeId, markup: RenderedMarkup) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.id == node) {
            existing.markup = markup;
        }
    }

    fn show_typing(&mut self) {
        self.typing = true;
    }

    fn hide_typing(&mut self) {
        self.typing = false;
    }

    fn set_status(&mut self, status: Status) {
        self.status = Some(status);
    }

    fn clear_status(&mut self) {
        self.status = None;
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.typing = false;
        self.scroll_offset = 0;
        self.content_height = 0;
        self.pinned = true;
    }

    fn distance_from_bottom(&self) -> u16 {
        if self.pinned {
            return 0;
        }
        self.content_height
            .saturating_sub(self.viewport_height)
            .saturating_sub(self.scroll_offset)
    }

    fn scroll_to_bottom(&mut self) {
        self.pinned = true;
        self.scroll_offset = self.max_offset();
    }
}

/// Transcript shared between the controller task and the UI thread.
#[derive(Debug, Clone, Default)]
pub struct SharedTranscript(Arc<Mutex<Transcript>>);

impl SharedTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Transcript> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TranscriptView for SharedTranscript {
    fn append(&mut self, role: ChatRole, markup: RenderedMarkup) -> NodeId {
        self.lock().append(role, markup)
    }

    fn update(&mut self, node: NodeId, markup: RenderedMarkup) {
        self.lock().update(node, markup)
    }

    fn show_typing(&mut self) {
        self.lock().show_typing()
    }

    fn hide_typing(&mut self) {
        self.lock().hide_typing()
    }

    fn set_status(&mut self, status: Status) {
        self.lock().set_status(status)
    }

    fn clear_status(&mut self) {
        self.lock().clear_status()
    }

    fn clear(&mut self) {
        self.lock().clear()
    }

    fn distance_from_bottom(&self) -> u16 {
        self.lock().distance_from_bottom()
    }

    fn scroll_to_bottom(&mut self) {
        self.lock().scroll_to_bottom()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RendererTier;

    fn markup(html: &str) -> RenderedMarkup {
        RenderedMarkup {
            html: html.to_string(),
            code_blocks: Vec::new(),
            tier: RendererTier::Fallback,
        }
    }

    #[test]
    fn test_update_replaces_markup() {
        let mut transcript = Transcript::new();
        let id = transcript.append(ChatRole::Assistant, markup("<p>a</p>"));
        transcript.update(id, markup("<p>ab</p>"));
        assert_eq!(transcript.node(id).unwrap().markup.html, "<p>ab</p>");
        assert_eq!(transcript.nodes().len(), 1);
    }

    #[test]
    fn test_pinned_follows_growing_content() {
        let mut transcript = Transcript::new();
        transcript.set_layout(10, 30);
        assert_eq!(transcript.scroll_offset(), 20);
        transcript.set_layout(10, 45);
        assert_eq!(transcript.scroll_offset(), 35);
        assert_eq!(transcript.distance_from_bottom(), 0);
    }

    #[test]
    fn test_scrolled_up_position_is_kept() {
        let mut transcript = Transcript::new();
        transcript.set_layout(10, 30);
        transcript.scroll_up(8);
        assert!(!transcript.is_pinned());
        assert_eq!(transcript.distance_from_bottom(), 8);

        transcript.set_layout(10, 40);
        assert_eq!(transcript.scroll_offset(), 12);
        assert_eq!(transcript.distance_from_bottom(), 18);

        transcript.scroll_down(100);
        assert!(transcript.is_pinned());
    }

    #[test]
    fn test_clear_resets_view() {
        let mut transcript = Transcript::new();
        transcript.append(ChatRole::User, markup("<p>hi</p>"));
        transcript.show_typing();
        transcript.clear();
        assert!(transcript.nodes().is_empty());
        assert!(!transcript.is_typing());
    }

    #[test]
    fn test_shared_transcript_clones_see_writes() {
        let mut shared = SharedTranscript::new();
        let reader = shared.clone();
        shared.set_status(Status::error("boom"));
        assert_eq!(reader.lock().status().unwrap().text, "boom");
    }
}
