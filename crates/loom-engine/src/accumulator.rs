//! Content accumulator: transient text/thinking buffers for the live message

use loom_protocol::{ContentBlock, Message};
use std::time::Instant;

/// Owns the in-progress text and thinking buffers for one message.
///
/// At most one of the two is open at a time; the dispatcher finalizes one
/// kind before appending the other. `finalize_*` converts a non-empty
/// buffer into a permanent content block and clears it; calling finalize
/// twice in a row is a no-op the second time.
#[derive(Debug, Default)]
pub struct ContentAccumulator {
    open_text: String,
    open_thinking: String,
    thinking_opened_at: Option<Instant>,
}

impl ContentAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a text block is currently open
    pub fn has_open_text(&self) -> bool {
        !self.open_text.is_empty()
    }

    /// Whether a thinking block is currently open
    pub fn has_open_thinking(&self) -> bool {
        self.thinking_opened_at.is_some()
    }

    /// Append a text delta. Returns true if this delta opened the block.
    pub fn append_text(&mut self, delta: &str) -> bool {
        debug_assert!(!self.has_open_thinking(), "thinking block still open");
        let opened = self.open_text.is_empty() && !delta.is_empty();
        self.open_text.push_str(delta);
        opened
    }

    /// Append a thinking delta. Returns true if this delta opened the block.
    pub fn append_thinking(&mut self, delta: &str) -> bool {
        debug_assert!(!self.has_open_text(), "text block still open");
        let opened = self.thinking_opened_at.is_none();
        if opened {
            self.thinking_opened_at = Some(Instant::now());
        }
        self.open_thinking.push_str(delta);
        opened
    }

    /// Finalize the open text block into `message`, if non-empty.
    /// Returns the closed text, or None if there was nothing to close.
    pub fn finalize_text(&mut self, message: &mut Message) -> Option<String> {
        if self.open_text.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.open_text);
        message.push_block(ContentBlock::Text { text: text.clone() });
        Some(text)
    }

    /// Finalize the open thinking block into `message`, if non-empty.
    /// Returns (thinking, duration_ms), or None if there was nothing to close.
    pub fn finalize_thinking(&mut self, message: &mut Message) -> Option<(String, u64)> {
        let opened_at = self.thinking_opened_at.take()?;
        if self.open_thinking.is_empty() {
            return None;
        }
        let thinking = std::mem::take(&mut self.open_thinking);
        let duration_ms = opened_at.elapsed().as_millis() as u64;
        message.push_block(ContentBlock::Thinking {
            thinking: thinking.clone(),
            duration_ms,
        });
        Some((thinking, duration_ms))
    }
}
