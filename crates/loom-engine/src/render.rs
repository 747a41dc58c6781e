//! Render delegate seam
//!
//! The engine supplies ordering and timing only; visual construction is
//! entirely external. Every method defaults to a no-op so hosts implement
//! only the surfaces they draw.

use async_trait::async_trait;
use loom_protocol::{SubagentInfo, ToolCallRecord};

/// Interface the engine calls into for rendering side effects.
///
/// Calls arrive strictly in content order. Tool visuals are created at
/// buffer-flush time, not at announcement time; the logical position in the
/// message was already fixed when the invocation arrived.
#[allow(unused_variables)]
#[async_trait]
pub trait RenderDelegate: Send + Sync {
    /// A text block opened
    async fn text_open(&self) {}

    /// Text was appended to the open text block
    async fn text_append(&self, delta: &str) {}

    /// The open text block closed with its final content
    async fn text_close(&self, text: &str) {}

    /// A thinking block opened
    async fn thinking_open(&self) {}

    /// Thinking text was appended to the open thinking block
    async fn thinking_append(&self, delta: &str) {}

    /// The open thinking block closed
    async fn thinking_close(&self, thinking: &str, duration_ms: u64) {}

    /// A tool-call visual should be created
    async fn tool_started(&self, record: &ToolCallRecord) {}

    /// An existing tool-call visual should be updated (input refinement,
    /// status change, or result arrival)
    async fn tool_updated(&self, record: &ToolCallRecord) {}

    /// A subagent visual should be created
    async fn subagent_started(&self, info: &SubagentInfo) {}

    /// An existing subagent visual should be updated
    async fn subagent_updated(&self, info: &SubagentInfo) {}

    /// A compaction boundary marker should be shown
    async fn compact_marker(&self) {}

    /// The turn was interrupted; show a marker in place of closing text
    async fn interrupted_marker(&self) {}

    /// A stream error marker should be shown at the open text position
    async fn error_marker(&self, message: &str) {}
}

/// A delegate that renders nothing. Useful for headless hosts and tests.
pub struct NullRender;

#[async_trait]
impl RenderDelegate for NullRender {}
