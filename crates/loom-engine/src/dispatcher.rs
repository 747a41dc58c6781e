//! Chunk dispatcher: routes every event chunk into message structure
//!
//! `StreamController` is the entry point for every chunk of one stream. It
//! owns the live message, the content accumulator, and the tool-call
//! buffer, and routes by chunk kind and parent-linkage: subagent-scoped
//! chunks go to the tracker and never reach main-stream handling.

use crate::accumulator::ContentAccumulator;
use crate::events::EngineEvent;
use crate::render::RenderDelegate;
use crate::subagent::{SubagentEffect, SubagentTracker};
use crate::tool_buffer::{ToolCallBuffer, merge_tool_input};
use loom_protocol::{
    ContentBlock, Message, StreamChunk, SubagentMode, ToolCallRecord, ToolStatus, UsageTotals,
};
use parking_lot::Mutex;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tokio::sync::broadcast;

/// Marker appended to a message when its turn is interrupted
pub const INTERRUPTED_MARKER: &str = "[interrupted by user]";

/// Patterns marking a tool result as blocked (by policy or by the user)
/// rather than failed. A blocked marker takes precedence over the raw
/// error flag.
static BLOCKED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)permission denied",
        r"(?i)blocked by",
        r"(?i)rejected by (the )?user",
        r"(?i)approval required",
        r"(?i)\[blocked\]",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Classify a tool result's content into a terminal status.
pub fn classify_result(content: &str, is_error: bool) -> ToolStatus {
    if BLOCKED_PATTERNS.iter().any(|re| re.is_match(content)) {
        return ToolStatus::Blocked;
    }
    if is_error {
        return ToolStatus::Error;
    }
    ToolStatus::Completed
}

/// Construction parameters shared by every controller of one conversation
pub struct ControllerContext {
    pub tracker: Arc<Mutex<SubagentTracker>>,
    pub render: Arc<dyn RenderDelegate>,
    pub event_tx: broadcast::Sender<EngineEvent>,
    /// Tool name that spawns a subagent
    pub spawn_tool: String,
    /// Tool name of the invisible async-subagent link
    pub link_tool: String,
    /// Backend session the usage meter belongs to
    pub session_id: Option<String>,
    /// Discard usage chunks outright (e.g. right after a session reset)
    pub suppress_usage: bool,
}

/// Builds one message from one chunk stream.
pub struct StreamController {
    ctx: ControllerContext,
    message: Message,
    acc: ContentAccumulator,
    buffer: ToolCallBuffer,
    usage: UsageTotals,
    stream_error: Option<String>,
}

impl StreamController {
    /// Start accumulating a fresh assistant message.
    pub fn new(ctx: ControllerContext, usage: UsageTotals) -> Self {
        ctx.tracker.lock().begin_turn();
        Self {
            ctx,
            message: Message::assistant_empty(),
            acc: ContentAccumulator::new(),
            buffer: ToolCallBuffer::new(),
            usage,
            stream_error: None,
        }
    }

    /// Read-only view of the message being built
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Error recorded from an `Error` chunk, if any
    pub fn stream_error(&self) -> Option<&str> {
        self.stream_error.as_deref()
    }

    /// Consume one event chunk. Returns after all resulting state mutation
    /// and rendering side effects for that chunk are applied.
    pub async fn handle(&mut self, chunk: StreamChunk) {
        // Parent-linked chunks never reach main-stream handling
        if let StreamChunk::Scoped {
            parent_tool_id,
            chunk,
        } = chunk
        {
            let effects = self.ctx.tracker.lock().handle_scoped(&parent_tool_id, &chunk);
            self.apply_subagent_effects(effects).await;
            return;
        }

        match chunk {
            StreamChunk::Thinking { delta } => {
                // Tool cards must not interleave with narration
                self.flush_pending_tools().await;
                self.close_text().await;
                if self.acc.append_thinking(&delta) {
                    self.ctx.render.thinking_open().await;
                }
                self.ctx.render.thinking_append(&delta).await;
            }
            StreamChunk::Text { delta } => {
                self.flush_pending_tools().await;
                self.close_thinking().await;
                self.message.content.push_str(&delta);
                if self.acc.append_text(&delta) {
                    self.ctx.render.text_open().await;
                }
                self.ctx.render.text_append(&delta).await;
            }
            StreamChunk::ToolUse { id, name, input } => {
                // Tool calls are block-level siblings, never inline
                self.close_text().await;
                self.close_thinking().await;
                self.handle_tool_use(id, name, input).await;
            }
            StreamChunk::ToolResult {
                id,
                content,
                is_error,
            } => {
                self.handle_tool_result(&id, &content, is_error).await;
            }
            StreamChunk::Usage(update) => {
                if self.should_discard_usage(&update) {
                    tracing::debug!("discarding unreliable usage chunk");
                } else {
                    self.usage.apply(&update);
                }
            }
            StreamChunk::CompactBoundary { .. } => {
                // Hard ordering fence
                self.flush_pending_tools().await;
                self.close_text().await;
                self.close_thinking().await;
                self.message.push_block(ContentBlock::CompactBoundary);
                self.ctx.render.compact_marker().await;
            }
            StreamChunk::Error { message } => {
                // The marker is arriving text, so it is a flush point too
                self.flush_pending_tools().await;
                self.close_thinking().await;
                let marker = format!("[stream error: {message}]");
                self.message.content.push_str(&marker);
                if self.acc.append_text(&marker) {
                    self.ctx.render.text_open().await;
                }
                self.ctx.render.error_marker(&message).await;
                let _ = self.ctx.event_tx.send(EngineEvent::StreamError {
                    message: message.clone(),
                });
                self.stream_error = Some(message);
            }
            StreamChunk::Done => {
                self.flush_pending_tools().await;
            }
            StreamChunk::Scoped { .. } => unreachable!("handled above"),
        }
    }

    async fn handle_tool_use(&mut self, id: String, name: String, input: serde_json::Value) {
        if name == self.ctx.spawn_tool {
            let effect = self.ctx.tracker.lock().spawn(id.clone(), &input);
            let mode = effect.info().mode;
            self.message.push_block(ContentBlock::Subagent {
                id: id.clone(),
                mode,
            });
            self.apply_subagent_effects(vec![effect]).await;
            return;
        }
        if name == self.ctx.link_tool {
            // Correlation marker only, no visible content block
            self.ctx.tracker.lock().register_link(id, &input);
            return;
        }

        if let Some(record) = self.message.tool_call_mut(&id) {
            // Refinement chunk: merge fields, never replace
            merge_tool_input(&mut record.input, &input);
            if !name.is_empty() {
                record.name = name;
            }
            let rendered = !self.buffer.contains(&id);
            let record = record.clone();
            if rendered {
                // Already materialized: refresh only the visible label
                self.ctx.render.tool_updated(&record).await;
            }
            return;
        }

        let record = ToolCallRecord::new(id.clone(), name, input);
        self.message.insert_tool_call(record);
        self.message.push_block(ContentBlock::ToolUse { id: id.clone() });
        self.buffer.push(id);
    }

    async fn handle_tool_result(&mut self, id: &str, content: &str, is_error: bool) {
        let status = classify_result(content, is_error);

        // Precedence: pending tool, sync subagent, async link, rendered tool.
        // An id lives in at most one registry at a time.
        if self.buffer.contains(id) {
            // Early materialization: the result forces a flush point
            self.flush_pending_tools().await;
            self.finish_main_tool(id, status, content).await;
            return;
        }

        let effect = {
            let mut tracker = self.ctx.tracker.lock();
            if tracker.contains(id) {
                tracker.resolve_spawn_result(id, status, content)
            } else if tracker.is_link(id) {
                tracker.finalize_link(id, status, content)
            } else {
                None
            }
        };
        if let Some(effect) = effect {
            self.apply_subagent_effects(vec![effect]).await;
            return;
        }
        if self.ctx.tracker.lock().contains(id) || self.ctx.tracker.lock().is_link(id) {
            // Known to the tracker but already terminal: late delivery no-ops
            return;
        }

        if self.message.tool_call(id).is_some() {
            self.finish_main_tool(id, status, content).await;
        } else {
            tracing::debug!(id, "tool result for unknown invocation, dropping");
        }
    }

    async fn finish_main_tool(&mut self, id: &str, status: ToolStatus, content: &str) {
        if let Some(record) = self.message.tool_call_mut(id) {
            if record.finish(status, content) {
                let record = record.clone();
                self.ctx.render.tool_updated(&record).await;
            }
        }
    }

    async fn apply_subagent_effects(&mut self, effects: Vec<SubagentEffect>) {
        for effect in effects {
            let info = effect.info().clone();
            match &effect {
                SubagentEffect::Spawned(_) => {
                    // Sync subagents stay hidden until their first child
                    // chunk confirms a real sub-conversation
                    if info.mode == SubagentMode::Async {
                        self.ctx.render.subagent_started(&info).await;
                    }
                }
                SubagentEffect::Activated(_) => {
                    self.ctx.render.subagent_started(&info).await;
                }
                SubagentEffect::Confirmed(_)
                | SubagentEffect::ChildToolStarted(_, _)
                | SubagentEffect::ChildToolFinished(_, _)
                | SubagentEffect::Finished(_) => {
                    self.ctx.render.subagent_updated(&info).await;
                }
            }
            self.message.upsert_subagent(info.clone());
            let _ = self.ctx.event_tx.send(EngineEvent::SubagentChanged {
                id: info.id,
                status: info.status,
            });
        }
    }

    /// Render all pending tool cards in original insertion order, then
    /// clear the buffer. Flushing an empty buffer is a no-op.
    async fn flush_pending_tools(&mut self) {
        for id in self.buffer.drain() {
            if let Some(record) = self.message.tool_call(&id) {
                let record = record.clone();
                self.ctx.render.tool_started(&record).await;
            }
        }
    }

    async fn close_text(&mut self) {
        if let Some(text) = self.acc.finalize_text(&mut self.message) {
            self.ctx.render.text_close(&text).await;
        }
    }

    async fn close_thinking(&mut self) {
        if let Some((thinking, duration_ms)) = self.acc.finalize_thinking(&mut self.message) {
            self.ctx.render.thinking_close(&thinking, duration_ms).await;
        }
    }

    fn should_discard_usage(&self, update: &loom_protocol::UsageUpdate) -> bool {
        if self.ctx.suppress_usage {
            return true;
        }
        // Figures from a different backend session must not overwrite the meter
        if let (Some(active), Some(incoming)) = (&self.ctx.session_id, &update.session_id) {
            if active != incoming {
                return true;
            }
        }
        // Aggregate figures are unreliable whenever a subagent ran this turn
        self.ctx.tracker.lock().spawned_this_turn()
    }

    /// Run the unconditional end-of-stream steps: flush buffers, close open
    /// blocks, and mark interruption if requested. Dangling accumulator or
    /// buffer state would corrupt the next turn.
    pub async fn finish(&mut self, interrupted: bool) {
        self.flush_pending_tools().await;
        self.close_thinking().await;
        self.close_text().await;
        if interrupted {
            self.message.push_block(ContentBlock::Text {
                text: INTERRUPTED_MARKER.to_string(),
            });
            self.ctx.render.interrupted_marker().await;
        }
    }

    /// Tear down into the finished message and the updated usage meter.
    pub fn into_parts(self) -> (Message, UsageTotals, Option<String>) {
        (self.message, self.usage, self.stream_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::test_support::RecordingDelegate;
    use loom_protocol::{SubagentStatus, UsageUpdate};
    use serde_json::json;

    const SPAWN: &str = "dispatch_agent";
    const LINK: &str = "agent_result";

    struct Harness {
        controller: StreamController,
        render: Arc<RecordingDelegate>,
        tracker: Arc<Mutex<SubagentTracker>>,
    }

    fn harness() -> Harness {
        let render = Arc::new(RecordingDelegate::new());
        let tracker = Arc::new(Mutex::new(SubagentTracker::new()));
        let (event_tx, _) = broadcast::channel(64);
        let ctx = ControllerContext {
            tracker: tracker.clone(),
            render: render.clone(),
            event_tx,
            spawn_tool: SPAWN.into(),
            link_tool: LINK.into(),
            session_id: Some("sess-1".into()),
            suppress_usage: false,
        };
        Harness {
            controller: StreamController::new(ctx, UsageTotals::default()),
            render,
            tracker,
        }
    }

    // ---- classification ----

    #[test]
    fn test_classify_success() {
        assert_eq!(classify_result("all good", false), ToolStatus::Completed);
    }

    #[test]
    fn test_classify_error_flag() {
        assert_eq!(classify_result("boom", true), ToolStatus::Error);
    }

    #[test]
    fn test_classify_blocked_beats_error_flag() {
        assert_eq!(
            classify_result("Permission denied by policy", true),
            ToolStatus::Blocked
        );
        assert_eq!(
            classify_result("request was rejected by the user", false),
            ToolStatus::Blocked
        );
    }

    // ---- ordering & buffering ----

    #[tokio::test]
    async fn test_text_deltas_build_single_block() {
        let mut h = harness();
        h.controller.handle(StreamChunk::text("Hello")).await;
        h.controller.handle(StreamChunk::text(" world")).await;
        h.controller.handle(StreamChunk::Done).await;
        h.controller.finish(false).await;

        let (msg, _, _) = h.controller.into_parts();
        assert_eq!(msg.content, "Hello world");
        assert_eq!(msg.content_blocks.len(), 1);
        match &msg.content_blocks[0] {
            ContentBlock::Text { text } => assert_eq!(text, "Hello world"),
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_buffered_tools_flush_in_order_before_text() {
        let mut h = harness();
        h.controller
            .handle(StreamChunk::tool_use("t1", "read", json!({"path": "/a"})))
            .await;
        h.controller
            .handle(StreamChunk::tool_use("t2", "grep", json!({"pattern": "x"})))
            .await;
        // Nothing rendered while buffered
        assert!(h.render.calls().is_empty());

        h.controller.handle(StreamChunk::text("ok")).await;

        let calls = h.render.calls();
        assert_eq!(
            &calls[..3],
            &["tool_started:t1", "tool_started:t2", "text_open"]
        );
    }

    #[tokio::test]
    async fn test_block_order_matches_arrival_despite_deferred_render() {
        let mut h = harness();
        h.controller.handle(StreamChunk::thinking("hmm")).await;
        h.controller
            .handle(StreamChunk::tool_use("t1", "read", json!({})))
            .await;
        h.controller.handle(StreamChunk::text("done")).await;
        h.controller.finish(false).await;

        let (msg, _, _) = h.controller.into_parts();
        let kinds: Vec<&str> = msg
            .content_blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Thinking { .. } => "thinking",
                ContentBlock::ToolUse { .. } => "tool_use",
                ContentBlock::Text { .. } => "text",
                ContentBlock::Subagent { .. } => "subagent",
                ContentBlock::CompactBoundary => "compact",
            })
            .collect();
        assert_eq!(kinds, vec!["thinking", "tool_use", "text"]);
    }

    #[tokio::test]
    async fn test_tool_refinement_merges_input() {
        let mut h = harness();
        h.controller
            .handle(StreamChunk::tool_use("t1", "edit", json!({"path": "/a"})))
            .await;
        h.controller
            .handle(StreamChunk::tool_use("t1", "edit", json!({"text": "new"})))
            .await;
        h.controller.handle(StreamChunk::text("go")).await;

        let (msg, _, _) = h.controller.into_parts();
        let record = msg.tool_call("t1").unwrap();
        assert_eq!(record.input, json!({"path": "/a", "text": "new"}));
        // Merged, not duplicated
        assert_eq!(
            msg.content_blocks
                .iter()
                .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_refinement_after_render_updates_label() {
        let mut h = harness();
        h.controller
            .handle(StreamChunk::tool_use("t1", "edit", json!({"path": "/a"})))
            .await;
        h.controller.handle(StreamChunk::text("narrating")).await;
        h.controller
            .handle(StreamChunk::tool_use("t1", "edit", json!({"text": "v2"})))
            .await;

        let calls = h.render.calls();
        assert!(calls.contains(&"tool_updated:t1".to_string()));
    }

    #[tokio::test]
    async fn test_result_before_flush_forces_flush_in_order() {
        let mut h = harness();
        h.controller
            .handle(StreamChunk::tool_use("t1", "read", json!({})))
            .await;
        h.controller
            .handle(StreamChunk::tool_use("t2", "grep", json!({})))
            .await;
        h.controller
            .handle(StreamChunk::tool_result("t2", "matches"))
            .await;

        let calls = h.render.calls();
        assert_eq!(
            calls,
            vec!["tool_started:t1", "tool_started:t2", "tool_updated:t2"]
        );

        let (msg, _, _) = h.controller.into_parts();
        assert_eq!(msg.tool_call("t2").unwrap().status, ToolStatus::Completed);
        assert_eq!(msg.tool_call("t1").unwrap().status, ToolStatus::Running);
    }

    #[tokio::test]
    async fn test_done_flushes_remaining_tools() {
        let mut h = harness();
        h.controller
            .handle(StreamChunk::tool_use("t1", "read", json!({})))
            .await;
        h.controller.handle(StreamChunk::Done).await;
        assert_eq!(h.render.calls(), vec!["tool_started:t1"]);
    }

    #[tokio::test]
    async fn test_compact_boundary_is_a_fence() {
        let mut h = harness();
        h.controller.handle(StreamChunk::text("before")).await;
        h.controller
            .handle(StreamChunk::tool_use("t1", "read", json!({})))
            .await;
        h.controller
            .handle(StreamChunk::CompactBoundary { summary: None })
            .await;
        h.controller.handle(StreamChunk::text("after")).await;
        h.controller.finish(false).await;

        let (msg, _, _) = h.controller.into_parts();
        let kinds: Vec<&str> = msg
            .content_blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Text { .. } => "text",
                ContentBlock::ToolUse { .. } => "tool_use",
                ContentBlock::CompactBoundary => "compact",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["text", "tool_use", "compact", "text"]);
    }

    // ---- thinking/text exclusivity ----

    #[tokio::test]
    async fn test_thinking_then_text_closes_thinking() {
        let mut h = harness();
        h.controller.handle(StreamChunk::thinking("let me see")).await;
        h.controller.handle(StreamChunk::text("answer")).await;
        h.controller.finish(false).await;

        let (msg, _, _) = h.controller.into_parts();
        assert_eq!(msg.content_blocks.len(), 2);
        assert!(matches!(
            msg.content_blocks[0],
            ContentBlock::Thinking { .. }
        ));
        assert!(matches!(msg.content_blocks[1], ContentBlock::Text { .. }));
        // Thinking never lands in raw content
        assert_eq!(msg.content, "answer");
    }

    // ---- subagents ----

    #[tokio::test]
    async fn test_spawn_delegates_to_tracker() {
        let mut h = harness();
        h.controller
            .handle(StreamChunk::tool_use(
                "s1",
                SPAWN,
                json!({"description": "explore"}),
            ))
            .await;

        let (msg, _, _) = h.controller.into_parts();
        assert!(matches!(
            msg.content_blocks[0],
            ContentBlock::Subagent { .. }
        ));
        assert!(h.tracker.lock().contains("s1"));
        // Sync spawn renders nothing until activation
        assert!(h.render.calls().is_empty());
    }

    #[tokio::test]
    async fn test_scoped_chunks_never_touch_main_stream() {
        let mut h = harness();
        h.controller
            .handle(StreamChunk::tool_use(
                "s1",
                SPAWN,
                json!({"description": "explore"}),
            ))
            .await;
        h.controller
            .handle(StreamChunk::scoped("s1", StreamChunk::text("child text")))
            .await;
        h.controller
            .handle(StreamChunk::scoped(
                "s1",
                StreamChunk::tool_use("c1", "read", json!({})),
            ))
            .await;
        h.controller.finish(false).await;

        let (msg, _, _) = h.controller.into_parts();
        // Child text must not leak into the parent message
        assert_eq!(msg.content, "");
        assert!(msg.tool_call("c1").is_none());
        let sub = msg.subagent("s1").unwrap();
        assert_eq!(sub.tool_calls.len(), 1);
        assert_eq!(sub.status, SubagentStatus::Running);
    }

    #[tokio::test]
    async fn test_sync_subagent_result_terminalizes() {
        let mut h = harness();
        h.controller
            .handle(StreamChunk::tool_use(
                "s1",
                SPAWN,
                json!({"description": "explore"}),
            ))
            .await;
        h.controller
            .handle(StreamChunk::scoped("s1", StreamChunk::text("working")))
            .await;
        h.controller
            .handle(StreamChunk::tool_result("s1", "findings"))
            .await;

        let (msg, _, _) = h.controller.into_parts();
        let sub = msg.subagent("s1").unwrap();
        assert_eq!(sub.status, SubagentStatus::Completed);
        assert_eq!(sub.result.as_deref(), Some("findings"));
    }

    #[tokio::test]
    async fn test_link_tool_is_invisible() {
        let mut h = harness();
        h.controller
            .handle(StreamChunk::tool_use(
                "a1",
                SPAWN,
                json!({"description": "bg", "background": true}),
            ))
            .await;
        h.controller
            .handle(StreamChunk::tool_result("a1", r#"{"agent_id": "bg-1"}"#))
            .await;
        h.controller
            .handle(StreamChunk::tool_use(
                "link1",
                LINK,
                json!({"agent_id": "bg-1"}),
            ))
            .await;
        h.controller
            .handle(StreamChunk::tool_result("link1", "final output"))
            .await;
        h.controller.finish(false).await;

        let (msg, _, _) = h.controller.into_parts();
        // Exactly one block: the subagent. The link produced none.
        assert_eq!(msg.content_blocks.len(), 1);
        let sub = msg.subagent("a1").unwrap();
        assert_eq!(sub.status, SubagentStatus::Completed);
        assert_eq!(sub.result.as_deref(), Some("final output"));
        assert_eq!(sub.agent_id.as_deref(), Some("bg-1"));
    }

    // ---- usage suppression ----

    fn usage(session: Option<&str>) -> StreamChunk {
        StreamChunk::Usage(UsageUpdate {
            input_tokens: 100,
            output_tokens: 20,
            cache_read_tokens: 0,
            cache_write_tokens: 0,
            session_id: session.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_usage_applied_for_active_session() {
        let mut h = harness();
        h.controller.handle(usage(Some("sess-1"))).await;
        let (_, totals, _) = h.controller.into_parts();
        assert_eq!(totals.input_tokens, 100);
    }

    #[tokio::test]
    async fn test_usage_discarded_for_foreign_session() {
        let mut h = harness();
        h.controller.handle(usage(Some("sess-other"))).await;
        let (_, totals, _) = h.controller.into_parts();
        assert_eq!(totals.input_tokens, 0);
    }

    #[tokio::test]
    async fn test_usage_discarded_after_subagent_spawn() {
        let mut h = harness();
        h.controller
            .handle(StreamChunk::tool_use(
                "s1",
                SPAWN,
                json!({"description": "x"}),
            ))
            .await;
        h.controller.handle(usage(Some("sess-1"))).await;
        let (_, totals, _) = h.controller.into_parts();
        assert_eq!(totals.input_tokens, 0);
    }

    // ---- stream errors & interruption ----

    #[tokio::test]
    async fn test_stream_error_marks_text_and_records() {
        let mut h = harness();
        h.controller.handle(StreamChunk::text("partial")).await;
        h.controller
            .handle(StreamChunk::Error {
                message: "connection reset".into(),
            })
            .await;
        h.controller.finish(false).await;

        assert_eq!(h.controller.stream_error(), Some("connection reset"));
        let (msg, _, _) = h.controller.into_parts();
        assert!(msg.content.contains("[stream error: connection reset]"));
    }

    #[tokio::test]
    async fn test_stream_error_flushes_pending_tools_first() {
        let mut h = harness();
        h.controller
            .handle(StreamChunk::tool_use("t1", "read", json!({})))
            .await;
        h.controller
            .handle(StreamChunk::Error {
                message: "boom".into(),
            })
            .await;

        let calls = h.render.calls();
        assert_eq!(&calls[..2], &["tool_started:t1", "text_open"]);
        assert_eq!(calls[2], "error_marker:boom");
    }

    #[tokio::test]
    async fn test_finish_interrupted_appends_marker() {
        let mut h = harness();
        h.controller.handle(StreamChunk::text("part")).await;
        h.controller
            .handle(StreamChunk::tool_use("t1", "read", json!({})))
            .await;
        h.controller.finish(true).await;

        let calls = h.render.calls();
        // Pending tool still flushed, then marker
        assert!(calls.contains(&"tool_started:t1".to_string()));
        assert_eq!(calls.last().unwrap(), "interrupted_marker");

        let (msg, _, _) = h.controller.into_parts();
        match msg.content_blocks.last().unwrap() {
            ContentBlock::Text { text } => assert_eq!(text, INTERRUPTED_MARKER),
            other => panic!("expected marker block, got {:?}", other),
        }
    }
}
