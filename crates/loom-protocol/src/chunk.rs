//! Event chunks streamed by the backend

use crate::snapshot::UsageUpdate;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// One discrete event from the backend's event stream.
///
/// Chunks arrive partially ordered: within one stream, arrival order is
/// authoritative. A chunk belonging to a nested sub-conversation is wrapped
/// in [`StreamChunk::Scoped`] with the spawning tool invocation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Incremental assistant text
    Text { delta: String },

    /// Incremental thinking/reasoning text
    Thinking { delta: String },

    /// A tool invocation was announced (input may still be partial and
    /// refined by later chunks carrying the same id)
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Result of a previously announced tool invocation
    ToolResult {
        id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },

    /// Usage telemetry snapshot for the active backend session
    Usage(UsageUpdate),

    /// Context compaction marker: a hard ordering fence in the message
    CompactBoundary {
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },

    /// Error raised during stream iteration (recoverable, see engine)
    Error { message: String },

    /// Stream finished
    Done,

    /// A chunk belonging to the sub-conversation spawned by `parent_tool_id`
    Scoped {
        parent_tool_id: String,
        chunk: Box<StreamChunk>,
    },
}

impl StreamChunk {
    /// Create a text delta chunk
    pub fn text(delta: impl Into<String>) -> Self {
        Self::Text {
            delta: delta.into(),
        }
    }

    /// Create a thinking delta chunk
    pub fn thinking(delta: impl Into<String>) -> Self {
        Self::Thinking {
            delta: delta.into(),
        }
    }

    /// Create a tool invocation chunk
    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Create a successful tool result chunk
    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            id: id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an errored tool result chunk
    pub fn tool_error(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            id: id.into(),
            content: content.into(),
            is_error: true,
        }
    }

    /// Wrap a chunk as belonging to the subagent spawned by `parent_tool_id`
    pub fn scoped(parent_tool_id: impl Into<String>, chunk: StreamChunk) -> Self {
        Self::Scoped {
            parent_tool_id: parent_tool_id.into(),
            chunk: Box::new(chunk),
        }
    }

    /// The subagent invocation id this chunk is scoped to, if any
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Self::Scoped { parent_tool_id, .. } => Some(parent_tool_id),
            _ => None,
        }
    }

    /// Check if this is a terminal chunk
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// A stream of event chunks, already opened against the backend
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_id_only_on_scoped() {
        let plain = StreamChunk::text("hi");
        assert!(plain.parent_id().is_none());

        let scoped = StreamChunk::scoped("tool_1", StreamChunk::text("hi"));
        assert_eq!(scoped.parent_id(), Some("tool_1"));
    }

    #[test]
    fn test_scoped_preserves_inner_kind() {
        let scoped = StreamChunk::scoped("t1", StreamChunk::tool_result("c1", "ok"));
        match scoped {
            StreamChunk::Scoped { chunk, .. } => {
                assert!(matches!(*chunk, StreamChunk::ToolResult { .. }));
            }
            other => panic!("expected Scoped, got {:?}", other),
        }
    }

    #[test]
    fn test_done_is_terminal() {
        assert!(StreamChunk::Done.is_terminal());
        assert!(!StreamChunk::text("x").is_terminal());
        assert!(
            !StreamChunk::Error {
                message: "boom".into()
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_serde_tagging() {
        let chunk = StreamChunk::tool_use("t1", "read", serde_json::json!({"path": "/x"}));
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["id"], "t1");

        let back: StreamChunk = serde_json::from_value(json).unwrap();
        assert!(matches!(back, StreamChunk::ToolUse { .. }));
    }
}
