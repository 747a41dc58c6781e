//! Messages and their ordered content-block structure

use crate::subagent::{SubagentInfo, SubagentMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Status of a tool invocation within a message.
///
/// Transitions are forward-only: `Running` may become any terminal status,
/// terminal statuses never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Completed,
    Error,
    Blocked,
}

impl ToolStatus {
    /// Check if this status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Whether a transition to `next` is allowed (forward-only)
    pub fn can_transition_to(&self, next: ToolStatus) -> bool {
        match self {
            Self::Running => true,
            _ => *self == next,
        }
    }
}

/// Current record of one tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl ToolCallRecord {
    /// Create a new running record
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            status: ToolStatus::Running,
            result: None,
        }
    }

    /// Apply a terminal status and result. No-op if already terminal.
    pub fn finish(&mut self, status: ToolStatus, result: impl Into<String>) -> bool {
        if !self.status.can_transition_to(status) || self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.result = Some(result.into());
        true
    }
}

/// One ordered unit of a message's structure.
///
/// Once appended at an index, a block is never reordered or removed; only
/// the record it references may mutate (e.g. a tool call's status).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Narration text
    Text { text: String },
    /// Thinking/reasoning text with elapsed duration
    Thinking { thinking: String, duration_ms: u64 },
    /// A tool invocation, looked up by id in the message's tool_calls
    ToolUse { id: String },
    /// A nested sub-conversation, looked up by id in the message's subagents
    Subagent { id: String, mode: SubagentMode },
    /// Context compaction fence
    CompactBoundary,
}

/// One turn's worth of content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Concatenated raw text: the sent prompt (user) or streamed narration
    /// (assistant). Append-only while streaming, immutable afterwards.
    pub content: String,
    /// Authoritative replay order for this message
    #[serde(default)]
    pub content_blocks: Vec<ContentBlock>,
    /// Tool invocations keyed by id; ids are unique within a message
    #[serde(default)]
    pub tool_calls: HashMap<String, ToolCallRecord>,
    /// Sub-conversations recorded by this message
    #[serde(default)]
    pub subagents: Vec<SubagentInfo>,
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    /// Create a user message from a sent prompt
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            content_blocks: Vec::new(),
            tool_calls: HashMap::new(),
            subagents: Vec::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create an empty assistant message ready to accumulate a stream
    pub fn assistant_empty() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            content_blocks: Vec::new(),
            tool_calls: HashMap::new(),
            subagents: Vec::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Append a block, returning its index
    pub fn push_block(&mut self, block: ContentBlock) -> usize {
        self.content_blocks.push(block);
        self.content_blocks.len() - 1
    }

    /// Record a tool invocation. Returns false if the id already exists.
    pub fn insert_tool_call(&mut self, record: ToolCallRecord) -> bool {
        if self.tool_calls.contains_key(&record.id) {
            return false;
        }
        self.tool_calls.insert(record.id.clone(), record);
        true
    }

    /// Look up a tool call by invocation id
    pub fn tool_call(&self, id: &str) -> Option<&ToolCallRecord> {
        self.tool_calls.get(id)
    }

    /// Look up a tool call mutably by invocation id
    pub fn tool_call_mut(&mut self, id: &str) -> Option<&mut ToolCallRecord> {
        self.tool_calls.get_mut(id)
    }

    /// Look up a recorded subagent by id
    pub fn subagent(&self, id: &str) -> Option<&SubagentInfo> {
        self.subagents.iter().find(|s| s.id == id)
    }

    /// Record or refresh a subagent snapshot
    pub fn upsert_subagent(&mut self, info: SubagentInfo) {
        if let Some(existing) = self.subagents.iter_mut().find(|s| s.id == info.id) {
            *existing = info;
        } else {
            self.subagents.push(info);
        }
    }

    /// Check if this message carries any visible content
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.content_blocks.is_empty()
    }
}
