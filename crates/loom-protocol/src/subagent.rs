//! Nested sub-conversation records

use crate::message::ToolCallRecord;
use serde::{Deserialize, Serialize};

/// Whether a subagent's completion is awaited inline or reported later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentMode {
    Sync,
    Async,
}

/// Lifecycle status of a subagent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    /// Spawn tool seen, not yet confirmed as a sub-conversation
    Pending,
    /// Confirmed and executing
    Running,
    Completed,
    Error,
    /// Owning context torn down before a terminal state was reached
    Orphaned,
}

impl SubagentStatus {
    /// Check if this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Orphaned)
    }
}

/// One nested sub-conversation spawned by a tool invocation.
///
/// The id equals the spawning tool invocation's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentInfo {
    pub id: String,
    pub description: String,
    pub mode: SubagentMode,
    pub status: SubagentStatus,
    /// Tool invocations made inside the sub-conversation, in arrival order
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Final result text, set on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Backend execution id, assigned only for async mode once the backend
    /// confirms background execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl SubagentInfo {
    /// Create a pending subagent for a spawn tool invocation
    pub fn new(id: impl Into<String>, description: impl Into<String>, mode: SubagentMode) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            mode,
            status: SubagentStatus::Pending,
            tool_calls: Vec::new(),
            result: None,
            agent_id: None,
        }
    }

    /// Look up a child tool call by id
    pub fn tool_call_mut(&mut self, id: &str) -> Option<&mut ToolCallRecord> {
        self.tool_calls.iter_mut().find(|t| t.id == id)
    }
}
