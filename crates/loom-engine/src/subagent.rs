//! Subagent lifecycle tracking
//!
//! Tracks the nested sub-conversations one turn spawns, in two flavors:
//! synchronous (completion awaited inline) and async (runs in the
//! background and reports completion later, possibly after the main stream
//! finished). The tracker is the sole mutator of `SubagentInfo` state;
//! callers render and persist from the snapshots its effects carry.

use loom_protocol::{
    StreamChunk, SubagentInfo, SubagentMode, SubagentStatus, ToolCallRecord, ToolStatus,
};
use std::collections::HashMap;

/// State mutation produced by the tracker, for the caller to render/emit.
///
/// Each effect carries a snapshot of the subagent after the mutation.
#[derive(Debug, Clone)]
pub enum SubagentEffect {
    /// A subagent was created (pending)
    Spawned(SubagentInfo),
    /// A pending sync subagent was confirmed by its first child chunk
    Activated(SubagentInfo),
    /// An async subagent was confirmed running with a backend agent id
    Confirmed(SubagentInfo),
    /// A child tool invocation started inside the subagent
    ChildToolStarted(SubagentInfo, ToolCallRecord),
    /// A child tool invocation finished inside the subagent
    ChildToolFinished(SubagentInfo, ToolCallRecord),
    /// The subagent reached a terminal state
    Finished(SubagentInfo),
}

impl SubagentEffect {
    /// The subagent snapshot after this mutation
    pub fn info(&self) -> &SubagentInfo {
        match self {
            Self::Spawned(i)
            | Self::Activated(i)
            | Self::Confirmed(i)
            | Self::ChildToolStarted(i, _)
            | Self::ChildToolFinished(i, _)
            | Self::Finished(i) => i,
        }
    }
}

/// Tracks zero or more subagents spawned by a turn, keyed by the spawning
/// tool invocation id.
#[derive(Debug, Default)]
pub struct SubagentTracker {
    agents: HashMap<String, SubagentInfo>,
    /// Invisible-link tool invocation id -> spawning tool invocation id
    links: HashMap<String, String>,
    /// Backend agent id -> spawning tool invocation id
    by_agent_id: HashMap<String, String>,
    spawned_this_turn: bool,
}

impl SubagentTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the per-turn spawn flag at turn start
    pub fn begin_turn(&mut self) {
        self.spawned_this_turn = false;
    }

    /// Whether any subagent was spawned during the current turn.
    /// Usage figures are unreliable under that condition.
    pub fn spawned_this_turn(&self) -> bool {
        self.spawned_this_turn
    }

    /// Whether the id names a tracked subagent
    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// Whether the id names a sync subagent that has not finished
    pub fn is_sync_active(&self, id: &str) -> bool {
        self.agents
            .get(id)
            .is_some_and(|a| a.mode == SubagentMode::Sync && !a.status.is_terminal())
    }

    /// Whether the id is a registered invisible-link invocation
    pub fn is_link(&self, id: &str) -> bool {
        self.links.contains_key(id)
    }

    /// Get a snapshot of a subagent
    pub fn get(&self, id: &str) -> Option<&SubagentInfo> {
        self.agents.get(id)
    }

    /// Register a spawn tool invocation. The invocation's declared input
    /// decides the mode: `"background": true` selects async.
    pub fn spawn(&mut self, id: impl Into<String>, input: &serde_json::Value) -> SubagentEffect {
        let id = id.into();
        let background = input
            .get("background")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let mode = if background {
            SubagentMode::Async
        } else {
            SubagentMode::Sync
        };
        let description = input
            .get("description")
            .or_else(|| input.get("prompt"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let info = SubagentInfo::new(id.clone(), description, mode);
        self.agents.insert(id, info.clone());
        self.spawned_this_turn = true;
        SubagentEffect::Spawned(info)
    }

    /// Register an invisible-link invocation correlating back to an async
    /// subagent. Produces no visible content; unknown agent ids are ignored.
    pub fn register_link(&mut self, link_id: impl Into<String>, input: &serde_json::Value) {
        let Some(agent_id) = input.get("agent_id").and_then(|v| v.as_str()) else {
            tracing::debug!("link invocation without agent_id, ignoring");
            return;
        };
        let Some(spawn_id) = self.by_agent_id.get(agent_id) else {
            tracing::debug!(agent_id, "link to unknown agent, ignoring");
            return;
        };
        self.links.insert(link_id.into(), spawn_id.clone());
    }

    /// Apply a chunk scoped to `parent_id`'s sub-conversation.
    ///
    /// The first child chunk confirms a pending sync subagent is indeed a
    /// sub-conversation. Child tool invocations render immediately, without
    /// buffering, since they are already inside a disclosed block.
    pub fn handle_scoped(&mut self, parent_id: &str, chunk: &StreamChunk) -> Vec<SubagentEffect> {
        let Some(agent) = self.agents.get_mut(parent_id) else {
            tracing::debug!(parent_id, "scoped chunk for unknown subagent, dropping");
            return vec![];
        };
        if agent.status.is_terminal() {
            // Late chunks after teardown/completion silently no-op
            return vec![];
        }

        let mut effects = Vec::new();
        if agent.status == SubagentStatus::Pending {
            agent.status = SubagentStatus::Running;
            effects.push(SubagentEffect::Activated(agent.clone()));
        }

        match chunk {
            StreamChunk::ToolUse { id, name, input } => {
                if let Some(existing) = agent.tool_call_mut(id) {
                    crate::tool_buffer::merge_tool_input(&mut existing.input, input);
                    let record = existing.clone();
                    effects.push(SubagentEffect::ChildToolStarted(agent.clone(), record));
                } else {
                    let record = ToolCallRecord::new(id.clone(), name.clone(), input.clone());
                    agent.tool_calls.push(record.clone());
                    effects.push(SubagentEffect::ChildToolStarted(agent.clone(), record));
                }
            }
            StreamChunk::ToolResult {
                id,
                content,
                is_error,
            } => {
                let status = crate::dispatcher::classify_result(content, *is_error);
                if let Some(record) = agent.tool_call_mut(id) {
                    if record.finish(status, content.clone()) {
                        let record = record.clone();
                        effects.push(SubagentEffect::ChildToolFinished(agent.clone(), record));
                    }
                }
            }
            // Child text/thinking deltas only confirm activity
            _ => {}
        }
        effects
    }

    /// Apply the spawn tool's own result from the main stream.
    ///
    /// For sync subagents this is the terminal event. For async subagents
    /// it is the backend's confirmation of background execution, carrying
    /// the agent id.
    pub fn resolve_spawn_result(
        &mut self,
        id: &str,
        status: ToolStatus,
        content: &str,
    ) -> Option<SubagentEffect> {
        let agent = self.agents.get_mut(id)?;
        if agent.status.is_terminal() {
            return None;
        }

        match agent.mode {
            SubagentMode::Sync => {
                agent.status = match status {
                    ToolStatus::Error | ToolStatus::Blocked => SubagentStatus::Error,
                    _ => SubagentStatus::Completed,
                };
                agent.result = Some(content.to_string());
                Some(SubagentEffect::Finished(agent.clone()))
            }
            SubagentMode::Async => {
                if status == ToolStatus::Error || status == ToolStatus::Blocked {
                    agent.status = SubagentStatus::Error;
                    agent.result = Some(content.to_string());
                    return Some(SubagentEffect::Finished(agent.clone()));
                }
                // Confirmation payload carries the backend execution id
                let agent_id = serde_json::from_str::<serde_json::Value>(content)
                    .ok()
                    .and_then(|v| {
                        v.get("agent_id")
                            .and_then(|a| a.as_str())
                            .map(str::to_string)
                    });
                agent.status = SubagentStatus::Running;
                agent.agent_id = agent_id.clone();
                if let Some(agent_id) = agent_id {
                    self.by_agent_id.insert(agent_id, id.to_string());
                }
                let info = self.agents.get(id).cloned();
                info.map(SubagentEffect::Confirmed)
            }
        }
    }

    /// Finalize an async subagent through its invisible-link result.
    ///
    /// Must settle exactly once even if the link result and the background
    /// completion callback race; a second delivery no-ops against
    /// already-terminal state.
    pub fn finalize_link(
        &mut self,
        link_id: &str,
        status: ToolStatus,
        content: &str,
    ) -> Option<SubagentEffect> {
        let spawn_id = self.links.get(link_id)?.clone();
        self.finish_async(&spawn_id, status, content)
    }

    /// Apply a background completion callback by backend agent id.
    /// Safe to call after the main stream finished; no-ops when terminal.
    pub fn complete_background(
        &mut self,
        agent_id: &str,
        status: ToolStatus,
        content: &str,
    ) -> Option<SubagentEffect> {
        let spawn_id = self.by_agent_id.get(agent_id)?.clone();
        self.finish_async(&spawn_id, status, content)
    }

    fn finish_async(
        &mut self,
        spawn_id: &str,
        status: ToolStatus,
        content: &str,
    ) -> Option<SubagentEffect> {
        let agent = self.agents.get_mut(spawn_id)?;
        if agent.status.is_terminal() {
            return None;
        }
        agent.status = match status {
            ToolStatus::Error | ToolStatus::Blocked => SubagentStatus::Error,
            _ => SubagentStatus::Completed,
        };
        agent.result = Some(content.to_string());
        Some(SubagentEffect::Finished(agent.clone()))
    }

    /// Mark every non-terminal subagent orphaned. Called when the owning
    /// context is torn down; later callbacks for these agents no-op.
    pub fn orphan_all(&mut self) -> Vec<SubagentEffect> {
        let mut effects = Vec::new();
        for agent in self.agents.values_mut() {
            if !agent.status.is_terminal() {
                agent.status = SubagentStatus::Orphaned;
                effects.push(SubagentEffect::Finished(agent.clone()));
            }
        }
        effects
    }
}
