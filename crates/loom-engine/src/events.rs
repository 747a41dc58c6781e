//! Engine lifecycle event types

use crate::turn::SendRequest;
use loom_protocol::{SubagentStatus, UsageTotals};
use serde::{Deserialize, Serialize};

/// Events emitted to the hosting UI layer during engine operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A turn started streaming
    TurnStarted { generation: u64 },

    /// A turn finished (normally, by error, or by cancellation)
    TurnEnded {
        generation: u64,
        interrupted: bool,
        usage: UsageTotals,
    },

    /// A subagent's lifecycle status changed
    SubagentChanged { id: String, status: SubagentStatus },

    /// The pending-message queue changed
    QueueChanged { pending: bool },

    /// A cancelled turn's queued message was handed back to the input
    /// instead of being auto-sent. Carries the full merged request so the
    /// host can repopulate its composer, attachments included.
    InputRestored { request: SendRequest },

    /// An error surfaced during streaming (recorded, not fatal)
    StreamError { message: String },
}

impl EngineEvent {
    /// Check if this event marks the end of a turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineEvent::TurnEnded { .. })
    }
}
