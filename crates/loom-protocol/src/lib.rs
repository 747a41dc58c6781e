//! loom-protocol: Wire and conversation data model
//!
//! This crate defines the event chunks streamed by a conversational AI
//! backend and the ordered message structure the engine builds from them.

pub mod chunk;
pub mod message;
pub mod snapshot;
pub mod subagent;

pub use chunk::{ChunkStream, StreamChunk};
pub use message::{ContentBlock, Message, Role, ToolCallRecord, ToolStatus};
pub use snapshot::{ConversationSnapshot, UsageTotals, UsageUpdate};
pub use subagent::{SubagentInfo, SubagentMode, SubagentStatus};
