//! loom-engine: streaming conversation runtime
//!
//! This crate owns the turn lifecycle for a chat conversation backed by a
//! streaming agent process: chunk dispatch, content accumulation, tool-call
//! buffering, subagent tracking, and the single-flight send/queue/cancel
//! state machine.

pub mod accumulator;
pub mod backend;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handle;
pub mod render;
pub mod subagent;
pub mod tool_buffer;
pub mod turn;

pub use backend::{Backend, ImageAttachment, QueryOptions, QueryRequest};
pub use dispatcher::{INTERRUPTED_MARKER, classify_result};
pub use error::{Error, Result};
pub use events::EngineEvent;
pub use handle::EngineHandle;
pub use render::{NullRender, RenderDelegate};
pub use turn::{Conversation, EngineConfig, QueuedMessage, SendRequest, SnapshotSink};
