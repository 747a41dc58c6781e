//! Backend abstraction for opening event streams

use async_trait::async_trait;
use loom_protocol::{ChunkStream, Message};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Per-turn options forwarded to the backend
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Tools the backend may invoke this turn
    pub allowed_tools: Vec<String>,
    /// Model override for this turn
    pub model: Option<String>,
    /// Enabled auxiliary-service mentions
    pub service_mentions: Vec<String>,
    /// Extra read-only context paths
    pub context_paths: Vec<String>,
}

/// An image attachment sent with a prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// Base64-encoded image data
    pub data: String,
    pub mime_type: String,
}

/// One query against the backend.
///
/// `history` excludes the in-progress turn so session rebuild does not
/// duplicate it.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub prompt: String,
    pub images: Vec<ImageAttachment>,
    pub history: Vec<Message>,
    pub options: QueryOptions,
}

/// An already-authenticated backend handle the engine can query and cancel.
///
/// The engine does not own transport or session-resume mechanics; it only
/// consumes the chunk stream a query opens.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open an event stream for one turn
    async fn query(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> crate::error::Result<ChunkStream>;

    /// Issue a cancel/interrupt call against the running stream
    async fn cancel(&self);
}
