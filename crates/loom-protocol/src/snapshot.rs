//! Serializable conversation snapshot and usage figures

use crate::message::Message;
use serde::{Deserialize, Serialize};

/// Usage telemetry carried by a single `Usage` chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageUpdate {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
    /// Backend session the figures belong to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Cumulative usage across turns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl UsageTotals {
    /// Overwrite the displayed meter with a fresh snapshot from the backend
    pub fn apply(&mut self, update: &UsageUpdate) {
        self.input_tokens = update.input_tokens;
        self.output_tokens = update.output_tokens;
        self.cache_read_tokens = update.cache_read_tokens;
        self.cache_write_tokens = update.cache_write_tokens;
    }
}

/// The serializable record the engine hands to external persistence.
///
/// `extras` carries pending/approved out-of-band content (e.g. plans
/// awaiting approval) as opaque fields the engine does not interpret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub usage: UsageTotals,
    /// Backend session identifier for resume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extras: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub updated_at: i64,
}

impl ConversationSnapshot {
    /// Create an empty snapshot with a fresh id
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            messages: Vec::new(),
            usage: UsageTotals::default(),
            session_id: None,
            extras: serde_json::Map::new(),
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl Default for ConversationSnapshot {
    fn default() -> Self {
        Self::new()
    }
}
