//! Tool-call staging buffer
//!
//! Tool invocations frequently arrive with incomplete input that is refined
//! across several chunks before content of another kind appears. Buffering
//! avoids flashing a tool card with partial input and keeps cards from
//! interleaving ahead of narration that logically precedes them. The
//! content-block entry is appended at announcement time, so buffering
//! defers rendering only, never logical order.

use serde_json::Value;

/// FIFO of announced-but-not-yet-rendered tool invocation ids.
///
/// Insertion order is preserved exactly; a flush drains in that order.
#[derive(Debug, Default)]
pub struct ToolCallBuffer {
    pending: Vec<String>,
}

impl ToolCallBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the invocation id is currently pending
    pub fn contains(&self, id: &str) -> bool {
        self.pending.iter().any(|p| p == id)
    }

    /// Stage a newly announced invocation. Returns false if already pending.
    pub fn push(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.contains(&id) {
            return false;
        }
        self.pending.push(id);
        true
    }

    /// Drain all pending ids in original insertion order.
    /// Draining an empty buffer is a no-op that yields nothing.
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of staged invocations
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Merge refinement fields into an existing tool input without replacing it.
///
/// Both sides being objects merges field-wise with later values winning.
/// A null or missing existing value is replaced outright; anything else is
/// kept unless the refinement is itself an object.
pub fn merge_tool_input(existing: &mut Value, refinement: &Value) {
    match (existing, refinement) {
        (Value::Object(base), Value::Object(update)) => {
            for (key, value) in update {
                base.insert(key.clone(), value.clone());
            }
        }
        (slot @ Value::Null, update) => {
            *slot = update.clone();
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flush_preserves_insertion_order() {
        let mut buf = ToolCallBuffer::new();
        buf.push("t1");
        buf.push("t2");
        buf.push("t3");
        assert_eq!(buf.drain(), vec!["t1", "t2", "t3"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_flush_twice_is_noop() {
        let mut buf = ToolCallBuffer::new();
        buf.push("t1");
        assert_eq!(buf.drain().len(), 1);
        assert!(buf.drain().is_empty());
    }

    #[test]
    fn test_duplicate_push_ignored() {
        let mut buf = ToolCallBuffer::new();
        assert!(buf.push("t1"));
        assert!(!buf.push("t1"));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_merge_adds_and_overrides_fields() {
        let mut input = json!({"path": "/a", "mode": "read"});
        merge_tool_input(&mut input, &json!({"mode": "write", "count": 3}));
        assert_eq!(input, json!({"path": "/a", "mode": "write", "count": 3}));
    }

    #[test]
    fn test_merge_replaces_null() {
        let mut input = Value::Null;
        merge_tool_input(&mut input, &json!({"path": "/a"}));
        assert_eq!(input, json!({"path": "/a"}));
    }

    #[test]
    fn test_merge_keeps_non_object_existing() {
        let mut input = json!("raw");
        merge_tool_input(&mut input, &json!({"path": "/a"}));
        assert_eq!(input, json!("raw"));
    }
}
