//! On-disk conversation storage
//!
//! One JSONL file per conversation. The first line is a metadata entry,
//! followed by one entry per message, then a trailing usage/extras entry.
//! The engine hands out whole snapshots, so each persist rewrites the file.

use async_trait::async_trait;
use loom_engine::SnapshotSink;
use loom_protocol::{ConversationSnapshot, Message, UsageTotals};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Entry types for the JSONL conversation format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StoreEntry {
    /// Conversation metadata, always the first line
    Metadata {
        id: String,
        created_at: i64,
        updated_at: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// A message in the conversation
    Message { message: Message },
    /// Cumulative usage and opaque extras, written after the messages
    State {
        usage: UsageTotals,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        extras: serde_json::Map<String, serde_json::Value>,
    },
}

/// Persists conversation snapshots as JSONL files
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    /// Default storage directory
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loom")
            .join("conversations")
    }

    /// Open a store rooted at the default directory
    pub fn open_default() -> std::io::Result<Self> {
        Self::open(Self::default_dir())
    }

    /// Open a store rooted at `dir`, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", id))
    }

    /// Write a snapshot, replacing any previous file for its id
    pub fn save(&self, snapshot: &ConversationSnapshot) -> std::io::Result<()> {
        let path = self.path_for(&snapshot.id);
        let created_at = read_created_at(&path).unwrap_or(snapshot.updated_at);

        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);

        let metadata = StoreEntry::Metadata {
            id: snapshot.id.clone(),
            created_at,
            updated_at: snapshot.updated_at,
            session_id: snapshot.session_id.clone(),
        };
        writeln!(writer, "{}", serde_json::to_string(&metadata)?)?;

        for message in &snapshot.messages {
            let entry = StoreEntry::Message {
                message: message.clone(),
            };
            writeln!(writer, "{}", serde_json::to_string(&entry)?)?;
        }

        let state = StoreEntry::State {
            usage: snapshot.usage.clone(),
            extras: snapshot.extras.clone(),
        };
        writeln!(writer, "{}", serde_json::to_string(&state)?)?;
        writer.flush()
    }

    /// Load a conversation by id
    pub fn load(&self, id: &str) -> std::io::Result<ConversationSnapshot> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Conversation not found: {}", id),
            ));
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);

        let mut snapshot = ConversationSnapshot {
            id: id.to_string(),
            messages: Vec::new(),
            usage: UsageTotals::default(),
            session_id: None,
            extras: serde_json::Map::new(),
            updated_at: 0,
        };

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            // Unknown entries are skipped so old files stay loadable
            match serde_json::from_str::<StoreEntry>(&line) {
                Ok(StoreEntry::Metadata {
                    updated_at,
                    session_id,
                    ..
                }) => {
                    snapshot.updated_at = updated_at;
                    snapshot.session_id = session_id;
                }
                Ok(StoreEntry::Message { message }) => snapshot.messages.push(message),
                Ok(StoreEntry::State { usage, extras }) => {
                    snapshot.usage = usage;
                    snapshot.extras = extras;
                }
                Err(e) => tracing::debug!("skipping unreadable store entry: {}", e),
            }
        }

        Ok(snapshot)
    }

    /// List stored conversations, newest first
    pub fn list(&self) -> std::io::Result<Vec<ConversationInfo>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut conversations = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                if let Some(info) = read_info(&path) {
                    conversations.push(info);
                }
            }
        }

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    /// Delete a stored conversation
    pub fn delete(&self, id: &str) -> std::io::Result<()> {
        fs::remove_file(self.path_for(id))
    }
}

fn read_created_at(path: &Path) -> Option<i64> {
    let file = File::open(path).ok()?;
    let first_line = BufReader::new(file).lines().next()?.ok()?;
    match serde_json::from_str::<StoreEntry>(&first_line) {
        Ok(StoreEntry::Metadata { created_at, .. }) => Some(created_at),
        _ => None,
    }
}

fn read_info(path: &Path) -> Option<ConversationInfo> {
    let file = File::open(path).ok()?;
    let mut lines = BufReader::new(file).lines();
    let first_line = lines.next()?.ok()?;

    let StoreEntry::Metadata {
        id,
        created_at,
        updated_at,
        ..
    } = serde_json::from_str(&first_line).ok()?
    else {
        return None;
    };

    let message_count = lines
        .map_while(Result::ok)
        .filter(|l| {
            matches!(
                serde_json::from_str::<StoreEntry>(l),
                Ok(StoreEntry::Message { .. })
            )
        })
        .count();

    Some(ConversationInfo {
        id,
        created_at,
        updated_at,
        message_count,
    })
}

#[async_trait]
impl SnapshotSink for ConversationStore {
    async fn persist(&self, snapshot: &ConversationSnapshot) -> std::io::Result<()> {
        self.save(snapshot)
    }
}

/// Summary of a stored conversation
#[derive(Debug, Clone)]
pub struct ConversationInfo {
    pub id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub message_count: usize,
}

impl ConversationInfo {
    /// Format the updated_at timestamp for display
    pub fn updated_at_display(&self) -> String {
        use chrono::{TimeZone, Utc};
        Utc.timestamp_millis_opt(self.updated_at)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_protocol::ContentBlock;

    fn temp_store() -> ConversationStore {
        let dir = std::env::temp_dir()
            .join("loom-store-tests")
            .join(uuid::Uuid::new_v4().to_string());
        ConversationStore::open(dir).unwrap()
    }

    fn sample_snapshot() -> ConversationSnapshot {
        let mut snapshot = ConversationSnapshot::new();
        snapshot.messages.push(Message::user("hello"));
        let mut assistant = Message::assistant_empty();
        assistant.content = "hi there".into();
        assistant.push_block(ContentBlock::Text {
            text: "hi there".into(),
        });
        snapshot.messages.push(assistant);
        snapshot.usage.input_tokens = 12;
        snapshot.session_id = Some("sess-1".into());
        snapshot
    }

    #[test]
    fn test_save_load_round_trip() {
        let store = temp_store();
        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();

        let loaded = store.load(&snapshot.id).unwrap();
        assert_eq!(loaded.id, snapshot.id);
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[1].content, "hi there");
        assert_eq!(loaded.usage.input_tokens, 12);
        assert_eq!(loaded.session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn test_save_preserves_created_at_across_rewrites() {
        let store = temp_store();
        let mut snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();
        let first = store.list().unwrap();

        snapshot.updated_at += 10_000;
        store.save(&snapshot).unwrap();
        let second = store.list().unwrap();

        assert_eq!(first[0].created_at, second[0].created_at);
        assert!(second[0].updated_at > first[0].updated_at);
    }

    #[test]
    fn test_list_sorted_and_counts_messages() {
        let store = temp_store();
        let mut old = sample_snapshot();
        old.updated_at = 1_000;
        let mut new = ConversationSnapshot::new();
        new.messages.push(Message::user("only one"));
        new.updated_at = 2_000;

        store.save(&old).unwrap();
        store.save(&new).unwrap();

        let infos = store.list().unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].id, new.id);
        assert_eq!(infos[0].message_count, 1);
        assert_eq!(infos[1].message_count, 2);
    }

    #[test]
    fn test_message_count_ignores_entry_tag_in_other_entries() {
        let store = temp_store();
        let mut snapshot = ConversationSnapshot::new();
        snapshot.messages.push(Message::user("hi"));
        // Opaque extras embedding the message entry tag land on the state
        // line and must not skew the count
        snapshot.extras.insert(
            "draft".into(),
            serde_json::json!({"type": "message", "body": "unsent"}),
        );
        store.save(&snapshot).unwrap();

        let infos = store.list().unwrap();
        assert_eq!(infos[0].message_count, 1);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let store = temp_store();
        let err = store.load("nope").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_removes_file() {
        let store = temp_store();
        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();
        store.delete(&snapshot.id).unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
