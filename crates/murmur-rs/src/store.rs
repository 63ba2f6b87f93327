//! Conversation persistence.
//!
//! One JSON document per conversation, named `conversation_<id>.json`:
//!
//! ```json
//! {
//!   "id": "cv-18c2f0a4b1d3e000-0001",
//!   "timestamp": "2026-10-18T09:12:44.118Z",
//!   "messages": [{"role": "system", "content": "..."}, ...]
//! }
//! ```
//!
//! A store without a directory is disabled: saves are no-ops, loads miss and
//! listings are empty.

use crate::Message;
use crate::error::{MurmurError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, warn};

const FILE_PREFIX: &str = "conversation_";
const FILE_SUFFIX: &str = ".json";

/// Generate a fresh conversation id: `cv-<nanos hex>-<counter>`.
pub fn generate_conversation_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter keeps ids unique within one clock tick.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("cv-{ts:x}-{count:04x}")
}

/// Reject ids that cannot safely name a file in the storage directory.
pub fn validate_conversation_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MurmurError::InvalidConversationId(id.to_string()))
    }
}

// ── Documents ──────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ConversationDocument {
    id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    timestamp: DateTime<Utc>,
    messages: Vec<Message>,
}

/// Listing entry for one persisted conversation.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: String,
    /// Time of the most recent save.
    pub timestamp: DateTime<Utc>,
    pub message_count: usize,
}

/// Accept RFC 3339 and offset-less ISO-8601 (read as UTC).
fn deserialize_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

// ── ConversationStore ──────────────────────────────────────────────

/// File-backed conversation store.
///
/// Writes are atomic (temp file + rename) and each id has its own temp
/// file, so saves of different conversations never interfere.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    dir: Option<PathBuf>,
}

impl ConversationStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    /// `None` yields a disabled store.
    pub fn new(dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = &dir {
            std::fs::create_dir_all(dir)
                .map_err(|e| MurmurError::storage("Failed to create storage dir", e))?;
        }
        Ok(Self { dir })
    }

    /// A store that never persists anything.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn document_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{FILE_PREFIX}{id}{FILE_SUFFIX}"))
    }

    /// Persist `messages` under `id`, replacing any earlier document.
    pub fn save(&self, id: &str, messages: &[Message]) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        validate_conversation_id(id)?;

        let doc = ConversationDocument {
            id: id.to_string(),
            timestamp: Utc::now(),
            messages: messages.to_vec(),
        };
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| MurmurError::storage("Failed to serialize conversation", e))?;

        let final_path = Self::document_path(dir, id);
        let tmp_path = dir.join(format!(".{FILE_PREFIX}{id}{FILE_SUFFIX}.tmp"));
        std::fs::write(&tmp_path, json)
            .map_err(|e| MurmurError::storage("Failed to write temp conversation", e))?;
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| MurmurError::storage("Failed to rename conversation", e))?;

        debug!(
            conversation_id = id,
            messages = messages.len(),
            "Saved conversation"
        );
        Ok(())
    }

    /// Load the messages stored under `id`. A missing document is `Ok(None)`,
    /// and so is an id that could never have been saved.
    pub fn load(&self, id: &str) -> Result<Option<Vec<Message>>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        if validate_conversation_id(id).is_err() {
            debug!(conversation_id = id, "Id cannot name a stored conversation");
            return Ok(None);
        }

        let path = Self::document_path(dir, id);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)
            .map_err(|e| MurmurError::storage("Failed to read conversation", e))?;
        let doc: ConversationDocument = serde_json::from_str(&json)
            .map_err(|e| MurmurError::storage("Failed to parse conversation", e))?;
        Ok(Some(doc.messages))
    }

    /// Summaries of every stored conversation, most recent first.
    ///
    /// Unreadable or malformed documents are skipped with a warning.
    pub fn list(&self) -> Result<Vec<ConversationSummary>> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };
        let entries = std::fs::read_dir(dir)
            .map_err(|e| MurmurError::storage("Failed to read storage dir", e))?;

        let mut summaries = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable storage entry: {e}");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if !(name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX)) {
                continue;
            }
            let path = entry.path();
            match std::fs::read_to_string(&path) {
                Ok(json) => match serde_json::from_str::<ConversationDocument>(&json) {
                    Ok(doc) => summaries.push(ConversationSummary {
                        id: doc.id,
                        timestamp: doc.timestamp,
                        message_count: doc.messages.len(),
                    }),
                    Err(e) => {
                        warn!("Skipping malformed conversation at {}: {e}", path.display());
                    }
                },
                Err(e) => {
                    warn!("Skipping unreadable conversation at {}: {e}", path.display());
                }
            }
        }

        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_doc(dir: &Path, id: &str, timestamp: &str, count: usize) {
        let messages: Vec<Message> = (0..count).map(|i| Message::user(format!("m{i}"))).collect();
        let json = serde_json::json!({ "id": id, "timestamp": timestamp, "messages": messages });
        std::fs::write(
            ConversationStore::document_path(dir, id),
            serde_json::to_string(&json).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(Some(dir.path().to_path_buf())).unwrap();

        let messages = vec![
            Message::system("prompt"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        store.save("cv-1", &messages).unwrap();

        let loaded = store.load("cv-1").unwrap().unwrap();
        assert_eq!(loaded, messages);
    }

    #[test]
    fn save_overwrites_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(Some(dir.path().to_path_buf())).unwrap();

        store.save("cv-1", &[Message::system("p")]).unwrap();
        store
            .save("cv-1", &[Message::system("p"), Message::user("q")])
            .unwrap();

        assert_eq!(store.load("cv-1").unwrap().unwrap().len(), 2);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(Some(dir.path().to_path_buf())).unwrap();
        assert!(store.load("nonexistent").unwrap().is_none());
    }

    #[test]
    fn list_sorted_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(Some(dir.path().to_path_buf())).unwrap();

        write_doc(dir.path(), "t2", "2024-03-02T10:00:00Z", 2);
        write_doc(dir.path(), "t1", "2024-03-01T10:00:00Z", 1);
        write_doc(dir.path(), "t3", "2024-03-03T10:00:00Z", 3);

        let list = store.list().unwrap();
        let ids: Vec<&str> = list.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["t3", "t2", "t1"]);
        assert_eq!(list[0].message_count, 3);
    }

    #[test]
    fn list_skips_corrupt_and_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(Some(dir.path().to_path_buf())).unwrap();

        write_doc(dir.path(), "good", "2024-03-01T10:00:00Z", 1);
        std::fs::write(dir.path().join("conversation_bad.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let list = store.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "good");
    }

    #[test]
    fn offset_less_timestamps_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(Some(dir.path().to_path_buf())).unwrap();

        write_doc(dir.path(), "legacy", "2024-03-01T10:00:00.123456", 1);
        let list = store.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(
            list[0].timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-03-01 10:00:00"
        );
    }

    #[test]
    fn disabled_store_is_inert() {
        let store = ConversationStore::disabled();
        assert!(!store.is_enabled());
        store.save("cv-1", &[Message::user("x")]).unwrap();
        assert!(store.load("cv-1").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());

        let store = ConversationStore::new(None).unwrap();
        assert!(store.dir().is_none());
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(Some(dir.path().to_path_buf())).unwrap();
        store.save("cv-atomic", &[Message::system("p")]).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["conversation_cv-atomic.json"]);
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = ConversationStore::new(Some(nested.clone())).unwrap();
        store.save("cv-1", &[]).unwrap();
        assert!(nested.join("conversation_cv-1.json").exists());
    }

    #[test]
    fn rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(Some(dir.path().to_path_buf())).unwrap();
        for bad in ["", "../escape", "a/b", "with space", "a.b"] {
            assert!(matches!(
                store.save(bad, &[Message::user("x")]),
                Err(MurmurError::InvalidConversationId(_))
            ));
            assert_eq!(store.load(bad).unwrap(), None);
        }
    }

    #[test]
    fn invalid_id_loads_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(Some(dir.path().to_path_buf())).unwrap();
        write_doc(dir.path(), "good", "2024-03-01T10:00:00Z", 1);
        assert_eq!(store.load("2024-03-01T10:00:00").unwrap(), None);
        assert!(store.load("good").unwrap().is_some());
    }

    #[test]
    fn list_continues_past_entries_it_cannot_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(Some(dir.path().to_path_buf())).unwrap();

        std::fs::create_dir(dir.path().join("conversation_dir.json")).unwrap();
        write_doc(dir.path(), "older", "2024-03-01T10:00:00Z", 1);
        write_doc(dir.path(), "newer", "2024-03-02T10:00:00Z", 2);

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["newer", "older"]);
    }

    #[test]
    fn generated_ids_are_unique_and_valid() {
        let a = generate_conversation_id();
        let b = generate_conversation_id();
        assert_ne!(a, b);
        assert!(a.starts_with("cv-"));
        validate_conversation_id(&a).unwrap();
    }
}
