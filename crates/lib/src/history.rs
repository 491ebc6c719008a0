//! Local chat history: a capped, most-recent-first list of chat summaries
//! persisted as one JSON snapshot in key/value storage.
//!
//! The list is a best-effort cache of the backend's chats. Loading never fails
//! (absent or corrupt snapshots load as empty) and saving never blocks callers
//! (write failures are logged and dropped).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::api::{ChatId, ChatRecord, Message};
use crate::storage::KeyValueStorage;

/// Storage key for the history snapshot.
pub const HISTORY_KEY: &str = "nupat_chat_history_v1";

/// Maximum number of summaries kept (oldest dropped first).
pub const HISTORY_CAP: usize = 100;

/// Lightweight metadata for a chat: id, title, timestamp (Unix ms).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: ChatId,
    pub title: String,
    pub ts: i64,
    /// Cached message log; only ever set on the active chat's entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

impl ChatSummary {
    pub fn new(id: impl Into<ChatId>, title: impl Into<String>, ts: i64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ts,
            messages: None,
        }
    }

    /// Summary from a backend chat object; `now_ms` is used when it carries no parseable timestamp.
    pub fn from_record(record: &ChatRecord, now_ms: i64) -> Self {
        Self::new(
            record.id.clone(),
            record.title_or_default(),
            record.timestamp_ms().unwrap_or(now_ms),
        )
    }
}

/// Most-recent-first list of chat summaries.
pub type HistoryList = Vec<ChatSummary>;

/// Replace the entry with the same id (moving it to the front) or prepend; then cap.
pub fn upsert_front(list: &mut HistoryList, summary: ChatSummary) {
    list.retain(|c| c.id != summary.id);
    list.insert(0, summary);
    list.truncate(HISTORY_CAP);
}

/// Remove the entry with `id`, returning it.
pub fn remove(list: &mut HistoryList, id: &str) -> Option<ChatSummary> {
    let pos = list.iter().position(|c| c.id == id)?;
    Some(list.remove(pos))
}

/// Drop later duplicates of an id, keeping the first (most recent) occurrence.
fn dedupe(list: &mut HistoryList) {
    let mut seen = HashSet::new();
    list.retain(|c| seen.insert(c.id.clone()));
}

/// Reads and writes the history snapshot under a fixed key.
#[derive(Clone)]
pub struct LocalHistoryStore {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

impl LocalHistoryStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            key: HISTORY_KEY.to_string(),
        }
    }

    /// Read the persisted snapshot. Absent, unreadable or malformed => empty list.
    pub fn load(&self) -> HistoryList {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("failed to read chat history: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_str::<HistoryList>(&raw) {
            Ok(mut list) => {
                dedupe(&mut list);
                list.truncate(HISTORY_CAP);
                list
            }
            Err(e) => {
                log::warn!("ignoring malformed chat history snapshot: {}", e);
                Vec::new()
            }
        }
    }

    /// Persist the first `HISTORY_CAP` entries. Failures are logged, never returned.
    pub fn save(&self, list: &[ChatSummary]) {
        let capped = &list[..list.len().min(HISTORY_CAP)];
        let json = match serde_json::to_string(capped) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("failed to serialize chat history: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.set(&self.key, &json) {
            log::warn!("failed to save chat history (kept in memory only): {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageError};

    fn store() -> (Arc<MemoryStorage>, LocalHistoryStore) {
        let storage = Arc::new(MemoryStorage::new());
        let history = LocalHistoryStore::new(storage.clone());
        (storage, history)
    }

    struct FullDisk;

    impl KeyValueStorage for FullDisk {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }
        fn set(&self, key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Io {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "quota exceeded"),
            })
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn load_absent_is_empty() {
        let (_, history) = store();
        assert!(history.load().is_empty());
    }

    #[test]
    fn load_corrupt_is_empty() {
        let (storage, history) = store();
        storage.set(HISTORY_KEY, "{not json").unwrap();
        assert!(history.load().is_empty());
        storage.set(HISTORY_KEY, r#"{"id":"1"}"#).unwrap();
        assert!(history.load().is_empty());
    }

    #[test]
    fn save_truncates_to_cap() {
        let (_, history) = store();
        let list: HistoryList = (0..150)
            .map(|i| ChatSummary::new(i.to_string(), format!("chat {}", i), i))
            .collect();
        history.save(&list);
        let loaded = history.load();
        assert_eq!(loaded.len(), HISTORY_CAP);
        assert_eq!(loaded[0].id, "0");
        assert_eq!(loaded[HISTORY_CAP - 1].id, "99");
    }

    #[test]
    fn save_of_load_is_byte_identical() {
        let (storage, history) = store();
        let mut first = ChatSummary::new("2", "Rust questions", 200);
        first.messages = Some(vec![
            Message::user("u1", "hi"),
            Message::assistant("a1", "hello"),
        ]);
        history.save(&[first, ChatSummary::new("1", "A", 100)]);
        let before = storage.get(HISTORY_KEY).unwrap().unwrap();
        history.save(&history.load());
        let after = storage.get(HISTORY_KEY).unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn load_drops_duplicate_ids() {
        let (storage, history) = store();
        storage
            .set(
                HISTORY_KEY,
                r#"[{"id":"1","title":"new","ts":2},{"id":"1","title":"old","ts":1}]"#,
            )
            .unwrap();
        let loaded = history.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "new");
    }

    #[test]
    fn save_failure_is_swallowed() {
        let history = LocalHistoryStore::new(Arc::new(FullDisk));
        history.save(&[ChatSummary::new("1", "A", 100)]);
        assert!(history.load().is_empty());
    }

    #[test]
    fn upsert_front_replaces_and_caps() {
        let mut list: HistoryList = (0..HISTORY_CAP as i64)
            .map(|i| ChatSummary::new(i.to_string(), "t", i))
            .collect();
        upsert_front(&mut list, ChatSummary::new("50", "renamed", 999));
        assert_eq!(list.len(), HISTORY_CAP);
        assert_eq!(list[0].title, "renamed");
        assert_eq!(list.iter().filter(|c| c.id == "50").count(), 1);

        upsert_front(&mut list, ChatSummary::new("new", "t", 1000));
        assert_eq!(list.len(), HISTORY_CAP);
        assert_eq!(list[0].id, "new");
        assert!(list.iter().all(|c| c.id != "99"));
    }

    #[test]
    fn remove_by_id() {
        let mut list = vec![ChatSummary::new("1", "A", 1), ChatSummary::new("2", "B", 2)];
        assert_eq!(remove(&mut list, "1").map(|c| c.title), Some("A".to_string()));
        assert!(remove(&mut list, "1").is_none());
        assert_eq!(list.len(), 1);
    }
}
