//! Durable key-value storage for settings and the conversation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;

use crate::error::{ChatError, Result};
use crate::model::DEFAULT_MODEL;
use crate::state::ChatMessage;

pub const API_KEY: &str = "openaiApiKey";
pub const MODEL_KEY: &str = "openaiModel";
pub const CONVERSATIONS_KEY: &str = "conversations";

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Store backed by a single JSON object on disk.
pub struct JsonFileStore {
    path: PathBuf,
    entries: tokio::sync::Mutex<Option<Map<String, Value>>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<Map<String, Value>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Map::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(ChatError::Store(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }

    /// Entries to build the next write on. An unreadable file is moved aside
    /// so saving keeps working instead of failing on every write.
    async fn entries_for_write(&self) -> Result<Map<String, Value>> {
        match self.read_entries().await {
            Err(ChatError::Decode(_) | ChatError::Store(_)) => {
                let backup = self.path.with_extension("json.corrupt");
                tracing::warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    "storage file is unreadable, starting a new one"
                );
                fs::rename(&self.path, &backup).await?;
                Ok(Map::new())
            }
            result => result,
        }
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self.entries.lock().await;
        if entries.is_none() {
            *entries = Some(self.read_entries().await?);
        }
        Ok(entries.as_ref().and_then(|map| map.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let mut next = match entries.as_ref() {
            Some(map) => map.clone(),
            None => self.entries_for_write().await?,
        };
        next.insert(key.to_string(), value);

        // Create the storage directory if it doesn't exist
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(&Value::Object(next.clone()))?;
        fs::write(&self.path, content).await?;

        // Only a successful write updates what `get` sees.
        *entries = Some(next);
        Ok(())
    }
}

/// In-process store; nothing survives the session.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| ChatError::Store("memory store poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ChatError::Store("memory store poisoned".to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

pub async fn get_string(store: &dyn KeyValueStore, key: &str) -> Result<Option<String>> {
    Ok(store
        .get(key)
        .await?
        .and_then(|value| value.as_str().map(str::to_string)))
}

pub async fn load_conversation(store: &dyn KeyValueStore) -> Result<Vec<ChatMessage>> {
    match store.get(CONVERSATIONS_KEY).await? {
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(value) => Ok(serde_json::from_value(value)?),
    }
}

pub async fn save_conversation(store: &dyn KeyValueStore, messages: &[ChatMessage]) -> Result<()> {
    store
        .set(CONVERSATIONS_KEY, serde_json::to_value(messages)?)
        .await
}

/// First-run defaults. Keys that already hold a value are left alone.
pub async fn initialize_storage(store: &dyn KeyValueStore) -> Result<()> {
    let defaults = [
        (API_KEY, Value::String(String::new())),
        (MODEL_KEY, Value::String(DEFAULT_MODEL.to_string())),
        (CONVERSATIONS_KEY, Value::Array(Vec::new())),
    ];

    for (key, default) in defaults {
        if store.get(key).await?.is_none() {
            tracing::debug!(key, "initializing storage key");
            store.set(key, default).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_store_persists_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");

        let store = JsonFileStore::new(&path);
        store.set(MODEL_KEY, json!("gpt-4o-mini")).await.unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(
            get_string(&reopened, MODEL_KEY).await.unwrap().as_deref(),
            Some("gpt-4o-mini")
        );
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("storage.json"));
        assert!(store.get(API_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.get(API_KEY).await, Err(ChatError::Store(_))));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_entries_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let store = JsonFileStore::new(&path);
        store.set(MODEL_KEY, json!("gpt-4o")).await.unwrap();

        // a directory in place of the file makes the next write fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(store.set(MODEL_KEY, json!("o1")).await.is_err());
        assert_eq!(store.get(MODEL_KEY).await.unwrap(), Some(json!("gpt-4o")));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_moved_aside_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::new(&path);
        store.set(API_KEY, json!("sk-test")).await.unwrap();
        assert_eq!(store.get(API_KEY).await.unwrap(), Some(json!("sk-test")));

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get(API_KEY).await.unwrap(), Some(json!("sk-test")));
        let backup = std::fs::read_to_string(dir.path().join("storage.json.corrupt")).unwrap();
        assert_eq!(backup, "{not json");
    }

    #[tokio::test]
    async fn test_conversation_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let conversation = vec![
            ChatMessage::user("What is Rust?"),
            ChatMessage::assistant("A systems language.\n\n```rust\nfn main() {}\n```"),
            ChatMessage::user("Thanks"),
        ];

        save_conversation(&JsonFileStore::new(&path), &conversation)
            .await
            .unwrap();
        let restored = load_conversation(&JsonFileStore::new(&path)).await.unwrap();

        assert_eq!(restored, conversation);
    }

    #[tokio::test]
    async fn test_initialize_storage_sets_absent_keys_only() {
        let store = MemoryStore::new();
        store.set(API_KEY, json!("sk-existing")).await.unwrap();

        initialize_storage(&store).await.unwrap();

        assert_eq!(store.get(API_KEY).await.unwrap(), Some(json!("sk-existing")));
        assert_eq!(store.get(MODEL_KEY).await.unwrap(), Some(json!(DEFAULT_MODEL)));
        assert_eq!(store.get(CONVERSATIONS_KEY).await.unwrap(), Some(json!([])));
    }

    #[tokio::test]
    async fn test_load_conversation_defaults_to_empty() {
        let store = MemoryStore::new();
        assert!(load_conversation(&store).await.unwrap().is_empty());
    }
}
