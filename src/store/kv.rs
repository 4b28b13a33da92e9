// MeloSync - Music Downloader for Mobile
// Copyright (C) 2026 MeloSync contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Persistent key-value store seam
//!
//! Everything the core persists (history, rate-limit windows, cached tags,
//! tree handles) goes through [`KeyValueStore`]. On device the host app wires
//! in its platform preferences store; [`JsonFileStore`] is the durable default
//! for desktop builds, [`MemoryStore`] backs tests.
//!
//! Distinct keys are safe for concurrent access. Bulk operations must call
//! [`KeyValueStore::keys`] once and iterate the snapshot, never the live set.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Async string-keyed store, durable across process restarts.
///
/// No transactionality is assumed; a write either lands or errors.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_string(&self, key: &str) -> Result<Option<String>>;
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;
    async fn get_int(&self, key: &str) -> Result<Option<i64>>;
    async fn set_int(&self, key: &str, value: i64) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;

    /// Point-in-time snapshot of all keys currently in the store.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory store for tests and previews. Not durable.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, ready to hand to multiple services.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_int(&self, key: &str) -> Result<Option<i64>> {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            Some(raw) => Ok(raw.parse::<i64>().ok()),
            None => Ok(None),
        }
    }

    async fn set_int(&self, key: &str, value: i64) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }
}

/// Durable store backed by a single JSON file.
///
/// The full map is loaded on open and rewritten on every mutation, guarded by
/// an internal lock so interleaved writers cannot corrupt the file. Fine for
/// the small state this core keeps (history, quotas, cached tags).
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or create) the store at `path`.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                CoreError::storage(format!("corrupt store file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn flush(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries).await
    }

    async fn get_int(&self, key: &str) -> Result<Option<i64>> {
        let entries = self.entries.lock().await;
        match entries.get(key) {
            Some(raw) => Ok(raw.parse::<i64>().ok()),
            None => Ok(None),
        }
    }

    async fn set_int(&self, key: &str, value: i64) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set_string("a", "hello").await.unwrap();
        store.set_int("b", 42).await.unwrap();

        assert_eq!(store.get_string("a").await.unwrap().as_deref(), Some("hello"));
        assert_eq!(store.get_int("b").await.unwrap(), Some(42));
        assert_eq!(store.get_string("missing").await.unwrap(), None);

        store.remove("a").await.unwrap();
        assert_eq!(store.get_string("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_non_numeric_int_reads_as_none() {
        let store = MemoryStore::new();
        store.set_string("k", "not a number").await.unwrap();
        assert_eq!(store.get_int("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = JsonFileStore::open(path.clone()).await.unwrap();
            store.set_string("download_history", "[]").await.unwrap();
            store.set_int("rate_limit_groq", 10).await.unwrap();
        }

        let store = JsonFileStore::open(path).await.unwrap();
        assert_eq!(
            store.get_string("download_history").await.unwrap().as_deref(),
            Some("[]")
        );
        assert_eq!(store.get_int("rate_limit_groq").await.unwrap(), Some(10));

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["download_history", "rate_limit_groq"]);
    }
}
