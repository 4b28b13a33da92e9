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


//! Download history store
//!
//! Append/query/remove list of completed-download records, persisted as a
//! single JSON array under the `download_history` key, most-recent-first.
//! Items are immutable once written; retrying a download creates a new item.
//!
//! The read-modify-write of the list is serialized through an internal mutex
//! so two concurrently-completing downloads cannot drop each other's record.

use crate::error::Result;
use crate::store::kv::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Storage key for the serialized history list
const HISTORY_KEY: &str = "download_history";

/// A completed download, as shown in the history screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    /// Track title for display
    pub name: String,
    /// Artists for display, already joined (e.g. "Artist A, Artist B")
    pub artists: String,
    /// Cover art URL, if the source exposed one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Provenance tag, e.g. which provider or screen produced the download
    pub source: String,
    pub downloaded_at: DateTime<Utc>,
}

/// Single-writer history store over the key-value seam.
pub struct DownloadHistory {
    store: Arc<dyn KeyValueStore>,
    // Serializes the read-modify-write of the persisted list.
    write_lock: Mutex<()>,
}

impl DownloadHistory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// All history items, most recent first.
    ///
    /// A missing or unreadable blob is treated as an empty history; the
    /// history is display data, not a source of truth worth failing over.
    pub async fn list(&self) -> Vec<HistoryItem> {
        match self.store.get_string(HISTORY_KEY).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("download history blob is unreadable, treating as empty: {e}");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("failed to load download history: {e}");
                Vec::new()
            }
        }
    }

    /// Prepend a completed download to the history.
    pub async fn add(&self, item: HistoryItem) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.list().await;
        items.insert(0, item);
        self.persist(&items).await
    }

    /// Remove a single item by id. No-op if the id is unknown.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.list().await;
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() != before {
            self.persist(&items).await?;
        }
        Ok(())
    }

    /// Drop the entire history.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.remove(HISTORY_KEY).await
    }

    async fn persist(&self, items: &[HistoryItem]) -> Result<()> {
        let json = serde_json::to_string(items)?;
        self.store.set_string(HISTORY_KEY, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryStore;

    fn item(id: &str, name: &str) -> HistoryItem {
        HistoryItem {
            id: id.to_string(),
            name: name.to_string(),
            artists: "Test Artist".to_string(),
            image_url: None,
            duration_ms: Some(180_000),
            source: "spotify".to_string(),
            downloaded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn add_and_list_most_recent_first() {
        let history = DownloadHistory::new(MemoryStore::shared());

        history.add(item("1", "First")).await.unwrap();
        history.add(item("2", "Second")).await.unwrap();

        let items = history.list().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "Second");
        assert_eq!(items[1].name, "First");
    }

    #[tokio::test]
    async fn remove_by_id() {
        let history = DownloadHistory::new(MemoryStore::shared());
        history.add(item("1", "Keep")).await.unwrap();
        history.add(item("2", "Drop")).await.unwrap();

        history.remove("2").await.unwrap();
        let items = history.list().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "1");

        // Unknown id is a no-op
        history.remove("nope").await.unwrap();
        assert_eq!(history.list().await.len(), 1);
    }

    #[tokio::test]
    async fn clear_empties_history() {
        let history = DownloadHistory::new(MemoryStore::shared());
        history.add(item("1", "One")).await.unwrap();
        history.clear().await.unwrap();
        assert!(history.list().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_blob_reads_as_empty() {
        let store = MemoryStore::shared();
        store.set_string(HISTORY_KEY, "{not json").await.unwrap();

        let history = DownloadHistory::new(store);
        assert!(history.list().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_adds_lose_nothing() {
        let history = Arc::new(DownloadHistory::new(MemoryStore::shared()));

        let mut handles = Vec::new();
        for i in 0..20 {
            let history = Arc::clone(&history);
            handles.push(tokio::spawn(async move {
                history.add(item(&i.to_string(), "Track")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let items = history.list().await;
        assert_eq!(items.len(), 20);
        let mut ids: Vec<_> = items.iter().map(|i| i.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20, "no duplicate ids");
    }
}
