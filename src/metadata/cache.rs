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


//! Metadata cache
//!
//! Maps a track's content identity (path or content URI) to its extracted
//! tags so list tiles never re-decode an audio file on scroll. Entries are
//! created lazily on first read demand plus an explicit [`MetadataCache::preload`]
//! hook for anticipated access.
//!
//! The cache is an optimization, never a source of truth: every storage or
//! deserialization failure degrades to a miss, and save failures are logged
//! and swallowed.

use crate::error::Result;
use crate::metadata::tags::{read_tags_from_uri, TagReader, TrackTags};
use crate::storage_access::StorageAccess;
use crate::store::kv::KeyValueStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Storage key prefix for cache entries
const CACHE_KEY_PREFIX: &str = "music_metadata_cache_";

/// Content identity of a track. Paths and content URIs are separate
/// keyspaces; the prefix keeps them from colliding in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentKey {
    /// Canonical absolute filesystem path
    Path(String),
    /// Opaque content URI string
    Uri(String),
}

impl ContentKey {
    pub fn from_path(path: &Path) -> Self {
        ContentKey::Path(path.to_string_lossy().into_owned())
    }

    /// Full storage key for this identity.
    fn storage_key(&self) -> String {
        match self {
            ContentKey::Path(p) => format!("{CACHE_KEY_PREFIX}path:{p}"),
            ContentKey::Uri(u) => format!("{CACHE_KEY_PREFIX}uri:{u}"),
        }
    }
}

/// A cached tag record plus the time it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMetadata {
    #[serde(flatten)]
    pub tags: TrackTags,
    pub cached_at: DateTime<Utc>,
}

/// A single preload request; at least one of `file_path` / `content_uri`
/// should be set. Higher `priority` is processed first.
#[derive(Debug, Clone)]
pub struct PreloadRequest {
    pub id: String,
    pub file_path: Option<PathBuf>,
    pub content_uri: Option<String>,
    pub priority: i32,
}

impl PreloadRequest {
    fn content_key(&self) -> Option<ContentKey> {
        if let Some(path) = &self.file_path {
            Some(ContentKey::from_path(path))
        } else {
            self.content_uri.clone().map(ContentKey::Uri)
        }
    }
}

/// Read-through tag cache over the key-value seam.
pub struct MetadataCache {
    store: Arc<dyn KeyValueStore>,
    reader: Arc<dyn TagReader>,
    storage: Arc<dyn StorageAccess>,
    temp_dir: PathBuf,
}

impl MetadataCache {
    /// Entries older than this are purged by the maintenance sweep.
    pub const DEFAULT_MAX_AGE_DAYS: i64 = 30;

    pub fn new(
        store: Arc<dyn KeyValueStore>,
        reader: Arc<dyn TagReader>,
        storage: Arc<dyn StorageAccess>,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            reader,
            storage,
            temp_dir,
        }
    }

    /// Look up cached tags. Never errors: any storage or parse failure is a
    /// miss.
    pub async fn get(&self, key: &ContentKey) -> Option<CachedMetadata> {
        match self.store.get_string(&key.storage_key()).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("unreadable cache entry for {key:?}, treating as miss: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                debug!("cache read failed for {key:?}, treating as miss: {e}");
                None
            }
        }
    }

    /// Write tags for a key, replacing any prior entry. Persistence failures
    /// are logged and swallowed.
    pub async fn save(&self, key: &ContentKey, tags: TrackTags) {
        let entry = CachedMetadata {
            tags,
            cached_at: Utc::now(),
        };
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize cache entry for {key:?}: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set_string(&key.storage_key(), &json).await {
            warn!("failed to persist cache entry for {key:?}: {e}");
        }
    }

    /// Maintenance sweep: remove entries whose `cached_at` is older than
    /// `max_age_days`. Returns the number of entries removed.
    ///
    /// Operates per key over a snapshotted key list, so it is safe to run
    /// concurrently with `get`/`save` and never touches unrelated keys.
    pub async fn clear_old_cache(&self, max_age_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let keys = self.store.keys().await?;

        let mut removed = 0usize;
        for key in keys {
            if !key.starts_with(CACHE_KEY_PREFIX) {
                continue;
            }
            let stale = match self.store.get_string(&key).await {
                Ok(Some(raw)) => match serde_json::from_str::<CachedMetadata>(&raw) {
                    Ok(entry) => entry.cached_at < cutoff,
                    // An entry we cannot parse will never serve a hit again.
                    Err(_) => true,
                },
                Ok(None) => false,
                Err(e) => {
                    warn!("cache sweep could not read {key}: {e}");
                    false
                }
            };
            if stale {
                match self.store.remove(&key).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("cache sweep could not remove {key}: {e}"),
                }
            }
        }

        if removed > 0 {
            debug!("cache sweep removed {removed} stale entries");
        }
        Ok(removed)
    }

    /// Populate the cache for anticipated access. Higher-priority requests
    /// are read first, already-cached keys are skipped, and a failing file
    /// never aborts the rest of the batch.
    pub async fn preload(&self, mut requests: Vec<PreloadRequest>) {
        requests.sort_by(|a, b| b.priority.cmp(&a.priority));

        for request in requests {
            let Some(key) = request.content_key() else {
                debug!("preload request {} has no source, skipping", request.id);
                continue;
            };
            if self.get(&key).await.is_some() {
                continue;
            }

            let tags = match (&request.file_path, &request.content_uri) {
                (Some(path), _) => self.reader.read_tags(path).await,
                (None, Some(uri)) => {
                    read_tags_from_uri(
                        self.reader.as_ref(),
                        self.storage.as_ref(),
                        uri,
                        &self.temp_dir,
                    )
                    .await
                }
                (None, None) => unreachable!("content_key() returned Some"),
            };

            match tags {
                Ok(tags) => self.save(&key, tags).await,
                Err(e) => warn!("preload failed for {}: {e}", request.id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, Result};
    use crate::storage_access::{ManagedFile, TreeHandle};
    use crate::store::kv::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct NullStorage;

    #[async_trait]
    impl StorageAccess for NullStorage {
        async fn pick_directory(&self) -> Result<Option<TreeHandle>> {
            Ok(None)
        }
        async fn save_file(
            &self,
            _handle: &TreeHandle,
            _temp_path: &Path,
            _file_name: &str,
        ) -> Result<Option<String>> {
            Ok(None)
        }
        async fn delete_file(&self, _uri: &str) -> Result<bool> {
            Ok(false)
        }
        async fn read_bytes(&self, _uri: &str, _max: usize) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn list_files(&self, _handle: &TreeHandle) -> Result<Vec<ManagedFile>> {
            Ok(Vec::new())
        }
    }

    /// Records read order and can fail for selected paths.
    struct ScriptedReader {
        reads: Mutex<Vec<String>>,
        read_count: AtomicUsize,
        fail_for: Option<String>,
    }

    impl ScriptedReader {
        fn new() -> Self {
            Self {
                reads: Mutex::new(Vec::new()),
                read_count: AtomicUsize::new(0),
                fail_for: None,
            }
        }
    }

    #[async_trait]
    impl TagReader for ScriptedReader {
        async fn read_tags(&self, path: &Path) -> Result<TrackTags> {
            let name = path.to_string_lossy().into_owned();
            self.reads.lock().unwrap().push(name.clone());
            self.read_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_for.as_deref() == Some(name.as_str()) {
                return Err(CoreError::MetadataRead("corrupt file".to_string()));
            }
            Ok(TrackTags {
                artist: Some(format!("artist of {name}")),
                ..Default::default()
            })
        }
    }

    fn cache_with(store: Arc<MemoryStore>, reader: Arc<ScriptedReader>) -> MetadataCache {
        MetadataCache::new(
            store,
            reader,
            Arc::new(NullStorage),
            std::env::temp_dir().join("melosync-cache-tests"),
        )
    }

    fn seed_entry_json(cached_at: DateTime<Utc>) -> String {
        serde_json::to_string(&CachedMetadata {
            tags: TrackTags {
                artist: Some("Old".to_string()),
                ..Default::default()
            },
            cached_at,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn save_then_get_roundtrip_and_overwrite() {
        let cache = cache_with(MemoryStore::shared(), Arc::new(ScriptedReader::new()));
        let key = ContentKey::Path("/music/a.mp3".to_string());

        let first = TrackTags {
            artist: Some("First".to_string()),
            ..Default::default()
        };
        cache.save(&key, first.clone()).await;
        assert_eq!(cache.get(&key).await.unwrap().tags, first);

        let second = TrackTags {
            artist: Some("Second".to_string()),
            album: Some("LP".to_string()),
            ..Default::default()
        };
        cache.save(&key, second.clone()).await;
        // last write wins, fully replacing the entry
        assert_eq!(cache.get(&key).await.unwrap().tags, second);
    }

    #[tokio::test]
    async fn path_and_uri_keyspaces_do_not_collide() {
        let cache = cache_with(MemoryStore::shared(), Arc::new(ScriptedReader::new()));
        let same_text = "spooky".to_string();
        let as_path = ContentKey::Path(same_text.clone());
        let as_uri = ContentKey::Uri(same_text);

        cache
            .save(
                &as_path,
                TrackTags {
                    artist: Some("path".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert!(cache.get(&as_uri).await.is_none());
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let store = MemoryStore::shared();
        let key = ContentKey::Uri("content://track/9".to_string());
        store
            .set_string(&key.storage_key(), "{broken")
            .await
            .unwrap();

        let cache = cache_with(store, Arc::new(ScriptedReader::new()));
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_entries() {
        let store = MemoryStore::shared();
        let old_key = ContentKey::Path("/music/old.mp3".to_string());
        let fresh_key = ContentKey::Path("/music/fresh.mp3".to_string());

        store
            .set_string(
                &old_key.storage_key(),
                &seed_entry_json(Utc::now() - Duration::days(40)),
            )
            .await
            .unwrap();
        store
            .set_string(
                &fresh_key.storage_key(),
                &seed_entry_json(Utc::now() - Duration::days(10)),
            )
            .await
            .unwrap();
        // unrelated key must never be touched by the sweep
        store.set_string("download_history", "[]").await.unwrap();

        let cache = cache_with(Arc::clone(&store), Arc::new(ScriptedReader::new()));
        let removed = cache
            .clear_old_cache(MetadataCache::DEFAULT_MAX_AGE_DAYS)
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(cache.get(&old_key).await.is_none());
        assert!(cache.get(&fresh_key).await.is_some());
        assert_eq!(
            store.get_string("download_history").await.unwrap().as_deref(),
            Some("[]")
        );
    }

    /// Store whose `remove` fails for one key.
    struct StubbornStore {
        inner: MemoryStore,
        refuse_remove: String,
    }

    #[async_trait]
    impl KeyValueStore for StubbornStore {
        async fn get_string(&self, key: &str) -> Result<Option<String>> {
            self.inner.get_string(key).await
        }
        async fn set_string(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set_string(key, value).await
        }
        async fn get_int(&self, key: &str) -> Result<Option<i64>> {
            self.inner.get_int(key).await
        }
        async fn set_int(&self, key: &str, value: i64) -> Result<()> {
            self.inner.set_int(key, value).await
        }
        async fn remove(&self, key: &str) -> Result<()> {
            if key == self.refuse_remove {
                return Err(CoreError::storage("store is read-only right now"));
            }
            self.inner.remove(key).await
        }
        async fn keys(&self) -> Result<Vec<String>> {
            self.inner.keys().await
        }
    }

    #[tokio::test]
    async fn sweep_continues_past_a_failing_remove() {
        let stuck_key = ContentKey::Path("/music/stuck.mp3".to_string());
        let stale_key = ContentKey::Path("/music/stale.mp3".to_string());

        let store = Arc::new(StubbornStore {
            inner: MemoryStore::new(),
            refuse_remove: stuck_key.storage_key(),
        });
        let old = seed_entry_json(Utc::now() - Duration::days(40));
        store
            .set_string(&stuck_key.storage_key(), &old)
            .await
            .unwrap();
        store
            .set_string(&stale_key.storage_key(), &old)
            .await
            .unwrap();

        let cache = MetadataCache::new(
            Arc::clone(&store) as _,
            Arc::new(ScriptedReader::new()),
            Arc::new(NullStorage),
            std::env::temp_dir().join("melosync-cache-tests"),
        );
        let removed = cache
            .clear_old_cache(MetadataCache::DEFAULT_MAX_AGE_DAYS)
            .await
            .unwrap();

        // the refused key was skipped, the other stale entry still went
        assert_eq!(removed, 1);
        assert!(cache.get(&stale_key).await.is_none());
        assert!(cache.get(&stuck_key).await.is_some());
    }

    #[tokio::test]
    async fn preload_orders_by_priority_and_skips_cached() {
        let store = MemoryStore::shared();
        let reader = Arc::new(ScriptedReader::new());
        let cache = cache_with(Arc::clone(&store), Arc::clone(&reader));

        // /b is already cached and must not be re-read
        cache
            .save(
                &ContentKey::Path("/b".to_string()),
                TrackTags::default(),
            )
            .await;

        cache
            .preload(vec![
                PreloadRequest {
                    id: "low".to_string(),
                    file_path: Some(PathBuf::from("/c")),
                    content_uri: None,
                    priority: 1,
                },
                PreloadRequest {
                    id: "cached".to_string(),
                    file_path: Some(PathBuf::from("/b")),
                    content_uri: None,
                    priority: 5,
                },
                PreloadRequest {
                    id: "high".to_string(),
                    file_path: Some(PathBuf::from("/a")),
                    content_uri: None,
                    priority: 10,
                },
            ])
            .await;

        let reads = reader.reads.lock().unwrap().clone();
        assert_eq!(reads, vec!["/a".to_string(), "/c".to_string()]);
        assert!(cache.get(&ContentKey::Path("/a".to_string())).await.is_some());
        assert!(cache.get(&ContentKey::Path("/c".to_string())).await.is_some());
    }

    #[tokio::test]
    async fn preload_tolerates_individual_failures() {
        let reader = Arc::new(ScriptedReader {
            reads: Mutex::new(Vec::new()),
            read_count: AtomicUsize::new(0),
            fail_for: Some("/bad".to_string()),
        });
        let store = MemoryStore::shared();
        let cache = cache_with(Arc::clone(&store), Arc::clone(&reader));

        cache
            .preload(vec![
                PreloadRequest {
                    id: "bad".to_string(),
                    file_path: Some(PathBuf::from("/bad")),
                    content_uri: None,
                    priority: 2,
                },
                PreloadRequest {
                    id: "good".to_string(),
                    file_path: Some(PathBuf::from("/good")),
                    content_uri: None,
                    priority: 1,
                },
            ])
            .await;

        // the bad file did not block the rest of the batch
        assert_eq!(reader.read_count.load(Ordering::SeqCst), 2);
        assert!(cache.get(&ContentKey::Path("/bad".to_string())).await.is_none());
        assert!(cache.get(&ContentKey::Path("/good".to_string())).await.is_some());
    }
}
