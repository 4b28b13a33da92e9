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


//! Global download manager
//!
//! Single authoritative registry of in-flight downloads: it owns the task
//! map, signs off every state transition, is the sole writer of the history
//! store, and broadcasts the full in-flight map to subscribers on every
//! change. Observers always reconcile complete state; transfer counts are
//! small (tens, not thousands), so the redundant payload is cheap.
//!
//! Concurrency is bounded by a semaphore; excess submissions wait in
//! `Pending` until a slot frees. Each worker only ever touches its own map
//! entry, so task failures stay isolated.

use crate::download::task::{
    avoid_collision, sanitize_file_name, DownloadRequest, DownloadState, DownloadTask,
    Destination, SavedFile, TaskId,
};
use crate::download::transfer::{commit_file, fetch_to_file};
use crate::error::{CoreError, Result};
use crate::ratelimit::RateLimiter;
use crate::storage_access::{ensure_default_dir, StorageAccess};
use crate::store::history::{DownloadHistory, HistoryItem};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Full in-flight map, broadcast on every state transition
pub type DownloadsSnapshot = HashMap<TaskId, DownloadTask>;

/// Broadcast buffer; lagging receivers drop old snapshots, which is safe
/// because every message is complete state.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Download manager configuration
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Maximum concurrent transfers; excess submissions queue in `Pending`
    pub max_concurrent_downloads: usize,

    /// Hard timeout for the network phase of one transfer
    pub network_timeout: Duration,

    /// Base directory for the default downloads folder, used when a request
    /// carries no destination
    pub base_dir: PathBuf,

    /// Scratch directory for in-progress transfers
    pub temp_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 4,
            network_timeout: Duration::from_secs(300),
            base_dir: PathBuf::from("."),
            temp_dir: std::env::temp_dir().join("melosync"),
        }
    }
}

struct TaskEntry {
    task: DownloadTask,
    cancel: CancellationToken,
}

struct Inner {
    config: DownloadConfig,
    client: reqwest::Client,
    // Mutated only through the manager; workers touch only their own entry.
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
    semaphore: Arc<Semaphore>,
    events: broadcast::Sender<DownloadsSnapshot>,
    history: Arc<DownloadHistory>,
    rate_limiter: Option<Arc<RateLimiter>>,
    storage: Option<Arc<dyn StorageAccess>>,
}

/// Global download manager. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    pub fn new(
        config: DownloadConfig,
        history: Arc<DownloadHistory>,
        rate_limiter: Option<Arc<RateLimiter>>,
        storage: Option<Arc<dyn StorageAccess>>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.network_timeout)
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let max_concurrent = config.max_concurrent_downloads;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                client,
                tasks: RwLock::new(HashMap::new()),
                semaphore: Arc::new(Semaphore::new(max_concurrent)),
                events,
                history,
                rate_limiter,
                storage,
            }),
        })
    }

    /// Submit a download intent.
    ///
    /// Validates the request and checks the provider quota synchronously, so
    /// a rejection is a clean error instead of a task that instantly fails.
    /// On success the task is registered in `Pending`, the transfer starts in
    /// the background, and the id is returned immediately; observe progress
    /// via [`DownloadManager::subscribe`].
    pub async fn submit(&self, request: DownloadRequest) -> Result<TaskId> {
        let parsed = url::Url::parse(&request.url)
            .map_err(|e| CoreError::invalid_input(format!("bad download url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CoreError::invalid_input(format!(
                "unsupported url scheme: {}",
                parsed.scheme()
            )));
        }

        let file_name = sanitize_file_name(&request.file_name);
        if file_name.is_empty() {
            return Err(CoreError::invalid_input("empty file name"));
        }

        if matches!(request.destination, Some(Destination::ManagedTree(_)))
            && self.inner.storage.is_none()
        {
            return Err(CoreError::Permission(
                "managed storage destination without a storage delegate".to_string(),
            ));
        }

        if let (Some(provider), Some(limiter)) = (&request.provider, &self.inner.rate_limiter) {
            if !limiter.can_call(provider).await {
                return Err(CoreError::QuotaExceeded {
                    provider: provider.clone(),
                    retry_after_seconds: limiter.time_until_reset(provider).await.as_secs(),
                });
            }
            limiter.consume(provider).await;
        }

        let id = TaskId::new();
        let cancel = CancellationToken::new();
        let request = DownloadRequest {
            file_name,
            ..request
        };

        {
            let mut tasks = self.write_tasks();
            tasks.insert(
                id,
                TaskEntry {
                    task: DownloadTask::new(id, &request),
                    cancel: cancel.clone(),
                },
            );
            self.send_snapshot(&tasks);
        }
        info!("download submitted: {id} ({})", request.display.name);

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_worker(id, request, cancel).await;
        });

        Ok(id)
    }

    /// Cancel a download. No-op if the task is unknown or already terminal.
    pub fn cancel(&self, id: TaskId) {
        let tasks = self.read_tasks();
        if let Some(entry) = tasks.get(&id) {
            if !entry.task.state.is_terminal() {
                info!("cancelling download {id}");
                entry.cancel.cancel();
            }
        }
    }

    /// Point-in-time snapshot of the in-flight map. Does not update live;
    /// subscribe for that.
    pub fn active_downloads(&self) -> DownloadsSnapshot {
        self.read_tasks()
            .iter()
            .map(|(id, entry)| (*id, entry.task.clone()))
            .collect()
    }

    /// Subscribe to state changes. Every transition of every task delivers
    /// the full in-flight map.
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadsSnapshot> {
        self.inner.events.subscribe()
    }

    // ========================================================================
    // Worker
    // ========================================================================

    async fn run_worker(&self, id: TaskId, request: DownloadRequest, cancel: CancellationToken) {
        let inner = &self.inner;

        // Wait for a transfer slot; the task sits in Pending meanwhile.
        let _permit = tokio::select! {
            permit = Arc::clone(&inner.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = cancel.cancelled() => {
                self.finish(id, DownloadState::Cancelled).await;
                return;
            }
        };

        self.transition(id, DownloadState::InProgress(0.0));

        let scratch = inner.config.temp_dir.join(format!("{id}.part"));
        let manager = self.clone();
        let fetched = fetch_to_file(&inner.client, &request.url, &scratch, &cancel, |fraction| {
            manager.transition(id, DownloadState::InProgress(fraction));
        })
        .await;

        // Placement is still cancellable: a cancel landing after the last
        // chunk but before the final move must not produce a Completed task.
        let placed = match fetched {
            Ok(()) => tokio::select! {
                placed = self.place_file(&request, &scratch) => placed,
                _ = cancel.cancelled() => Err(CoreError::Cancelled),
            },
            Err(e) => Err(e),
        };

        match placed {
            Ok(saved) => {
                self.record_history(id, &request).await;
                info!("download completed: {id} ({})", request.display.name);
                self.finish(id, DownloadState::Completed(saved)).await;
            }
            Err(CoreError::Cancelled) => {
                let _ = tokio::fs::remove_file(&scratch).await;
                info!("download cancelled: {id}");
                self.finish(id, DownloadState::Cancelled).await;
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&scratch).await;
                warn!("download {id} failed: {e}");
                self.finish(id, DownloadState::Failed(e.to_string())).await;
            }
        }
    }

    /// Two-phase commit: the scratch file is complete, move it to the final
    /// destination.
    async fn place_file(&self, request: &DownloadRequest, scratch: &Path) -> Result<SavedFile> {
        match &request.destination {
            Some(Destination::ManagedTree(handle)) => {
                // presence of the delegate was validated at submission
                let storage = self.inner.storage.as_ref().ok_or_else(|| {
                    CoreError::Permission("storage delegate disappeared".to_string())
                })?;
                let uri = storage
                    .save_file(handle, scratch, &request.file_name)
                    .await?
                    .ok_or_else(|| {
                        CoreError::storage("storage delegate refused the file".to_string())
                    })?;
                // the delegate may have copied rather than moved
                let _ = tokio::fs::remove_file(scratch).await;
                Ok(SavedFile::Uri(uri))
            }
            Some(Destination::RawPath(dir)) => {
                let final_path = avoid_collision(dir.join(&request.file_name)).await;
                commit_file(scratch, &final_path).await?;
                Ok(SavedFile::Path(final_path))
            }
            None => {
                let dir = ensure_default_dir(&self.inner.config.base_dir).await?;
                let final_path = avoid_collision(dir.join(&request.file_name)).await;
                commit_file(scratch, &final_path).await?;
                Ok(SavedFile::Path(final_path))
            }
        }
    }

    async fn record_history(&self, id: TaskId, request: &DownloadRequest) {
        let item = HistoryItem {
            id: id.to_string(),
            name: request.display.name.clone(),
            artists: request.display.artists.clone(),
            image_url: request.display.image_url.clone(),
            duration_ms: request.display.duration_ms,
            source: request.display.source.clone(),
            downloaded_at: Utc::now(),
        };
        // History is a record, not a gate: a persistence failure is logged
        // and the download still counts as completed.
        if let Err(e) = self.inner.history.add(item).await {
            warn!("failed to record history for {id}: {e}");
        }
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    /// Apply a non-final state change and broadcast. Progress never
    /// regresses, and a terminal task is never touched again.
    fn transition(&self, id: TaskId, state: DownloadState) {
        let mut tasks = self.write_tasks();
        let Some(entry) = tasks.get_mut(&id) else { return };
        if entry.task.state.is_terminal() {
            return;
        }
        if let (DownloadState::InProgress(new), DownloadState::InProgress(current)) =
            (&state, &entry.task.state)
        {
            if new < current {
                return;
            }
        }
        entry.task.state = state;
        self.send_snapshot(&tasks);
    }

    /// Terminal transition: broadcast the final state while the task is
    /// still visible, then remove it and broadcast the shrunk map.
    async fn finish(&self, id: TaskId, state: DownloadState) {
        debug_assert!(state.is_terminal());
        self.transition(id, state);
        let mut tasks = self.write_tasks();
        tasks.remove(&id);
        self.send_snapshot(&tasks);
    }

    /// Capture and send in one step, under the caller's lock. Concurrent
    /// workers would otherwise interleave a stale snapshot behind a newer
    /// one and a subscriber would see progress walk backwards.
    fn send_snapshot(&self, tasks: &HashMap<TaskId, TaskEntry>) {
        let snapshot: DownloadsSnapshot = tasks
            .iter()
            .map(|(id, entry)| (*id, entry.task.clone()))
            .collect();
        // no receivers is fine
        let _ = self.inner.events.send(snapshot);
    }

    fn read_tasks(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TaskId, TaskEntry>> {
        self.inner.tasks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_tasks(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TaskId, TaskEntry>> {
        self.inner.tasks.write().unwrap_or_else(|e| e.into_inner())
    }
}
