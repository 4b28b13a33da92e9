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


//! Download task model
//!
//! A task is created by the manager at submission time and mutated only by
//! the manager (single writer). States move forward only:
//! `Pending → InProgress* → {Completed | Failed | Cancelled}`. A terminal
//! task is never resumed; retry means submitting a brand-new task.

use crate::storage_access::TreeHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Unique identifier of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        TaskId(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where the finished file goes, resolved once at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Directly writable directory
    RawPath(PathBuf),
    /// User-granted storage location, dereferenced by the storage delegate
    ManagedTree(TreeHandle),
}

/// Display metadata carried by a request, used for the history record and
/// the in-flight list tiles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    pub name: String,
    /// Already-joined artist names
    pub artists: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Provenance tag recorded in history
    pub source: String,
}

/// A download intent, as submitted by a caller
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Remote URL to fetch
    pub url: String,
    /// Target file name (sanitized before use)
    pub file_name: String,
    /// Final placement; `None` falls back to the default downloads directory
    pub destination: Option<Destination>,
    /// Provider whose quota this transfer consumes, if any
    pub provider: Option<String>,
    pub display: DisplayMetadata,
}

/// Where the finished file ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavedFile {
    Path(PathBuf),
    Uri(String),
}

/// Lifecycle state of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DownloadState {
    /// Registered, waiting for a transfer slot
    Pending,
    /// Transfer running; fraction in [0.0, 1.0], non-decreasing
    InProgress(f64),
    /// Transfer finished and the file is at its final destination
    Completed(SavedFile),
    /// Transfer failed; reason is user-presentable
    Failed(String),
    /// User-cancelled; partial data has been cleaned up
    Cancelled,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed(_) | DownloadState::Failed(_) | DownloadState::Cancelled
        )
    }

    /// Progress fraction for display; terminal success reads as 1.0.
    pub fn progress(&self) -> f64 {
        match self {
            DownloadState::Pending => 0.0,
            DownloadState::InProgress(fraction) => *fraction,
            DownloadState::Completed(_) => 1.0,
            DownloadState::Failed(_) | DownloadState::Cancelled => 0.0,
        }
    }
}

/// Snapshot of one in-flight download, as handed to subscribers
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: TaskId,
    pub url: String,
    pub file_name: String,
    pub display: DisplayMetadata,
    pub state: DownloadState,
}

impl DownloadTask {
    pub(crate) fn new(id: TaskId, request: &DownloadRequest) -> Self {
        Self {
            id,
            url: request.url.clone(),
            file_name: request.file_name.clone(),
            display: request.display.clone(),
            state: DownloadState::Pending,
        }
    }
}

/// Replace characters the filesystem rejects with underscores.
pub fn sanitize_file_name(name: &str) -> String {
    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
    name.chars()
        .map(|c| if invalid_chars.contains(&c) { '_' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Avoid filename collisions by appending (1), (2), etc.
pub async fn avoid_collision(path: PathBuf) -> PathBuf {
    if !exists(&path).await {
        return path;
    }

    let parent = path.parent().map(PathBuf::from).unwrap_or_default();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download")
        .to_string();
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    for i in 1..1000 {
        let candidate = if extension.is_empty() {
            format!("{stem} ({i})")
        } else {
            format!("{stem} ({i}).{extension}")
        };
        let candidate_path = parent.join(candidate);
        if !exists(&candidate_path).await {
            return candidate_path;
        }
    }

    path // Give up after 1000 attempts
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_invalid_characters() {
        assert_eq!(sanitize_file_name("Song: Live?"), "Song_ Live_");
        assert_eq!(sanitize_file_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_file_name("  Valid Name.mp3 "), "Valid Name.mp3");
    }

    #[test]
    fn only_three_states_are_terminal() {
        assert!(!DownloadState::Pending.is_terminal());
        assert!(!DownloadState::InProgress(0.4).is_terminal());
        assert!(DownloadState::Completed(SavedFile::Path(PathBuf::from("/x"))).is_terminal());
        assert!(DownloadState::Failed("boom".to_string()).is_terminal());
        assert!(DownloadState::Cancelled.is_terminal());
    }

    #[test]
    fn progress_for_display() {
        assert_eq!(DownloadState::Pending.progress(), 0.0);
        assert_eq!(DownloadState::InProgress(0.25).progress(), 0.25);
        assert_eq!(
            DownloadState::Completed(SavedFile::Uri("content://x".to_string())).progress(),
            1.0
        );
    }

    #[test]
    fn task_id_survives_json_roundtrip() {
        let id = TaskId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[tokio::test]
    async fn collision_avoidance_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.mp3");

        assert_eq!(avoid_collision(path.clone()).await, path);

        std::fs::write(&path, b"x").unwrap();
        let next = avoid_collision(path.clone()).await;
        assert_eq!(next, dir.path().join("track (1).mp3"));

        std::fs::write(&next, b"x").unwrap();
        assert_eq!(
            avoid_collision(path).await,
            dir.path().join("track (2).mp3")
        );
    }
}
