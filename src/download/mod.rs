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


//! Download orchestration
//!
//! - [`task`]: the request/destination/state model
//! - [`progress`]: throttled, monotone progress tracking
//! - [`transfer`]: the streamed fetch into a scratch file
//! - [`manager`]: the global registry, concurrency bound, and broadcaster

pub mod manager;
pub mod progress;
pub mod task;
pub(crate) mod transfer;

// Re-export commonly used types
pub use manager::{DownloadConfig, DownloadManager, DownloadsSnapshot};
pub use task::{
    Destination, DisplayMetadata, DownloadRequest, DownloadState, DownloadTask, SavedFile, TaskId,
};
