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


//! Storage-access delegate seam
//!
//! On sandboxed storage the app cannot write through raw paths; final file
//! placement goes through a user-granted tree handle dereferenced by the host
//! platform. The core only sees this trait; the Android side implements it on
//! top of the storage access framework, tests implement it in a tempdir.

use crate::error::Result;
use crate::store::kv::KeyValueStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Opaque, user-granted reference to a storage location.
///
/// Only the [`StorageAccess`] delegate can dereference it; the core treats it
/// as a string it stores and passes back.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TreeHandle(pub String);

impl TreeHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A file listed inside a tree handle
#[derive(Debug, Clone)]
pub struct ManagedFile {
    pub name: String,
    pub uri: String,
}

/// Delegated storage operations, implemented by the host platform.
#[async_trait]
pub trait StorageAccess: Send + Sync {
    /// Ask the user to pick a directory; `None` if they dismissed the picker.
    async fn pick_directory(&self) -> Result<Option<TreeHandle>>;

    /// Move the fully-written temp file into the tree under `file_name`.
    /// Returns the resulting content URI, or `None` if the delegate could not
    /// place the file.
    async fn save_file(
        &self,
        handle: &TreeHandle,
        temp_path: &Path,
        file_name: &str,
    ) -> Result<Option<String>>;

    /// Delete a file by content URI. Returns whether anything was deleted.
    async fn delete_file(&self, uri: &str) -> Result<bool>;

    /// Read up to `max_bytes` from a content URI.
    async fn read_bytes(&self, uri: &str, max_bytes: usize) -> Result<Option<Vec<u8>>>;

    /// List files directly inside a tree handle.
    async fn list_files(&self, handle: &TreeHandle) -> Result<Vec<ManagedFile>>;
}

/// Storage key for a feature area's chosen tree handle
fn tree_uri_key(area: &str) -> String {
    format!("saf_tree_uri_{area}")
}

/// Load the persisted tree handle for a feature area ("music", "images", "qr").
pub async fn load_tree_handle(
    store: &dyn KeyValueStore,
    area: &str,
) -> Result<Option<TreeHandle>> {
    Ok(store
        .get_string(&tree_uri_key(area))
        .await?
        .map(TreeHandle))
}

/// Persist the chosen tree handle for a feature area.
pub async fn save_tree_handle(
    store: &dyn KeyValueStore,
    area: &str,
    handle: &TreeHandle,
) -> Result<()> {
    store.set_string(&tree_uri_key(area), handle.as_str()).await
}

/// Forget the chosen tree handle for a feature area.
pub async fn clear_tree_handle(store: &dyn KeyValueStore, area: &str) -> Result<()> {
    store.remove(&tree_uri_key(area)).await
}

/// Resolve the default downloads directory under `base`, creating it if absent.
///
/// Used when a request carries no destination at all.
pub async fn ensure_default_dir(base: &Path) -> Result<PathBuf> {
    let dir = base.join("MeloSync");
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}
