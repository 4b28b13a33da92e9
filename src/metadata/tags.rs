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


//! Track tags and the tag-reader seam
//!
//! Reading embedded tags (and especially artwork) means decoding the audio
//! file, which can take hundreds of milliseconds; it is always done through
//! [`TagReader`] so the cache layer can sit in front of it. Content-URI
//! sources cannot be handed to a tag parser directly: they are materialized
//! to a temp file first and the temp file is deleted after reading.

use crate::error::{CoreError, Result};
use crate::storage_access::StorageAccess;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound when materializing a content URI for tag reading. Tags and
/// artwork live in the head of the file for every format we care about.
const MAX_MATERIALIZE_BYTES: usize = 16 * 1024 * 1024;

/// Tags extracted from an audio file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackTags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// First embedded picture, if any. May be several hundred KB.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes"
    )]
    pub artwork: Option<Vec<u8>>,
}

/// Base64 wrapper so artwork survives JSON persistence compactly.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_str(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) => STANDARD
                .decode(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Tag extraction seam. Implemented on device over the platform tag parser.
#[async_trait]
pub trait TagReader: Send + Sync {
    /// Read tags from a real filesystem path.
    async fn read_tags(&self, path: &Path) -> Result<TrackTags>;
}

/// Read tags from a content URI by materializing it to a temp file first.
///
/// The temp file is removed before returning, whether or not the read
/// succeeded.
pub async fn read_tags_from_uri(
    reader: &dyn TagReader,
    storage: &dyn StorageAccess,
    uri: &str,
    temp_dir: &Path,
) -> Result<TrackTags> {
    let bytes = storage
        .read_bytes(uri, MAX_MATERIALIZE_BYTES)
        .await?
        .ok_or_else(|| CoreError::MetadataRead(format!("unreadable content uri: {uri}")))?;

    let temp_path = materialize_temp(temp_dir, &bytes).await?;
    let result = reader.read_tags(&temp_path).await;
    let _ = tokio::fs::remove_file(&temp_path).await;
    result
}

async fn materialize_temp(temp_dir: &Path, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(temp_dir).await?;
    let path = temp_dir.join(format!("tagread-{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}
