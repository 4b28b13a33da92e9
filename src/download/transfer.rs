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


//! Transfer protocol: streamed HTTP GET into a scratch file
//!
//! Bytes always land in a scratch file first; the caller moves it to the
//! final destination only after the full transfer succeeded, so a partial
//! download can never masquerade as a finished one.
//!
//! The cancel token is polled at every chunk boundary and before the request
//! is sent. Cancelling drops the response mid-stream, which aborts the
//! underlying connection rather than letting it drain. The hard network
//! timeout lives on the `reqwest` client and surfaces as a retryable
//! network error, same as any other I/O failure.

use crate::download::progress::ProgressTracker;
use crate::error::{CoreError, Result};
use futures_util::StreamExt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Write buffer size for the scratch file
const WRITE_BUFFER_SZ: usize = 64 * 1024;

/// Stream `url` into `scratch_path`, reporting throttled progress fractions.
///
/// On any error (including cancellation) the partial scratch file is removed
/// before returning.
pub(crate) async fn fetch_to_file<F>(
    client: &reqwest::Client,
    url: &str,
    scratch_path: &Path,
    cancel: &CancellationToken,
    on_progress: F,
) -> Result<()>
where
    F: FnMut(f64),
{
    let result = fetch_inner(client, url, scratch_path, cancel, on_progress).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(scratch_path).await;
    }
    result
}

async fn fetch_inner<F>(
    client: &reqwest::Client,
    url: &str,
    scratch_path: &Path,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<()>
where
    F: FnMut(f64),
{
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }

    let response = tokio::select! {
        response = client.get(url).send() => {
            response.map_err(|e| CoreError::network(format!("request failed: {e}"), true))?
        }
        _ = cancel.cancelled() => return Err(CoreError::Cancelled),
    };

    let status = response.status();
    if !status.is_success() {
        return Err(CoreError::UnexpectedStatusCode {
            status_code: status.as_u16(),
            url: url.to_string(),
        });
    }

    let total_bytes = response.content_length().unwrap_or(0);
    let mut tracker = ProgressTracker::new(total_bytes);
    debug!("transfer started: {url} ({total_bytes} bytes expected)");

    if let Some(parent) = scratch_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = File::create(scratch_path).await?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SZ, file);

    let mut stream = response.bytes_stream();
    let mut bytes_received = 0u64;

    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
        };
        let Some(chunk) = chunk else { break };
        let chunk =
            chunk.map_err(|e| CoreError::network(format!("stream error: {e}"), true))?;

        writer.write_all(&chunk).await?;
        bytes_received += chunk.len() as u64;

        if let Some(fraction) = tracker.update(bytes_received) {
            on_progress(fraction);
        }
    }

    writer.flush().await?;
    on_progress(tracker.force_update(bytes_received));

    if total_bytes > 0 && bytes_received < total_bytes {
        return Err(CoreError::network(
            format!("transfer incomplete: {bytes_received}/{total_bytes} bytes"),
            true,
        ));
    }

    debug!("transfer finished: {url} ({bytes_received} bytes)");
    Ok(())
}

/// Move a fully-written file to its final destination.
///
/// Atomic rename when source and destination share a filesystem; falls back
/// to copy-then-delete across storage boundaries.
pub(crate) async fn commit_file(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::storage(format!("cannot create {}: {e}", parent.display())))?;
    }

    match tokio::fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!("rename failed ({rename_err}), falling back to copy");
            tokio::fs::copy(source, destination).await.map_err(|e| {
                CoreError::storage(format!("cannot write {}: {e}", destination.display()))
            })?;
            tokio::fs::remove_file(source).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let client = reqwest::Client::new();
        let scratch = std::env::temp_dir().join("melosync-never-written.part");
        let err = fetch_to_file(
            &client,
            "http://127.0.0.1:9/unreachable",
            &scratch,
            &cancel,
            |_| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CoreError::Cancelled));
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn commit_renames_within_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.part");
        let dest = dir.path().join("final").join("track.mp3");
        tokio::fs::write(&source, b"audio").await.unwrap();

        commit_file(&source, &dest).await.unwrap();

        assert!(!source.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"audio");
    }

    #[tokio::test]
    async fn commit_missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = commit_file(&PathBuf::from("/nonexistent/in.part"), &dir.path().join("out"))
            .await
            .unwrap_err();
        // rename and copy both fail; surfaced as a storage error
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
