//! MeloSync native core
//!
//! The engine behind the MeloSync music downloader: download orchestration
//! with live progress broadcasting, a tag-metadata cache, per-provider rate
//! limiting, and the persistence seams the host app plugs its platform
//! implementations into.
//!
//! Services are explicitly constructed instances wired together by the host
//! (no ambient globals); each one takes the collaborators it needs, which is
//! also what makes them testable against in-memory stubs.
//!
//! ```no_run
//! use std::sync::Arc;
//! use melosync_core::download::{DownloadConfig, DownloadManager};
//! use melosync_core::store::{DownloadHistory, MemoryStore};
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = MemoryStore::shared();
//! let history = Arc::new(DownloadHistory::new(store));
//! let manager = DownloadManager::new(DownloadConfig::default(), history, None, None)?;
//! let mut updates = manager.subscribe();
//! # Ok(())
//! # }
//! ```

pub mod download;
pub mod error;
pub mod metadata;
pub mod ratelimit;
pub mod storage_access;
pub mod store;

pub use error::{CoreError, Result};
