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


//! Rate limiter for outbound third-party API calls
//!
//! Each provider has an independent quota ceiling and rolling window. The
//! window is anchored at `last_reset_at` (not a wall-clock boundary) and is
//! checked lazily: the refill happens on the next `can_call`/`reset_check`
//! after the window elapses.
//!
//! State persists across process restarts as `rate_limit_<provider>` /
//! `rate_limit_<provider>_reset`. Missing or corrupt state initializes to a
//! full quota (fail open): a first run or a wiped store never locks the user
//! out.

use crate::error::Result;
use crate::store::kv::KeyValueStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default rolling window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Configured quota for one provider
#[derive(Debug, Clone)]
pub struct ProviderQuota {
    /// Maximum calls per window; `remaining` never exceeds this
    pub ceiling: u32,
    pub window: Duration,
}

impl ProviderQuota {
    pub fn per_hour(ceiling: u32) -> Self {
        Self {
            ceiling,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Live counter state for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitState {
    pub remaining: u32,
    pub last_reset_at: DateTime<Utc>,
}

/// Per-provider rolling-window limiter over the key-value seam.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    quotas: HashMap<String, ProviderQuota>,
    state: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimiter {
    /// Build a limiter for the configured providers, restoring persisted
    /// counters. Unknown/corrupt persisted state falls back to a full quota
    /// anchored at now.
    pub async fn new(
        store: Arc<dyn KeyValueStore>,
        quotas: HashMap<String, ProviderQuota>,
    ) -> Self {
        let mut state = HashMap::new();
        for (provider, quota) in &quotas {
            let restored = Self::restore(store.as_ref(), provider, quota).await;
            state.insert(provider.clone(), restored);
        }
        Self {
            store,
            quotas,
            state: Mutex::new(state),
        }
    }

    async fn restore(
        store: &dyn KeyValueStore,
        provider: &str,
        quota: &ProviderQuota,
    ) -> RateLimitState {
        let remaining = store
            .get_int(&remaining_key(provider))
            .await
            .ok()
            .flatten()
            .and_then(|v| u32::try_from(v).ok());
        let last_reset_at = match store.get_string(&reset_key(provider)).await {
            Ok(Some(raw)) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
            _ => None,
        };

        match (remaining, last_reset_at) {
            (Some(remaining), Some(last_reset_at)) => RateLimitState {
                // clamp in case the configured ceiling was lowered
                remaining: remaining.min(quota.ceiling),
                last_reset_at,
            },
            _ => {
                debug!("no usable persisted state for provider '{provider}', starting at full quota");
                RateLimitState {
                    remaining: quota.ceiling,
                    last_reset_at: Utc::now(),
                }
            }
        }
    }

    /// Whether a call to `provider` is currently allowed. Triggers the lazy
    /// window reset first. Unknown providers are allowed (fail open).
    pub async fn can_call(&self, provider: &str) -> bool {
        self.reset_check().await;
        let state = self.state.lock().await;
        match state.get(provider) {
            Some(s) => s.remaining > 0,
            None => true,
        }
    }

    /// Record one successful outbound call attempt. No-op when the counter is
    /// already zero or the provider is unconfigured. Persists the new count.
    pub async fn consume(&self, provider: &str) {
        let mut state = self.state.lock().await;
        let Some(s) = state.get_mut(provider) else {
            return;
        };
        if s.remaining == 0 {
            return;
        }
        s.remaining -= 1;
        let snapshot = s.clone();
        drop(state);
        self.persist(provider, &snapshot).await;
    }

    /// Refill any provider whose window has elapsed. Persists only changed
    /// providers.
    pub async fn reset_check(&self) {
        let now = Utc::now();
        let mut refilled: Vec<(String, RateLimitState)> = Vec::new();
        {
            let mut state = self.state.lock().await;
            for (provider, s) in state.iter_mut() {
                let Some(quota) = self.quotas.get(provider) else {
                    continue;
                };
                let window = chrono::Duration::from_std(quota.window)
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
                if now - s.last_reset_at >= window {
                    s.remaining = quota.ceiling;
                    s.last_reset_at = now;
                    refilled.push((provider.clone(), s.clone()));
                }
            }
        }
        for (provider, snapshot) in refilled {
            debug!("rate limit window reset for provider '{provider}'");
            self.persist(&provider, &snapshot).await;
        }
    }

    /// Time until the provider's window refills. Zero when a refill is
    /// already due (or the provider is unconfigured).
    pub async fn time_until_reset(&self, provider: &str) -> Duration {
        let state = self.state.lock().await;
        let (Some(s), Some(quota)) = (state.get(provider), self.quotas.get(provider)) else {
            return Duration::ZERO;
        };
        let window = chrono::Duration::from_std(quota.window)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let due_at = s.last_reset_at + window;
        (due_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Current counter for a provider, after the lazy reset check.
    pub async fn remaining(&self, provider: &str) -> Option<u32> {
        self.reset_check().await;
        self.state.lock().await.get(provider).map(|s| s.remaining)
    }

    // Persistence failures are absorbed: the limiter is a guard rail, not a
    // source of truth, and must never block a user-visible action.
    async fn persist(&self, provider: &str, state: &RateLimitState) {
        if let Err(e) = self
            .store
            .set_int(&remaining_key(provider), i64::from(state.remaining))
            .await
        {
            warn!("failed to persist rate limit count for '{provider}': {e}");
        }
        if let Err(e) = self
            .store
            .set_string(&reset_key(provider), &state.last_reset_at.to_rfc3339())
            .await
        {
            warn!("failed to persist rate limit reset time for '{provider}': {e}");
        }
    }
}

fn remaining_key(provider: &str) -> String {
    format!("rate_limit_{provider}")
}

fn reset_key(provider: &str) -> String {
    format!("rate_limit_{provider}_reset")
}

/// Persisted-state helpers shared with tests and diagnostics.
pub async fn seed_state(
    store: &dyn KeyValueStore,
    provider: &str,
    remaining: u32,
    last_reset_at: DateTime<Utc>,
) -> Result<()> {
    store
        .set_int(&remaining_key(provider), i64::from(remaining))
        .await?;
    store
        .set_string(&reset_key(provider), &last_reset_at.to_rfc3339())
        .await?;
    Ok(())
}
