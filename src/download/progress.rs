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


//! Download progress tracking
//!
//! Progress is a fraction in `[0.0, 1.0]`, `bytes_received / total_bytes`
//! when the server told us the total, else the last known value. The fraction
//! never regresses, even if the byte counter is re-reported.
//!
//! Callbacks are coalesced: one emission per update interval at most, with a
//! forced emission at transfer edges so observers always see the final value.

use std::time::{Duration, Instant};

/// Minimum interval between emitted progress updates
const UPDATE_INTERVAL: Duration = Duration::from_millis(200);

/// Throttled, monotone progress tracker for one transfer.
#[derive(Debug)]
pub struct ProgressTracker {
    /// Total bytes expected; 0 when the server sent no content length
    total_bytes: u64,
    bytes_received: u64,
    fraction: f64,
    last_emit: Option<Instant>,
    update_interval: Duration,
}

/// Percent string for logs and display fallbacks, e.g. "42%".
pub fn format_percent(fraction: f64) -> String {
    format!("{:.0}%", fraction.clamp(0.0, 1.0) * 100.0)
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            bytes_received: 0,
            fraction: 0.0,
            last_emit: None,
            update_interval: UPDATE_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_interval(total_bytes: u64, update_interval: Duration) -> Self {
        Self {
            update_interval,
            ..Self::new(total_bytes)
        }
    }

    /// Record received bytes. Returns `Some(fraction)` when enough time has
    /// passed that the new value should be emitted, `None` when coalesced.
    pub fn update(&mut self, bytes_received: u64) -> Option<f64> {
        self.advance(bytes_received);

        let now = Instant::now();
        match self.last_emit {
            Some(at) if now.duration_since(at) < self.update_interval => None,
            _ => {
                self.last_emit = Some(now);
                Some(self.fraction)
            }
        }
    }

    /// Record received bytes and always emit, regardless of throttling.
    /// Used at transfer edges (first byte, completion).
    pub fn force_update(&mut self, bytes_received: u64) -> f64 {
        self.advance(bytes_received);
        self.last_emit = Some(Instant::now());
        self.fraction
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    fn advance(&mut self, bytes_received: u64) {
        self.bytes_received = self.bytes_received.max(bytes_received);
        if self.total_bytes > 0 {
            let fraction =
                (self.bytes_received as f64 / self.total_bytes as f64).clamp(0.0, 1.0);
            // monotone: a late or re-sent chunk count never walks progress back
            if fraction > self.fraction {
                self.fraction = fraction;
            }
        }
        // total unknown: stay at the last known value
    }
}
