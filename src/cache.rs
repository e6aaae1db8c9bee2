//! # Cache Module
//!
//! Double-buffered in-memory cache of parsed events. A refresh stages a new
//! buffer and swaps it in under the same lock once complete, so readers see
//! either the old snapshot or the new one, never a half-cleared cache.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::TimestampedEvent;

/// Default cache TTL in seconds
const CACHE_TTL_SECONDS: i64 = 60;

/// TTL from `CLAUDE_CACHE_TTL` (seconds), defaulting to 60.
pub fn cache_ttl() -> Duration {
    let ttl = std::env::var("CLAUDE_CACHE_TTL")
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|s| *s >= 0)
        .unwrap_or(CACHE_TTL_SECONDS);
    Duration::seconds(ttl)
}

#[derive(Debug, Default)]
struct Buffers {
    active: Arc<Vec<TimestampedEvent>>,
    staged: Option<Vec<TimestampedEvent>>,
    refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct EventCache {
    inner: Mutex<Buffers>,
}

impl EventCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Buffers> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current committed events. Cheap: shares the buffer.
    pub fn snapshot(&self) -> Arc<Vec<TimestampedEvent>> {
        Arc::clone(&self.lock().active)
    }

    /// Stage an empty buffer. The active buffer stays readable until
    /// [`commit`](Self::commit).
    pub fn begin_refresh(&self) {
        self.lock().staged = Some(Vec::new());
    }

    /// Append to the staged buffer, starting one if needed.
    pub fn stage(&self, events: impl IntoIterator<Item = TimestampedEvent>) {
        self.lock().staged.get_or_insert_with(Vec::new).extend(events);
    }

    /// Swap the staged buffer in. Returns false when nothing was staged.
    pub fn commit(&self, now: DateTime<Utc>) -> bool {
        let mut buffers = self.lock();
        let Some(mut fresh) = buffers.staged.take() else {
            return false;
        };
        fresh.sort_by_key(|e| e.ts);
        let count = fresh.len();
        buffers.active = Arc::new(fresh);
        buffers.refreshed_at = Some(now);
        tracing::debug!(count, "event cache committed");
        true
    }

    /// Drop the staged buffer, keeping the active one.
    pub fn cancel(&self) {
        self.lock().staged = None;
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().staged.is_some()
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.lock().refreshed_at
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.lock().refreshed_at {
            Some(at) => now - at >= ttl,
            None => true,
        }
    }
}
