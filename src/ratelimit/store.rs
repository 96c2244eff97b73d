use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// A live fixed window for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

impl Window {
    #[must_use]
    pub fn is_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }
}

/// Counter storage for the rate limiter. Implementations must be safe to call
/// from many request tasks at once.
pub trait RateLimitStore: Send + Sync {
    /// The live window for `key`, if any.
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Window>;

    /// Counts one hit. Starts a new window of length `window` when none is live.
    fn incr(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Window;

    /// Drops windows that have elapsed.
    fn expire(&self, now: DateTime<Utc>);

    fn clear(&self);
}

/// Single-process store backed by a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryRateLimitStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Window> {
        let windows = self.windows.lock().ok()?;
        windows
            .get(key)
            .copied()
            .filter(|window| !window.is_elapsed(now))
    }

    fn incr(&self, key: &str, window: Duration, now: DateTime<Utc>) -> Window {
        let fresh = Window {
            count: 1,
            reset_at: now + window,
        };
        // A poisoned lock only means another request panicked mid-update;
        // the counters are still usable.
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entry) = windows.get_mut(key).filter(|entry| !entry.is_elapsed(now)) {
            entry.count = entry.count.saturating_add(1);
            return *entry;
        }
        windows.insert(key.to_string(), fresh);
        fresh
    }

    fn expire(&self, now: DateTime<Utc>) {
        if let Ok(mut windows) = self.windows.lock() {
            windows.retain(|_, window| !window.is_elapsed(now));
        }
    }

    fn clear(&self) {
        if let Ok(mut windows) = self.windows.lock() {
            windows.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incr_counts_within_window() {
        let store = MemoryRateLimitStore::new();
        let now = Utc::now();
        assert_eq!(store.incr("k", Duration::minutes(1), now).count, 1);
        assert_eq!(store.incr("k", Duration::minutes(1), now).count, 2);
        let window = store.get("k", now).unwrap();
        assert_eq!(window.count, 2);
        assert_eq!(window.reset_at, now + Duration::minutes(1));
    }

    #[test]
    fn test_window_resets_after_elapsing() {
        let store = MemoryRateLimitStore::new();
        let start = Utc::now();
        store.incr("k", Duration::minutes(1), start);
        store.incr("k", Duration::minutes(1), start);

        let later = start + Duration::minutes(1);
        assert!(store.get("k", later).is_none());
        let window = store.incr("k", Duration::minutes(1), later);
        assert_eq!(window.count, 1);
        assert_eq!(window.reset_at, later + Duration::minutes(1));
    }

    #[test]
    fn test_expire_and_clear() {
        let store = MemoryRateLimitStore::new();
        let now = Utc::now();
        store.incr("short", Duration::seconds(1), now);
        store.incr("long", Duration::minutes(15), now);

        store.expire(now + Duration::seconds(2));
        assert_eq!(store.len(), 1);
        assert!(store.get("long", now).is_some());

        store.clear();
        assert!(store.is_empty());
    }
}
