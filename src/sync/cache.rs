use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Display names read from both snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactNames {
    pub friends: Vec<String>,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: ContactNames,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

/// Time-boxed in-memory copy of the contact names, owned by the engine.
#[derive(Debug)]
pub struct ContactCache {
    ttl: Duration,
    entry: Mutex<Option<CacheEntry>>,
}

impl ContactCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Cached names if they were stored less than `ttl` ago.
    pub fn get(&self) -> Option<ContactNames> {
        self.entry
            .lock()
            .as_ref()
            .filter(|e| e.is_fresh(self.ttl))
            .map(|e| e.value.clone())
    }

    pub fn store(&self, value: ContactNames) {
        *self.entry.lock() = Some(CacheEntry {
            value,
            stored_at: Instant::now(),
        });
    }

    pub fn invalidate(&self) {
        *self.entry.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> ContactNames {
        ContactNames {
            friends: vec!["Bob".into()],
            groups: vec!["Hikers".into()],
        }
    }

    #[test]
    fn fresh_entry_is_served() {
        let cache = ContactCache::new(Duration::from_secs(300));
        assert!(cache.get().is_none());
        cache.store(names());
        assert_eq!(cache.get(), Some(names()));
    }

    #[test]
    fn stale_entry_is_ignored() {
        let cache = ContactCache::new(Duration::ZERO);
        cache.store(names());
        assert!(cache.get().is_none());
    }

    #[test]
    fn invalidate_drops_entry() {
        let cache = ContactCache::new(Duration::from_secs(300));
        cache.store(names());
        cache.invalidate();
        assert!(cache.get().is_none());
    }
}
