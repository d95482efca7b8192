//! In-process cache for contributor profile data.
//!
//! Explicit service object: constructed once per process and passed by
//! reference to consumers, with eviction by size and TTL and an injected
//! clock so expiry is testable.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct Entry {
    avatar_url: String,
    inserted_at: DateTime<Utc>,
    last_used: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    tick: u64,
}

/// Avatar URLs keyed by GitHub username.
pub struct ProfileCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ProfileCache {
    pub fn new(capacity: usize, ttl_minutes: i64) -> Self {
        Self::with_clock(capacity, ttl_minutes, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, ttl_minutes: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            ttl: Duration::minutes(ttl_minutes.max(1)),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a cached avatar URL. Expired entries are dropped on access.
    pub fn avatar(&self, username: &str) -> Option<String> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let expired = match inner.entries.get(username) {
            Some(entry) => now - entry.inserted_at > self.ttl,
            None => return None,
        };
        if expired {
            inner.entries.remove(username);
            return None;
        }
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(username)?;
        entry.last_used = tick;
        Some(entry.avatar_url.clone())
    }

    /// Remember an avatar URL, evicting the least-recently-used entry when
    /// the cache is full.
    pub fn remember(&self, username: &str, avatar_url: &str) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(username) && inner.entries.len() >= self.capacity {
            if let Some(victim) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            {
                inner.entries.remove(&victim);
            }
        }

        inner.entries.insert(
            username.to_string(),
            Entry {
                avatar_url: avatar_url.to_string(),
                inserted_at: now,
                last_used: tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Utc::now()),
            })
        }

        fn advance_minutes(&self, minutes: i64) {
            let mut now = self.now.lock().unwrap();
            *now += Duration::minutes(minutes);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    #[test]
    fn entries_expire_after_ttl() {
        let clock = ManualClock::new();
        let cache = ProfileCache::with_clock(8, 30, clock.clone());
        cache.remember("alice", "https://avatars.example/alice");
        assert_eq!(
            cache.avatar("alice").as_deref(),
            Some("https://avatars.example/alice")
        );

        clock.advance_minutes(31);
        assert_eq!(cache.avatar("alice"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let cache = ProfileCache::new(2, 60);
        cache.remember("alice", "a");
        cache.remember("bob", "b");
        // Touch alice so bob becomes the eviction victim.
        cache.avatar("alice");
        cache.remember("carol", "c");

        assert_eq!(cache.len(), 2);
        assert!(cache.avatar("alice").is_some());
        assert!(cache.avatar("bob").is_none());
        assert!(cache.avatar("carol").is_some());
    }

    #[test]
    fn remember_overwrites_in_place() {
        let cache = ProfileCache::new(2, 60);
        cache.remember("alice", "old");
        cache.remember("alice", "new");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.avatar("alice").as_deref(), Some("new"));
    }
}
