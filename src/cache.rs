//! Key-value store used by the caching behaviors.
//!
//! [`CacheStore`] is the seam for an external cache; [`InMemoryCacheStore`]
//! is a process-local implementation with per-entry expiry.
//!
//! # Example
//!
//! ```ignore
//! let store = InMemoryCacheStore::with_default_ttl(Duration::from_secs(60));
//! store.set("Color:1", Bytes::from_static(b"{}"), None).await?;
//! let removed = store.remove_by_pattern("*Color*").await?;
//! ```

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::Result;
use crate::handler::BoxFuture;

/// Asynchronous byte store with optional expiry.
pub trait CacheStore: Send + Sync + 'static {
    /// Value for `key`, if present and not expired.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>>>;

    /// Store `value`; `ttl` of `None` uses the store's default.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Remove `key`; returns whether it existed.
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Remove every key matching a glob pattern (`*` and `?`); returns the
    /// number removed.
    fn remove_by_pattern<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<usize>>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Process-local [`CacheStore`].
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, Entry>>,
    default_ttl: Option<Duration>,
}

impl InMemoryCacheStore {
    /// Store whose entries never expire unless a TTL is given.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::default(),
            default_ttl: Some(ttl),
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>>> {
        Box::pin(async move {
            let now = Instant::now();
            {
                let entries = self.entries.read().await;
                match entries.get(key) {
                    Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                    Some(_) => {}
                    None => return Ok(None),
                }
            }

            let mut entries = self.entries.write().await;
            if entries.get(key).is_some_and(|e| !e.is_live(now)) {
                entries.remove(key);
            }
            Ok(None)
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            // A TTL past the end of the clock never expires.
            let expires_at = ttl
                .or(self.default_ttl)
                .and_then(|ttl| Instant::now().checked_add(ttl));
            self.entries
                .write()
                .await
                .insert(key.to_string(), Entry { value, expires_at });
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let now = Instant::now();
            let removed = self.entries.write().await.remove(key);
            Ok(removed.is_some_and(|e| e.is_live(now)))
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let now = Instant::now();
            let entries = self.entries.read().await;
            Ok(entries.get(key).is_some_and(|e| e.is_live(now)))
        })
    }

    fn remove_by_pattern<'a>(&'a self, pattern: &'a str) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut entries = self.entries.write().await;
            let mut removed = 0;
            entries.retain(|key, entry| {
                if glob_match(pattern, key) {
                    if entry.is_live(now) {
                        removed += 1;
                    }
                    false
                } else {
                    true
                }
            });
            Ok(removed)
        })
    }
}

/// Match `text` against a pattern where `*` is any run and `?` one char.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*Color*", "GetColorById:7"));
        assert!(glob_match("Color:?", "Color:7"));
        assert!(!glob_match("Color:?", "Color:77"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = InMemoryCacheStore::new();
        store.set("k", Bytes::from_static(b"v"), None).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
        assert!(store.exists("k").await.unwrap());
        assert!(store.remove("k").await.unwrap());
        assert!(!store.remove("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = InMemoryCacheStore::with_default_ttl(Duration::from_secs(30));
        store.set("short", Bytes::from_static(b"1"), Some(Duration::from_secs(1))).await.unwrap();
        store.set("default", Bytes::from_static(b"2"), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(store.exists("default").await.unwrap());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!store.exists("default").await.unwrap());
        assert_eq!(store.purge_expired().await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_never_expires() {
        let store = InMemoryCacheStore::with_default_ttl(Duration::MAX);
        store.set("default", Bytes::from_static(b"1"), None).await.unwrap();
        store
            .set("explicit", Bytes::from_static(b"2"), Some(Duration::from_secs(u64::MAX)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
        assert!(store.exists("default").await.unwrap());
        assert!(store.exists("explicit").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_by_pattern() {
        let store = InMemoryCacheStore::new();
        for key in ["GetColors", "GetColorById:1", "GetUsers"] {
            store.set(key, Bytes::new(), None).await.unwrap();
        }

        assert_eq!(store.remove_by_pattern("*Color*").await.unwrap(), 2);
        assert_eq!(store.len().await, 1);
        assert!(store.exists("GetUsers").await.unwrap());
    }
}
