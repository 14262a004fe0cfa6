//! Read-mostly value cache with a time-based invalidation window.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry<T> {
    value: T,
    fetched_at: Instant,
}

/// A single cached value refreshed at most once per `ttl`.
///
/// Readers share a read lock. On a miss the writer re-checks staleness
/// after taking the write lock, so concurrent misses trigger one fetch.
///
/// The write lock is held for the whole fetch. While a refresh is in
/// flight every reader blocks, even one that would accept the stale value,
/// and then sees the refreshed value.
pub struct TimedCache<T> {
    ttl: Duration,
    entry: RwLock<Option<Entry<T>>>,
}

impl<T: Clone> TimedCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
        }
    }

    fn fresh(&self, entry: &Option<Entry<T>>) -> Option<T> {
        entry
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    /// Return the cached value, fetching it with `fetch` when absent or stale.
    ///
    /// A failed fetch leaves the previous entry untouched. Blocks while
    /// another caller's fetch is running.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.fresh(&*self.entry.read().await) {
            return Ok(value);
        }

        let mut guard = self.entry.write().await;
        if let Some(value) = self.fresh(&guard) {
            return Ok(value);
        }

        let value = fetch().await?;
        *guard = Some(Entry {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    /// Replace the cached value and restart the window.
    pub async fn put(&self, value: T) {
        *self.entry.write().await = Some(Entry {
            value,
            fetched_at: Instant::now(),
        });
    }

    pub async fn invalidate(&self) {
        *self.entry.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_after_ttl() {
        let cache = TimedCache::new(Duration::from_secs(300));
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let fetch = || async move { Ok(calls.fetch_add(1, Ordering::SeqCst)) };

        assert_eq!(cache.get_or_refresh(fetch).await.unwrap(), 0);
        assert_eq!(cache.get_or_refresh(fetch).await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.get_or_refresh(fetch).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_fetch_once() {
        let cache = Arc::new(TimedCache::new(Duration::from_secs(300)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(vec!["issue".to_string()])
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), vec!["issue".to_string()]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_waits_for_running_refresh() {
        let cache = Arc::new(TimedCache::new(Duration::from_secs(60)));
        cache.put(1u32).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let refresher = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_refresh(|| async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(2)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = Instant::now();
        let seen = cache.get_or_refresh(|| async { Ok(99) }).await.unwrap();
        assert_eq!(seen, 2);
        assert!(started.elapsed() >= Duration::from_millis(90));
        assert_eq!(refresher.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_nothing() {
        let cache: TimedCache<u32> = TimedCache::new(Duration::from_secs(60));
        let err = cache
            .get_or_refresh(|| async { anyhow::bail!("tracker down") })
            .await;
        assert!(err.is_err());
        assert_eq!(cache.get_or_refresh(|| async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_invalidate_and_put() {
        let cache = TimedCache::new(Duration::from_secs(60));
        cache.put(1u32).await;
        assert_eq!(cache.get_or_refresh(|| async { Ok(2) }).await.unwrap(), 1);
        cache.invalidate().await;
        assert_eq!(cache.get_or_refresh(|| async { Ok(3) }).await.unwrap(), 3);
    }
}
