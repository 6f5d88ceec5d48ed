use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Keeps a single computed value for `ttl`. Failed refreshes are not cached.
pub struct TimedCache<T> {
    ttl: Duration,
    entry: RwLock<Option<(Instant, T)>>,
}

impl<T: Clone> TimedCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
        }
    }

    pub async fn get_or_try_refresh<F, Fut, E>(&self, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some((at, value)) = self.entry.read().await.as_ref() {
            if at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }

        let mut entry = self.entry.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some((at, value)) = entry.as_ref() {
            if at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }
        let value = refresh().await?;
        *entry = Some((Instant::now(), value.clone()));
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn serves_cached_value_within_ttl() {
        let cache = TimedCache::new(Duration::from_secs(300));
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value: Result<usize, ()> = cache
                .get_or_try_refresh(|| async { Ok(calls.fetch_add(1, Ordering::SeqCst)) })
                .await;
            assert_eq!(value, Ok(0));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: TimedCache<u32> = TimedCache::new(Duration::from_secs(300));
        assert_eq!(cache.get_or_try_refresh(|| async { Err("down") }).await, Err("down"));
        assert_eq!(cache.get_or_try_refresh(|| async { Ok::<_, &str>(7) }).await, Ok(7));
    }

    #[tokio::test]
    async fn expired_values_are_refreshed() {
        let cache = TimedCache::new(Duration::ZERO);
        assert_eq!(cache.get_or_try_refresh(|| async { Ok::<_, ()>(1) }).await, Ok(1));
        assert_eq!(cache.get_or_try_refresh(|| async { Ok::<_, ()>(2) }).await, Ok(2));
    }
}
