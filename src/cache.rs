use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

struct Entry<V> {
    value: V,
    loaded_at: Instant,
}

/// Async map whose entries go stale after a fixed TTL. A zero TTL turns
/// every lookup into a miss.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn is_fresh(&self, entry: &Entry<V>) -> bool {
        entry.loaded_at.elapsed() < self.ttl
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.write().await.insert(
            key,
            Entry {
                value,
                loaded_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    pub async fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries
            .write()
            .await
            .retain(|_, entry| entry.loaded_at.elapsed() < ttl);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns the cached value or runs `load`. Absent results are not
    /// cached, so a row created later is seen on the next call.
    pub async fn get_or_load<F, Fut, E>(&self, key: K, load: F) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(Some(value));
        }
        let loaded = load().await?;
        if let Some(ref value) = loaded {
            self.insert(key, value.clone()).await;
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::sleep;

    use super::*;

    #[tokio::test]
    async fn value_is_served_until_ttl_passes() {
        let cache: TtlCache<&str, String> = TtlCache::new(Duration::from_millis(50));
        cache.insert("1001", "token-a".to_string()).await;
        assert_eq!(cache.get(&"1001").await.as_deref(), Some("token-a"));

        sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get(&"1001").await, None);

        cache.purge_expired().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn loader_runs_once_while_fresh() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_load("1001".to_string(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(Some(7))
                })
                .await
                .expect("load");
            assert_eq!(value, Some(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_values_are_not_remembered() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        let first = cache
            .get_or_load("1001".to_string(), || async { Ok::<_, ()>(None) })
            .await
            .expect("first");
        assert_eq!(first, None);

        let second = cache
            .get_or_load("1001".to_string(), || async { Ok::<_, ()>(Some(3)) })
            .await
            .expect("second");
        assert_eq!(second, Some(3));
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::ZERO);
        tokio_test::block_on(cache.insert("1001", 1));
        assert_eq!(tokio_test::block_on(cache.get(&"1001")), None);
        assert_eq!(tokio_test::block_on(cache.len()), 0);
    }

    #[tokio::test]
    async fn invalidate_drops_entry() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("1001", 1).await;
        cache.invalidate(&"1001").await;
        assert_eq!(cache.get(&"1001").await, None);
    }
}
