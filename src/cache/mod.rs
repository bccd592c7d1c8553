//! Listing cache
//!
//! Read-through memoization of provider listings, one cache per operation.
//! The lock is held while a missing entry is loaded, so concurrent callers
//! asking for the same key wait for the first load instead of repeating it.
//! Failed loads are not cached. Entries live as long as the cache does.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

pub struct ListingCache<T> {
    name: &'static str,
    entries: Mutex<HashMap<String, Arc<Vec<T>>>>,
}

impl<T> ListingCache<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached listing for `key`, loading it with `load` on a miss
    pub async fn get_or_try_load<F, Fut, E>(&self, key: &str, load: F) -> Result<Arc<Vec<T>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(cached) = entries.get(key) {
            debug!(cache = self.name, key = %key, "Cache hit");
            return Ok(cached.clone());
        }

        debug!(cache = self.name, key = %key, "Cache miss");
        let listing = Arc::new(load().await?);
        entries.insert(key.to_string(), listing.clone());
        Ok(listing)
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Vec<T>>> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_loads_once_per_key() {
        let cache = ListingCache::new("pages");
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let listing = cache
                .get_or_try_load("chapter-1", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(*listing, vec![1, 2, 3]);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(cache.contains("chapter-1").await);
        assert!(!cache.contains("chapter-2").await);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache: ListingCache<u32> = ListingCache::new("search");

        let err = cache
            .get_or_try_load("q", || async { Err::<Vec<u32>, _>("offline") })
            .await
            .unwrap_err();
        assert_eq!(err, "offline");
        assert!(cache.is_empty().await);

        let listing = cache
            .get_or_try_load("q", || async { Ok::<_, &str>(vec![7]) })
            .await
            .unwrap();
        assert_eq!(*listing, vec![7]);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let cache = Arc::new(ListingCache::new("chapters"));
        let loads = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let loads = loads.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_try_load("manga", || async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            Ok::<_, String>(vec!["c1".to_string()])
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().len(), 1);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
