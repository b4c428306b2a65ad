//! A cache bound to its loader.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::BoxFuture;

use backstop_core::ResilienceError;

use crate::Cache;

type SharedLoader<K, V, E> =
    Arc<dyn Fn(K) -> BoxFuture<'static, Result<V, ResilienceError<E>>> + Send + Sync>;

/// A [`Cache`] paired with the function that populates it.
///
/// `get` reads through the cache: hits return immediately, misses run the
/// loader with the same single-flight guarantee as
/// [`Cache::get_or_load`]: concurrent misses on one key share a single
/// loader invocation.
///
/// # Example
///
/// ```
/// use backstop_cache::{Cache, LoadingCache};
/// use backstop_core::ResilienceError;
///
/// # async fn example() -> Result<(), ResilienceError<std::io::Error>> {
/// let cache = Cache::builder().max_size(100).name("dns").build();
/// let resolver = LoadingCache::new(cache, |host: String| async move {
///     Ok(format!("10.0.0.1 ({host})"))
/// });
///
/// let addr = resolver.get("db.internal".to_string()).await?;
/// # let _ = addr;
/// # Ok(())
/// # }
/// ```
pub struct LoadingCache<K, V, E> {
    cache: Cache<K, V>,
    loader: SharedLoader<K, V, E>,
}

impl<K, V, E> Clone for LoadingCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            loader: Arc::clone(&self.loader),
        }
    }
}

impl<K, V, E> LoadingCache<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Binds `loader` to `cache`.
    pub fn new<F, Fut>(cache: Cache<K, V>, loader: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ResilienceError<E>>> + Send + 'static,
    {
        Self {
            cache,
            loader: Arc::new(move |key| Box::pin(loader(key))),
        }
    }

    /// Returns the cached value for `key`, loading it on a miss.
    pub async fn get(&self, key: K) -> Result<V, ResilienceError<E>> {
        let loader = Arc::clone(&self.loader);
        let loader_key = key.clone();
        self.cache
            .get_or_load(key, move || loader(loader_key))
            .await
    }

    /// Forces a fresh load for `key`, replacing any cached value.
    pub async fn refresh(&self, key: K) -> Result<V, ResilienceError<E>> {
        let value = (self.loader)(key.clone()).await?;
        self.cache.put(key, value.clone());
        Ok(value)
    }

    /// The underlying cache, for manual operations and statistics.
    pub fn cache(&self) -> &Cache<K, V> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct TestError(&'static str);

    #[tokio::test]
    async fn loads_on_miss_and_caches() {
        let loads = Arc::new(AtomicUsize::new(0));
        let loads_clone = Arc::clone(&loads);

        let cache = Cache::builder().max_size(10).build();
        let loading = LoadingCache::new(cache, move |key: String| {
            let loads = Arc::clone(&loads_clone);
            async move {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ResilienceError<TestError>>(format!("value-{key}"))
            }
        });

        assert_eq!(loading.get("a".to_string()).await.unwrap(), "value-a");
        assert_eq!(loading.get("a".to_string()).await.unwrap(), "value-a");
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        assert_eq!(loading.get("b".to_string()).await.unwrap(), "value-b");
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn loader_errors_propagate_and_cache_nothing() {
        let cache: Cache<String, String> = Cache::builder().max_size(10).build();
        let loading = LoadingCache::new(cache, |_key: String| async move {
            Err::<String, _>(ResilienceError::Application(TestError("backend down")))
        });

        let result = loading.get("a".to_string()).await;
        assert!(result.is_err());
        assert_eq!(loading.cache().size(), 0);
    }

    #[tokio::test]
    async fn refresh_replaces_the_cached_value() {
        let version = Arc::new(AtomicUsize::new(0));
        let version_clone = Arc::clone(&version);

        let cache = Cache::builder().max_size(10).build();
        let loading = LoadingCache::new(cache, move |_key: String| {
            let version = Arc::clone(&version_clone);
            async move {
                Ok::<_, ResilienceError<TestError>>(version.fetch_add(1, Ordering::SeqCst))
            }
        });

        assert_eq!(loading.get("k".to_string()).await.unwrap(), 0);
        assert_eq!(loading.get("k".to_string()).await.unwrap(), 0);
        assert_eq!(loading.refresh("k".to_string()).await.unwrap(), 1);
        assert_eq!(loading.get("k".to_string()).await.unwrap(), 1);
    }
}
