//! In-process, content-addressed cache for `is_cache` components.
//!
//! Grounded on `engine/run_cache.go`: the cache key is a digest of the
//! marshaled component (there, `md5`; here `sha2`, already in the teacher's
//! dependency stack), entries expire after a TTL (5 minutes by default),
//! and the backing store there is a shared Redis instance. Since
//! distributed execution of a single run across hosts is out of scope,
//! this cache lives in one process: a `RwLock<HashMap>` for the entries and
//! a per-key `Mutex` registry so that concurrent callers racing for the
//! same key single-flight — exactly one of them computes the value, the
//! rest await it.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

struct Entry {
    value: Value,
    expires_at: Instant,
}

pub struct RequestCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl RequestCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Derives a cache key from a component's identity and its resolved
    /// input, matching the original's "hash of the marshaled component"
    /// approach but scoped to the fields that actually vary per call.
    pub fn key_for(component_name: &str, resolved_input: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(component_name.as_bytes());
        hasher.update(resolved_input.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        entries.get(key).and_then(|e| {
            if e.expires_at > Instant::now() {
                Some(e.value.clone())
            } else {
                None
            }
        })
    }

    pub async fn set(&self, key: &str, value: Value) {
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Returns the per-key lock used to single-flight concurrent misses.
    /// Callers should: acquire the lock, re-check `get`, and only compute +
    /// `set` if still missing, then drop the lock.
    pub async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(key) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `compute` at most once per key among concurrent callers,
    /// caching and reusing its result until the TTL elapses.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, compute: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }
        let value = compute().await?;
        self.set(key, value.clone()).await;
        Ok(value)
    }
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::config::DEFAULT_CACHE_TTL_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = RequestCache::new(Duration::from_secs(60));
        assert_eq!(cache.get("k").await, None);
        cache.set("k", json!({"a": 1})).await;
        assert_eq!(cache.get("k").await, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let cache = RequestCache::new(Duration::from_millis(10));
        cache.set("k", json!(1)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn same_component_and_input_produce_same_key() {
        let a = RequestCache::key_for("echo", &json!({"x": 1}));
        let b = RequestCache::key_for("echo", &json!({"x": 1}));
        let c = RequestCache::key_for("echo", &json!({"x": 2}));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn concurrent_misses_single_flight_to_one_compute() {
        let cache = Arc::new(RequestCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute::<_, _, std::convert::Infallible>("shared", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(json!("computed"))
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
