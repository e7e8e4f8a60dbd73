//! Short-lived call memoization and debouncing for service entry points.
//!
//! Each reconciliation service owns its caches as explicit structures with an
//! explicit `invalidate`, so clearing them after a write is an auditable
//! operation rather than a side effect of a wrapper.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::Result;

struct MemoSlot<T> {
    value: Option<T>,
    expires_at: i64,
}

/// Argument-keyed cache with a short wall-clock window.
///
/// The first caller for a key computes while holding that key's lock;
/// concurrent identical callers wait on the same lock and receive the fresh
/// value, so duplicate in-flight work collapses to one operation. Failures
/// are never cached: the error propagates and the next caller retries.
///
/// Expiration is wall-clock via the shared [`Clock`], independent of the
/// store engine's own expiry.
pub struct MemoCache<T> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<String, Arc<Mutex<MemoSlot<T>>>>>,
}

/// Renders an argument tuple into a cache key.
pub fn memo_key(args: &impl Serialize) -> String {
    serde_json::to_string(args).unwrap_or_else(|e| {
        debug!("unkeyable memo arguments: {}", e);
        String::new()
    })
}

impl<T: Clone> MemoCache<T> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, key: &str) -> Arc<Mutex<MemoSlot<T>>> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(MemoSlot {
                    value: None,
                    expires_at: 0,
                }))
            })
            .clone()
    }

    /// Returns the cached value for `key` when still inside the window,
    /// otherwise runs `fetch` and caches its success.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;
        if let Some(value) = &guard.value {
            if guard.expires_at > self.clock.now_millis() {
                return Ok(value.clone());
            }
        }
        let value = fetch().await?;
        guard.value = Some(value.clone());
        guard.expires_at = self.clock.now_millis() + self.ttl.as_millis() as i64;
        Ok(value)
    }

    /// Drops every cached slot immediately, ahead of natural expiry. Called
    /// by services after every successful write.
    pub async fn invalidate(&self) {
        self.slots.lock().await.clear();
    }
}

struct DebounceSlot<T> {
    last_attempt: Option<tokio::time::Instant>,
    last_value: Option<T>,
}

/// Collapses rapid repeated identical calls for very hot single-key reads.
///
/// A call arriving inside the window returns the previous successful value
/// without dispatching. After a failure the remainder of the window elapses
/// before the next attempt is dispatched.
pub struct Debouncer<T> {
    window: Duration,
    slots: Mutex<HashMap<String, Arc<Mutex<DebounceSlot<T>>>>>,
}

impl<T: Clone> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, key: &str) -> Arc<Mutex<DebounceSlot<T>>> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DebounceSlot {
                    last_attempt: None,
                    last_value: None,
                }))
            })
            .clone()
    }

    pub async fn call<F, Fut>(&self, key: &str, attempt: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;

        if let (Some(at), Some(value)) = (guard.last_attempt, &guard.last_value) {
            if at.elapsed() < self.window {
                return Ok(value.clone());
            }
        }
        if let Some(at) = guard.last_attempt {
            let elapsed = at.elapsed();
            if elapsed < self.window && guard.last_value.is_none() {
                tokio::time::sleep(self.window - elapsed).await;
            }
        }

        guard.last_attempt = Some(tokio::time::Instant::now());
        match attempt().await {
            Ok(value) => {
                guard.last_value = Some(value.clone());
                Ok(value)
            }
            Err(e) => {
                guard.last_value = None;
                Err(e)
            }
        }
    }

    pub async fn invalidate(&self) {
        self.slots.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_fetch(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<u64>> + Send>> {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(7)
            })
        }
    }

    #[tokio::test]
    async fn test_concurrent_identical_calls_collapse() {
        let clock = ManualClock::new(0);
        let cache = Arc::new(MemoCache::new(Duration::from_secs(60), clock));
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = counting_fetch(calls.clone());
        let (a, b) = tokio::join!(
            cache.get_or_fetch("k", &fetch),
            cache.get_or_fetch("k", &fetch),
        );
        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_window_expiry() {
        let clock = ManualClock::new(0);
        let cache = MemoCache::new(Duration::from_secs(60), clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(calls.clone());

        cache.get_or_fetch("k", &fetch).await.unwrap();
        cache.get_or_fetch("k", &fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(61_000);
        cache.get_or_fetch("k", &fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share() {
        let clock = ManualClock::new(0);
        let cache = MemoCache::new(Duration::from_secs(60), clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(calls.clone());

        cache.get_or_fetch("a", &fetch).await.unwrap();
        cache.get_or_fetch("b", &fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let clock = ManualClock::new(0);
        let cache = MemoCache::new(Duration::from_secs(60), clock);
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = cache
            .get_or_fetch("k", || async {
                Err::<u64, _>(Error::Remote("down".into()))
            })
            .await;
        assert!(failing.is_err());

        let fetch = counting_fetch(calls.clone());
        assert_eq!(cache.get_or_fetch("k", &fetch).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_clears_inside_window() {
        let clock = ManualClock::new(0);
        let cache = MemoCache::new(Duration::from_secs(60), clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(calls.clone());

        cache.get_or_fetch("k", &fetch).await.unwrap();
        cache.invalidate().await;
        cache.get_or_fetch("k", &fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_returns_last_value_inside_window() {
        let debouncer = Debouncer::new(Duration::from_secs(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(calls.clone());

        assert_eq!(debouncer.call("k", &fetch).await.unwrap(), 7);
        assert_eq!(debouncer.call("k", &fetch).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(debouncer.call("k", &fetch).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_delays_retry_after_failure() {
        let debouncer = Debouncer::new(Duration::from_secs(1));

        let failed = debouncer
            .call("k", || async { Err::<u64, _>(Error::Remote("down".into())) })
            .await;
        assert!(failed.is_err());

        let started = tokio::time::Instant::now();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(calls.clone());
        assert_eq!(debouncer.call("k", &fetch).await.unwrap(), 7);
        assert!(started.elapsed() >= Duration::from_millis(900));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_memo_key_rendering() {
        #[derive(Serialize)]
        struct Args<'a> {
            page: u32,
            status: &'a str,
        }
        let key = memo_key(&Args {
            page: 1,
            status: "enable",
        });
        assert_eq!(key, r#"{"page":1,"status":"enable"}"#);
    }
}
