//! # Convoy Cache
//!
//! Keyed TTL cache with a background sweeper, per-registry circuit
//! breakers, and a shared-tick rate limiter. Everything here sits
//! between the checker and the registry clients, so all waits are
//! cancellation aware and all clocks are tokio clocks (testable with
//! paused time).

use std::{future::Future, hash::Hash, sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::time::Instant;

mod breaker;
mod limiter;

pub use breaker::{CircuitBreaker, CircuitState};
pub use limiter::RateLimiter;

struct CacheEntry<V> {
  value: V,
  expires_at: Instant,
}

/// A keyed map with per-entry absolute-time expiry.
pub struct TimedCache<K, V> {
  entries: DashMap<K, CacheEntry<V>>,
  default_ttl: Duration,
}

impl<K, V> TimedCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  pub fn new(default_ttl: Duration) -> TimedCache<K, V> {
    TimedCache {
      entries: DashMap::new(),
      default_ttl,
    }
  }

  pub fn get(&self, key: &K) -> Option<V> {
    let entry = self.entries.get(key)?;
    if entry.expires_at <= Instant::now() {
      drop(entry);
      self.entries.remove(key);
      return None;
    }
    Some(entry.value.clone())
  }

  pub fn insert(&self, key: K, value: V) {
    self.insert_with_ttl(key, value, self.default_ttl)
  }

  pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
    self.entries.insert(
      key,
      CacheEntry {
        value,
        expires_at: Instant::now() + ttl,
      },
    );
  }

  pub fn remove(&self, key: &K) {
    self.entries.remove(key);
  }

  pub fn clear(&self) {
    self.entries.clear();
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Check, fetch on miss, store the result when `worth_caching` says
  /// so, return. No stampede protection: the upstream rate limiter
  /// absorbs duplicate fetches.
  pub async fn get_or_fetch<F, Fut, E>(
    &self,
    key: K,
    ttl: Duration,
    worth_caching: impl Fn(&V) -> bool,
    fetch: F,
  ) -> Result<V, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
  {
    if let Some(value) = self.get(&key) {
      return Ok(value);
    }
    let value = fetch().await?;
    if worth_caching(&value) {
      self.insert_with_ttl(key, value.clone(), ttl);
    }
    Ok(value)
  }

  /// Drops expired entries.
  pub fn sweep(&self) {
    let now = Instant::now();
    self.entries.retain(|_, entry| entry.expires_at > now);
  }
}

/// Spawns the periodic sweep for a shared cache.
pub fn spawn_cache_sweeper<K, V>(
  cache: Arc<TimedCache<K, V>>,
  interval: Duration,
) where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
      ticker.tick().await;
      cache.sweep();
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn entries_expire() {
    let cache =
      TimedCache::<String, String>::new(Duration::from_secs(60));
    cache.insert("key".to_string(), "value".to_string());
    assert_eq!(
      cache.get(&"key".to_string()).as_deref(),
      Some("value")
    );

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(cache.get(&"key".to_string()), None);
  }

  #[tokio::test(start_paused = true)]
  async fn custom_ttl_overrides_default() {
    let cache =
      TimedCache::<String, u64>::new(Duration::from_secs(900));
    cache.insert_with_ttl(
      "digest".to_string(),
      7,
      Duration::from_secs(300),
    );
    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(cache.get(&"digest".to_string()), None);
  }

  #[tokio::test(start_paused = true)]
  async fn sweep_drops_expired_only() {
    let cache =
      TimedCache::<String, u64>::new(Duration::from_secs(60));
    cache.insert("a".to_string(), 1);
    cache.insert_with_ttl(
      "b".to_string(),
      2,
      Duration::from_secs(600),
    );
    tokio::time::advance(Duration::from_secs(120)).await;
    cache.sweep();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&"b".to_string()), Some(2));
  }

  #[tokio::test(start_paused = true)]
  async fn get_or_fetch_skips_empty_results() {
    let cache = TimedCache::<String, Vec<String>>::new(
      Duration::from_secs(60),
    );
    let fetched: Result<_, std::convert::Infallible> = cache
      .get_or_fetch(
        "tags".to_string(),
        Duration::from_secs(60),
        |v| !v.is_empty(),
        || async { Ok(Vec::new()) },
      )
      .await;
    assert!(fetched.unwrap().is_empty());
    // Nothing stored, a later fetch runs again.
    assert!(cache.is_empty());
  }
}
