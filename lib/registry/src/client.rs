use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::error::{RegistryError, Result};

/// Tag digests for one tag. The manifest-list digest comes first:
/// that is what container daemons report locally for multi-arch
/// images, so reverse lookups must see it before the per-arch
/// digests.
pub type TagDigests = IndexMap<String, Vec<String>>;

/// One per registry family. Calls are already rate limited by the
/// implementation; retry and circuit breaking happen in the manager
/// wrapper around these.
#[async_trait]
pub trait RegistryClient: Send + Sync {
  async fn list_tags(
    &self,
    repo: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<String>>;

  async fn get_tag_digest(
    &self,
    repo: &str,
    tag: &str,
    cancel: &CancellationToken,
  ) -> Result<String>;

  async fn list_tags_with_digests(
    &self,
    repo: &str,
    cancel: &CancellationToken,
  ) -> Result<TagDigests>;
}

/// Page size for every paginated tag listing.
pub const PAGE_SIZE: usize = 100;

/// Namespaces trusted to need deep tag history (official images and
/// the big publishing organizations).
pub const WELL_KNOWN_NAMESPACES: &[&str] = &[
  "library",
  "linuxserver",
  "bitnami",
  "grafana",
  "homeassistant",
  "pihole",
];

/// Page cap by repository class: official / well-known organizations
/// get 5 pages of 100, everything else 2.
pub fn page_cap(repo: &str) -> usize {
  let namespace = repo.split('/').next().unwrap_or_default();
  if WELL_KNOWN_NAMESPACES.contains(&namespace) {
    5
  } else {
    2
  }
}

const MAX_ATTEMPTS: usize = 3;
const RETRY_BACKOFF: [Duration; 3] = [
  Duration::from_secs(1),
  Duration::from_secs(2),
  Duration::from_secs(4),
];

/// Runs an HTTP call with up to 3 attempts and exponential 1s / 2s /
/// 4s backoff. Only transient network errors retry; HTTP-level
/// failures surface immediately. The cancellation signal preempts
/// any sleep.
pub async fn with_retry<T, F, Fut>(
  cancel: &CancellationToken,
  mut call: F,
) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  for attempt in 0..MAX_ATTEMPTS {
    if cancel.is_cancelled() {
      return Err(RegistryError::Cancelled);
    }
    let err = match call().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_retryable() => e,
      Err(e) => return Err(e),
    };
    if attempt + 1 == MAX_ATTEMPTS {
      return Err(err);
    }
    let backoff = RETRY_BACKOFF[attempt.min(2)];
    tokio::select! {
      _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
      _ = tokio::time::sleep(backoff) => {}
    }
  }
  unreachable!("retry loop always returns")
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  #[test]
  fn page_caps_by_repository_class() {
    assert_eq!(page_cap("library/nginx"), 5);
    assert_eq!(page_cap("linuxserver/qbittorrent"), 5);
    assert_eq!(page_cap("qmcgaw/gluetun"), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn retries_transient_errors_three_times() {
    let attempts = AtomicUsize::new(0);
    let cancel = CancellationToken::new();
    let result: Result<()> = with_retry(&cancel, || {
      attempts.fetch_add(1, Ordering::Relaxed);
      async { Err(RegistryError::Transient("timeout".into())) }
    })
    .await;
    assert!(matches!(result, Err(RegistryError::Transient(_))));
    assert_eq!(attempts.load(Ordering::Relaxed), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn does_not_retry_definitive_errors() {
    let attempts = AtomicUsize::new(0);
    let cancel = CancellationToken::new();
    let result: Result<()> = with_retry(&cancel, || {
      attempts.fetch_add(1, Ordering::Relaxed);
      async { Err(RegistryError::NotFound("no such repo".into())) }
    })
    .await;
    assert!(matches!(result, Err(RegistryError::NotFound(_))));
    assert_eq!(attempts.load(Ordering::Relaxed), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn recovers_after_transient_failure() {
    let attempts = AtomicUsize::new(0);
    let cancel = CancellationToken::new();
    let result = with_retry(&cancel, || {
      let attempt = attempts.fetch_add(1, Ordering::Relaxed);
      async move {
        if attempt < 2 {
          Err(RegistryError::Transient("connection reset".into()))
        } else {
          Ok(42)
        }
      }
    })
    .await;
    assert_eq!(result.unwrap(), 42);
  }

  #[tokio::test]
  async fn cancellation_preempts_backoff() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result: Result<()> = with_retry(&cancel, || async {
      Err(RegistryError::Transient("unreachable".into()))
    })
    .await;
    assert!(matches!(result, Err(RegistryError::Cancelled)));
  }
}
