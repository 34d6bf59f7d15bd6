use std::time::Duration;

use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;

/// A shared ticker all of one client's outbound calls wait on,
/// spacing them at least `min_interval` apart.
pub struct RateLimiter {
  min_interval: Duration,
  next_slot: Mutex<Instant>,
}

impl RateLimiter {
  pub fn new(min_interval: Duration) -> RateLimiter {
    RateLimiter {
      min_interval,
      next_slot: Mutex::new(Instant::now()),
    }
  }

  /// Waits for this caller's slot. Returns false when cancelled
  /// before the slot arrived.
  pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
    let slot = {
      let mut next = self.next_slot.lock().await;
      let now = Instant::now();
      let slot = (*next).max(now);
      *next = slot + self.min_interval;
      slot
    };
    tokio::select! {
      _ = cancel.cancelled() => false,
      _ = tokio::time::sleep_until(slot) => true,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn spaces_out_calls() {
    let limiter = RateLimiter::new(Duration::from_millis(100));
    let cancel = CancellationToken::new();

    let start = Instant::now();
    assert!(limiter.acquire(&cancel).await);
    assert!(limiter.acquire(&cancel).await);
    assert!(limiter.acquire(&cancel).await);
    // Third call lands at least two intervals after the first.
    assert!(start.elapsed() >= Duration::from_millis(200));
  }

  #[tokio::test(start_paused = true)]
  async fn cancellation_preempts_the_wait() {
    let limiter = RateLimiter::new(Duration::from_millis(100));
    let cancel = CancellationToken::new();
    assert!(limiter.acquire(&cancel).await);
    cancel.cancel();
    assert!(!limiter.acquire(&cancel).await);
  }
}
