use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CircuitState {
  #[default]
  Closed,
  Open,
  HalfOpen,
}

#[derive(Debug)]
struct Circuit {
  state: CircuitState,
  failures: u32,
  last_failure: Option<Instant>,
  last_state_change: Instant,
}

impl Default for Circuit {
  fn default() -> Circuit {
    Circuit {
      state: CircuitState::Closed,
      failures: 0,
      last_failure: None,
      last_state_change: Instant::now(),
    }
  }
}

/// Per-registry circuit breakers. Consecutive failures open the
/// circuit; after the reset timeout a single probe is let through and
/// its outcome decides whether the circuit closes again.
pub struct CircuitBreaker {
  circuits: DashMap<String, Circuit>,
  failure_threshold: u32,
  reset_timeout: Duration,
}

impl Default for CircuitBreaker {
  fn default() -> CircuitBreaker {
    CircuitBreaker::new(5, Duration::from_secs(30))
  }
}

impl CircuitBreaker {
  pub fn new(
    failure_threshold: u32,
    reset_timeout: Duration,
  ) -> CircuitBreaker {
    CircuitBreaker {
      circuits: DashMap::new(),
      failure_threshold,
      reset_timeout,
    }
  }

  /// Atomically decides whether a call to `registry` may proceed.
  /// The open -> half_open transition happens here, granting exactly
  /// one probe; all other callers reject fast until the probe result
  /// is recorded.
  pub fn allow(&self, registry: &str) -> bool {
    let mut circuit = self
      .circuits
      .entry(registry.to_string())
      .or_default();
    match circuit.state {
      CircuitState::Closed => true,
      CircuitState::Open => {
        if circuit.last_state_change.elapsed() >= self.reset_timeout
        {
          circuit.state = CircuitState::HalfOpen;
          circuit.last_state_change = Instant::now();
          true
        } else {
          false
        }
      }
      CircuitState::HalfOpen => false,
    }
  }

  pub fn record_success(&self, registry: &str) {
    let mut circuit = self
      .circuits
      .entry(registry.to_string())
      .or_default();
    if circuit.state != CircuitState::Closed {
      circuit.last_state_change = Instant::now();
    }
    circuit.state = CircuitState::Closed;
    circuit.failures = 0;
  }

  pub fn record_failure(&self, registry: &str) {
    let mut circuit = self
      .circuits
      .entry(registry.to_string())
      .or_default();
    circuit.last_failure = Some(Instant::now());
    match circuit.state {
      CircuitState::HalfOpen => {
        // Failed probe reopens immediately.
        circuit.state = CircuitState::Open;
        circuit.last_state_change = Instant::now();
      }
      CircuitState::Closed => {
        circuit.failures += 1;
        if circuit.failures >= self.failure_threshold {
          circuit.state = CircuitState::Open;
          circuit.last_state_change = Instant::now();
        }
      }
      CircuitState::Open => {}
    }
  }

  pub fn state(&self, registry: &str) -> CircuitState {
    self
      .circuits
      .get(registry)
      .map(|c| c.state)
      .unwrap_or_default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn trips_after_threshold_and_recovers() {
    let breaker = CircuitBreaker::default();

    for _ in 0..5 {
      assert!(breaker.allow("ghcr.io"));
      breaker.record_failure("ghcr.io");
    }
    assert_eq!(breaker.state("ghcr.io"), CircuitState::Open);
    // The 6th call rejects without a network attempt.
    assert!(!breaker.allow("ghcr.io"));

    tokio::time::advance(Duration::from_secs(30)).await;

    // Exactly one probe after the reset timeout.
    assert!(breaker.allow("ghcr.io"));
    assert!(!breaker.allow("ghcr.io"));

    breaker.record_success("ghcr.io");
    assert_eq!(breaker.state("ghcr.io"), CircuitState::Closed);
    for _ in 0..10 {
      assert!(breaker.allow("ghcr.io"));
      breaker.record_success("ghcr.io");
    }
  }

  #[tokio::test(start_paused = true)]
  async fn failed_probe_reopens() {
    let breaker =
      CircuitBreaker::new(2, Duration::from_secs(30));
    for _ in 0..2 {
      breaker.record_failure("docker.io");
    }
    assert_eq!(breaker.state("docker.io"), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(breaker.allow("docker.io"));
    breaker.record_failure("docker.io");
    assert_eq!(breaker.state("docker.io"), CircuitState::Open);
    assert!(!breaker.allow("docker.io"));
  }

  #[tokio::test(start_paused = true)]
  async fn registries_are_independent() {
    let breaker = CircuitBreaker::default();
    for _ in 0..5 {
      breaker.record_failure("docker.io");
    }
    assert!(!breaker.allow("docker.io"));
    assert!(breaker.allow("ghcr.io"));
  }
}
