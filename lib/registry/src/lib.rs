//! # Convoy Registry
//!
//! Registry access for the update checker: one client per registry
//! family (Docker Hub, GHCR, generic V2), a manager that routes by
//! image reference, and the cache / circuit breaker / retry wrapping
//! every call. The rest of the system only talks to
//! [RegistryManager].

use std::{sync::Arc, time::Duration};

use cache::{CircuitBreaker, CircuitState, TimedCache};
use convoy_client::entities::ImageRef;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use versioning::parse_tag;

mod client;
mod creds;
mod error;
mod hub;
mod v2;

pub use client::{RegistryClient, TagDigests, with_retry};
pub use creds::engine_credentials;
pub use error::{RegistryError, Result};
pub use hub::DockerHubClient;
pub use v2::V2Client;

pub const DOCKER_HUB: &str = "docker.io";
pub const GHCR: &str = "ghcr.io";
const HUB_CREDENTIALS_KEY: &str = "https://index.docker.io/v1/";

#[derive(Debug, Clone)]
pub struct RegistryConfig {
  /// Docker Hub credentials for private repos / higher rate limits.
  pub docker_hub_username: Option<String>,
  pub docker_hub_password: Option<String>,
  /// PAT for ghcr.io. Falls back to the engine credentials file.
  pub github_token: Option<String>,
  pub request_timeout: Duration,
  /// Minimum spacing between outbound calls per client.
  pub rate_interval: Duration,
  /// TTL for tag lists and tag-digest maps.
  pub cache_ttl: Duration,
  /// Shorter TTL for single digest lookups: moving tags change.
  pub digest_ttl: Duration,
}

impl Default for RegistryConfig {
  fn default() -> RegistryConfig {
    RegistryConfig {
      docker_hub_username: None,
      docker_hub_password: None,
      github_token: None,
      request_timeout: Duration::from_secs(30),
      rate_interval: Duration::from_millis(100),
      cache_ttl: Duration::from_secs(900),
      digest_ttl: Duration::from_secs(300),
    }
  }
}

/// The single entry point the checker and API use for registry
/// state. Parses the image ref, routes to the right client family,
/// and wraps every call in cache + circuit breaker.
pub struct RegistryManager {
  config: RegistryConfig,
  hub: Arc<DockerHubClient>,
  ghcr: Arc<V2Client>,
  /// Lazily constructed V2 clients for unrecognized registries.
  generic: DashMap<String, Arc<V2Client>>,
  breaker: CircuitBreaker,
  tags_cache: TimedCache<String, Vec<String>>,
  digest_cache: TimedCache<String, String>,
  digest_map_cache: TimedCache<String, TagDigests>,
}

impl RegistryManager {
  pub fn new(config: RegistryConfig) -> RegistryManager {
    let hub_credentials = match (
      &config.docker_hub_username,
      &config.docker_hub_password,
    ) {
      (Some(user), Some(pass)) => {
        Some((user.clone(), pass.clone()))
      }
      _ => engine_credentials(HUB_CREDENTIALS_KEY),
    };
    let ghcr_credentials = config
      .github_token
      .as_ref()
      .map(|token| ("token".to_string(), token.clone()))
      .or_else(|| engine_credentials(GHCR));
    RegistryManager {
      hub: Arc::new(DockerHubClient::new(
        hub_credentials,
        config.request_timeout,
        config.rate_interval,
      )),
      ghcr: Arc::new(V2Client::new(
        GHCR,
        ghcr_credentials,
        config.request_timeout,
        config.rate_interval,
      )),
      generic: DashMap::new(),
      breaker: CircuitBreaker::default(),
      tags_cache: TimedCache::new(config.cache_ttl),
      digest_cache: TimedCache::new(config.digest_ttl),
      digest_map_cache: TimedCache::new(config.cache_ttl),
      config,
    }
  }

  fn client(&self, registry: &str) -> Arc<dyn RegistryClient> {
    match registry {
      DOCKER_HUB => self.hub.clone(),
      GHCR => self.ghcr.clone(),
      other => self
        .generic
        .entry(other.to_string())
        .or_insert_with(|| {
          Arc::new(V2Client::new(
            other,
            engine_credentials(other),
            self.config.request_timeout,
            self.config.rate_interval,
          ))
        })
        .clone(),
    }
  }

  /// Circuit-breaker gate around one registry call.
  async fn guarded<T>(
    &self,
    registry: &str,
    call: impl Future<Output = Result<T>>,
  ) -> Result<T> {
    if !self.breaker.allow(registry) {
      return Err(RegistryError::CircuitOpen(format!(
        "circuit open for {registry}"
      )));
    }
    let result = call.await;
    match &result {
      Err(RegistryError::Cancelled) => {}
      Err(e) if e.counts_against_circuit() => {
        self.breaker.record_failure(registry)
      }
      // A definitive 404 / 401 is a healthy registry answering.
      _ => self.breaker.record_success(registry),
    }
    result
  }

  pub async fn list_tags(
    &self,
    image: &ImageRef,
    cancel: &CancellationToken,
  ) -> Result<Vec<String>> {
    let ImageRef {
      registry,
      repository,
      ..
    } = image;
    let client = self.client(registry);
    self
      .tags_cache
      .get_or_fetch(
        format!("{registry}/{repository}"),
        self.config.cache_ttl,
        |tags| !tags.is_empty(),
        || {
          self.guarded(
            registry,
            client.list_tags(repository, cancel),
          )
        },
      )
      .await
  }

  pub async fn get_tag_digest(
    &self,
    image: &ImageRef,
    tag: &str,
    cancel: &CancellationToken,
  ) -> Result<String> {
    let ImageRef {
      registry,
      repository,
      ..
    } = image;
    let client = self.client(registry);
    self
      .digest_cache
      .get_or_fetch(
        format!("{registry}/{repository}:{tag}"),
        self.config.digest_ttl,
        |digest| !digest.is_empty(),
        || {
          self.guarded(
            registry,
            client.get_tag_digest(repository, tag, cancel),
          )
        },
      )
      .await
  }

  pub async fn list_tags_with_digests(
    &self,
    image: &ImageRef,
    cancel: &CancellationToken,
  ) -> Result<TagDigests> {
    let ImageRef {
      registry,
      repository,
      ..
    } = image;
    let client = self.client(registry);
    self
      .digest_map_cache
      .get_or_fetch(
        format!("{registry}/{repository}"),
        self.config.cache_ttl,
        |map| !map.is_empty(),
        || {
          self.guarded(
            registry,
            client.list_tags_with_digests(repository, cancel),
          )
        },
      )
      .await
  }

  /// The highest released (non-prerelease) version tag the registry
  /// carries, if any. Used to suggest pins for moving tags.
  pub async fn get_latest_tag(
    &self,
    image: &ImageRef,
    cancel: &CancellationToken,
  ) -> Result<Option<String>> {
    let tags = self.list_tags(image, cancel).await?;
    let parsed = tags
      .iter()
      .map(|t| parse_tag(t))
      .filter(|t| {
        matches!(
          t.kind,
          versioning::TagKind::Semver | versioning::TagKind::Calver
        ) && !t.is_prerelease()
          && t.variant.is_none()
      })
      .collect::<Vec<_>>();
    Ok(versioning::select_latest(&parsed).map(|t| t.raw.clone()))
  }

  /// Drops all cached registry state. The next check hits the
  /// registries fresh.
  pub fn clear_cache(&self) {
    self.tags_cache.clear();
    self.digest_cache.clear();
    self.digest_map_cache.clear();
  }

  /// Sweep expired entries out of all three caches.
  pub fn sweep_caches(&self) {
    self.tags_cache.sweep();
    self.digest_cache.sweep();
    self.digest_map_cache.sweep();
  }

  pub fn circuit_state(&self, registry: &str) -> CircuitState {
    self.breaker.state(registry)
  }
}
