//! Distribution-spec (V2) registry client: the
//! `WWW-Authenticate` -> token-service dance, paginated tag listing,
//! and manifest digest resolution. Serves GHCR directly and any
//! unrecognized registry through the generic path.

use std::time::Duration;

use async_trait::async_trait;
use cache::{RateLimiter, TimedCache};
use indexmap::IndexMap;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
  client::{
    PAGE_SIZE, RegistryClient, TagDigests, page_cap, with_retry,
  },
  error::{RegistryError, Result, from_reqwest, from_status},
};

/// Accept header covering manifest lists, OCI indexes and single
/// manifests. The registry answers with whatever it has; the
/// manifest-list digest is what matters for multi-arch images.
const MANIFEST_ACCEPT: &str =
  "application/vnd.docker.distribution.manifest.list.v2+json, \
   application/vnd.oci.image.index.v1+json, \
   application/vnd.docker.distribution.manifest.v2+json, \
   application/vnd.oci.image.manifest.v1+json";

const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);

/// A bearer challenge from a `WWW-Authenticate` header.
#[derive(Debug, PartialEq, Eq)]
pub struct BearerChallenge {
  pub realm: String,
  pub service: Option<String>,
}

/// Parses `Bearer realm="...",service="..."` headers.
pub fn parse_www_authenticate(
  header: &str,
) -> Option<BearerChallenge> {
  let params = header.strip_prefix("Bearer ")?;
  let mut realm = None;
  let mut service = None;
  for param in params.split(',') {
    let (key, value) = param.trim().split_once('=')?;
    let value = value.trim_matches('"');
    match key {
      "realm" => realm = Some(value.to_string()),
      "service" => service = Some(value.to_string()),
      _ => {}
    }
  }
  Some(BearerChallenge {
    realm: realm?,
    service,
  })
}

#[derive(Deserialize)]
struct TokenResponse {
  token: Option<String>,
  access_token: Option<String>,
  expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TagListResponse {
  #[serde(default)]
  tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ManifestIndex {
  #[serde(default)]
  manifests: Vec<ManifestDescriptor>,
}

#[derive(Deserialize)]
struct ManifestDescriptor {
  digest: String,
}

/// Client for one V2 registry host.
pub struct V2Client {
  http: reqwest::Client,
  /// eg `https://ghcr.io`
  base: String,
  registry: String,
  /// (username, password-or-PAT) when configured.
  credentials: Option<(String, String)>,
  /// Bearer tokens cached per repository with their advertised TTL.
  tokens: TimedCache<String, String>,
  limiter: RateLimiter,
}

impl V2Client {
  pub fn new(
    registry: impl Into<String>,
    credentials: Option<(String, String)>,
    request_timeout: Duration,
    rate_interval: Duration,
  ) -> V2Client {
    let registry = registry.into();
    V2Client {
      http: reqwest::Client::builder()
        .timeout(request_timeout)
        .build()
        .expect("failed to build registry http client"),
      base: format!("https://{registry}"),
      registry,
      credentials,
      tokens: TimedCache::new(DEFAULT_TOKEN_TTL),
      limiter: RateLimiter::new(rate_interval),
    }
  }

  /// Resolves a bearer token for `repo`, None when the registry does
  /// not demand auth. Public repos are attempted anonymously first;
  /// configured credentials only come out when the anonymous token
  /// is refused.
  async fn bearer_token(
    &self,
    repo: &str,
    cancel: &CancellationToken,
  ) -> Result<Option<String>> {
    if let Some(token) = self.tokens.get(&repo.to_string()) {
      return Ok(Some(token));
    }
    if !self.limiter.acquire(cancel).await {
      return Err(RegistryError::Cancelled);
    }
    let probe = self
      .http
      .get(format!("{}/v2/", self.base))
      .send()
      .await
      .map_err(from_reqwest)?;
    if probe.status().is_success() {
      return Ok(None);
    }
    if probe.status().as_u16() != 401 {
      return Err(from_status(
        probe.status(),
        format!("unexpected response probing {}", self.registry),
      ));
    }
    let challenge = probe
      .headers()
      .get("www-authenticate")
      .and_then(|h| h.to_str().ok())
      .and_then(parse_www_authenticate)
      .ok_or_else(|| {
        RegistryError::AuthFailed(format!(
          "registry {} sent an unusable auth challenge",
          self.registry
        ))
      })?;

    match self.fetch_token(&challenge, repo, false, cancel).await {
      Ok(token) => Ok(Some(token)),
      Err(RegistryError::AuthFailed(_))
        if self.credentials.is_some() =>
      {
        debug!(
          "anonymous token refused by {}, retrying authenticated",
          self.registry
        );
        self
          .fetch_token(&challenge, repo, true, cancel)
          .await
          .map(Some)
      }
      Err(e) => Err(e),
    }
  }

  async fn fetch_token(
    &self,
    challenge: &BearerChallenge,
    repo: &str,
    authenticated: bool,
    cancel: &CancellationToken,
  ) -> Result<String> {
    if !self.limiter.acquire(cancel).await {
      return Err(RegistryError::Cancelled);
    }
    let mut request = self.http.get(&challenge.realm).query(&[
      ("scope", format!("repository:{repo}:pull")),
    ]);
    if let Some(service) = &challenge.service {
      request = request.query(&[("service", service)]);
    }
    if authenticated {
      let (user, secret) =
        self.credentials.as_ref().ok_or_else(|| {
          RegistryError::AuthFailed(format!(
            "no credentials configured for {}",
            self.registry
          ))
        })?;
      request = request.basic_auth(user, Some(secret));
    }
    let response =
      request.send().await.map_err(from_reqwest)?;
    if !response.status().is_success() {
      return Err(from_status(
        response.status(),
        format!("token exchange with {}", challenge.realm),
      ));
    }
    let body: TokenResponse =
      response.json().await.map_err(from_reqwest)?;
    let token =
      body.token.or(body.access_token).ok_or_else(|| {
        RegistryError::AuthFailed(format!(
          "token service at {} returned no token",
          challenge.realm
        ))
      })?;
    let ttl = body
      .expires_in
      .map(Duration::from_secs)
      .unwrap_or(DEFAULT_TOKEN_TTL);
    self
      .tokens
      .insert_with_ttl(repo.to_string(), token.clone(), ttl);
    Ok(token)
  }

  async fn get_json<T: serde::de::DeserializeOwned>(
    &self,
    url: &str,
    token: Option<&str>,
    cancel: &CancellationToken,
  ) -> Result<T> {
    if !self.limiter.acquire(cancel).await {
      return Err(RegistryError::Cancelled);
    }
    let mut request = self.http.get(url);
    if let Some(token) = token {
      request = request.bearer_auth(token);
    }
    let response =
      request.send().await.map_err(from_reqwest)?;
    if !response.status().is_success() {
      return Err(from_status(response.status(), url));
    }
    response.json().await.map_err(from_reqwest)
  }

  /// Fetches every digest of one tag: the manifest-list digest from
  /// the `Docker-Content-Digest` header first, per-arch digests from
  /// the index body after it.
  async fn manifest_digests(
    &self,
    repo: &str,
    tag: &str,
    token: Option<&str>,
    cancel: &CancellationToken,
  ) -> Result<Vec<String>> {
    if !self.limiter.acquire(cancel).await {
      return Err(RegistryError::Cancelled);
    }
    let url =
      format!("{}/v2/{repo}/manifests/{tag}", self.base);
    let mut request =
      self.http.get(&url).header("Accept", MANIFEST_ACCEPT);
    if let Some(token) = token {
      request = request.bearer_auth(token);
    }
    let response =
      request.send().await.map_err(from_reqwest)?;
    if !response.status().is_success() {
      return Err(from_status(response.status(), &url));
    }
    let mut digests = Vec::new();
    if let Some(digest) = response
      .headers()
      .get("docker-content-digest")
      .and_then(|h| h.to_str().ok())
    {
      digests.push(digest.to_string());
    }
    let index: ManifestIndex =
      response.json().await.unwrap_or(ManifestIndex {
        manifests: Vec::new(),
      });
    for descriptor in index.manifests {
      if !digests.contains(&descriptor.digest) {
        digests.push(descriptor.digest);
      }
    }
    if digests.is_empty() {
      return Err(RegistryError::NotFound(format!(
        "no digest reported for {repo}:{tag}"
      )));
    }
    Ok(digests)
  }

  async fn list_tags_inner(
    &self,
    repo: &str,
    token: Option<&str>,
    cancel: &CancellationToken,
  ) -> Result<Vec<String>> {
    let mut tags: Vec<String> = Vec::new();
    let mut last: Option<String> = None;
    for _ in 0..page_cap(repo) {
      let url = match &last {
        Some(last) => format!(
          "{}/v2/{repo}/tags/list?n={PAGE_SIZE}&last={last}",
          self.base
        ),
        None => format!(
          "{}/v2/{repo}/tags/list?n={PAGE_SIZE}",
          self.base
        ),
      };
      let page: TagListResponse =
        self.get_json(&url, token, cancel).await?;
      let page = page.tags.unwrap_or_default();
      let page_len = page.len();
      last = page.last().cloned();
      tags.extend(page);
      if page_len < PAGE_SIZE {
        break;
      }
    }
    Ok(tags)
  }
}

#[async_trait]
impl RegistryClient for V2Client {
  async fn list_tags(
    &self,
    repo: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<String>> {
    let token = self.bearer_token(repo, cancel).await?;
    with_retry(cancel, || {
      self.list_tags_inner(repo, token.as_deref(), cancel)
    })
    .await
  }

  async fn get_tag_digest(
    &self,
    repo: &str,
    tag: &str,
    cancel: &CancellationToken,
  ) -> Result<String> {
    let token = self.bearer_token(repo, cancel).await?;
    let digests = with_retry(cancel, || {
      self.manifest_digests(repo, tag, token.as_deref(), cancel)
    })
    .await?;
    digests.into_iter().next().ok_or_else(|| {
      RegistryError::NotFound(format!(
        "no digest reported for {repo}:{tag}"
      ))
    })
  }

  async fn list_tags_with_digests(
    &self,
    repo: &str,
    cancel: &CancellationToken,
  ) -> Result<TagDigests> {
    let token = self.bearer_token(repo, cancel).await?;
    let tags = with_retry(cancel, || {
      self.list_tags_inner(repo, token.as_deref(), cancel)
    })
    .await?;
    let mut out = IndexMap::with_capacity(tags.len());
    for tag in tags {
      let digests = match with_retry(cancel, || {
        self.manifest_digests(
          repo,
          &tag,
          token.as_deref(),
          cancel,
        )
      })
      .await
      {
        Ok(digests) => digests,
        // A tag disappearing between listing and resolution is not
        // worth failing the whole map over.
        Err(RegistryError::NotFound(_)) => continue,
        Err(e) => return Err(e),
      };
      out.insert(tag, digests);
    }
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_bearer_challenges() {
    let challenge = parse_www_authenticate(
      "Bearer realm=\"https://ghcr.io/token\",service=\"ghcr.io\",scope=\"repository:owner/repo:pull\"",
    )
    .unwrap();
    assert_eq!(challenge.realm, "https://ghcr.io/token");
    assert_eq!(challenge.service.as_deref(), Some("ghcr.io"));
  }

  #[test]
  fn rejects_non_bearer_challenges() {
    assert!(parse_www_authenticate("Basic realm=\"x\"").is_none());
    assert!(parse_www_authenticate("Bearer service=\"x\"").is_none());
  }
}
