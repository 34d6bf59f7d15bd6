//! Docker Hub client. The hub's repository API returns tags together
//! with their digests (manifest-list digest at the top level,
//! per-architecture digests nested), which keeps tag-with-digest
//! listing to one request per page. Private repos go through the
//! hub's token exchange with config-supplied credentials.

use std::time::Duration;

use async_trait::async_trait;
use cache::{RateLimiter, TimedCache};
use indexmap::IndexMap;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
  client::{
    PAGE_SIZE, RegistryClient, TagDigests, page_cap, with_retry,
  },
  error::{RegistryError, Result, from_reqwest, from_status},
};

const HUB_API: &str = "https://hub.docker.com/v2";
const LOGIN_TOKEN_TTL: Duration = Duration::from_secs(300);

#[derive(Deserialize)]
struct LoginResponse {
  token: String,
}

#[derive(Deserialize)]
struct TagPage {
  #[serde(default)]
  results: Vec<TagResult>,
}

#[derive(Deserialize)]
struct TagResult {
  name: String,
  /// Manifest-list digest for multi-arch tags.
  digest: Option<String>,
  #[serde(default)]
  images: Vec<ArchImage>,
}

#[derive(Deserialize)]
struct ArchImage {
  digest: Option<String>,
}

impl TagResult {
  /// Manifest-list digest first, per-arch digests after. Container
  /// daemons report the list digest in RepoDigests, so reverse
  /// lookups depend on that ordering.
  fn digests(self) -> (String, Vec<String>) {
    let mut digests = Vec::with_capacity(self.images.len() + 1);
    if let Some(digest) = self.digest {
      digests.push(digest);
    }
    for image in self.images {
      if let Some(digest) = image.digest
        && !digest.is_empty()
        && !digests.contains(&digest)
      {
        digests.push(digest);
      }
    }
    (self.name, digests)
  }
}

pub struct DockerHubClient {
  http: reqwest::Client,
  credentials: Option<(String, String)>,
  /// The hub login JWT, shared across repos.
  login_token: TimedCache<(), String>,
  limiter: RateLimiter,
}

impl DockerHubClient {
  pub fn new(
    credentials: Option<(String, String)>,
    request_timeout: Duration,
    rate_interval: Duration,
  ) -> DockerHubClient {
    DockerHubClient {
      http: reqwest::Client::builder()
        .timeout(request_timeout)
        .build()
        .expect("failed to build registry http client"),
      credentials,
      login_token: TimedCache::new(LOGIN_TOKEN_TTL),
      limiter: RateLimiter::new(rate_interval),
    }
  }

  /// Anonymous for public repos; the token exchange only runs when
  /// credentials are configured.
  async fn auth_token(
    &self,
    cancel: &CancellationToken,
  ) -> Result<Option<String>> {
    let Some((username, password)) = &self.credentials else {
      return Ok(None);
    };
    if let Some(token) = self.login_token.get(&()) {
      return Ok(Some(token));
    }
    if !self.limiter.acquire(cancel).await {
      return Err(RegistryError::Cancelled);
    }
    let response = self
      .http
      .post(format!("{HUB_API}/users/login"))
      .json(&serde_json::json!({
        "username": username,
        "password": password,
      }))
      .send()
      .await
      .map_err(from_reqwest)?;
    if !response.status().is_success() {
      return Err(from_status(
        response.status(),
        "docker hub login",
      ));
    }
    let body: LoginResponse =
      response.json().await.map_err(from_reqwest)?;
    self.login_token.insert((), body.token.clone());
    Ok(Some(body.token))
  }

  async fn get_json<T: serde::de::DeserializeOwned>(
    &self,
    url: &str,
    cancel: &CancellationToken,
  ) -> Result<T> {
    let token = self.auth_token(cancel).await?;
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

  async fn fetch_pages(
    &self,
    repo: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<TagResult>> {
    let mut results = Vec::new();
    for page in 1..=page_cap(repo) {
      let url = format!(
        "{HUB_API}/repositories/{repo}/tags\
         ?page_size={PAGE_SIZE}&page={page}"
      );
      let body: TagPage = self.get_json(&url, cancel).await?;
      let page_len = body.results.len();
      results.extend(body.results);
      if page_len < PAGE_SIZE {
        break;
      }
    }
    Ok(results)
  }
}

#[async_trait]
impl RegistryClient for DockerHubClient {
  async fn list_tags(
    &self,
    repo: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<String>> {
    let results = with_retry(cancel, || {
      self.fetch_pages(repo, cancel)
    })
    .await?;
    Ok(results.into_iter().map(|r| r.name).collect())
  }

  async fn get_tag_digest(
    &self,
    repo: &str,
    tag: &str,
    cancel: &CancellationToken,
  ) -> Result<String> {
    let url = format!("{HUB_API}/repositories/{repo}/tags/{tag}");
    let result: TagResult = with_retry(cancel, || {
      self.get_json(&url, cancel)
    })
    .await?;
    let (name, digests) = result.digests();
    digests.into_iter().next().ok_or_else(|| {
      RegistryError::NotFound(format!(
        "docker hub reports no digest for {repo}:{name}"
      ))
    })
  }

  async fn list_tags_with_digests(
    &self,
    repo: &str,
    cancel: &CancellationToken,
  ) -> Result<TagDigests> {
    let results = with_retry(cancel, || {
      self.fetch_pages(repo, cancel)
    })
    .await?;
    let mut out = IndexMap::with_capacity(results.len());
    for result in results {
      let (name, digests) = result.digests();
      if !digests.is_empty() {
        out.insert(name, digests);
      }
    }
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn manifest_list_digest_comes_first() {
    let result = TagResult {
      name: "1.25.3".to_string(),
      digest: Some("sha256:list".to_string()),
      images: vec![
        ArchImage {
          digest: Some("sha256:amd64".to_string()),
        },
        ArchImage {
          digest: Some("sha256:arm64".to_string()),
        },
        ArchImage {
          digest: Some("sha256:list".to_string()),
        },
      ],
    };
    let (name, digests) = result.digests();
    assert_eq!(name, "1.25.3");
    assert_eq!(
      digests,
      ["sha256:list", "sha256:amd64", "sha256:arm64"]
    );
  }

  #[test]
  fn tags_without_digests_survive_as_empty() {
    let result = TagResult {
      name: "weird".to_string(),
      digest: None,
      images: vec![ArchImage { digest: None }],
    };
    let (_, digests) = result.digests();
    assert!(digests.is_empty());
  }
}
