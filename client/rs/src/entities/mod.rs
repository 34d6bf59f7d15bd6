use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Subtypes of [UpdateDecision][check::UpdateDecision].
pub mod check;
/// Subtypes of [Event][event::Event].
pub mod event;
/// Subtypes of [LogConfig][logger::LogConfig].
pub mod logger;
/// Subtypes of [UpdateOperation][operation::UpdateOperation].
pub mod operation;
/// Subtypes of [UpdatePlan][plan::UpdatePlan].
pub mod plan;

/// Unix time in milliseconds.
pub fn convoy_timestamp() -> i64 {
  chrono::Utc::now().timestamp_millis()
}

/// Compact `YYYYMMDDHHMMSS` stamp used in operation ids and backup
/// file names.
pub fn compact_timestamp() -> String {
  chrono::Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// A fully qualified image reference.
#[derive(
  Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct ImageRef {
  /// Registry host. `docker.io` when the reference carries none.
  pub registry: String,
  /// Namespaced repository. Single-word hub names get the `library/`
  /// prefix synthesized.
  pub repository: String,
  /// May be empty when the reference pins a digest only.
  pub tag: String,
  pub digest: Option<String>,
}

pub const DOCKER_HUB_REGISTRY: &str = "docker.io";

impl ImageRef {
  /// Parses `[registry/][namespace/]repo[:tag][@sha256:...]`.
  pub fn parse(reference: &str) -> ImageRef {
    let reference = reference.trim();

    let (rest, digest) = match reference.rsplit_once('@') {
      Some((rest, digest)) if digest.starts_with("sha256:") => {
        (rest, Some(digest.to_string()))
      }
      _ => (reference, None),
    };

    let (rest, tag) = match rest.rsplit_once(':') {
      // A colon inside the registry host (port) is not a tag split.
      Some((body, candidate)) if !candidate.contains('/') => {
        (body, candidate.to_string())
      }
      _ => (rest, String::new()),
    };

    let (registry, repository) = match rest.split_once('/') {
      Some((host, path))
        if host.contains('.')
          || host.contains(':')
          || host == "localhost" =>
      {
        (host.to_string(), path.to_string())
      }
      Some(_) => (DOCKER_HUB_REGISTRY.to_string(), rest.to_string()),
      None => (
        DOCKER_HUB_REGISTRY.to_string(),
        format!("library/{rest}"),
      ),
    };

    ImageRef {
      registry,
      repository,
      tag,
      digest,
    }
  }

  /// Same reference with a different tag (digest cleared).
  pub fn with_tag(&self, tag: impl Into<String>) -> ImageRef {
    ImageRef {
      registry: self.registry.clone(),
      repository: self.repository.clone(),
      tag: tag.into(),
      digest: None,
    }
  }

  /// Whether this reference resolves to a reachable registry at all.
  /// Compose `build:` services surface with an empty repository.
  pub fn has_registry(&self) -> bool {
    !self.repository.is_empty()
  }
}

impl std::fmt::Display for ImageRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if self.registry != DOCKER_HUB_REGISTRY {
      write!(f, "{}/", self.registry)?;
    }
    let repository = if self.registry == DOCKER_HUB_REGISTRY {
      self
        .repository
        .strip_prefix("library/")
        .unwrap_or(&self.repository)
    } else {
      &self.repository
    };
    f.write_str(repository)?;
    if !self.tag.is_empty() {
      write!(f, ":{}", self.tag)?;
    }
    if let Some(digest) = &self.digest {
      write!(f, "@{digest}")?;
    }
    Ok(())
  }
}

/// Everything discovery knows about one running unit.
/// Recomputed on every discovery pass, never long-lived truth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
  pub name: String,
  /// Compose project name, when the container came up via compose.
  pub stack: Option<String>,
  /// Absolute path of the compose file declaring this service.
  pub compose_file: Option<String>,
  pub service_name: Option<String>,
  pub image: ImageRef,
  /// Digest the engine reports for the running image (RepoDigests).
  pub current_digest: Option<String>,
  /// Engine labels merged with stored label overrides.
  pub labels: HashMap<String, String>,
  pub has_healthcheck: bool,
  #[serde(default)]
  pub restart_policy: String,
  /// Engine-reported state string (`running`, `exited`, ...).
  #[serde(default)]
  pub state: String,
  /// The image reference the compose file currently specifies for
  /// this service (interpolation resolved where possible).
  pub compose_image: Option<String>,
  /// Set when the compose image line interpolates an env var.
  pub env_var_name: Option<String>,
  /// The fallback literal inside that interpolation, if any.
  pub compose_default: Option<String>,
}

/// A stage-tagged shell command result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandLog {
  pub stage: String,
  pub command: String,
  pub stdout: String,
  pub stderr: String,
  pub success: bool,
  pub start_ts: i64,
  pub end_ts: i64,
}

impl CommandLog {
  pub fn simple(
    stage: impl Into<String>,
    message: impl Into<String>,
  ) -> CommandLog {
    let ts = convoy_timestamp();
    CommandLog {
      stage: stage.into(),
      stdout: message.into(),
      success: true,
      start_ts: ts,
      end_ts: ts,
      ..Default::default()
    }
  }

  pub fn error(
    stage: impl Into<String>,
    message: impl Into<String>,
  ) -> CommandLog {
    let ts = convoy_timestamp();
    CommandLog {
      stage: stage.into(),
      stderr: message.into(),
      success: false,
      start_ts: ts,
      end_ts: ts,
      ..Default::default()
    }
  }

  /// Combined stdout / stderr, trimmed and truncated for storage in
  /// decision / operation records.
  pub fn combined_output(&self, max_len: usize) -> String {
    let mut out = self.stdout.trim().to_string();
    let stderr = self.stderr.trim();
    if !stderr.is_empty() {
      if !out.is_empty() {
        out.push('\n');
      }
      out.push_str(stderr);
    }
    if out.len() > max_len {
      let mut cut = max_len;
      while !out.is_char_boundary(cut) {
        cut -= 1;
      }
      out.truncate(cut);
      out.push_str("...");
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_bare_hub_image() {
    let image = ImageRef::parse("nginx");
    assert_eq!(image.registry, "docker.io");
    assert_eq!(image.repository, "library/nginx");
    assert_eq!(image.tag, "");
    assert_eq!(image.to_string(), "nginx");
  }

  #[test]
  fn parses_hub_org_image() {
    let image = ImageRef::parse("qmcgaw/gluetun:latest");
    assert_eq!(image.registry, "docker.io");
    assert_eq!(image.repository, "qmcgaw/gluetun");
    assert_eq!(image.tag, "latest");
  }

  #[test]
  fn parses_other_registry_with_port() {
    let image = ImageRef::parse("registry.local:5000/team/app:1.2.3");
    assert_eq!(image.registry, "registry.local:5000");
    assert_eq!(image.repository, "team/app");
    assert_eq!(image.tag, "1.2.3");
    assert_eq!(
      image.to_string(),
      "registry.local:5000/team/app:1.2.3"
    );
  }

  #[test]
  fn parses_digest_reference() {
    let image = ImageRef::parse(
      "ghcr.io/owner/repo:v2@sha256:0123456789abcdef",
    );
    assert_eq!(image.registry, "ghcr.io");
    assert_eq!(image.repository, "owner/repo");
    assert_eq!(image.tag, "v2");
    assert_eq!(
      image.digest.as_deref(),
      Some("sha256:0123456789abcdef")
    );
  }

  #[test]
  fn with_tag_clears_digest() {
    let image = ImageRef::parse("nginx:1.25.0@sha256:abc123def456");
    let next = image.with_tag("1.25.3");
    assert_eq!(next.tag, "1.25.3");
    assert_eq!(next.digest, None);
    assert_eq!(next.to_string(), "nginx:1.25.3");
  }
}
