//! Reads registry credentials from the conventional engine
//! credentials file (`~/.docker/config.json`). Used as the fallback
//! when no token is supplied through config.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;

#[derive(Deserialize)]
struct DockerConfig {
  #[serde(default)]
  auths: HashMap<String, DockerAuth>,
}

#[derive(Deserialize)]
struct DockerAuth {
  auth: Option<String>,
}

/// Looks up `registry` in the engine credentials file.
/// Returns (username, secret).
pub fn engine_credentials(
  registry: &str,
) -> Option<(String, String)> {
  let path = dirs::home_dir()?.join(".docker/config.json");
  let raw = std::fs::read_to_string(path).ok()?;
  credentials_from_config(&raw, registry)
}

fn credentials_from_config(
  raw: &str,
  registry: &str,
) -> Option<(String, String)> {
  let config: DockerConfig = serde_json::from_str(raw).ok()?;
  let entry = config
    .auths
    .get(registry)
    .or_else(|| {
      config.auths.get(&format!("https://{registry}"))
    })?;
  parse_auth_entry(entry.auth.as_deref()?)
}

fn parse_auth_entry(auth: &str) -> Option<(String, String)> {
  let decoded = STANDARD.decode(auth).ok()?;
  let decoded = String::from_utf8(decoded).ok()?;
  let (user, secret) = decoded.split_once(':')?;
  if user.is_empty() || secret.is_empty() {
    return None;
  }
  Some((user.to_string(), secret.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reads_auth_entries() {
    // octocat:ghp_token123
    let raw = r#"{
      "auths": {
        "ghcr.io": { "auth": "b2N0b2NhdDpnaHBfdG9rZW4xMjM=" }
      }
    }"#;
    let (user, secret) =
      credentials_from_config(raw, "ghcr.io").unwrap();
    assert_eq!(user, "octocat");
    assert_eq!(secret, "ghp_token123");
  }

  #[test]
  fn missing_registry_is_none() {
    let raw = r#"{ "auths": {} }"#;
    assert!(credentials_from_config(raw, "ghcr.io").is_none());
  }

  #[test]
  fn garbage_auth_is_none() {
    assert!(parse_auth_entry("not-base64!!!").is_none());
    assert!(parse_auth_entry("bm9jb2xvbg==").is_none()); // "nocolon"
  }
}
