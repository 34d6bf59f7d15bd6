//! # Convoy Rewrite
//!
//! Textual compose-file surgery. Convoy never parses compose YAML
//! into a model: it finds the single image line of one service and
//! replaces the reference in place, so comments, formatting, anchors
//! and unknown fields all survive untouched. File writes go through
//! temp-file + rename, and pre-mutation backups use the
//! `<file>.backup.YYYYMMDDHHMMSS` convention.

use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};

mod scan;

pub use scan::{EnvInterpolation, ImageLine, find_service_image};

/// Replaces the image reference of `service` with `new_image`,
/// returning the rewritten document. The byte diff is confined to the
/// image value region; when the value interpolates an env var with a
/// default, only the default inside the interpolation changes.
pub fn rewrite_image(
  text: &str,
  service: &str,
  new_image: &str,
) -> anyhow::Result<String> {
  let line = find_service_image(text, service).with_context(|| {
    format!("no image line found for service '{service}'")
  })?;

  let (start, end) = match &line.env_var {
    Some(interp) => match interp.default_span {
      Some((start, end)) => (start, end),
      None => {
        // Pure `${VAR}` interpolation: the compose file has nothing
        // to rewrite, the env file carries the version.
        return Ok(text.to_string());
      }
    },
    None => (line.value_start, line.value_end),
  };

  let mut out = String::with_capacity(
    text.len() + new_image.len(),
  );
  out.push_str(&text[..start]);
  out.push_str(new_image);
  out.push_str(&text[end..]);
  Ok(out)
}

/// Sets `var=value` in env-file text, replacing an existing
/// assignment in place or appending one.
pub fn rewrite_env_var(
  text: &str,
  var: &str,
  value: &str,
) -> String {
  let mut out = String::with_capacity(text.len() + value.len());
  let mut replaced = false;
  for line in text.split_inclusive('\n') {
    let trimmed = line.trim_start();
    let is_assignment = !trimmed.starts_with('#')
      && trimmed
        .split_once('=')
        .is_some_and(|(key, _)| key.trim() == var);
    if is_assignment && !replaced {
      let newline = if line.ends_with('\n') { "\n" } else { "" };
      out.push_str(&format!("{var}={value}{newline}"));
      replaced = true;
    } else {
      out.push_str(line);
    }
  }
  if !replaced {
    if !out.is_empty() && !out.ends_with('\n') {
      out.push('\n');
    }
    out.push_str(&format!("{var}={value}\n"));
  }
  out
}

/// Reads the current value of `var` from env-file text.
pub fn env_var_value(text: &str, var: &str) -> Option<String> {
  for line in text.lines() {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
      continue;
    }
    if let Some((key, value)) = trimmed.split_once('=')
      && key.trim() == var
    {
      return Some(value.trim().to_string());
    }
  }
  None
}

/// Writes via a temp file in the same directory followed by rename,
/// so an interrupted write never leaves a truncated file behind.
pub async fn write_atomic(
  path: &Path,
  contents: &str,
) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow!("path has no parent: {path:?}"))?;
  let file_name = path
    .file_name()
    .and_then(|n| n.to_str())
    .ok_or_else(|| anyhow!("path has no file name: {path:?}"))?;
  let tmp = parent.join(format!(".{file_name}.tmp"));
  tokio::fs::write(&tmp, contents)
    .await
    .with_context(|| format!("failed to write temp file {tmp:?}"))?;
  tokio::fs::rename(&tmp, path)
    .await
    .with_context(|| {
      format!("failed to move temp file into place at {path:?}")
    })?;
  Ok(())
}

/// The backup path for a file at a given compact timestamp.
pub fn backup_path(path: &Path, stamp: &str) -> PathBuf {
  let mut name = path.as_os_str().to_os_string();
  name.push(format!(".backup.{stamp}"));
  PathBuf::from(name)
}

/// Copies `path` to its `.backup.<stamp>` sibling and returns the
/// backup path. Backups are plain copies: the original must remain
/// untouched until the rewrite stage.
pub async fn create_backup(
  path: &Path,
  stamp: &str,
) -> anyhow::Result<PathBuf> {
  let backup = backup_path(path, stamp);
  tokio::fs::copy(path, &backup).await.with_context(|| {
    format!("failed to back up {path:?} to {backup:?}")
  })?;
  Ok(backup)
}

/// Restores a backup over the original, atomically.
pub async fn restore_backup(
  backup: &Path,
  original: &Path,
) -> anyhow::Result<()> {
  let contents = tokio::fs::read_to_string(backup)
    .await
    .with_context(|| {
      format!("failed to read backup file {backup:?}")
    })?;
  write_atomic(original, &contents).await
}

#[cfg(test)]
mod tests {
  use super::*;

  const COMPOSE: &str = "\
# media stack
services:
  nginx:
    image: nginx:1.25.0  # pinned
    restart: unless-stopped
  qbittorrent:
    image: 'lscr.io/linuxserver/qbittorrent:4.6.2'
    labels:
      - convoy.restart-after=gluetun
";

  #[test]
  fn rewrites_only_the_image_value() {
    let out =
      rewrite_image(COMPOSE, "nginx", "nginx:1.25.3").unwrap();
    assert!(out.contains("image: nginx:1.25.3  # pinned"));
    // Everything else byte-identical.
    assert_eq!(
      out.replace("nginx:1.25.3", "nginx:1.25.0"),
      COMPOSE
    );
    // Re-extraction yields the new reference.
    let line = find_service_image(&out, "nginx").unwrap();
    assert_eq!(line.value, "nginx:1.25.3");
  }

  #[test]
  fn diff_is_one_contiguous_region() {
    let out =
      rewrite_image(COMPOSE, "nginx", "nginx:1.25.3").unwrap();
    let old = COMPOSE.as_bytes();
    let new = out.as_bytes();
    let prefix = old
      .iter()
      .zip(new.iter())
      .take_while(|(a, b)| a == b)
      .count();
    let suffix = old
      .iter()
      .rev()
      .zip(new.iter().rev())
      .take_while(|(a, b)| a == b)
      .count();
    assert!(prefix + suffix >= old.len().min(new.len()) - 7);
  }

  #[test]
  fn preserves_quotes() {
    let out = rewrite_image(
      COMPOSE,
      "qbittorrent",
      "lscr.io/linuxserver/qbittorrent:4.6.3",
    )
    .unwrap();
    assert!(out.contains(
      "image: 'lscr.io/linuxserver/qbittorrent:4.6.3'"
    ));
  }

  #[test]
  fn unknown_service_errors() {
    assert!(rewrite_image(COMPOSE, "gluetun", "x:1").is_err());
  }

  #[test]
  fn rewrites_interpolation_default() {
    let compose = "\
services:
  app:
    image: ${APP_IMAGE:-ghcr.io/acme/app:1.2.0}
";
    let out = rewrite_image(
      compose,
      "app",
      "ghcr.io/acme/app:1.3.0",
    )
    .unwrap();
    assert!(
      out.contains("image: ${APP_IMAGE:-ghcr.io/acme/app:1.3.0}")
    );
  }

  #[test]
  fn bare_interpolation_left_alone() {
    let compose = "\
services:
  app:
    image: ${APP_IMAGE}
";
    let out =
      rewrite_image(compose, "app", "ghcr.io/acme/app:1.3.0")
        .unwrap();
    assert_eq!(out, compose);
  }

  #[test]
  fn env_var_rewrite_replaces_in_place() {
    let env = "# versions\nAPP_IMAGE=ghcr.io/acme/app:1.2.0\nOTHER=1\n";
    let out =
      rewrite_env_var(env, "APP_IMAGE", "ghcr.io/acme/app:1.3.0");
    assert_eq!(
      out,
      "# versions\nAPP_IMAGE=ghcr.io/acme/app:1.3.0\nOTHER=1\n"
    );
  }

  #[test]
  fn env_var_rewrite_appends_when_missing() {
    let out = rewrite_env_var("OTHER=1", "APP_IMAGE", "x:2");
    assert_eq!(out, "OTHER=1\nAPP_IMAGE=x:2\n");
  }

  #[tokio::test]
  async fn backup_and_restore_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let compose = dir.path().join("compose.yaml");
    tokio::fs::write(&compose, COMPOSE).await.unwrap();

    let backup =
      create_backup(&compose, "20240101120000").await.unwrap();
    assert!(
      backup
        .to_string_lossy()
        .ends_with("compose.yaml.backup.20240101120000")
    );

    let rewritten =
      rewrite_image(COMPOSE, "nginx", "nginx:1.25.3").unwrap();
    write_atomic(&compose, &rewritten).await.unwrap();
    assert_ne!(
      tokio::fs::read_to_string(&compose).await.unwrap(),
      COMPOSE
    );

    restore_backup(&backup, &compose).await.unwrap();
    assert_eq!(
      tokio::fs::read_to_string(&compose).await.unwrap(),
      COMPOSE
    );
  }
}
