//! Label policy resolution. The label set is closed: every key the
//! checker and orchestrator honor is enumerated here, and anything
//! else under the namespace is ignored with a debug log.

use std::collections::HashMap;

use regex::Regex;
use tracing::debug;
use versioning::{CandidateFilter, parse_tag};

/// Per-container policy, read from (namespaced) container labels.
#[derive(Debug, Clone, Default)]
pub struct LabelPolicy {
  pub ignore: bool,
  pub allow_latest: bool,
  pub allow_prerelease: bool,
  pub pre_update_check: Option<String>,
  pub post_update: Option<String>,
  pub restart_after: Vec<String>,
  /// Unset means defer to the stored rollback policy rows.
  pub auto_rollback: Option<bool>,
  pub pin_major: bool,
  pub pin_minor: bool,
  pub tag_regex: Option<String>,
  pub version_min: Option<String>,
  pub version_max: Option<String>,
}

/// `true` / `1` / `yes`, case-insensitive.
fn bool_label(value: &str) -> bool {
  matches!(
    value.trim().to_ascii_lowercase().as_str(),
    "true" | "1" | "yes"
  )
}

pub fn resolve_labels(
  labels: &HashMap<String, String>,
  namespace: &str,
) -> LabelPolicy {
  let prefix = format!("{namespace}.");
  let mut policy = LabelPolicy::default();
  for (key, value) in labels {
    let Some(name) = key.strip_prefix(&prefix) else {
      continue;
    };
    match name.to_ascii_lowercase().as_str() {
      "ignore" => policy.ignore = bool_label(value),
      "allow-latest" => policy.allow_latest = bool_label(value),
      "allow-prerelease" => {
        policy.allow_prerelease = bool_label(value)
      }
      "pre-update-check" => {
        policy.pre_update_check = Some(value.clone())
      }
      "post-update" => policy.post_update = Some(value.clone()),
      "restart-after" => {
        policy.restart_after = value
          .split(',')
          .map(|s| s.trim().to_string())
          .filter(|s| !s.is_empty())
          .collect()
      }
      "auto_rollback" => {
        policy.auto_rollback = Some(bool_label(value))
      }
      "version-pin-major" => policy.pin_major = bool_label(value),
      "version-pin-minor" => policy.pin_minor = bool_label(value),
      "tag-regex" => policy.tag_regex = Some(value.clone()),
      "version-min" => policy.version_min = Some(value.clone()),
      "version-max" => policy.version_max = Some(value.clone()),
      unknown => {
        debug!("ignoring unknown label {prefix}{unknown}");
      }
    }
  }
  policy
}

impl LabelPolicy {
  /// The versioning filter this policy implies. An invalid tag-regex
  /// is a policy error the caller surfaces as a failed check.
  pub fn candidate_filter(
    &self,
  ) -> Result<CandidateFilter, regex::Error> {
    let tag_regex = match &self.tag_regex {
      Some(raw) => Some(Regex::new(raw)?),
      None => None,
    };
    Ok(CandidateFilter {
      allow_prerelease: self.allow_prerelease,
      tag_regex,
      version_min: self
        .version_min
        .as_deref()
        .map(parse_tag),
      version_max: self
        .version_max
        .as_deref()
        .map(parse_tag),
      pin_major: self.pin_major,
      pin_minor: self.pin_minor,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn resolves_known_labels() {
    let labels = labels(&[
      ("convoy.ignore", "TRUE"),
      ("convoy.allow-latest", "yes"),
      ("convoy.version-pin-minor", "1"),
      ("convoy.restart-after", "gluetun, wireguard"),
      ("convoy.pre-update-check", "/scripts/check.sh"),
      ("convoy.tag-regex", "^1\\.25\\."),
      ("com.docker.compose.project", "media"),
    ]);
    let policy = resolve_labels(&labels, "convoy");
    assert!(policy.ignore);
    assert!(policy.allow_latest);
    assert!(policy.pin_minor);
    assert!(!policy.pin_major);
    assert_eq!(policy.restart_after, ["gluetun", "wireguard"]);
    assert_eq!(
      policy.pre_update_check.as_deref(),
      Some("/scripts/check.sh")
    );
    assert!(policy.candidate_filter().is_ok());
  }

  #[test]
  fn falsy_bools_and_unknowns() {
    let labels = labels(&[
      ("convoy.ignore", "no"),
      ("convoy.allow-latest", "0"),
      ("convoy.frobnicate", "true"),
      ("other.ignore", "true"),
    ]);
    let policy = resolve_labels(&labels, "convoy");
    assert!(!policy.ignore);
    assert!(!policy.allow_latest);
  }

  #[test]
  fn invalid_tag_regex_is_an_error() {
    let labels = labels(&[("convoy.tag-regex", "([")]);
    let policy = resolve_labels(&labels, "convoy");
    assert!(policy.candidate_filter().is_err());
  }

  #[test]
  fn auto_rollback_tristate() {
    let policy = resolve_labels(&labels(&[]), "convoy");
    assert_eq!(policy.auto_rollback, None);
    let policy = resolve_labels(
      &labels(&[("convoy.auto_rollback", "true")]),
      "convoy",
    );
    assert_eq!(policy.auto_rollback, Some(true));
  }
}
