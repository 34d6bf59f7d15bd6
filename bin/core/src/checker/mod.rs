//! The per-container update checker: combines registry state, the
//! version model and label policy into one [UpdateDecision]. Errors
//! are captured into the decision, never propagated out of a batch
//! check.

use convoy_client::entities::{
  ContainerInfo,
  check::{
    CheckedContainer, DiscoveryResult, UpdateDecision, UpdateStatus,
  },
  event::Event,
};
use registry::{RegistryError, TagDigests};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use versioning::{
  CandidateFilter, ParsedTag, TagKind, change_type, compare_tags,
  filter_candidates, parse_tag, select_latest,
};

use crate::{
  config::core_config,
  state::{event_bus, registry_manager},
};

pub mod policy;

use policy::{LabelPolicy, resolve_labels};

/// Checks every discovered container, emitting `check.progress`
/// along the way.
pub async fn check_all(
  containers: Vec<ContainerInfo>,
  cancel: &CancellationToken,
) -> DiscoveryResult {
  let total = containers.len();
  let mut checked = Vec::with_capacity(total);
  let mut updates_found = 0;
  for (index, container) in containers.into_iter().enumerate() {
    let decision = check_container(&container, cancel).await;
    if matches!(
      decision.status,
      UpdateStatus::UpdateAvailable
        | UpdateStatus::UpdateAvailableBlocked
    ) {
      updates_found += 1;
    }
    event_bus()
      .publish(Event::CheckProgress {
        checked: index + 1,
        total,
        updates_found,
      })
      .await;
    checked.push(CheckedContainer {
      container,
      decision,
    });
  }
  DiscoveryResult::new(checked)
}

pub async fn check_container(
  info: &ContainerInfo,
  cancel: &CancellationToken,
) -> UpdateDecision {
  let policy =
    resolve_labels(&info.labels, &core_config().label_namespace);
  if policy.ignore {
    return UpdateDecision::ignored();
  }

  if !info.image.has_registry() || info.current_digest.is_none() {
    // Locally built images never show up with RepoDigests.
    return UpdateDecision {
      status: UpdateStatus::LocalImage,
      reason: Some(format!(
        "image {} has no registry-reported digest",
        info.image
      )),
      ..Default::default()
    };
  }

  if let Some(mismatch) = compose_mismatch(info) {
    return mismatch;
  }

  let filter = match policy.candidate_filter() {
    Ok(filter) => filter,
    Err(e) => {
      return UpdateDecision::failed(format!(
        "invalid tag-regex label: {e}"
      ));
    }
  };

  let current_tag = parse_tag(&info.image.tag);
  let result = if current_tag.kind == TagKind::Moving {
    check_moving(info, &policy, cancel).await
  } else {
    check_versioned(info, &current_tag, &filter, cancel).await
  };
  let mut decision = match result {
    Ok(decision) => decision,
    Err(e) => return decision_from_registry_error(e),
  };

  if decision.status == UpdateStatus::UpdateAvailable
    && let Some(script) = &policy.pre_update_check
    && let Err(output) =
      run_pre_update_check(&info.name, script).await
  {
    decision.status = UpdateStatus::UpdateAvailableBlocked;
    decision.pre_update_check_fail = Some(output);
  }
  decision
}

/// Runs the configured external check with the container name in its
/// environment. A non-zero exit blocks the update; the combined
/// output (truncated) becomes the block reason.
pub async fn run_pre_update_check(
  container: &str,
  script: &str,
) -> Result<(), String> {
  let log = command::run_convoy_command_with_env(
    "Pre Update Check",
    None,
    script,
    &[("CONTAINER_NAME", container)],
    core_config().script_timeout,
  )
  .await;
  if log.success {
    Ok(())
  } else {
    Err(log.combined_output(500))
  }
}

fn compose_mismatch(
  info: &ContainerInfo,
) -> Option<UpdateDecision> {
  let compose_image = info.compose_image.as_deref()?;
  let compose_ref =
    convoy_client::entities::ImageRef::parse(compose_image);
  let mismatch = compose_ref.repository != info.image.repository
    || (!compose_ref.tag.is_empty()
      && compose_ref.tag != info.image.tag);
  if !mismatch {
    return None;
  }
  // Versions are bare tags: latest_version feeds straight into the
  // orchestrator's target resolution, where a full reference would
  // be glued onto the repository again.
  let target_tag = if compose_ref.tag.is_empty() {
    info.image.tag.clone()
  } else {
    compose_ref.tag.clone()
  };
  Some(UpdateDecision {
    status: UpdateStatus::ComposeMismatch,
    current_version: Some(info.image.tag.clone()),
    latest_version: Some(target_tag),
    reason: Some(format!(
      "compose file specifies {compose_ref} but {} is running",
      info.image
    )),
    ..Default::default()
  })
}

/// Moving tags compare by digest. Stale digest means an update of
/// unknown change type; a matching digest is up to date, with a pin
/// suggestion unless allow-latest is set.
async fn check_moving(
  info: &ContainerInfo,
  policy: &LabelPolicy,
  cancel: &CancellationToken,
) -> Result<UpdateDecision, RegistryError> {
  let manager = registry_manager();
  let registry_digest = manager
    .get_tag_digest(&info.image, &info.image.tag, cancel)
    .await?;
  let local_digest =
    info.current_digest.as_deref().unwrap_or_default();

  if local_digest == registry_digest {
    if policy.allow_latest {
      return Ok(UpdateDecision {
        status: UpdateStatus::UpToDate,
        current_version: Some(info.image.tag.clone()),
        ..Default::default()
      });
    }
    // Suggest a concrete tag the container could pin instead.
    let suggestion = manager
      .get_latest_tag(&info.image, cancel)
      .await
      .unwrap_or_default();
    return Ok(match suggestion {
      Some(version) => UpdateDecision {
        status: UpdateStatus::UpToDatePinnable,
        current_version: Some(info.image.tag.clone()),
        latest_version: Some(version),
        ..Default::default()
      },
      None => UpdateDecision {
        status: UpdateStatus::UpToDate,
        current_version: Some(info.image.tag.clone()),
        ..Default::default()
      },
    });
  }

  // Digest drifted. Try to put version labels on both sides.
  let tags = manager
    .list_tags_with_digests(&info.image, cancel)
    .await
    .unwrap_or_default();
  let current_version = reverse_lookup(&tags, local_digest)
    .map(|t| t.to_string())
    .unwrap_or_else(|| info.image.tag.clone());
  let latest_version = reverse_lookup(&tags, &registry_digest)
    .map(|t| t.to_string())
    .unwrap_or_else(|| info.image.tag.clone());
  Ok(UpdateDecision {
    status: UpdateStatus::UpdateAvailable,
    current_version: Some(current_version),
    latest_version: Some(latest_version),
    change_type: versioning::ChangeType::Unknown,
    ..Default::default()
  })
}

async fn check_versioned(
  info: &ContainerInfo,
  current_tag: &ParsedTag,
  filter: &CandidateFilter,
  cancel: &CancellationToken,
) -> Result<UpdateDecision, RegistryError> {
  let tags = registry_manager()
    .list_tags_with_digests(&info.image, cancel)
    .await?;
  Ok(versioned_decision(
    current_tag,
    info.current_digest.as_deref(),
    filter,
    &tags,
  ))
}

/// The core versioned-tag decision, separated from IO.
///
/// The comparison baseline is the reverse lookup of the running
/// digest when it resolves to a comparable tag: a container running
/// `app:1.2` rebuilt and re-tagged as `1.2.4` compares from `1.2.4`,
/// not from the alias it was started with.
fn versioned_decision(
  current_tag: &ParsedTag,
  current_digest: Option<&str>,
  filter: &CandidateFilter,
  tags: &TagDigests,
) -> UpdateDecision {
  let baseline = current_digest
    .and_then(|digest| reverse_lookup(tags, digest))
    .map(parse_tag)
    .filter(|tag| tag.comparable_with(current_tag))
    .unwrap_or_else(|| current_tag.clone());

  let parsed = tags
    .keys()
    .map(|raw| parse_tag(raw))
    .collect::<Vec<_>>();
  let candidates = filter_candidates(&baseline, &parsed, filter);
  let latest = select_latest(&candidates);

  match latest {
    Some(latest)
      if compare_tags(latest, &baseline)
        == Some(std::cmp::Ordering::Greater) =>
    {
      UpdateDecision {
        status: UpdateStatus::UpdateAvailable,
        current_version: Some(baseline.raw.clone()),
        latest_version: Some(latest.raw.clone()),
        change_type: change_type(&baseline, latest),
        ..Default::default()
      }
    }
    _ => UpdateDecision {
      status: UpdateStatus::UpToDate,
      current_version: Some(baseline.raw.clone()),
      ..Default::default()
    },
  }
}

/// Digest -> tag. Authoritative for moving tags: it lets the checker
/// say what `:latest` resolves to today. Several tags usually share
/// the digest (`1.2`, `1.2.4`, `latest`); the most specific
/// version-shaped tag wins so rebuilt aliases pin to their real
/// version.
fn reverse_lookup<'t>(
  tags: &'t TagDigests,
  digest: &str,
) -> Option<&'t str> {
  let mut best: Option<(&str, usize)> = None;
  let mut fallback = None;
  for (tag, digests) in tags {
    if !digests.iter().any(|d| d == digest) {
      continue;
    }
    let parsed = parse_tag(tag);
    match parsed.kind {
      TagKind::Semver | TagKind::Calver | TagKind::Date => {
        let specificity = tag_specificity(tag);
        if best.is_none_or(|(_, s)| specificity > s) {
          best = Some((tag, specificity));
        }
      }
      TagKind::Moving => {}
      _ => fallback = fallback.or(Some(tag.as_str())),
    }
  }
  best.map(|(tag, _)| tag).or(fallback)
}

/// How many leading numeric segments a tag spells out:
/// `1.2` -> 2, `1.2.4` -> 3, `20240115` -> 1.
fn tag_specificity(tag: &str) -> usize {
  tag
    .trim_start_matches('v')
    .split(['.', '-'])
    .take_while(|part| {
      !part.is_empty()
        && part.bytes().all(|b| b.is_ascii_digit())
    })
    .count()
}

fn decision_from_registry_error(
  e: RegistryError,
) -> UpdateDecision {
  debug!("registry error during check | {e:#}");
  match e {
    RegistryError::NotFound(reason) => {
      UpdateDecision::metadata_unavailable(reason)
    }
    e => UpdateDecision::failed(e.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use indexmap::IndexMap;

  use super::*;

  fn tag_map(entries: &[(&str, &[&str])]) -> TagDigests {
    entries
      .iter()
      .map(|(tag, digests)| {
        (
          tag.to_string(),
          digests.iter().map(|d| d.to_string()).collect(),
        )
      })
      .collect::<IndexMap<_, _>>()
  }

  #[test]
  fn patch_update_under_pin_minor() {
    let tags = tag_map(&[
      ("1.25.0", &["sha256:aaa"]),
      ("1.25.3", &["sha256:bbb"]),
      ("1.26.0", &["sha256:ccc"]),
    ]);
    let filter = CandidateFilter {
      pin_minor: true,
      ..Default::default()
    };
    let decision = versioned_decision(
      &parse_tag("1.25.0"),
      Some("sha256:aaa"),
      &filter,
      &tags,
    );
    assert_eq!(decision.status, UpdateStatus::UpdateAvailable);
    assert_eq!(decision.latest_version.as_deref(), Some("1.25.3"));
    assert_eq!(
      decision.change_type,
      versioning::ChangeType::Patch
    );
  }

  #[test]
  fn up_to_date_when_no_newer_candidate() {
    let tags = tag_map(&[
      ("1.25.3", &["sha256:bbb"]),
      ("1.24.0", &["sha256:old"]),
    ]);
    let decision = versioned_decision(
      &parse_tag("1.25.3"),
      Some("sha256:bbb"),
      &CandidateFilter::default(),
      &tags,
    );
    assert_eq!(decision.status, UpdateStatus::UpToDate);
  }

  #[test]
  fn digest_reverse_lookup_pins_the_baseline() {
    // Container was started from the `1.2` alias; its digest now
    // belongs to 1.2.4, so 1.2.4 is the real current version.
    let tags = tag_map(&[
      ("1.2", &["sha256:rebuild"]),
      ("1.2.4", &["sha256:rebuild"]),
      ("1.2.5", &["sha256:next"]),
    ]);
    let decision = versioned_decision(
      &parse_tag("1.2"),
      Some("sha256:rebuild"),
      &CandidateFilter::default(),
      &tags,
    );
    assert_eq!(
      decision.current_version.as_deref(),
      Some("1.2.4")
    );
    assert_eq!(decision.status, UpdateStatus::UpdateAvailable);
    assert_eq!(decision.latest_version.as_deref(), Some("1.2.5"));
  }

  #[test]
  fn reverse_lookup_prefers_version_tags() {
    let tags = tag_map(&[
      ("latest", &["sha256:x"]),
      ("v1.25.3", &["sha256:x"]),
    ]);
    assert_eq!(reverse_lookup(&tags, "sha256:x"), Some("v1.25.3"));
    assert_eq!(reverse_lookup(&tags, "sha256:y"), None);
  }

  #[test]
  fn reverse_lookup_prefers_the_most_specific_alias() {
    // Alias order in the registry listing must not matter.
    let tags = tag_map(&[
      ("1.2", &["sha256:x"]),
      ("latest", &["sha256:x"]),
      ("1.2.4", &["sha256:x"]),
    ]);
    assert_eq!(reverse_lookup(&tags, "sha256:x"), Some("1.2.4"));
  }

  #[test]
  fn compose_mismatch_detected() {
    let mut info = ContainerInfo {
      name: "nginx".into(),
      image: convoy_client::entities::ImageRef::parse(
        "nginx:1.25.0",
      ),
      compose_image: Some("nginx:1.26.0".into()),
      ..Default::default()
    };
    let decision = compose_mismatch(&info).unwrap();
    assert_eq!(decision.status, UpdateStatus::ComposeMismatch);
    // Bare tags only, never full references.
    assert_eq!(decision.current_version.as_deref(), Some("1.25.0"));
    assert_eq!(decision.latest_version.as_deref(), Some("1.26.0"));

    info.compose_image = Some("nginx:1.25.0".into());
    assert!(compose_mismatch(&info).is_none());
  }
}
