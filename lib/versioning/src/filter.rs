use std::cmp::Ordering;

use regex::Regex;

use crate::{ParsedTag, compare_tags};

/// The per-container policy inputs narrowing the candidate tag set
/// before latest selection.
#[derive(Debug, Default)]
pub struct CandidateFilter {
  pub allow_prerelease: bool,
  pub tag_regex: Option<Regex>,
  pub version_min: Option<ParsedTag>,
  pub version_max: Option<ParsedTag>,
  pub pin_major: bool,
  pub pin_minor: bool,
}

/// Applies the filter rules relative to `current`, keeping only tags
/// that could legally replace it.
pub fn filter_candidates(
  current: &ParsedTag,
  tags: &[ParsedTag],
  filter: &CandidateFilter,
) -> Vec<ParsedTag> {
  tags
    .iter()
    .filter(|tag| {
      if !tag.comparable_with(current) {
        return false;
      }
      if tag.is_prerelease()
        && !filter.allow_prerelease
        && !current.is_prerelease()
      {
        return false;
      }
      if let Some(re) = &filter.tag_regex
        && !re.is_match(&tag.raw)
      {
        return false;
      }
      if let Some(min) = &filter.version_min
        && compare_tags(tag, min) == Some(Ordering::Less)
      {
        return false;
      }
      if let Some(max) = &filter.version_max
        && compare_tags(tag, max) == Some(Ordering::Greater)
      {
        return false;
      }
      if (filter.pin_major || filter.pin_minor)
        && tag.components.first() != current.components.first()
      {
        return false;
      }
      if filter.pin_minor
        && tag.components.get(1) != current.components.get(1)
      {
        return false;
      }
      true
    })
    .cloned()
    .collect()
}

/// The maximum of the candidate set under [compare_tags]. Exact ties
/// resolve to the longer (then greater) build suffix, which reads as
/// the newer rebuild of the same version.
pub fn select_latest(candidates: &[ParsedTag]) -> Option<&ParsedTag> {
  let mut best: Option<&ParsedTag> = None;
  for candidate in candidates {
    let Some(current_best) = best else {
      best = Some(candidate);
      continue;
    };
    match compare_tags(candidate, current_best) {
      Some(Ordering::Greater) => best = Some(candidate),
      Some(Ordering::Equal) => {
        let a = candidate.build_suffix.as_deref().unwrap_or("");
        let b = current_best.build_suffix.as_deref().unwrap_or("");
        if a.len() > b.len() || (a.len() == b.len() && a > b) {
          best = Some(candidate);
        }
      }
      _ => {}
    }
  }
  best
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parse_tag;

  fn tags(raws: &[&str]) -> Vec<ParsedTag> {
    raws.iter().map(|r| parse_tag(r)).collect()
  }

  #[test]
  fn pin_minor_keeps_patch_updates_only() {
    let current = parse_tag("1.25.0");
    let candidates = tags(&["1.25.0", "1.25.3", "1.26.0"]);
    let filter = CandidateFilter {
      pin_minor: true,
      ..Default::default()
    };
    let kept = filter_candidates(&current, &candidates, &filter);
    assert_eq!(
      kept.iter().map(|t| t.raw.as_str()).collect::<Vec<_>>(),
      ["1.25.0", "1.25.3"]
    );
    assert_eq!(select_latest(&kept).unwrap().raw, "1.25.3");
  }

  #[test]
  fn pin_major_keeps_same_major() {
    let current = parse_tag("1.25.0");
    let candidates = tags(&["1.25.3", "1.26.0", "2.0.0"]);
    let filter = CandidateFilter {
      pin_major: true,
      ..Default::default()
    };
    let kept = filter_candidates(&current, &candidates, &filter);
    assert_eq!(select_latest(&kept).unwrap().raw, "1.26.0");
  }

  #[test]
  fn prereleases_dropped_unless_allowed() {
    let current = parse_tag("2.0.0");
    let candidates = tags(&["2.1.0-rc.1", "2.0.5"]);
    let kept = filter_candidates(
      &current,
      &candidates,
      &CandidateFilter::default(),
    );
    assert_eq!(select_latest(&kept).unwrap().raw, "2.0.5");

    let filter = CandidateFilter {
      allow_prerelease: true,
      ..Default::default()
    };
    let kept = filter_candidates(&current, &candidates, &filter);
    assert_eq!(select_latest(&kept).unwrap().raw, "2.1.0-rc.1");
  }

  #[test]
  fn prerelease_current_keeps_prereleases() {
    let current = parse_tag("2.1.0-beta.1");
    let candidates = tags(&["2.1.0-rc.1", "2.0.5"]);
    let kept = filter_candidates(
      &current,
      &candidates,
      &CandidateFilter::default(),
    );
    assert_eq!(select_latest(&kept).unwrap().raw, "2.1.0-rc.1");
  }

  #[test]
  fn variant_mismatches_dropped() {
    let current = parse_tag("1.25.0-alpine");
    let candidates = tags(&["1.25.3", "1.25.2-alpine", "1.26.0-slim"]);
    let kept = filter_candidates(
      &current,
      &candidates,
      &CandidateFilter::default(),
    );
    assert_eq!(
      kept.iter().map(|t| t.raw.as_str()).collect::<Vec<_>>(),
      ["1.25.2-alpine"]
    );
  }

  #[test]
  fn tag_regex_filters_raw_form() {
    let current = parse_tag("1.25.0");
    let candidates = tags(&["1.25.3", "1.26.0"]);
    let filter = CandidateFilter {
      tag_regex: Some(Regex::new(r"^1\.25\.\d+$").unwrap()),
      ..Default::default()
    };
    let kept = filter_candidates(&current, &candidates, &filter);
    assert_eq!(select_latest(&kept).unwrap().raw, "1.25.3");
  }

  #[test]
  fn version_bounds() {
    let current = parse_tag("1.0.0");
    let candidates = tags(&["1.1.0", "1.5.0", "2.0.0"]);
    let filter = CandidateFilter {
      version_min: Some(parse_tag("1.2.0")),
      version_max: Some(parse_tag("1.9.9")),
      ..Default::default()
    };
    let kept = filter_candidates(&current, &candidates, &filter);
    assert_eq!(
      kept.iter().map(|t| t.raw.as_str()).collect::<Vec<_>>(),
      ["1.5.0"]
    );
  }

  #[test]
  fn build_suffix_breaks_exact_ties() {
    let candidates = tags(&["4.6.2-ls123", "4.6.2-ls124"]);
    assert_eq!(select_latest(&candidates).unwrap().raw, "4.6.2-ls124");
    let candidates = tags(&["4.6.2-r9", "4.6.2-ls123"]);
    assert_eq!(
      select_latest(&candidates).unwrap().raw,
      "4.6.2-ls123"
    );
  }

  #[test]
  fn latest_is_a_maximum() {
    let current = parse_tag("1.0.0");
    let candidates =
      tags(&["1.0.1", "1.2.0", "1.10.0", "1.9.0", "1.2.10"]);
    let kept = filter_candidates(
      &current,
      &candidates,
      &CandidateFilter::default(),
    );
    let latest = select_latest(&kept).unwrap();
    assert_eq!(latest.raw, "1.10.0");
    for c in &kept {
      assert_ne!(
        compare_tags(c, latest),
        Some(Ordering::Greater),
        "{} should not exceed {}",
        c.raw,
        latest.raw
      );
    }
  }
}
