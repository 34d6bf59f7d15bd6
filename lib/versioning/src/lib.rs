//! # Convoy Versioning
//!
//! Classifies and orders arbitrary image tag strings: semver-ish tags,
//! calendar versions, date stamps, commit shas, moving tags, and the
//! unparsable rest. Also implements the candidate filtering used to pick
//! the latest eligible tag for a container under its update policy.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use strum::Display;

mod filter;
mod parse;

pub use filter::{CandidateFilter, filter_candidates, select_latest};
pub use parse::parse_tag;

/// Tags which always point at whatever the registry currently publishes.
pub const MOVING_TAGS: &[&str] =
  &["latest", "stable", "main", "master", "edge", "nightly"];

/// Platform variant suffixes preserved through parsing. Tags are only
/// comparable when their variant strings match.
pub const PLATFORM_VARIANTS: &[&str] = &[
  "alpine", "slim", "bullseye", "bookworm", "ubi", "amd64",
  "arm64v8", "arm32v7",
];

/// Prerelease identifiers, ordered oldest to newest.
/// `alpha < beta < rc < pre` is load-bearing, the rest slot around them.
pub const PRERELEASE_IDENTS: &[&str] = &[
  "dev", "snapshot", "nightly", "m", "ea", "preview", "alpha",
  "beta", "rc", "pre",
];

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TagKind {
  /// Dotted numeric tuple, optionally prefixed with `v`.
  Semver,
  /// Dotted numeric tuple whose leading component reads as a year.
  /// Compared exactly like [TagKind::Semver].
  Calver,
  /// Pure `YYYYMMDD` or `YYYYMMDDHHMMSS` stamp.
  Date,
  /// 7-40 character hex string.
  Commit,
  /// Registry-mutable tag such as `latest`.
  Moving,
  /// Compared only by string equality, never "newer".
  #[default]
  Unparsed,
}

/// A single prerelease suffix, eg the `rc.2` in `1.4.0-rc.2`.
#[derive(
  Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct Prerelease {
  /// The matched identifier, lowercased (`alpha`, `beta`, `rc`, ...).
  pub ident: String,
  /// Numeric suffix on the identifier, if any.
  pub number: Option<u64>,
}

impl Prerelease {
  fn rank(&self) -> usize {
    PRERELEASE_IDENTS
      .iter()
      .position(|i| *i == self.ident)
      .unwrap_or(0)
  }
}

/// The parsed form of an image tag.
#[derive(
  Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct ParsedTag {
  /// The tag exactly as it appeared on the image / in the registry.
  pub raw: String,
  pub kind: TagKind,
  /// Numeric version tuple, zero padded to 4 entries.
  /// Empty unless kind is semver / calver.
  pub components: Vec<u64>,
  pub prerelease: Option<Prerelease>,
  /// Build counter suffix (`ls123`, `build4`, `r2`, ...), normalized
  /// away for ordering and only consulted to break exact ties.
  pub build_suffix: Option<String>,
  /// Platform variant (`alpine3.19`, `bookworm`, ...). Tags with
  /// differing variants never compare.
  pub variant: Option<String>,
  /// Canonical integer for date tags, scaled to 14 digits.
  pub date_value: Option<u64>,
}

impl ParsedTag {
  pub fn is_prerelease(&self) -> bool {
    self.prerelease.is_some()
  }

  /// Whether two tags are orderable at all: compatible kinds and
  /// matching platform variants.
  pub fn comparable_with(&self, other: &ParsedTag) -> bool {
    if self.variant != other.variant {
      return false;
    }
    matches!(
      (self.kind, other.kind),
      (TagKind::Semver | TagKind::Calver, TagKind::Semver | TagKind::Calver)
        | (TagKind::Date, TagKind::Date)
    )
  }
}

impl std::fmt::Display for ParsedTag {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.raw)
  }
}

/// Total order over comparable tags. Returns None when the pair is not
/// comparable (kind mismatch, differing variants, moving / commit /
/// unparsed kinds), in which case only raw string equality holds.
pub fn compare_tags(
  a: &ParsedTag,
  b: &ParsedTag,
) -> Option<Ordering> {
  if !a.comparable_with(b) {
    return (a.raw == b.raw).then_some(Ordering::Equal);
  }
  if a.kind == TagKind::Date {
    return Some(a.date_value.cmp(&b.date_value));
  }
  match a.components.cmp(&b.components) {
    Ordering::Equal => {}
    ord => return Some(ord),
  }
  // Same tuple: a prerelease sorts below the plain release.
  Some(match (&a.prerelease, &b.prerelease) {
    (None, None) => Ordering::Equal,
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (Some(pa), Some(pb)) => pa
      .rank()
      .cmp(&pb.rank())
      .then(pa.number.cmp(&pb.number))
      .then_with(|| pa.ident.cmp(&pb.ident)),
  })
}

/// Semantic distance between two comparable tags.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeType {
  Major,
  Minor,
  Patch,
  None,
  Downgrade,
  #[default]
  Unknown,
}

/// Computes the change type moving `current -> candidate`.
pub fn change_type(
  current: &ParsedTag,
  candidate: &ParsedTag,
) -> ChangeType {
  if !matches!(current.kind, TagKind::Semver | TagKind::Calver)
    || !matches!(candidate.kind, TagKind::Semver | TagKind::Calver)
  {
    return ChangeType::Unknown;
  }
  match compare_tags(current, candidate) {
    None => ChangeType::Unknown,
    Some(Ordering::Equal) => ChangeType::None,
    Some(Ordering::Greater) => ChangeType::Downgrade,
    Some(Ordering::Less) => {
      if current.components.first() != candidate.components.first() {
        ChangeType::Major
      } else if current.components.get(1) != candidate.components.get(1)
      {
        ChangeType::Minor
      } else {
        ChangeType::Patch
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tag(raw: &str) -> ParsedTag {
    parse_tag(raw)
  }

  #[test]
  fn classifies_moving_tags() {
    for raw in ["latest", "stable", "main", "master", "edge", "nightly"]
    {
      assert_eq!(tag(raw).kind, TagKind::Moving, "{raw}");
    }
  }

  #[test]
  fn classifies_date_tags() {
    let t = tag("20240115");
    assert_eq!(t.kind, TagKind::Date);
    assert_eq!(t.date_value, Some(20240115000000));
    let t = tag("20240115093045");
    assert_eq!(t.kind, TagKind::Date);
    assert_eq!(t.date_value, Some(20240115093045));
  }

  #[test]
  fn classifies_commit_tags() {
    assert_eq!(tag("a1b2c3d").kind, TagKind::Commit);
    assert_eq!(
      tag("8f14e45fceea167a5a36dedd4bea2543").kind,
      TagKind::Commit
    );
    // 6 chars is too short to read as a sha
    assert_ne!(tag("a1b2c3").kind, TagKind::Commit);
  }

  #[test]
  fn classifies_semver_tags() {
    let t = tag("1.25.3");
    assert_eq!(t.kind, TagKind::Semver);
    assert_eq!(t.components, vec![1, 25, 3, 0]);
    let t = tag("v2.1");
    assert_eq!(t.kind, TagKind::Semver);
    assert_eq!(t.components, vec![2, 1, 0, 0]);
    let t = tag("10.4.2.1");
    assert_eq!(t.components, vec![10, 4, 2, 1]);
  }

  #[test]
  fn classifies_calver_tags() {
    let t = tag("2024.6.1");
    assert_eq!(t.kind, TagKind::Calver);
    assert_eq!(t.components, vec![2024, 6, 1, 0]);
    // Compares like any numeric tuple.
    assert_eq!(
      compare_tags(&tag("2024.6.1"), &tag("2024.10.0")),
      Some(Ordering::Less)
    );
  }

  #[test]
  fn classifies_unparsed_tags() {
    assert_eq!(tag("jammy-20240111").kind, TagKind::Unparsed);
    assert_eq!(tag("fpm").kind, TagKind::Unparsed);
    assert_eq!(
      compare_tags(&tag("fpm"), &tag("fpm")),
      Some(Ordering::Equal)
    );
    assert_eq!(compare_tags(&tag("fpm"), &tag("cli")), None);
  }

  #[test]
  fn parses_prerelease_suffixes() {
    let t = tag("1.4.0-rc.2");
    assert!(t.is_prerelease());
    let pre = t.prerelease.unwrap();
    assert_eq!(pre.ident, "rc");
    assert_eq!(pre.number, Some(2));

    let t = tag("2.0.0-beta1");
    let pre = t.prerelease.unwrap();
    assert_eq!(pre.ident, "beta");
    assert_eq!(pre.number, Some(1));

    assert!(tag("1.0.0-SNAPSHOT").is_prerelease());
    assert!(!tag("1.0.0").is_prerelease());
  }

  #[test]
  fn parses_build_suffixes() {
    let t = tag("4.6.2-ls123");
    assert_eq!(t.kind, TagKind::Semver);
    assert_eq!(t.build_suffix.as_deref(), Some("ls123"));
    assert!(!t.is_prerelease());
    let t = tag("1.2.3-r4");
    assert_eq!(t.build_suffix.as_deref(), Some("r4"));
  }

  #[test]
  fn parses_platform_variants() {
    let t = tag("1.25.3-alpine3.19");
    assert_eq!(t.kind, TagKind::Semver);
    assert_eq!(t.components, vec![1, 25, 3, 0]);
    assert_eq!(t.variant.as_deref(), Some("alpine3.19"));

    let t = tag("16.2-bookworm");
    assert_eq!(t.variant.as_deref(), Some("bookworm"));
  }

  #[test]
  fn variants_do_not_compare_across() {
    let alpine = tag("1.25.3-alpine");
    let plain = tag("1.26.0");
    assert_eq!(compare_tags(&alpine, &plain), None);
    assert_eq!(
      compare_tags(&tag("1.25.0-alpine"), &tag("1.25.3-alpine")),
      Some(Ordering::Less)
    );
  }

  #[test]
  fn orders_semver() {
    assert_eq!(
      compare_tags(&tag("1.25.0"), &tag("1.25.3")),
      Some(Ordering::Less)
    );
    assert_eq!(
      compare_tags(&tag("1.26.0"), &tag("1.25.3")),
      Some(Ordering::Greater)
    );
    assert_eq!(
      compare_tags(&tag("v1.25.3"), &tag("1.25.3")),
      Some(Ordering::Equal)
    );
  }

  #[test]
  fn prerelease_sorts_below_release() {
    assert_eq!(
      compare_tags(&tag("2.0.0-rc.1"), &tag("2.0.0")),
      Some(Ordering::Less)
    );
    assert_eq!(
      compare_tags(&tag("2.0.0-alpha"), &tag("2.0.0-beta")),
      Some(Ordering::Less)
    );
    assert_eq!(
      compare_tags(&tag("2.0.0-rc.1"), &tag("2.0.0-rc.2")),
      Some(Ordering::Less)
    );
    assert_eq!(
      compare_tags(&tag("2.0.0-rc.2"), &tag("2.0.0-pre.1")),
      Some(Ordering::Less)
    );
  }

  #[test]
  fn orders_dates() {
    assert_eq!(
      compare_tags(&tag("20240115"), &tag("20240116")),
      Some(Ordering::Less)
    );
    assert_eq!(
      compare_tags(&tag("20240115"), &tag("20240115093045")),
      Some(Ordering::Less)
    );
  }

  #[test]
  fn change_types() {
    assert_eq!(
      change_type(&tag("1.25.0"), &tag("2.0.0")),
      ChangeType::Major
    );
    assert_eq!(
      change_type(&tag("1.25.0"), &tag("1.26.0")),
      ChangeType::Minor
    );
    assert_eq!(
      change_type(&tag("1.25.0"), &tag("1.25.3")),
      ChangeType::Patch
    );
    assert_eq!(
      change_type(&tag("1.25.3"), &tag("1.25.3")),
      ChangeType::None
    );
    assert_eq!(
      change_type(&tag("1.26.0"), &tag("1.25.3")),
      ChangeType::Downgrade
    );
    assert_eq!(
      change_type(&tag("latest"), &tag("1.25.3")),
      ChangeType::Unknown
    );
  }
}
