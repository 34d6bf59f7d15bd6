use std::sync::OnceLock;

use regex::Regex;

use crate::{
  MOVING_TAGS, PLATFORM_VARIANTS, PRERELEASE_IDENTS, ParsedTag,
  Prerelease, TagKind,
};

fn semver_like_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"^v?\d+(\.\d+){0,3}([.-][A-Za-z0-9]+)*$")
      .expect("invalid semver-like regex")
  })
}

fn build_suffix_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"^(ls|build|b|r)\d+$")
      .expect("invalid build suffix regex")
  })
}

/// Classifies a raw tag string. Decision order matters: moving names
/// first, then date stamps, then commit shas, then the semver-like
/// grammar, with everything else left unparsed.
pub fn parse_tag(raw: &str) -> ParsedTag {
  let trimmed = raw.trim();

  if MOVING_TAGS
    .iter()
    .any(|m| trimmed.eq_ignore_ascii_case(m))
  {
    return ParsedTag {
      raw: trimmed.to_string(),
      kind: TagKind::Moving,
      ..Default::default()
    };
  }

  if (trimmed.len() == 8 || trimmed.len() == 14)
    && trimmed.bytes().all(|b| b.is_ascii_digit())
  {
    let mut value = trimmed.parse::<u64>().unwrap_or_default();
    if trimmed.len() == 8 {
      // Scale bare dates to the 14 digit form (midnight).
      value *= 1_000_000;
    }
    return ParsedTag {
      raw: trimmed.to_string(),
      kind: TagKind::Date,
      date_value: Some(value),
      ..Default::default()
    };
  }

  if (7..=40).contains(&trimmed.len())
    && trimmed.bytes().all(|b| b.is_ascii_hexdigit())
  {
    return ParsedTag {
      raw: trimmed.to_string(),
      kind: TagKind::Commit,
      ..Default::default()
    };
  }

  parse_semver_like(trimmed).unwrap_or_else(|| ParsedTag {
    raw: trimmed.to_string(),
    kind: TagKind::Unparsed,
    ..Default::default()
  })
}

fn parse_semver_like(raw: &str) -> Option<ParsedTag> {
  if !semver_like_regex().is_match(raw) {
    return None;
  }
  let body = raw.strip_prefix('v').unwrap_or(raw);
  let tokens = body.split(['.', '-']).collect::<Vec<_>>();

  let mut components = Vec::with_capacity(4);
  let mut idx = 0;
  while idx < tokens.len() && components.len() < 4 {
    match tokens[idx].parse::<u64>() {
      Ok(n) => {
        components.push(n);
        idx += 1;
      }
      Err(_) => break,
    }
  }
  if components.is_empty() {
    return None;
  }
  let numeric_len = components.len();

  let mut prerelease = None;
  let mut build_suffix = None;
  let mut variant: Option<String> = None;

  let mut push_variant = |variant: &mut Option<String>, v: String| {
    match variant {
      Some(prev) => {
        prev.push('-');
        prev.push_str(&v);
      }
      None => *variant = Some(v),
    }
  };

  while idx < tokens.len() {
    let token = tokens[idx];
    let lower = token.to_ascii_lowercase();

    if PLATFORM_VARIANTS.iter().any(|v| lower.starts_with(v)) {
      let mut v = token.to_string();
      idx += 1;
      // Re-attach dotted variant versions, eg alpine3 + 19.
      while idx < tokens.len()
        && tokens[idx].bytes().all(|b| b.is_ascii_digit())
      {
        v.push('.');
        v.push_str(tokens[idx]);
        idx += 1;
      }
      push_variant(&mut variant, v);
      continue;
    }

    if build_suffix_regex().is_match(&lower) {
      build_suffix = Some(token.to_string());
      idx += 1;
      continue;
    }

    if let Some(ident) = match_prerelease_ident(&lower) {
      let rest = &lower[ident.len()..];
      let mut number =
        rest.trim_start_matches(['.', '-']).parse::<u64>().ok();
      idx += 1;
      if number.is_none()
        && rest.is_empty()
        && idx < tokens.len()
        && tokens[idx].bytes().all(|b| b.is_ascii_digit())
      {
        number = tokens[idx].parse::<u64>().ok();
        idx += 1;
      }
      prerelease = Some(Prerelease {
        ident: ident.to_string(),
        number,
      });
      continue;
    }

    // Unknown suffixes partition the tag space the same way platform
    // variants do: only tags carrying the same suffix may compare.
    push_variant(&mut variant, token.to_string());
    idx += 1;
  }

  components.resize(4, 0);

  let kind = if is_calver(&components, numeric_len) {
    TagKind::Calver
  } else {
    TagKind::Semver
  };

  Some(ParsedTag {
    raw: raw.to_string(),
    kind,
    components,
    prerelease,
    build_suffix,
    variant,
    date_value: None,
  })
}

/// Longest identifier wins so `preview` is never read as `pre` + `view`.
fn match_prerelease_ident(token: &str) -> Option<&'static str> {
  let mut idents = PRERELEASE_IDENTS.to_vec();
  idents.sort_by_key(|i| std::cmp::Reverse(i.len()));
  idents
    .into_iter()
    .find(|ident| token.starts_with(ident))
}

fn is_calver(components: &[u64], numeric_len: usize) -> bool {
  numeric_len >= 2
    && (1900..=2999).contains(&components[0])
    && (1..=12).contains(&components[1])
}
