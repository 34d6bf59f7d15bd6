//! Line-oriented compose scanning. Just enough structure awareness to
//! find one service's image line: a top level `services:` key, service
//! keys one indent level in, and the `image:` key nested under the
//! target service.

/// An env var interpolation in an image value, eg
/// `${APP_IMAGE:-ghcr.io/acme/app:1.2.0}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvInterpolation {
  pub var: String,
  pub default: Option<String>,
  /// Byte span of the default literal within the whole document.
  pub default_span: Option<(usize, usize)>,
}

/// The located image value of one service.
#[derive(Debug, Clone)]
pub struct ImageLine {
  pub service: String,
  /// Byte span of the value within the whole document, quotes
  /// excluded.
  pub value_start: usize,
  pub value_end: usize,
  pub value: String,
  pub env_var: Option<EnvInterpolation>,
}

pub fn find_service_image(
  text: &str,
  service: &str,
) -> Option<ImageLine> {
  let mut offset = 0;
  let mut in_services = false;
  let mut service_indent = None;
  let mut in_target = false;

  for line in text.split_inclusive('\n') {
    let line_offset = offset;
    offset += line.len();

    let content = line.trim_end_matches(['\n', '\r']);
    let indent = content.len() - content.trim_start().len();
    let body = content.trim_start();

    if body.is_empty() || body.starts_with('#') {
      continue;
    }

    if indent == 0 {
      in_services = body == "services:"
        || body.starts_with("services:")
          && is_empty_after_key(&body["services:".len()..]);
      in_target = false;
      continue;
    }
    if !in_services {
      continue;
    }

    let key_indent = *service_indent.get_or_insert(indent);
    if indent == key_indent {
      in_target = match body.split_once(':') {
        Some((key, rest)) if is_empty_after_key(rest) => {
          key.trim() == service
        }
        _ => false,
      };
      continue;
    }
    if !in_target || indent < key_indent {
      continue;
    }

    if let Some(rest) = body.strip_prefix("image:") {
      let rest_offset =
        line_offset + indent + "image:".len();
      return locate_value(text, service, rest, rest_offset);
    }
  }
  None
}

fn is_empty_after_key(rest: &str) -> bool {
  let rest = rest.trim();
  rest.is_empty() || rest.starts_with('#')
}

fn locate_value(
  text: &str,
  service: &str,
  rest: &str,
  rest_offset: usize,
) -> Option<ImageLine> {
  let leading_ws = rest.len() - rest.trim_start().len();
  let rest = rest.trim_start();
  let mut start = rest_offset + leading_ws;

  let raw = match rest.chars().next() {
    Some(quote @ ('\'' | '"')) => {
      start += quote.len_utf8();
      let inner = &rest[quote.len_utf8()..];
      &inner[..inner.find(quote)?]
    }
    Some(_) => {
      // Unquoted: the value ends at an end of line comment.
      let mut end = rest.len();
      let bytes = rest.as_bytes();
      for i in 1..rest.len() {
        if bytes[i] == b'#' && bytes[i - 1].is_ascii_whitespace() {
          end = i;
          break;
        }
      }
      rest[..end].trim_end()
    }
    None => return None,
  };
  if raw.is_empty() {
    return None;
  }
  let end = start + raw.len();

  let env_var = parse_interpolation(raw).map(
    |(var, default, default_rel)| EnvInterpolation {
      var,
      default_span: default_rel
        .map(|(s, e)| (start + s, start + e)),
      default,
    },
  );

  debug_assert_eq!(&text[start..end], raw);
  Some(ImageLine {
    service: service.to_string(),
    value_start: start,
    value_end: end,
    value: raw.to_string(),
    env_var,
  })
}

/// Returns (var, default, default span relative to the value) for
/// `${VAR}` / `${VAR:-default}` / `${VAR-default}` values.
fn parse_interpolation(
  value: &str,
) -> Option<(String, Option<String>, Option<(usize, usize)>)> {
  let inner = value.strip_prefix("${")?.strip_suffix('}')?;
  if let Some(split) = inner.find(":-") {
    let var = &inner[..split];
    let default_start = 2 + split + 2;
    let default = &inner[split + 2..];
    return Some((
      var.to_string(),
      Some(default.to_string()),
      Some((default_start, default_start + default.len())),
    ));
  }
  if let Some(split) = inner.find('-') {
    let var = &inner[..split];
    let default_start = 2 + split + 1;
    let default = &inner[split + 1..];
    return Some((
      var.to_string(),
      Some(default.to_string()),
      Some((default_start, default_start + default.len())),
    ));
  }
  Some((inner.to_string(), None, None))
}

#[cfg(test)]
mod tests {
  use super::*;

  const COMPOSE: &str = "\
version: '3.8'

services:

  gluetun:
    image: qmcgaw/gluetun:latest
    cap_add:
      - NET_ADMIN

  qbittorrent:
    # routed through the vpn
    image: \"lscr.io/linuxserver/qbittorrent:4.6.2\"
    network_mode: service:gluetun

networks:
  default:
    external: true
";

  #[test]
  fn finds_unquoted_image() {
    let line = find_service_image(COMPOSE, "gluetun").unwrap();
    assert_eq!(line.value, "qmcgaw/gluetun:latest");
    assert_eq!(
      &COMPOSE[line.value_start..line.value_end],
      "qmcgaw/gluetun:latest"
    );
  }

  #[test]
  fn finds_double_quoted_image() {
    let line = find_service_image(COMPOSE, "qbittorrent").unwrap();
    assert_eq!(
      line.value,
      "lscr.io/linuxserver/qbittorrent:4.6.2"
    );
  }

  #[test]
  fn ignores_keys_outside_services() {
    assert!(find_service_image(COMPOSE, "default").is_none());
  }

  #[test]
  fn missing_service_is_none() {
    assert!(find_service_image(COMPOSE, "nginx").is_none());
  }

  #[test]
  fn parses_interpolations() {
    let (var, default, span) =
      parse_interpolation("${APP_IMAGE:-nginx:1.25.0}").unwrap();
    assert_eq!(var, "APP_IMAGE");
    assert_eq!(default.as_deref(), Some("nginx:1.25.0"));
    let (s, e) = span.unwrap();
    assert_eq!(&"${APP_IMAGE:-nginx:1.25.0}"[s..e], "nginx:1.25.0");

    let (var, default, _) =
      parse_interpolation("${APP_IMAGE}").unwrap();
    assert_eq!(var, "APP_IMAGE");
    assert!(default.is_none());

    assert!(parse_interpolation("nginx:1.25.0").is_none());
  }
}
