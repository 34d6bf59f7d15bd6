use std::{path::PathBuf, sync::OnceLock, time::Duration};

use anyhow::Context;
use convoy_client::entities::logger::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};

/// Raw environment, parsed with envy. Durations accept `30s`, `15m`,
/// `1h`, `1d`, or a bare number of seconds.
#[derive(Deserialize)]
pub struct Env {
  #[serde(default)]
  pub db_path: Option<PathBuf>,
  #[serde(default)]
  pub check_interval: Option<String>,
  #[serde(default)]
  pub cache_ttl: Option<String>,
  #[serde(default)]
  pub bind_ip: Option<String>,
  #[serde(default)]
  pub port: Option<u16>,
  #[serde(default)]
  pub scripts_dir: Option<PathBuf>,
  #[serde(default)]
  pub label_namespace: Option<String>,
  #[serde(default)]
  pub self_container_name: Option<String>,
  #[serde(default)]
  pub health_timeout: Option<String>,
  #[serde(default)]
  pub operation_timeout: Option<String>,
  #[serde(default)]
  pub github_token: Option<String>,
  #[serde(default)]
  pub docker_hub_username: Option<String>,
  #[serde(default)]
  pub docker_hub_password: Option<String>,
  #[serde(default)]
  pub legacy_compose_cli: Option<bool>,
  #[serde(default)]
  pub log_level: Option<LogLevel>,
  #[serde(default)]
  pub log_json: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreConfig {
  /// Path of the SQLite database file.
  pub db_path: PathBuf,
  /// Interval between background discovery + check passes.
  #[serde(with = "duration_secs")]
  pub check_interval: Duration,
  /// TTL for registry tag lists and digest maps.
  #[serde(with = "duration_secs")]
  pub cache_ttl: Duration,
  /// Shorter TTL for single digest lookups.
  #[serde(with = "duration_secs")]
  pub digest_cache_ttl: Duration,
  pub bind_ip: String,
  pub port: u16,
  /// Directory listed by the script library endpoints.
  pub scripts_dir: PathBuf,
  /// Label key prefix, eg `convoy` for `convoy.ignore`.
  pub label_namespace: String,
  /// The daemon's own container name, for self-update handling.
  pub self_container_name: String,
  /// How long to wait for a declared healthcheck to go healthy.
  #[serde(with = "duration_secs")]
  pub health_timeout: Duration,
  /// Settle delay after `running` for services without healthchecks.
  #[serde(with = "duration_secs")]
  pub settle_delay: Duration,
  /// Hard ceiling on one update operation.
  #[serde(with = "duration_secs")]
  pub operation_timeout: Duration,
  /// Ceiling on pre-update check scripts and post-update actions.
  #[serde(with = "duration_secs")]
  pub script_timeout: Duration,
  #[serde(skip)]
  pub github_token: Option<String>,
  #[serde(skip)]
  pub docker_hub_username: Option<String>,
  #[serde(skip)]
  pub docker_hub_password: Option<String>,
  /// Use the standalone `docker-compose` binary instead of the
  /// compose plugin.
  pub legacy_compose_cli: bool,
  #[serde(skip)]
  pub logging: LogConfig,
}

impl Default for CoreConfig {
  fn default() -> CoreConfig {
    CoreConfig {
      db_path: PathBuf::from("/data/convoy.db"),
      check_interval: Duration::from_secs(3600),
      cache_ttl: Duration::from_secs(900),
      digest_cache_ttl: Duration::from_secs(300),
      bind_ip: String::from("0.0.0.0"),
      port: 9080,
      scripts_dir: PathBuf::from("/scripts"),
      label_namespace: String::from("convoy"),
      self_container_name: String::from("convoy"),
      health_timeout: Duration::from_secs(60),
      settle_delay: Duration::from_secs(2),
      operation_timeout: Duration::from_secs(30 * 60),
      script_timeout: Duration::from_secs(30),
      github_token: None,
      docker_hub_username: None,
      docker_hub_password: None,
      legacy_compose_cli: false,
      logging: LogConfig::default(),
    }
  }
}

impl CoreConfig {
  fn from_env(env: Env) -> anyhow::Result<CoreConfig> {
    let mut config = CoreConfig::default();
    if let Some(db_path) = env.db_path {
      config.db_path = db_path;
    }
    if let Some(raw) = env.check_interval {
      config.check_interval = parse_duration(&raw)
        .context("invalid CHECK_INTERVAL")?;
    }
    if let Some(raw) = env.cache_ttl {
      config.cache_ttl =
        parse_duration(&raw).context("invalid CACHE_TTL")?;
    }
    if let Some(raw) = env.health_timeout {
      config.health_timeout =
        parse_duration(&raw).context("invalid HEALTH_TIMEOUT")?;
    }
    if let Some(raw) = env.operation_timeout {
      config.operation_timeout = parse_duration(&raw)
        .context("invalid OPERATION_TIMEOUT")?;
    }
    if let Some(bind_ip) = env.bind_ip {
      config.bind_ip = bind_ip;
    }
    if let Some(port) = env.port {
      config.port = port;
    }
    if let Some(scripts_dir) = env.scripts_dir {
      config.scripts_dir = scripts_dir;
    }
    if let Some(namespace) = env.label_namespace {
      config.label_namespace =
        namespace.trim_end_matches('.').to_string();
    }
    if let Some(name) = env.self_container_name {
      config.self_container_name = name;
    }
    config.github_token = env.github_token;
    config.docker_hub_username = env.docker_hub_username;
    config.docker_hub_password = env.docker_hub_password;
    config.legacy_compose_cli =
      env.legacy_compose_cli.unwrap_or_default();
    if let Some(level) = env.log_level {
      config.logging.level = level;
    }
    if env.log_json.unwrap_or_default() {
      config.logging.stdio =
        convoy_client::entities::logger::StdioLogMode::Json;
    }
    Ok(config)
  }

  /// The config as persisted in snapshots / logged at startup, with
  /// secrets removed by serde skip.
  pub fn sanitized_json(&self) -> String {
    serde_json::to_string(self).unwrap_or_default()
  }
}

pub fn core_config() -> &'static CoreConfig {
  static CORE_CONFIG: OnceLock<CoreConfig> = OnceLock::new();
  CORE_CONFIG.get_or_init(|| {
    let env: Env = match envy::from_env()
      .context("failed to parse Convoy Core environment")
    {
      Ok(env) => env,
      Err(e) => panic!("{e:?}"),
    };
    match CoreConfig::from_env(env) {
      Ok(config) => config,
      Err(e) => panic!("{e:?}"),
    }
  })
}

/// `90`, `90s`, `15m`, `2h`, `1d`.
pub fn parse_duration(raw: &str) -> anyhow::Result<Duration> {
  let raw = raw.trim();
  let (value, unit) = match raw.find(|c: char| c.is_alphabetic()) {
    Some(split) => raw.split_at(split),
    None => (raw, "s"),
  };
  let value = value
    .parse::<u64>()
    .with_context(|| format!("invalid duration '{raw}'"))?;
  let seconds = match unit {
    "s" | "sec" | "secs" => value,
    "m" | "min" | "mins" => value * 60,
    "h" | "hr" | "hrs" => value * 3600,
    "d" => value * 86400,
    _ => anyhow::bail!("invalid duration unit '{unit}'"),
  };
  Ok(Duration::from_secs(seconds))
}

mod duration_secs {
  use std::time::Duration;

  use serde::Serializer;

  pub fn serialize<S: Serializer>(
    duration: &Duration,
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn durations_parse() {
    assert_eq!(
      parse_duration("90").unwrap(),
      Duration::from_secs(90)
    );
    assert_eq!(
      parse_duration("15m").unwrap(),
      Duration::from_secs(900)
    );
    assert_eq!(
      parse_duration("2h").unwrap(),
      Duration::from_secs(7200)
    );
    assert_eq!(
      parse_duration("1d").unwrap(),
      Duration::from_secs(86400)
    );
    assert!(parse_duration("soon").is_err());
    assert!(parse_duration("5fortnights").is_err());
  }
}
