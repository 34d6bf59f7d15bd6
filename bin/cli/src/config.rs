use std::sync::OnceLock;

use anyhow::Context;
use serde::Deserialize;

#[derive(Deserialize)]
struct CliEnv {
  /// CONVOY_ADDRESS
  #[serde(default)]
  convoy_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CliConfig {
  pub address: String,
}

pub fn cli_config() -> &'static CliConfig {
  static CLI_CONFIG: OnceLock<CliConfig> = OnceLock::new();
  CLI_CONFIG.get_or_init(|| {
    let env: CliEnv = match envy::from_env()
      .context("failed to parse Convoy CLI environment")
    {
      Ok(env) => env,
      Err(e) => panic!("{e:?}"),
    };
    CliConfig {
      address: env
        .convoy_address
        .unwrap_or_else(|| "http://127.0.0.1:9080".to_string()),
    }
  })
}
