use anyhow::Context;
use chrono::TimeZone;
use colored::Colorize;
use convoy_client::ConvoyClient;
use serde::Serialize;

use crate::{args::Cli, config::cli_config};

pub mod check;
pub mod history;
pub mod label;
pub mod update;

pub fn client(cli: &Cli) -> ConvoyClient {
  let address = cli
    .address
    .clone()
    .unwrap_or_else(|| cli_config().address.clone());
  ConvoyClient::new(address)
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!(
    "{}",
    serde_json::to_string_pretty(value)
      .context("failed to serialize response")?
  );
  Ok(())
}

/// Millisecond timestamp -> local human time.
pub fn format_ts(ts: i64) -> String {
  match chrono::Local.timestamp_millis_opt(ts) {
    chrono::LocalResult::Single(time) => {
      time.format("%Y-%m-%d %H:%M:%S").to_string()
    }
    _ => ts.to_string(),
  }
}

/// Status strings colorized the same way everywhere.
pub fn colored_status(status: &str) -> String {
  match status {
    "up_to_date" | "complete" => status.green().to_string(),
    "update_available" | "up_to_date_pinnable" => {
      status.yellow().to_string()
    }
    "failed" | "update_available_blocked" | "check_failed" => {
      status.red().to_string()
    }
    "rolled_back" | "compose_mismatch" => {
      status.magenta().to_string()
    }
    _ => status.dimmed().to_string(),
  }
}

pub fn table() -> comfy_table::Table {
  let mut table = comfy_table::Table::new();
  table.load_preset(comfy_table::presets::NOTHING);
  table
}

/// `convoy api`: run the core daemon in the foreground.
pub async fn api_server() -> anyhow::Result<()> {
  let status = tokio::process::Command::new("convoy-core")
    .status()
    .await
    .context(
      "failed to launch convoy-core (is it on your PATH?)",
    )?;
  if !status.success() {
    anyhow::bail!("convoy-core exited with {status}");
  }
  Ok(())
}
