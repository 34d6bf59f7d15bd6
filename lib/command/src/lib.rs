use std::{path::Path, time::Duration};

use convoy_client::entities::{CommandLog, convoy_timestamp};
use run_command::{CommandOutput, async_run_command};

/// Runs a shell command, optionally from a working directory, and
/// captures the result as a stage-tagged [CommandLog].
pub async fn run_convoy_command(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl AsRef<str>,
) -> CommandLog {
  let command = if let Some(path) = path.into() {
    format!("cd {} && {}", path.display(), command.as_ref())
  } else {
    command.as_ref().to_string()
  };
  let start_ts = convoy_timestamp();
  let output = async_run_command(&command).await;
  output_into_log(stage, command, start_ts, output)
}

/// Same as [run_convoy_command] with a hard timeout. Used for
/// pre-update check scripts and post-update actions, which must not
/// stall an operation indefinitely.
pub async fn run_convoy_command_with_timeout(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl AsRef<str>,
  timeout: Duration,
) -> CommandLog {
  let command_string = command.as_ref().to_string();
  match tokio::time::timeout(
    timeout,
    run_convoy_command(stage, path, command),
  )
  .await
  {
    Ok(log) => log,
    Err(_) => CommandLog {
      stage: stage.to_string(),
      command: command_string,
      stderr: format!(
        "command timed out after {} seconds",
        timeout.as_secs()
      ),
      success: false,
      start_ts: convoy_timestamp(),
      end_ts: convoy_timestamp(),
      ..Default::default()
    },
  }
}

/// Runs a command with extra environment variables prepended as
/// `KEY=value` assignments.
pub async fn run_convoy_command_with_env(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl AsRef<str>,
  env: &[(&str, &str)],
  timeout: Duration,
) -> CommandLog {
  let assignments = env
    .iter()
    .map(|(key, value)| format!("{key}='{value}' "))
    .collect::<String>();
  run_convoy_command_with_timeout(
    stage,
    path,
    format!("{assignments}{}", command.as_ref()),
    timeout,
  )
  .await
}

pub fn output_into_log(
  stage: &str,
  command: String,
  start_ts: i64,
  output: CommandOutput,
) -> CommandLog {
  let success = output.success();
  CommandLog {
    stage: stage.to_string(),
    stdout: output.stdout,
    stderr: output.stderr,
    command,
    success,
    start_ts,
    end_ts: convoy_timestamp(),
  }
}
