use std::str::FromStr;

use comfy_table::Cell;
use convoy_client::{
  api::OperationsQuery,
  entities::operation::{OperationStatus, OperationType},
};

use crate::args::Cli;

use super::{client, colored_status, format_ts, print_json, table};

pub async fn handle_history(
  cli: &Cli,
  container: Option<&str>,
  limit: usize,
) -> anyhow::Result<()> {
  handle_operations(cli, container, None, None, Some(limit)).await
}

pub async fn handle_operations(
  cli: &Cli,
  container: Option<&str>,
  status: Option<&str>,
  operation_type: Option<&str>,
  limit: Option<usize>,
) -> anyhow::Result<()> {
  let status = status
    .map(|raw| {
      OperationStatus::from_str(raw).map_err(|_| {
        anyhow::anyhow!("unknown operation status '{raw}'")
      })
    })
    .transpose()?;
  let operation_type = operation_type
    .map(|raw| {
      OperationType::from_str(raw).map_err(|_| {
        anyhow::anyhow!("unknown operation type '{raw}'")
      })
    })
    .transpose()?;

  let client = client(cli);
  let operations = client
    .list_operations(&OperationsQuery {
      container: container.map(|c| c.to_string()),
      status,
      operation_type,
      limit,
    })
    .await?;

  if cli.json {
    return print_json(&operations);
  }
  let mut out = table();
  out.set_header([
    "OPERATION", "CONTAINER", "TYPE", "FROM", "TO", "STARTED",
    "STATUS",
  ]);
  for op in &operations {
    out.add_row([
      Cell::new(&op.id),
      Cell::new(&op.container_name),
      Cell::new(op.operation_type.to_string()),
      Cell::new(op.old_version.as_deref().unwrap_or("-")),
      Cell::new(op.new_version.as_deref().unwrap_or("-")),
      Cell::new(format_ts(op.started_at)),
      Cell::new(colored_status(&op.status.to_string())),
    ]);
  }
  println!("{out}");
  for op in &operations {
    if let Some(message) = &op.error_message {
      println!("  {} {}: {message}", op.id, op.container_name);
    }
  }
  Ok(())
}

pub async fn handle_backups(cli: &Cli) -> anyhow::Result<()> {
  let client = client(cli);
  let response = client.backups().await?;
  if cli.json {
    return print_json(&response);
  }
  let mut out = table();
  out.set_header([
    "ID",
    "OPERATION",
    "CONTAINER",
    "COMPOSE FILE",
    "BACKUP",
    "CREATED",
  ]);
  for backup in &response.backups {
    out.add_row([
      Cell::new(backup.id),
      Cell::new(&backup.operation_id),
      Cell::new(&backup.container_name),
      Cell::new(&backup.compose_file_path),
      Cell::new(&backup.backup_file_path),
      Cell::new(format_ts(backup.backup_timestamp)),
    ]);
  }
  println!("{out}");
  Ok(())
}
