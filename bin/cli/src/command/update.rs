use anyhow::Context;
use colored::Colorize;
use convoy_client::api::{BatchUpdateRequest, UpdateRequest};

use crate::args::Cli;

use super::{client, print_json};

pub async fn handle_update(
  cli: &Cli,
  containers: &[String],
  version: Option<&str>,
) -> anyhow::Result<()> {
  if containers.is_empty() {
    anyhow::bail!("at least one container is required");
  }
  if version.is_some() && containers.len() > 1 {
    anyhow::bail!(
      "--version only makes sense with a single container"
    );
  }
  let client = client(cli);

  let response = if containers.len() == 1 {
    client
      .update(UpdateRequest {
        container: containers[0].clone(),
        version: version.map(|v| v.to_string()),
        script: None,
        dry_run: cli.dry_run,
        force: cli.force,
      })
      .await?
  } else {
    client
      .update_batch(BatchUpdateRequest {
        containers: containers.to_vec(),
        include_dependents: true,
        allow_downgrades: false,
        abort_on_failure: false,
        dry_run: cli.dry_run,
        force: cli.force,
      })
      .await?
  };

  if cli.json {
    return print_json(&response);
  }
  if let Some(plan) = &response.plan {
    println!("{}", "Planned execution order:".bold());
    for (index, name) in plan.execution_order.iter().enumerate() {
      let marker = if plan.restart_only.contains(name) {
        "(restart only)".dimmed().to_string()
      } else {
        String::new()
      };
      println!("  {}. {name} {marker}", index + 1);
    }
    for warning in &plan.warnings {
      println!("{} {warning}", "warning:".yellow());
    }
    return Ok(());
  }
  println!(
    "update {} | operation {}",
    response.status.bold(),
    response
      .operation_id
      .as_deref()
      .unwrap_or("-")
      .bold()
  );
  Ok(())
}

pub async fn handle_rollback(
  cli: &Cli,
  operation_id: &str,
) -> anyhow::Result<()> {
  let client = client(cli);
  let response = client
    .rollback(operation_id)
    .await
    .context("rollback request failed")?;
  if cli.json {
    return print_json(&response);
  }
  println!(
    "rollback {} | operation {}",
    response.status.bold(),
    response.operation_id.as_deref().unwrap_or("-").bold()
  );
  Ok(())
}

pub async fn handle_restart(
  cli: &Cli,
  name: &str,
) -> anyhow::Result<()> {
  let client = client(cli);
  let response = client.restart(name).await?;
  if cli.json {
    return print_json(&response);
  }
  println!(
    "restart {} | operation {}",
    response.status.bold(),
    response.operation_id.as_deref().unwrap_or("-").bold()
  );
  Ok(())
}
