use colored::Colorize;
use comfy_table::Cell;
use convoy_client::api::{
  AssignScriptRequest, RemoveLabelRequest, SetLabelRequest,
};

use crate::args::{Cli, LabelCommand, ScriptsCommand};

use super::{client, print_json, table};

pub async fn handle_label(
  cli: &Cli,
  command: &LabelCommand,
) -> anyhow::Result<()> {
  let client = client(cli);
  let response = match command {
    LabelCommand::Get { container } => {
      client.labels(container).await?
    }
    LabelCommand::Set {
      container,
      label,
      value,
    } => {
      client
        .set_label(SetLabelRequest {
          container: container.clone(),
          label: label.clone(),
          value: value.clone(),
        })
        .await?
    }
    LabelCommand::Remove { container, label } => {
      client
        .remove_label(RemoveLabelRequest {
          container: container.clone(),
          label: label.clone(),
        })
        .await?
    }
  };
  if cli.json {
    return print_json(&response);
  }
  println!("{}", response.container.bold());
  if response.labels.is_empty() {
    println!("  (no update labels)");
    return Ok(());
  }
  let mut labels: Vec<_> = response.labels.iter().collect();
  labels.sort();
  for (key, value) in labels {
    println!("  {key} = {value}");
  }
  Ok(())
}

pub async fn handle_scripts(
  cli: &Cli,
  command: &ScriptsCommand,
) -> anyhow::Result<()> {
  let client = client(cli);
  match command {
    ScriptsCommand::List => {
      let scripts = client.scripts().await?;
      let assigned = client.assigned_scripts().await?;
      if cli.json {
        return print_json(&serde_json::json!({
          "scripts": scripts,
          "assigned": assigned,
        }));
      }
      let mut out = table();
      out.set_header(["SCRIPT", "PATH"]);
      for script in &scripts {
        out.add_row([
          Cell::new(&script.name),
          Cell::new(&script.path),
        ]);
      }
      println!("{out}");
      if !assigned.is_empty() {
        println!("\n{}", "Assigned:".bold());
        let mut assigned: Vec<_> = assigned.iter().collect();
        assigned.sort();
        for (container, script) in assigned {
          println!("  {container} -> {script}");
        }
      }
      Ok(())
    }
    ScriptsCommand::Assign { container, script } => {
      let response = client
        .assign_script(AssignScriptRequest {
          container: container.clone(),
          script: script.clone(),
        })
        .await?;
      if cli.json {
        return print_json(&response);
      }
      println!("assigned {script} to {container}");
      Ok(())
    }
    ScriptsCommand::Unassign { container } => {
      let response = client.unassign_script(container).await?;
      if cli.json {
        return print_json(&response);
      }
      println!("unassigned pre-update script from {container}");
      Ok(())
    }
  }
}
