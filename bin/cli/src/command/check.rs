use colored::Colorize;
use comfy_table::Cell;

use crate::args::Cli;

use super::{client, colored_status, print_json, table};

pub async fn handle(cli: &Cli) -> anyhow::Result<()> {
  let client = client(cli);
  let result = client.check().await?;

  if cli.json {
    return print_json(&result);
  }

  let mut out = table();
  out.set_header([
    "CONTAINER", "STACK", "IMAGE", "CURRENT", "LATEST", "CHANGE",
    "STATUS",
  ]);
  for checked in &result.containers {
    let container = &checked.container;
    let decision = &checked.decision;
    out.add_row([
      Cell::new(&container.name),
      Cell::new(container.stack.as_deref().unwrap_or("-")),
      Cell::new(format!("{}", container.image)),
      Cell::new(
        decision
          .current_version
          .as_deref()
          .unwrap_or(&container.image.tag),
      ),
      Cell::new(decision.latest_version.as_deref().unwrap_or("-")),
      Cell::new(decision.change_type.to_string()),
      Cell::new(colored_status(&decision.status.to_string())),
    ]);
  }
  println!("{out}");
  println!(
    "\n{} containers checked, {} with updates available",
    result.total,
    result.updates_available.to_string().bold()
  );
  for checked in &result.containers {
    if let Some(reason) = &checked.decision.reason {
      println!(
        "  {} {}: {reason}",
        "note".dimmed(),
        checked.container.name.bold()
      );
    }
  }
  Ok(())
}
