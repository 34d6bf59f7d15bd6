use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
  name = "convoy",
  about = "Container fleet update manager",
  version
)]
pub struct Cli {
  /// Print raw JSON instead of tables.
  #[arg(long, global = true)]
  pub json: bool,

  /// Plan only, execute nothing.
  #[arg(long, global = true)]
  pub dry_run: bool,

  /// Bypass failing pre-update checks.
  #[arg(long, global = true)]
  pub force: bool,

  /// Daemon address (default http://127.0.0.1:9080, or
  /// CONVOY_ADDRESS).
  #[arg(long, global = true)]
  pub address: Option<String>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
  /// Discover containers and check registries for updates.
  Check,
  /// Update one or more containers.
  Update {
    containers: Vec<String>,
    /// Explicit target version (single container only).
    #[arg(long)]
    version: Option<String>,
  },
  /// Roll back a previous operation from its backup.
  Rollback { operation_id: String },
  /// Restart a container (and wait for health).
  Restart { name: String },
  /// Recent operation history.
  History {
    #[arg(long)]
    container: Option<String>,
    #[arg(long, default_value_t = 20)]
    limit: usize,
  },
  /// List operations with filters.
  Operations {
    #[arg(long)]
    container: Option<String>,
    #[arg(long)]
    status: Option<String>,
    #[arg(long = "type")]
    operation_type: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
  },
  /// Outstanding compose backups.
  Backups,
  /// Read or override container update labels.
  Label {
    #[command(subcommand)]
    command: LabelCommand,
  },
  /// Manage pre-update check scripts.
  Scripts {
    #[command(subcommand)]
    command: ScriptsCommand,
  },
  /// Run the Convoy Core API server in the foreground.
  Api,
}

#[derive(Subcommand)]
pub enum LabelCommand {
  Get {
    container: String,
  },
  Set {
    container: String,
    label: String,
    value: String,
  },
  Remove {
    container: String,
    label: String,
  },
}

#[derive(Subcommand)]
pub enum ScriptsCommand {
  List,
  Assign {
    container: String,
    script: String,
  },
  Unassign {
    container: String,
  },
}
