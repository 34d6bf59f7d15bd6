use clap::Parser;

mod args;
mod command;
mod config;

async fn app() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  logger::init(&Default::default())?;
  let cli = args::Cli::parse();

  match &cli.command {
    args::Command::Check => command::check::handle(&cli).await,
    args::Command::Update {
      containers,
      version,
    } => {
      command::update::handle_update(
        &cli,
        containers,
        version.as_deref(),
      )
      .await
    }
    args::Command::Rollback { operation_id } => {
      command::update::handle_rollback(&cli, operation_id).await
    }
    args::Command::Restart { name } => {
      command::update::handle_restart(&cli, name).await
    }
    args::Command::History { container, limit } => {
      command::history::handle_history(
        &cli,
        container.as_deref(),
        *limit,
      )
      .await
    }
    args::Command::Operations {
      container,
      status,
      operation_type,
      limit,
    } => {
      command::history::handle_operations(
        &cli,
        container.as_deref(),
        status.as_deref(),
        operation_type.as_deref(),
        *limit,
      )
      .await
    }
    args::Command::Backups => {
      command::history::handle_backups(&cli).await
    }
    args::Command::Label { command } => {
      command::label::handle_label(&cli, command).await
    }
    args::Command::Scripts { command } => {
      command::label::handle_scripts(&cli, command).await
    }
    args::Command::Api => command::api_server().await,
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  app().await
}
