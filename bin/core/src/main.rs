use std::{net::SocketAddr, str::FromStr};

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::core_config;

mod api;
mod checker;
mod config;
mod discovery;
mod engine;
mod orchestrator;
mod planner;
mod schedule;
mod startup;
mod state;

async fn app() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  let config = core_config();
  logger::init(&config.logging)?;

  info!("Convoy Core version: v{}", env!("CARGO_PKG_VERSION"));
  info!("{}", config.sanitized_json());

  // Crash early when the database or engine are unreachable.
  state::init_store();
  engine::docker_client();

  // Reconcile state left over from the previous run.
  startup::on_startup().await;

  // Background tasks.
  schedule::spawn_background_checker();
  schedule::spawn_cache_sweeper();

  let app = api::router()
    .layer(
      CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any),
    )
    .into_make_service();

  let addr = format!("{}:{}", config.bind_ip, config.port);
  let socket_addr = SocketAddr::from_str(&addr)
    .context("failed to parse listen address")?;
  info!("Convoy Core starting on http://{socket_addr}");
  axum_server::bind(socket_addr)
    .serve(app)
    .await
    .context("failed to start http server")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let mut term_signal = tokio::signal::unix::signal(
    tokio::signal::unix::SignalKind::terminate(),
  )?;
  tokio::select! {
    res = tokio::spawn(app()) => res?,
    _ = term_signal.recv() => Ok(()),
  }
}
