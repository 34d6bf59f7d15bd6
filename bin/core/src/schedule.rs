//! The background scheduler: one long-running task doing periodic
//! discovery + check. Manual checks share [check_guard] with the
//! background run, so only one pass is ever in flight.

use std::sync::Arc;

use convoy_client::entities::{
  check::DiscoveryResult, convoy_timestamp,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
  checker::check_all,
  config::core_config,
  discovery::discover_containers,
  state::{check_guard, last_discovery, registry_manager, store},
};

pub const LAST_CACHE_REFRESH_KEY: &str = "last_cache_refresh";
pub const LAST_BACKGROUND_RUN_KEY: &str = "last_background_run";

/// One full discovery + check pass. `refresh_cache` clears the
/// registry cache first (the interactive `/check` path); the
/// lightweight path honors it.
pub async fn run_check(
  refresh_cache: bool,
) -> anyhow::Result<Arc<DiscoveryResult>> {
  let _guard = check_guard().lock().await;

  if refresh_cache {
    registry_manager().clear_cache();
    if let Err(e) = store().set_kv(
      LAST_CACHE_REFRESH_KEY,
      &convoy_timestamp().to_string(),
    ) {
      error!("failed to stamp cache refresh | {e:#}");
    }
  }

  let containers = discover_containers().await?;
  let cancel = CancellationToken::new();
  let result = Arc::new(check_all(containers, &cancel).await);
  info!(
    "check complete | {} containers, {} updates available",
    result.total, result.updates_available
  );
  *last_discovery().write().await = Some(result.clone());
  Ok(result)
}

/// Spawns the hourly (configurable) background check loop.
pub fn spawn_background_checker() {
  tokio::spawn(async move {
    let interval = core_config().check_interval;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(
      tokio::time::MissedTickBehavior::Delay,
    );
    // The immediate first tick: an initial check right after boot.
    loop {
      ticker.tick().await;
      if let Err(e) = run_check(false).await {
        error!("background check failed | {e:#}");
      }
      if let Err(e) = store().set_kv(
        LAST_BACKGROUND_RUN_KEY,
        &convoy_timestamp().to_string(),
      ) {
        error!("failed to stamp background run | {e:#}");
      }
    }
  });
}

/// Sweeps expired registry cache entries every 10 minutes.
pub fn spawn_cache_sweeper() {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(
      std::time::Duration::from_secs(600),
    );
    ticker.tick().await;
    loop {
      ticker.tick().await;
      registry_manager().sweep_caches();
    }
  });
}
