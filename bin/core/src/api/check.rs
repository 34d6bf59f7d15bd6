use axum::{Json, extract::Path};
use convoy_client::entities::check::{
  CheckedContainer, DiscoveryResult,
};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{checker, discovery, schedule};

use super::{ApiError, ApiResult};

/// `GET /check`: full discovery + check now, cache cleared first.
pub async fn check() -> ApiResult<DiscoveryResult> {
  let result = schedule::run_check(true).await?;
  Ok(Json(result.as_ref().clone()))
}

/// `POST /trigger-check`: background-style check reusing the cache.
/// Returns immediately.
pub async fn trigger_check() -> ApiResult<serde_json::Value> {
  tokio::spawn(async {
    if let Err(e) = schedule::run_check(false).await {
      error!("triggered check failed | {e:#}");
    }
  });
  Ok(Json(serde_json::json!({ "status": "started" })))
}

/// `GET /container/{name}/recheck`
pub async fn recheck(
  Path(name): Path<String>,
) -> ApiResult<CheckedContainer> {
  let Some(container) = discovery::discover_container(&name).await?
  else {
    return Err(ApiError::not_found(format!(
      "container {name} not found"
    )));
  };
  let cancel = CancellationToken::new();
  let decision =
    checker::check_container(&container, &cancel).await;
  Ok(Json(CheckedContainer {
    container,
    decision,
  }))
}
