use axum::Json;
use convoy_client::{
  api::{
    BatchUpdateRequest, RestartRequest, RollbackRequest,
    UpdateRequest, UpdateStartedResponse,
  },
  entities::{operation::OperationType, plan::PlanOptions},
};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{
  checker::run_pre_update_check,
  discovery,
  orchestrator::{self, rollback},
  state::store,
};

use super::{ApiError, ApiResult};

/// `POST /update`: start (or dry-run) a single container update.
pub async fn update(
  Json(request): Json<UpdateRequest>,
) -> ApiResult<UpdateStartedResponse> {
  if request.container.is_empty() {
    return Err(ApiError::bad_request("container is required"));
  }
  // A one-off script gates this run before any planning.
  if let Some(script) = &request.script
    && let Err(output) =
      run_pre_update_check(&request.container, script).await
  {
    return Err(ApiError::bad_request(format!(
      "pre-update script refused the update: {output}"
    )));
  }

  let mut options = PlanOptions {
    include_dependents: true,
    ..Default::default()
  };
  if request.force {
    options.bypass_checks = vec![request.container.clone()];
  }
  if let Some(version) = &request.version {
    options
      .version_overrides
      .insert(request.container.clone(), version.clone());
    // An operator-requested version may move backwards.
    options.allow_downgrades = true;
  }

  let selection = vec![request.container.clone()];
  let (plan, options) =
    orchestrator::prepare(&selection, options).await?;
  if request.dry_run {
    return Ok(Json(UpdateStartedResponse {
      operation_id: None,
      status: "dry_run".to_string(),
      plan: Some(plan),
    }));
  }
  let ids =
    orchestrator::launch(plan, options, OperationType::Single, None)?;
  Ok(Json(UpdateStartedResponse {
    operation_id: ids.into_iter().next(),
    status: "started".to_string(),
    plan: None,
  }))
}

/// `POST /update/batch`: start (or dry-run) a batch. The batch is
/// journaled into the update queue first so a daemon restart can
/// resume it.
pub async fn update_batch(
  Json(request): Json<BatchUpdateRequest>,
) -> ApiResult<UpdateStartedResponse> {
  if request.containers.is_empty() {
    return Err(ApiError::bad_request(
      "containers must be non-empty",
    ));
  }
  let mut options = PlanOptions {
    include_dependents: request.include_dependents,
    allow_downgrades: request.allow_downgrades,
    abort_on_failure: request.abort_on_failure,
    ..Default::default()
  };
  if request.force {
    options.bypass_checks = request.containers.clone();
  }

  let (plan, options) =
    orchestrator::prepare(&request.containers, options).await?;
  if request.dry_run {
    return Ok(Json(UpdateStartedResponse {
      operation_id: None,
      status: "dry_run".to_string(),
      plan: Some(plan),
    }));
  }
  let stack = plan
    .affected
    .first()
    .and_then(|c| c.stack.clone());
  let queue_id = store()
    .enqueue_update(stack.as_deref(), &request.containers, 0)
    .map_err(|e| {
      error!("failed to journal batch | {e:#}");
      ApiError::internal("failed to journal batch")
    })?;
  let ids = orchestrator::launch(
    plan,
    options,
    OperationType::Batch,
    Some(queue_id),
  )?;
  Ok(Json(UpdateStartedResponse {
    operation_id: ids.into_iter().next(),
    status: "started".to_string(),
    plan: None,
  }))
}

/// `POST /rollback`: start a rollback from a saved backup.
pub async fn rollback(
  Json(request): Json<RollbackRequest>,
) -> ApiResult<UpdateStartedResponse> {
  let (original, backups) =
    rollback::validate_rollback(&request.operation_id)?;
  let rollback_id = orchestrator::new_operation_id();
  let response_id = rollback_id.clone();
  tokio::spawn(async move {
    let cancel = CancellationToken::new();
    if let Err(e) = rollback::rollback_operation(
      rollback_id, original, backups, &cancel,
    )
    .await
    {
      error!("rollback failed | {e:#}");
    }
  });
  Ok(Json(UpdateStartedResponse {
    operation_id: Some(response_id),
    status: "started".to_string(),
    plan: None,
  }))
}

/// `POST /restart`: run the short restart pipeline as a first-class
/// operation.
pub async fn restart(
  Json(request): Json<RestartRequest>,
) -> ApiResult<UpdateStartedResponse> {
  let Some(info) =
    discovery::discover_container(&request.container).await?
  else {
    return Err(ApiError::not_found(format!(
      "container {} not found",
      request.container
    )));
  };
  let operation = orchestrator::new_restart_operation(&info);
  let operation_id = operation.id.clone();
  tokio::spawn(async move {
    let cancel = CancellationToken::new();
    orchestrator::run_restart(operation, &info, &cancel).await;
  });
  Ok(Json(UpdateStartedResponse {
    operation_id: Some(operation_id),
    status: "started".to_string(),
    plan: None,
  }))
}
