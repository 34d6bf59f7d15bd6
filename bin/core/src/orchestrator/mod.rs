//! The update orchestrator: drives each planned container through
//! the pre-check / backup / rewrite / pull / recreate / health
//! pipeline, persisting every transition and emitting progress
//! events. Containers execute strictly in plan order; compose-file
//! locks serialize services sharing a file.

use std::path::Path;

use convoy_client::entities::{
  CommandLog, ContainerInfo, ImageRef, compact_timestamp,
  convoy_timestamp,
  event::{Event, UpdateStage},
  operation::{
    ComposeBackup, OperationStatus, OperationType, UpdateOperation,
  },
  plan::{PlanOptions, UpdatePlan},
};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
  checker::{
    policy::{LabelPolicy, resolve_labels},
    run_pre_update_check,
  },
  config::core_config,
  discovery::env_file_path,
  engine::{
    HealthOutcome, compose_restart, compose_up, docker_client,
    pull_image, restart_container,
  },
  state::{compose_file_lock, event_bus, store},
};

pub mod actions;
pub mod rollback;

fn random_string(length: usize) -> String {
  rand::rng()
    .sample_iter(&rand::distr::Alphanumeric)
    .take(length)
    .map(char::from)
    .collect::<String>()
    .to_lowercase()
}

/// Operation ids sort chronologically: `YYYYMMDDHHMMSS-xxxxxx`.
pub fn new_operation_id() -> String {
  format!("{}-{}", compact_timestamp(), random_string(6))
}

/// Creates the queued operation rows for a plan's update containers
/// before execution starts, so callers can hand ids back
/// immediately. The caller has already resolved every target into
/// `options.version_overrides`.
pub fn create_queued_operations(
  plan: &UpdatePlan,
  options: &PlanOptions,
  operation_type: OperationType,
) -> Vec<UpdateOperation> {
  let mut operations = Vec::new();
  for name in &plan.execution_order {
    if plan.is_restart_only(name) {
      continue;
    }
    let Some(info) = plan.container(name) else {
      continue;
    };
    let operation = UpdateOperation {
      id: new_operation_id(),
      container_name: info.name.clone(),
      stack: info.stack.clone(),
      operation_type,
      status: OperationStatus::Queued,
      old_version: Some(info.image.tag.clone()),
      new_version: options.version_overrides.get(name).cloned(),
      started_at: convoy_timestamp(),
      ..Default::default()
    };
    if let Err(e) = store().create_operation(&operation) {
      error!("failed to persist operation | {e:#}");
    }
    operations.push(operation);
  }
  operations
}

/// Executes a validated plan sequentially in execution order.
/// `operations` are the pre-created rows from
/// [create_queued_operations].
pub async fn execute_plan(
  plan: &UpdatePlan,
  options: &PlanOptions,
  mut operations: Vec<UpdateOperation>,
  cancel: &CancellationToken,
) -> Vec<String> {
  let mut operation_ids = Vec::new();
  // The last update operation whose dependents are being restarted.
  let mut trigger_op: Option<UpdateOperation> = None;

  for name in &plan.execution_order {
    let Some(info) = plan.container(name) else {
      continue;
    };
    let operation = if plan.is_restart_only(name) {
      let restart_op = new_restart_operation(info);
      let operation =
        run_restart(restart_op, info, cancel).await;
      if let Some(trigger) = &mut trigger_op {
        trigger.dependents_affected.push(name.clone());
        if let Err(e) = store().update_operation(trigger) {
          warn!(
            "failed to record dependent {name} on {} | {e:#}",
            trigger.id
          );
        }
      }
      operation
    } else {
      let Some(index) = operations
        .iter()
        .position(|op| op.container_name == *name)
      else {
        continue;
      };
      let operation = run_update(
        operations.remove(index),
        info,
        plan.bypassed.contains(name),
        cancel,
      )
      .await;
      trigger_op = Some(operation.clone());
      operation
    };
    let failed = operation.status == OperationStatus::Failed;
    operation_ids.push(operation.id);
    if failed && options.abort_on_failure {
      warn!("aborting plan after failure of {name}");
      break;
    }
  }
  operation_ids
}

/// Runs one container's update pipeline end to end, with the
/// configured hard ceiling on the whole operation. The operation row
/// was already created queued.
pub async fn run_update(
  mut operation: UpdateOperation,
  info: &ContainerInfo,
  bypass_pre_check: bool,
  cancel: &CancellationToken,
) -> UpdateOperation {
  emit_progress(&operation, UpdateStage::Queued, "queued").await;

  let timeout = core_config().operation_timeout;
  match tokio::time::timeout(
    timeout,
    drive_update(&mut operation, info, bypass_pre_check, cancel),
  )
  .await
  {
    Ok(()) => {}
    Err(_) => {
      fail(
        &mut operation,
        UpdateStage::Failed,
        format!(
          "operation exceeded the {}s ceiling",
          timeout.as_secs()
        ),
      )
      .await;
    }
  }
  operation
}

/// The state machine proper. Mutates `operation` into a terminal
/// state (or pending_restart for self targets).
async fn drive_update(
  operation: &mut UpdateOperation,
  info: &ContainerInfo,
  bypass_pre_check: bool,
  cancel: &CancellationToken,
) {
  let config = core_config();
  let policy = resolve_labels(&info.labels, &config.label_namespace);

  let Some(new_version) = operation.new_version.clone() else {
    fail(
      operation,
      UpdateStage::Failed,
      "no target version resolved for update",
    )
    .await;
    return;
  };
  let (Some(compose_file), Some(service)) =
    (info.compose_file.clone(), info.service_name.clone())
  else {
    fail(
      operation,
      UpdateStage::Failed,
      "container is not compose-managed, cannot rewrite",
    )
    .await;
    return;
  };
  let compose_path = Path::new(&compose_file);
  // A compose mismatch reconciles toward the file: when the declared
  // repository differs from what is running, the declared reference
  // is the pull / recreate target and the rewrite is a no-op. Only
  // same-repository updates move the tag.
  let new_image =
    match info.compose_image.as_deref().map(ImageRef::parse) {
      Some(declared)
        if declared.repository != info.image.repository =>
      {
        declared.with_tag(&new_version).to_string()
      }
      _ => info.image.with_tag(&new_version).to_string(),
    };

  // PRE_CHECK: the discovery-time result may be stale, run again.
  if cancelled(operation, cancel).await {
    return;
  }
  emit_progress(
    operation,
    UpdateStage::PreCheck,
    "running pre-update check",
  )
  .await;
  if !bypass_pre_check
    && let Some(script) = &policy.pre_update_check
    && let Err(output) =
      run_pre_update_check(&info.name, script).await
  {
    fail(
      operation,
      UpdateStage::Failed,
      format!("pre-update check refused the update: {output}"),
    )
    .await;
    return;
  }

  // Exclusive per compose file from BACKUP through HEALTH.
  let file_lock = compose_file_lock(&compose_file);
  let _file_guard = file_lock.lock().await;

  // BACKUP: fatal on failure, nothing has been mutated yet.
  if cancelled(operation, cancel).await {
    return;
  }
  emit_progress(
    operation,
    UpdateStage::Backup,
    "backing up compose file",
  )
  .await;
  let stamp = compact_timestamp();
  let backup_file = match rewrite::create_backup(
    compose_path,
    &stamp,
  )
  .await
  {
    Ok(path) => path,
    Err(e) => {
      fail(
        operation,
        UpdateStage::Failed,
        format!("backup failed: {e:#}"),
      )
      .await;
      return;
    }
  };
  let env_path = info
    .env_var_name
    .as_ref()
    .and_then(|_| env_file_path(&compose_file))
    .filter(|p| p.is_file());
  let mut env_backup = None;
  if let Some(env_path) = &env_path {
    match rewrite::create_backup(env_path, &stamp).await {
      Ok(path) => env_backup = Some(path),
      Err(e) => {
        fail(
          operation,
          UpdateStage::Failed,
          format!("env file backup failed: {e:#}"),
        )
        .await;
        return;
      }
    }
  }
  operation.status = OperationStatus::InProgress;
  let backup_row = ComposeBackup {
    operation_id: operation.id.clone(),
    container_name: info.name.clone(),
    stack: info.stack.clone(),
    compose_file_path: compose_file.clone(),
    backup_file_path: backup_file.display().to_string(),
    env_backup_path: env_backup
      .as_ref()
      .map(|p| p.display().to_string()),
    backup_timestamp: convoy_timestamp(),
    ..Default::default()
  };
  if let Err(e) = store().record_backup(operation, &backup_row) {
    fail(
      operation,
      UpdateStage::Failed,
      format!("failed to persist backup record: {e:#}"),
    )
    .await;
    return;
  }

  // REWRITE: temp file + rename, one contiguous byte change.
  if cancelled(operation, cancel).await {
    return;
  }
  emit_progress(
    operation,
    UpdateStage::Rewrite,
    format!("writing image {new_image}"),
  )
  .await;
  if let Err(e) =
    apply_rewrite(compose_path, &service, info, &new_image).await
  {
    fail(
      operation,
      UpdateStage::Failed,
      format!("compose rewrite failed: {e:#}"),
    )
    .await;
    return;
  }

  // PULL: on failure restore the compose file and stop, the old
  // container is still running untouched.
  if cancelled(operation, cancel).await {
    return;
  }
  emit_progress(
    operation,
    UpdateStage::Pull,
    format!("pulling {new_image}"),
  )
  .await;
  let pull_log = pull_image(&new_image).await;
  if !pull_log.success {
    restore_files(&backup_file, compose_path, &env_backup, &env_path)
      .await;
    fail(
      operation,
      UpdateStage::Failed,
      format!(
        "image pull failed: {}",
        pull_log.combined_output(500)
      ),
    )
    .await;
    return;
  }
  operation.pulled_digest = docker_client()
    .image_digest(&ImageRef::parse(&new_image), &new_image)
    .await
    .ok()
    .flatten();
  persist(operation);

  // Self target: mark pending_restart before recreating, the
  // startup resume pass finishes the record.
  if info.name == config.self_container_name {
    operation.status = OperationStatus::PendingRestart;
    persist(operation);
    emit_progress(
      operation,
      UpdateStage::Recreate,
      "recreating the daemon's own container",
    )
    .await;
    info!(
      "self-update: recreating {} and awaiting restart",
      info.name
    );
    let log = compose_up(compose_path, &service).await;
    if !log.success {
      fail(
        operation,
        UpdateStage::Failed,
        format!(
          "self recreate failed: {}",
          log.combined_output(500)
        ),
      )
      .await;
    }
    return;
  }

  // RECREATE
  if cancelled(operation, cancel).await {
    return;
  }
  emit_progress(
    operation,
    UpdateStage::Recreate,
    "recreating service",
  )
  .await;
  let up_log = compose_up(compose_path, &service).await;
  if !up_log.success {
    fail(
      operation,
      UpdateStage::Failed,
      format!(
        "compose up failed: {}",
        up_log.combined_output(500)
      ),
    )
    .await;
    return;
  }

  // HEALTH
  emit_progress(
    operation,
    UpdateStage::Health,
    "waiting for health",
  )
  .await;
  let outcome = match docker_client()
    .wait_for_health(
      &info.name,
      info.has_healthcheck,
      config.health_timeout,
      cancel,
    )
    .await
  {
    Ok(outcome) => outcome,
    Err(e) => {
      fail(
        operation,
        UpdateStage::Failed,
        format!("health wait aborted: {e:#}"),
      )
      .await;
      return;
    }
  };
  if outcome != HealthOutcome::Healthy {
    let reason = match outcome {
      HealthOutcome::Unhealthy(reason) => reason,
      _ => format!(
        "container did not become healthy within {}s",
        config.health_timeout.as_secs()
      ),
    };
    handle_health_failure(operation, info, &policy, reason, cancel)
      .await;
    return;
  }

  // POST_ACTIONS: failures surface but never roll back.
  if let Some(spec) = &policy.post_update {
    emit_progress(
      operation,
      UpdateStage::PostActions,
      "running post-update actions",
    )
    .await;
    if let Err(e) = actions::run_post_update(spec, info).await {
      warn!(
        "post-update action failed for {} | {e}",
        info.name
      );
      operation.error_message =
        Some(format!("post-update action failed: {e}"));
    }
  }

  operation.status = OperationStatus::Complete;
  operation.completed_at = Some(convoy_timestamp());
  persist(operation);
  emit_progress(operation, UpdateStage::Complete, "update complete")
    .await;
  emit_terminal(operation).await;
  info!(
    "updated {} {} -> {new_version}",
    info.name,
    operation.old_version.as_deref().unwrap_or("?")
  );
}

/// Auto-rollback on health failure is policy driven: the label wins,
/// then the stored container / stack / global rows.
async fn handle_health_failure(
  operation: &mut UpdateOperation,
  info: &ContainerInfo,
  policy: &LabelPolicy,
  reason: String,
  cancel: &CancellationToken,
) {
  let auto_rollback = match policy.auto_rollback {
    Some(value) => value,
    None => store()
      .rollback_policy(&info.name, info.stack.as_deref())
      .map(|p| p.auto_rollback_enabled)
      .unwrap_or(false),
  };
  if !auto_rollback {
    fail(operation, UpdateStage::Failed, reason).await;
    return;
  }

  emit_progress(
    operation,
    UpdateStage::Rollback,
    "health verification failed, rolling back",
  )
  .await;
  match rollback::restore_operation_backups(operation, info, cancel)
    .await
  {
    Ok(()) => {
      operation.status = OperationStatus::RolledBack;
      operation.rollback_occurred = true;
      operation.error_message = Some(reason);
      operation.completed_at = Some(convoy_timestamp());
      persist(operation);
      emit_terminal(operation).await;
    }
    Err(e) => {
      // A failed rollback is terminal with a compound message.
      operation.rollback_occurred = true;
      fail(
        operation,
        UpdateStage::Failed,
        format!("{reason}; rollback also failed: {e:#}"),
      )
      .await;
    }
  }
}

/// Creates and persists the operation row for a restart pipeline.
pub fn new_restart_operation(
  info: &ContainerInfo,
) -> UpdateOperation {
  let operation = UpdateOperation {
    id: new_operation_id(),
    container_name: info.name.clone(),
    stack: info.stack.clone(),
    operation_type: OperationType::Restart,
    status: OperationStatus::InProgress,
    started_at: convoy_timestamp(),
    ..Default::default()
  };
  if let Err(e) = store().create_operation(&operation) {
    error!("failed to persist operation | {e:#}");
  }
  operation
}

/// The shorter pipeline restart-only dependents (and explicit
/// restarts) run: recreate via restart, then health.
pub async fn run_restart(
  mut operation: UpdateOperation,
  info: &ContainerInfo,
  cancel: &CancellationToken,
) -> UpdateOperation {
  emit_progress(
    &operation,
    UpdateStage::Recreate,
    "restarting container",
  )
  .await;
  let log: CommandLog = match (&info.compose_file, &info.service_name)
  {
    (Some(file), Some(service)) => {
      compose_restart(Path::new(file), service).await
    }
    _ => restart_container(&info.name).await,
  };
  if !log.success {
    fail(
      &mut operation,
      UpdateStage::Failed,
      format!("restart failed: {}", log.combined_output(500)),
    )
    .await;
    return operation;
  }

  emit_progress(
    &operation,
    UpdateStage::Health,
    "waiting for health",
  )
  .await;
  let healthy = docker_client()
    .wait_for_health(
      &info.name,
      info.has_healthcheck,
      core_config().health_timeout,
      cancel,
    )
    .await;
  match healthy {
    Ok(HealthOutcome::Healthy) => {
      operation.status = OperationStatus::Complete;
      operation.completed_at = Some(convoy_timestamp());
      persist(&operation);
      emit_progress(
        &operation,
        UpdateStage::Complete,
        "restart complete",
      )
      .await;
      emit_terminal(&operation).await;
    }
    Ok(HealthOutcome::Unhealthy(reason)) => {
      fail(&mut operation, UpdateStage::Failed, reason).await;
    }
    Ok(HealthOutcome::Timeout) => {
      fail(
        &mut operation,
        UpdateStage::Failed,
        "container did not become healthy after restart",
      )
      .await;
    }
    Err(e) => {
      fail(
        &mut operation,
        UpdateStage::Failed,
        format!("health wait aborted: {e:#}"),
      )
      .await;
    }
  }
  operation
}

async fn apply_rewrite(
  compose_path: &Path,
  service: &str,
  info: &ContainerInfo,
  new_image: &str,
) -> anyhow::Result<()> {
  let text = tokio::fs::read_to_string(compose_path).await?;
  let rewritten =
    rewrite::rewrite_image(&text, service, new_image)?;
  if rewritten != text {
    rewrite::write_atomic(compose_path, &rewritten).await?;
  }
  if let Some(var) = &info.env_var_name
    && let Some(env_path) =
      env_file_path(&compose_path.display().to_string())
  {
    let env_text = tokio::fs::read_to_string(&env_path)
      .await
      .unwrap_or_default();
    let rewritten_env =
      rewrite::rewrite_env_var(&env_text, var, new_image);
    rewrite::write_atomic(&env_path, &rewritten_env).await?;
  }
  Ok(())
}

async fn restore_files(
  backup_file: &Path,
  compose_path: &Path,
  env_backup: &Option<std::path::PathBuf>,
  env_path: &Option<std::path::PathBuf>,
) {
  if let Err(e) =
    rewrite::restore_backup(backup_file, compose_path).await
  {
    error!("failed to restore compose file after failure | {e:#}");
  }
  if let (Some(backup), Some(original)) = (env_backup, env_path)
    && let Err(e) = rewrite::restore_backup(backup, original).await
  {
    error!("failed to restore env file after failure | {e:#}");
  }
}

/// Cancellation does not auto-rollback: the operation fails with the
/// backup left in place for manual rollback.
async fn cancelled(
  operation: &mut UpdateOperation,
  cancel: &CancellationToken,
) -> bool {
  if !cancel.is_cancelled() {
    return false;
  }
  fail(operation, UpdateStage::Failed, "cancelled").await;
  true
}

fn persist(operation: &UpdateOperation) {
  if let Err(e) = store().update_operation(operation) {
    error!(
      "failed to persist operation {} | {e:#}",
      operation.id
    );
  }
}

async fn fail(
  operation: &mut UpdateOperation,
  stage: UpdateStage,
  message: impl Into<String>,
) {
  let message = message.into();
  operation.status = OperationStatus::Failed;
  operation.error_message = Some(message.clone());
  operation.completed_at = Some(convoy_timestamp());
  persist(operation);
  emit_progress(operation, stage, message).await;
  emit_terminal(operation).await;
}

async fn emit_progress(
  operation: &UpdateOperation,
  stage: UpdateStage,
  message: impl Into<String>,
) {
  event_bus()
    .publish(Event::UpdateProgress {
      operation_id: operation.id.clone(),
      container_name: operation.container_name.clone(),
      stage,
      progress: stage.progress(),
      message: message.into(),
    })
    .await;
}

async fn emit_terminal(operation: &UpdateOperation) {
  event_bus()
    .publish(Event::ContainerUpdated {
      name: operation.container_name.clone(),
      old_version: operation.old_version.clone(),
      new_version: operation.new_version.clone(),
      status: operation.status,
    })
    .await;
}

#[derive(Debug, thiserror::Error)]
pub enum StartUpdateError {
  #[error(transparent)]
  Plan(#[from] crate::planner::PlanError),
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

/// Builds a plan for the given selection from a fresh (cached)
/// check and resolves every update target into
/// `options.version_overrides` (explicit version, else the
/// checker's latest).
pub async fn prepare(
  containers: &[String],
  mut options: PlanOptions,
) -> Result<(UpdatePlan, PlanOptions), StartUpdateError> {
  let discovery = crate::schedule::run_check(false).await?;
  let namespace = &core_config().label_namespace;
  let plan = crate::planner::build_plan(
    containers, &discovery, &options, namespace,
  )?;
  for name in &plan.execution_order {
    if plan.is_restart_only(name)
      || options.version_overrides.contains_key(name)
    {
      continue;
    }
    if let Some(checked) = discovery.get(name)
      && let Some(latest) = checked.decision.latest_version.clone()
    {
      options.version_overrides.insert(name.clone(), latest);
    }
  }
  Ok((plan, options))
}

/// Validates and launches a prepared plan in the background.
/// Returns the pre-created operation ids in execution order.
pub fn launch(
  plan: UpdatePlan,
  options: PlanOptions,
  operation_type: OperationType,
  queue_id: Option<i64>,
) -> Result<Vec<String>, StartUpdateError> {
  crate::planner::validate_plan(
    &plan,
    &core_config().label_namespace,
  )?;
  let operations =
    create_queued_operations(&plan, &options, operation_type);
  let ids = operations
    .iter()
    .map(|op| op.id.clone())
    .collect::<Vec<_>>();
  tokio::spawn(async move {
    let cancel = CancellationToken::new();
    execute_plan(&plan, &options, operations, &cancel).await;
    if let Some(queue_id) = queue_id
      && let Err(e) = store().dequeue_update(queue_id)
    {
      warn!("failed to drop executed queue row {queue_id} | {e:#}");
    }
  });
  Ok(ids)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn operation_ids_sort_chronologically() {
    let id = new_operation_id();
    assert_eq!(id.len(), 14 + 1 + 6);
    let (stamp, suffix) = id.split_once('-').unwrap();
    assert!(stamp.bytes().all(|b| b.is_ascii_digit()));
    assert!(suffix.bytes().all(|b| b.is_ascii_alphanumeric()));
  }
}
