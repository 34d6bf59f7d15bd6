//! Rollback: restore the operation's backups, re-pull the prior
//! image, recreate and re-verify. Runs automatically from a health
//! failure under auto-rollback policy, or as an explicit operator
//! operation against a saved backup.

use std::path::Path;

use anyhow::{Context, anyhow};
use convoy_client::entities::{
  ContainerInfo, convoy_timestamp,
  event::UpdateStage,
  operation::{
    OperationStatus, OperationType, UpdateOperation,
  },
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
  config::core_config,
  engine::{HealthOutcome, compose_up, docker_client, pull_image},
  state::{compose_file_lock, store},
};

use super::{emit_progress, emit_terminal, persist};

#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
  #[error("operation not found: {0}")]
  OperationNotFound(String),
  #[error("no backups recorded for operation {0}")]
  NoBackups(String),
  #[error(transparent)]
  Failed(#[from] anyhow::Error),
}

/// Validates that an operation can be rolled back: it must exist
/// and have backup rows. Returns the original operation and its
/// backups, so callers can 404 before launching.
pub fn validate_rollback(
  operation_id: &str,
) -> Result<
  (
    UpdateOperation,
    Vec<convoy_client::entities::operation::ComposeBackup>,
  ),
  RollbackError,
> {
  let original =
    store().get_operation(operation_id).map_err(|e| match e {
      store::StoreError::NotFound(..) => {
        RollbackError::OperationNotFound(operation_id.to_string())
      }
      e => RollbackError::Failed(e.into()),
    })?;
  let backups =
    store().backups_for_operation(operation_id).map_err(|e| {
      RollbackError::Failed(anyhow::Error::from(e))
    })?;
  if backups.is_empty() {
    return Err(RollbackError::NoBackups(
      operation_id.to_string(),
    ));
  }
  Ok((original, backups))
}

/// Explicit operator rollback of a previously executed operation.
/// Restores the compose (and env) bytes, re-pulls the prior image,
/// recreates, verifies, and consumes the backup rows. The inputs
/// come from [validate_rollback]; `rollback_id` was pre-generated
/// so the caller could answer immediately.
pub async fn rollback_operation(
  rollback_id: String,
  mut original: UpdateOperation,
  backups: Vec<convoy_client::entities::operation::ComposeBackup>,
  cancel: &CancellationToken,
) -> Result<UpdateOperation, RollbackError> {
  let mut operation = UpdateOperation {
    id: rollback_id,
    container_name: original.container_name.clone(),
    stack: original.stack.clone(),
    operation_type: OperationType::Rollback,
    status: OperationStatus::InProgress,
    old_version: original.new_version.clone(),
    new_version: original.old_version.clone(),
    started_at: convoy_timestamp(),
    ..Default::default()
  };
  if let Err(e) = store().create_operation(&operation) {
    error!("failed to persist rollback operation | {e:#}");
  }

  let result = execute_rollback(
    &mut operation,
    &backups,
    &original.container_name,
    cancel,
  )
  .await;

  match result {
    Ok(()) => {
      // Consumed backups leave the listing; the files stay on disk.
      for backup in &backups {
        if let Err(e) = store().delete_backup(backup.id) {
          error!(
            "failed to drop consumed backup row {} | {e:#}",
            backup.id
          );
        }
      }
      original.rollback_occurred = true;
      if let Err(e) = store().update_operation(&original) {
        error!("failed to flag rolled-back operation | {e:#}");
      }
      operation.status = OperationStatus::RolledBack;
      operation.completed_at = Some(convoy_timestamp());
      persist(&operation);
      emit_terminal(&operation).await;
      info!(
        "rolled back {} to {}",
        operation.container_name,
        operation.new_version.as_deref().unwrap_or("backup state")
      );
      Ok(operation)
    }
    Err(e) => {
      operation.status = OperationStatus::Failed;
      operation.error_message =
        Some(format!("rollback failed: {e:#}"));
      operation.completed_at = Some(convoy_timestamp());
      persist(&operation);
      emit_terminal(&operation).await;
      Err(RollbackError::Failed(e))
    }
  }
}

async fn execute_rollback(
  operation: &mut UpdateOperation,
  backups: &[convoy_client::entities::operation::ComposeBackup],
  container_name: &str,
  cancel: &CancellationToken,
) -> anyhow::Result<()> {
  // All backups of one operation share the compose file.
  let first = &backups[0];
  let compose_file = first.compose_file_path.clone();
  let compose_path = Path::new(&compose_file);

  let file_lock = compose_file_lock(&compose_file);
  let _file_guard = file_lock.lock().await;

  emit_progress(
    operation,
    UpdateStage::Rollback,
    "restoring compose file from backup",
  )
  .await;
  for backup in backups {
    rewrite::restore_backup(
      Path::new(&backup.backup_file_path),
      Path::new(&backup.compose_file_path),
    )
    .await?;
    if let Some(env_backup) = &backup.env_backup_path
      && let Some(env_original) = env_backup.split(".backup.").next()
    {
      rewrite::restore_backup(
        Path::new(env_backup),
        Path::new(env_original),
      )
      .await?;
    }
  }

  // Figure out the restored image and service from the file itself.
  let info = crate::discovery::discover_container(container_name)
    .await?
    .ok_or_else(|| {
      anyhow!("container {container_name} no longer exists")
    })?;
  let service =
    info.service_name.clone().ok_or_else(|| {
      anyhow!("container {container_name} is not compose-managed")
    })?;
  let text = tokio::fs::read_to_string(compose_path)
    .await
    .context("failed to read restored compose file")?;
  let restored_image = rewrite::find_service_image(&text, &service)
    .map(|line| match line.env_var {
      Some(interp) => interp.default.unwrap_or(line.value),
      None => line.value,
    })
    .ok_or_else(|| {
      anyhow!("restored compose file has no image for {service}")
    })?;

  emit_progress(
    operation,
    UpdateStage::Pull,
    format!("pulling prior image {restored_image}"),
  )
  .await;
  let pull_log = pull_image(&restored_image).await;
  if !pull_log.success {
    return Err(anyhow!(
      "failed to pull prior image: {}",
      pull_log.combined_output(500)
    ));
  }

  emit_progress(
    operation,
    UpdateStage::Recreate,
    "recreating from restored compose file",
  )
  .await;
  let up_log = compose_up(compose_path, &service).await;
  if !up_log.success {
    return Err(anyhow!(
      "compose up failed after restore: {}",
      up_log.combined_output(500)
    ));
  }

  emit_progress(
    operation,
    UpdateStage::Health,
    "verifying rolled-back container",
  )
  .await;
  let outcome = docker_client()
    .wait_for_health(
      container_name,
      info.has_healthcheck,
      core_config().health_timeout,
      cancel,
    )
    .await?;
  match outcome {
    HealthOutcome::Healthy => Ok(()),
    HealthOutcome::Unhealthy(reason) => {
      Err(anyhow!("rolled-back container unhealthy: {reason}"))
    }
    HealthOutcome::Timeout => Err(anyhow!(
      "rolled-back container did not become healthy in time"
    )),
  }
}

/// In-place rollback for the auto path: the failing update still
/// holds the compose-file lock, so this restores and recreates
/// without re-acquiring it.
pub async fn restore_operation_backups(
  operation: &UpdateOperation,
  info: &ContainerInfo,
  cancel: &CancellationToken,
) -> anyhow::Result<()> {
  let backups = store()
    .backups_for_operation(&operation.id)
    .context("failed to load backups for rollback")?;
  if backups.is_empty() {
    anyhow::bail!("no backups recorded for this operation");
  }
  let service = info
    .service_name
    .clone()
    .ok_or_else(|| anyhow!("container is not compose-managed"))?;

  for backup in &backups {
    rewrite::restore_backup(
      Path::new(&backup.backup_file_path),
      Path::new(&backup.compose_file_path),
    )
    .await?;
    if let Some(env_backup) = &backup.env_backup_path
      && let Some(env_original) = env_backup.split(".backup.").next()
    {
      rewrite::restore_backup(
        Path::new(env_backup),
        Path::new(env_original),
      )
      .await?;
    }
  }

  let compose_path = Path::new(&backups[0].compose_file_path);
  let prior_image = info
    .image
    .with_tag(
      operation.old_version.as_deref().unwrap_or_default(),
    )
    .to_string();
  let pull_log = pull_image(&prior_image).await;
  if !pull_log.success {
    anyhow::bail!(
      "failed to re-pull prior image {prior_image}: {}",
      pull_log.combined_output(500)
    );
  }
  let up_log = compose_up(compose_path, &service).await;
  if !up_log.success {
    anyhow::bail!(
      "compose up failed after restore: {}",
      up_log.combined_output(500)
    );
  }
  let outcome = docker_client()
    .wait_for_health(
      &info.name,
      info.has_healthcheck,
      core_config().health_timeout,
      cancel,
    )
    .await?;
  match outcome {
    HealthOutcome::Healthy => {
      // Auto-rollback consumed the backups.
      for backup in &backups {
        if let Err(e) = store().delete_backup(backup.id) {
          error!(
            "failed to drop consumed backup row {} | {e:#}",
            backup.id
          );
        }
      }
      Ok(())
    }
    HealthOutcome::Unhealthy(reason) => {
      Err(anyhow!("container unhealthy after rollback: {reason}"))
    }
    HealthOutcome::Timeout => Err(anyhow!(
      "container did not become healthy after rollback"
    )),
  }
}
