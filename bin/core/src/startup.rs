//! Startup reconciliation: finalize operations interrupted by the
//! last shutdown, re-enqueue surviving batch rows, and snapshot the
//! effective config.

use convoy_client::entities::{
  convoy_timestamp,
  operation::{OperationStatus, OperationType},
  plan::PlanOptions,
};
use tracing::{error, info, warn};

use crate::{
  config::core_config,
  engine::docker_client,
  orchestrator,
  state::store,
};

pub async fn on_startup() {
  resume_unfinished_operations().await;
  write_config_snapshot();
  resume_update_queue().await;
}

/// `pending_restart` rows belong to a self-update that replaced this
/// daemon: a row naming the daemon's own container is finalized
/// complete, with the digest verification result recorded in the
/// message. Anything else in flight was interrupted and fails.
async fn resume_unfinished_operations() {
  let operations = match store().unfinished_operations() {
    Ok(operations) => operations,
    Err(e) => {
      error!("failed to load unfinished operations | {e:#}");
      return;
    }
  };
  for mut operation in operations {
    match operation.status {
      OperationStatus::PendingRestart => {
        let self_name = &core_config().self_container_name;
        if operation.container_name == *self_name {
          let verification =
            verify_self_digest(&operation).await;
          operation.status = OperationStatus::Complete;
          operation.error_message = Some(format!(
            "self-update finalized after daemon restart ({verification})"
          ));
          info!(
            "finalized self-update {} ({verification})",
            operation.id
          );
        } else {
          operation.status = OperationStatus::Failed;
          operation.error_message = Some(
            "pending_restart operation does not name the daemon's \
             own container"
              .to_string(),
          );
          warn!(
            "refusing to finalize pending_restart for {}",
            operation.container_name
          );
        }
        operation.completed_at = Some(convoy_timestamp());
      }
      OperationStatus::Queued | OperationStatus::InProgress => {
        operation.status = OperationStatus::Failed;
        operation.error_message =
          Some("interrupted by daemon restart".to_string());
        operation.completed_at = Some(convoy_timestamp());
      }
      _ => continue,
    }
    if let Err(e) = store().update_operation(&operation) {
      error!(
        "failed to persist resumed operation {} | {e:#}",
        operation.id
      );
    }
  }
}

/// Compares the digest recorded at PULL time with what the daemon's
/// container is actually running. The result is reported, not
/// enforced.
async fn verify_self_digest(
  operation: &convoy_client::entities::operation::UpdateOperation,
) -> String {
  let Some(expected) = &operation.pulled_digest else {
    return "no pulled digest recorded, skipped verification"
      .to_string();
  };
  let self_name = &core_config().self_container_name;
  let running = async {
    let inspected =
      docker_client().inspect_container(self_name).await.ok()?;
    let image = convoy_client::entities::ImageRef::parse(
      &inspected.image,
    );
    docker_client()
      .image_digest(
        &image,
        inspected.image_id.as_deref().unwrap_or(&inspected.image),
      )
      .await
      .ok()
      .flatten()
  }
  .await;
  match running {
    Some(digest) if digest == *expected => {
      "running digest matches pulled digest".to_string()
    }
    Some(digest) => format!(
      "running digest {digest} does not match pulled digest {expected}"
    ),
    None => "running digest unavailable for verification"
      .to_string(),
  }
}

/// Snapshot the effective sanitized config when it changed since the
/// last snapshot.
fn write_config_snapshot() {
  let current = core_config().sanitized_json();
  match store().latest_config_snapshot() {
    Ok(Some(previous)) if previous == current => {}
    Ok(_) => {
      if let Err(e) =
        store().insert_config_snapshot(&current, "startup")
      {
        error!("failed to write config snapshot | {e:#}");
      }
    }
    Err(e) => error!("failed to read config snapshots | {e:#}"),
  }
}

/// Batches journaled before the restart run now.
async fn resume_update_queue() {
  let pending = match store().pending_queue() {
    Ok(pending) => pending,
    Err(e) => {
      error!("failed to read update queue | {e:#}");
      return;
    }
  };
  for row in pending {
    info!(
      "resuming queued batch {} ({:?})",
      row.id, row.containers
    );
    let options = PlanOptions {
      include_dependents: true,
      ..Default::default()
    };
    match orchestrator::prepare(&row.containers, options).await {
      Ok((plan, options)) => {
        if let Err(e) = orchestrator::launch(
          plan,
          options,
          OperationType::Batch,
          Some(row.id),
        ) {
          warn!("failed to launch resumed batch {} | {e:#}", row.id);
        }
      }
      Err(e) => {
        // A stale queue row (containers gone, nothing actionable)
        // is dropped rather than retried forever.
        warn!(
          "dropping unresumable queue row {} | {e:#}",
          row.id
        );
        if let Err(e) = store().dequeue_update(row.id) {
          error!("failed to drop queue row {} | {e:#}", row.id);
        }
      }
    }
  }
}
