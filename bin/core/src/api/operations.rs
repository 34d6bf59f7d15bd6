use std::collections::HashMap;

use axum::{
  Json,
  extract::{Path, Query},
};
use convoy_client::{
  api::{BackupsResponse, OperationsQuery, PoliciesResponse},
  entities::operation::UpdateOperation,
};
use store::OperationFilter;

use crate::state::{last_discovery, store};

use super::ApiResult;

/// `GET /operations?container=&status=&type=&limit=`
pub async fn list(
  Query(query): Query<OperationsQuery>,
) -> ApiResult<Vec<UpdateOperation>> {
  let operations = store().list_operations(&OperationFilter {
    container: query.container,
    status: query.status,
    operation_type: query.operation_type,
    limit: query.limit,
  })?;
  Ok(Json(operations))
}

/// `GET /operations/{id}`
pub async fn get_one(
  Path(id): Path<String>,
) -> ApiResult<UpdateOperation> {
  Ok(Json(store().get_operation(&id)?))
}

/// `GET /backups`: outstanding (unconsumed) backups.
pub async fn backups() -> ApiResult<BackupsResponse> {
  Ok(Json(BackupsResponse {
    backups: store().list_backups()?,
  }))
}

/// `GET /policies`: effective rollback policy per discovered
/// container (container row, else stack row, else global).
pub async fn policies() -> ApiResult<PoliciesResponse> {
  let discovery = last_discovery().read().await.clone();
  let mut policies = HashMap::new();
  if let Some(discovery) = discovery {
    for checked in &discovery.containers {
      let container = &checked.container;
      let policy = store().rollback_policy(
        &container.name,
        container.stack.as_deref(),
      )?;
      policies.insert(container.name.clone(), policy);
    }
  }
  Ok(Json(PoliciesResponse { policies }))
}
