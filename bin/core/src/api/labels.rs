//! Label and script-library endpoints. Engine labels on a running
//! container are immutable, so writes persist overrides in the store
//! and discovery merges them (override wins) on the next pass.

use std::collections::HashMap;

use axum::{Json, extract::Path};
use convoy_client::api::{
  AssignScriptRequest, LabelsResponse, RemoveLabelRequest,
  ScriptInfo, SetLabelRequest,
};

use crate::{
  config::core_config,
  discovery::{
    self, LABEL_OVERRIDES_KEY, LabelOverrides,
    SCRIPT_ASSIGNMENTS_KEY,
  },
  state::store,
};

use super::{ApiError, ApiResult};

/// `GET /labels/{container}`: the container's namespaced labels
/// after override merging.
pub async fn get_labels(
  Path(container): Path<String>,
) -> ApiResult<LabelsResponse> {
  let Some(info) =
    discovery::discover_container(&container).await?
  else {
    return Err(ApiError::not_found(format!(
      "container {container} not found"
    )));
  };
  let prefix = format!("{}.", core_config().label_namespace);
  let labels = info
    .labels
    .into_iter()
    .filter(|(key, _)| key.starts_with(&prefix))
    .collect();
  Ok(Json(LabelsResponse { container, labels }))
}

/// `POST /labels/set`
pub async fn set_label(
  Json(request): Json<SetLabelRequest>,
) -> ApiResult<LabelsResponse> {
  let namespace = &core_config().label_namespace;
  let key = if request.label.contains('.') {
    request.label.clone()
  } else {
    format!("{namespace}.{}", request.label)
  };
  if !key.starts_with(&format!("{namespace}.")) {
    return Err(ApiError::bad_request(format!(
      "label must be in the {namespace}.* namespace"
    )));
  }
  let mut overrides: LabelOverrides = store()
    .get_kv_json(LABEL_OVERRIDES_KEY)?
    .unwrap_or_default();
  overrides
    .entry(request.container.clone())
    .or_default()
    .insert(key, request.value);
  store().set_kv_json(LABEL_OVERRIDES_KEY, &overrides)?;
  get_labels(Path(request.container)).await
}

/// `POST /labels/remove`
pub async fn remove_label(
  Json(request): Json<RemoveLabelRequest>,
) -> ApiResult<LabelsResponse> {
  let namespace = &core_config().label_namespace;
  let key = if request.label.contains('.') {
    request.label.clone()
  } else {
    format!("{namespace}.{}", request.label)
  };
  let mut overrides: LabelOverrides = store()
    .get_kv_json(LABEL_OVERRIDES_KEY)?
    .unwrap_or_default();
  if let Some(container_overrides) =
    overrides.get_mut(&request.container)
  {
    container_overrides.remove(&key);
    if container_overrides.is_empty() {
      overrides.remove(&request.container);
    }
  }
  store().set_kv_json(LABEL_OVERRIDES_KEY, &overrides)?;
  get_labels(Path(request.container)).await
}

/// `GET /scripts`: the script library on disk.
pub async fn scripts() -> ApiResult<Vec<ScriptInfo>> {
  let dir = &core_config().scripts_dir;
  let mut scripts = Vec::new();
  let mut entries = match tokio::fs::read_dir(dir).await {
    Ok(entries) => entries,
    // An absent library is an empty library.
    Err(_) => return Ok(Json(scripts)),
  };
  while let Ok(Some(entry)) = entries.next_entry().await {
    let path = entry.path();
    if !path.is_file() {
      continue;
    }
    let Some(name) =
      path.file_name().and_then(|n| n.to_str())
    else {
      continue;
    };
    scripts.push(ScriptInfo {
      name: name.to_string(),
      path: path.display().to_string(),
    });
  }
  scripts.sort_by(|a, b| a.name.cmp(&b.name));
  Ok(Json(scripts))
}

/// `GET /scripts/assigned`
pub async fn assigned_scripts()
-> ApiResult<HashMap<String, String>> {
  let assignments: HashMap<String, String> = store()
    .get_kv_json(SCRIPT_ASSIGNMENTS_KEY)?
    .unwrap_or_default();
  Ok(Json(assignments))
}

/// `POST /scripts/assign`
pub async fn assign_script(
  Json(request): Json<AssignScriptRequest>,
) -> ApiResult<serde_json::Value> {
  let path = if request.script.starts_with('/') {
    std::path::PathBuf::from(&request.script)
  } else {
    core_config().scripts_dir.join(&request.script)
  };
  if !path.is_file() {
    return Err(ApiError::bad_request(format!(
      "script {} does not exist",
      path.display()
    )));
  }
  let mut assignments: HashMap<String, String> = store()
    .get_kv_json(SCRIPT_ASSIGNMENTS_KEY)?
    .unwrap_or_default();
  assignments
    .insert(request.container, path.display().to_string());
  store().set_kv_json(SCRIPT_ASSIGNMENTS_KEY, &assignments)?;
  Ok(Json(serde_json::json!({ "status": "assigned" })))
}

/// `DELETE /scripts/assign/{container}`
pub async fn unassign_script(
  Path(container): Path<String>,
) -> ApiResult<serde_json::Value> {
  let mut assignments: HashMap<String, String> = store()
    .get_kv_json(SCRIPT_ASSIGNMENTS_KEY)?
    .unwrap_or_default();
  if assignments.remove(&container).is_none() {
    return Err(ApiError::not_found(format!(
      "no script assigned to {container}"
    )));
  }
  store().set_kv_json(SCRIPT_ASSIGNMENTS_KEY, &assignments)?;
  Ok(Json(serde_json::json!({ "status": "unassigned" })))
}
