//! Request / response bodies for the Convoy HTTP API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::entities::{
  operation::{
    ComposeBackup, OperationStatus, OperationType, RollbackPolicy,
  },
  plan::UpdatePlan,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
  pub status: String,
  pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
  pub total_checked: usize,
  pub updates_found: usize,
  pub last_cache_refresh: Option<i64>,
  pub last_background_run: Option<i64>,
  pub stacks_tracked: usize,
  pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRequest {
  pub container: String,
  /// Target version. Defaults to the checker's latest.
  pub version: Option<String>,
  /// Pre-update check script override for this run.
  pub script: Option<String>,
  /// Compute and return the plan without executing it.
  #[serde(default)]
  pub dry_run: bool,
  /// Bypass a failing pre-update check.
  #[serde(default)]
  pub force: bool,
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdateRequest {
  pub containers: Vec<String>,
  #[serde(default = "default_true")]
  pub include_dependents: bool,
  #[serde(default)]
  pub allow_downgrades: bool,
  #[serde(default)]
  pub abort_on_failure: bool,
  #[serde(default)]
  pub dry_run: bool,
  #[serde(default)]
  pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateStartedResponse {
  /// Absent on dry runs.
  pub operation_id: Option<String>,
  pub status: String,
  /// The computed plan, returned on dry runs.
  pub plan: Option<UpdatePlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
  pub operation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartRequest {
  pub container: String,
}

/// Query params for `GET /operations`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationsQuery {
  pub container: Option<String>,
  pub status: Option<OperationStatus>,
  #[serde(rename = "type")]
  pub operation_type: Option<OperationType>,
  pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupsResponse {
  pub backups: Vec<ComposeBackup>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliciesResponse {
  /// Effective rollback policy per discovered container.
  pub policies: HashMap<String, RollbackPolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelsResponse {
  pub container: String,
  pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLabelRequest {
  pub container: String,
  pub label: String,
  pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveLabelRequest {
  pub container: String,
  pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptInfo {
  pub name: String,
  pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignScriptRequest {
  pub container: String,
  pub script: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryTagsResponse {
  pub image: String,
  pub tags: Vec<String>,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
  NotFound,
  BadRequest,
  RateLimited,
  Internal,
}

impl ErrorCode {
  pub fn http_status(&self) -> u16 {
    match self {
      ErrorCode::NotFound => 404,
      ErrorCode::BadRequest => 400,
      ErrorCode::RateLimited => 429,
      ErrorCode::Internal => 500,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
  pub message: String,
  pub code: ErrorCode,
}

/// The error envelope every non-2xx response carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorEnvelope {
  pub error: ApiErrorBody,
}
