//! The JSON/SSE HTTP surface. Thin handlers over the core: every
//! failure maps onto the
//! `{error: {message, code}}` envelope with 400 / 404 / 429 / 500.

use axum::{
  Json, Router,
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::{delete, get, post},
};
use convoy_client::api::{
  ApiErrorBody, ApiErrorEnvelope, ErrorCode, HealthResponse,
  StatusResponse,
};

use crate::{
  orchestrator::{StartUpdateError, rollback::RollbackError},
  planner::PlanError,
  schedule::{LAST_BACKGROUND_RUN_KEY, LAST_CACHE_REFRESH_KEY},
  state::{last_discovery, store},
};

mod check;
mod events;
mod labels;
mod operations;
mod registry;
mod update;

pub fn router() -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/status", get(status))
    .route("/check", get(check::check))
    .route("/trigger-check", post(check::trigger_check))
    .route("/container/{name}/recheck", get(check::recheck))
    .route("/update", post(update::update))
    .route("/update/batch", post(update::update_batch))
    .route("/rollback", post(update::rollback))
    .route("/restart", post(update::restart))
    .route("/operations", get(operations::list))
    .route("/operations/{id}", get(operations::get_one))
    .route("/backups", get(operations::backups))
    .route("/policies", get(operations::policies))
    .route("/labels/{container}", get(labels::get_labels))
    .route("/labels/set", post(labels::set_label))
    .route("/labels/remove", post(labels::remove_label))
    .route("/scripts", get(labels::scripts))
    .route("/scripts/assigned", get(labels::assigned_scripts))
    .route("/scripts/assign", post(labels::assign_script))
    .route(
      "/scripts/assign/{container}",
      delete(labels::unassign_script),
    )
    .route("/registry/tags/{*image}", get(registry::tags))
    .route("/events", get(events::stream))
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub struct ApiError {
  pub code: ErrorCode,
  pub message: String,
}

impl ApiError {
  pub fn not_found(message: impl Into<String>) -> ApiError {
    ApiError {
      code: ErrorCode::NotFound,
      message: message.into(),
    }
  }

  pub fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError {
      code: ErrorCode::BadRequest,
      message: message.into(),
    }
  }

  pub fn internal(message: impl Into<String>) -> ApiError {
    ApiError {
      code: ErrorCode::Internal,
      message: message.into(),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = StatusCode::from_u16(self.code.http_status())
      .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
      status,
      Json(ApiErrorEnvelope {
        error: ApiErrorBody {
          message: self.message,
          code: self.code,
        },
      }),
    )
      .into_response()
  }
}

impl From<anyhow::Error> for ApiError {
  fn from(e: anyhow::Error) -> ApiError {
    ApiError::internal(format!("{e:#}"))
  }
}

impl From<store::StoreError> for ApiError {
  fn from(e: store::StoreError) -> ApiError {
    match e {
      store::StoreError::NotFound(kind, id) => {
        ApiError::not_found(format!("{kind} {id} not found"))
      }
      e => ApiError::internal(e.to_string()),
    }
  }
}

impl From<PlanError> for ApiError {
  fn from(e: PlanError) -> ApiError {
    ApiError::bad_request(e.to_string())
  }
}

impl From<StartUpdateError> for ApiError {
  fn from(e: StartUpdateError) -> ApiError {
    match e {
      StartUpdateError::Plan(e) => e.into(),
      StartUpdateError::Other(e) => e.into(),
    }
  }
}

impl From<RollbackError> for ApiError {
  fn from(e: RollbackError) -> ApiError {
    match e {
      RollbackError::OperationNotFound(_)
      | RollbackError::NoBackups(_) => {
        ApiError::not_found(e.to_string())
      }
      RollbackError::Failed(e) => e.into(),
    }
  }
}

impl From<::registry::RegistryError> for ApiError {
  fn from(e: ::registry::RegistryError) -> ApiError {
    use ::registry::RegistryError;
    let code = match &e {
      RegistryError::NotFound(_) => ErrorCode::NotFound,
      RegistryError::RateLimited(_)
      | RegistryError::CircuitOpen(_) => ErrorCode::RateLimited,
      _ => ErrorCode::Internal,
    };
    ApiError {
      code,
      message: e.to_string(),
    }
  }
}

async fn health() -> Json<HealthResponse> {
  Json(HealthResponse {
    status: "ok".to_string(),
    version: format!("v{}", env!("CARGO_PKG_VERSION")),
  })
}

async fn status() -> ApiResult<StatusResponse> {
  let discovery = last_discovery().read().await.clone();
  let (total_checked, updates_found, stacks_tracked) =
    match &discovery {
      Some(result) => {
        let stacks = result
          .containers
          .iter()
          .filter_map(|c| c.container.stack.as_deref())
          .collect::<std::collections::HashSet<_>>();
        (result.total, result.updates_available, stacks.len())
      }
      None => (0, 0, 0),
    };
  let read_stamp = |key: &str| -> Option<i64> {
    store()
      .get_kv(key)
      .ok()
      .flatten()
      .and_then(|raw| raw.parse().ok())
  };
  Ok(Json(StatusResponse {
    total_checked,
    updates_found,
    last_cache_refresh: read_stamp(LAST_CACHE_REFRESH_KEY),
    last_background_run: read_stamp(LAST_BACKGROUND_RUN_KEY),
    stacks_tracked,
    version: format!("v{}", env!("CARGO_PKG_VERSION")),
  }))
}
