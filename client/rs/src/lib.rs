//! # Convoy Client
//!
//! Shared entities for the Convoy update manager plus a typed client
//! for its HTTP API, used by the CLI and by integration tooling.

use serde::{Serialize, de::DeserializeOwned};

use crate::{
  api::{
    ApiErrorBody, ApiErrorEnvelope, AssignScriptRequest,
    BackupsResponse, BatchUpdateRequest, HealthResponse,
    LabelsResponse, OperationsQuery, PoliciesResponse,
    RegistryTagsResponse, RemoveLabelRequest, RestartRequest,
    RollbackRequest, ScriptInfo, SetLabelRequest, StatusResponse,
    UpdateRequest, UpdateStartedResponse,
  },
  entities::{
    check::{CheckedContainer, DiscoveryResult},
    operation::UpdateOperation,
  },
};

pub mod api;
pub mod entities;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
  #[error("{} | {}", .0.code, .0.message)]
  Api(ApiErrorBody),
  #[error(transparent)]
  Request(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Clone)]
pub struct ConvoyClient {
  address: String,
  client: reqwest::Client,
}

impl ConvoyClient {
  pub fn new(address: impl Into<String>) -> ConvoyClient {
    ConvoyClient {
      address: address.into().trim_end_matches('/').to_string(),
      client: Default::default(),
    }
  }

  pub async fn health(&self) -> Result<HealthResponse> {
    self.get("/health").await
  }

  pub async fn status(&self) -> Result<StatusResponse> {
    self.get("/status").await
  }

  /// Full discovery + check, cache cleared first.
  pub async fn check(&self) -> Result<DiscoveryResult> {
    self.get("/check").await
  }

  /// Kick off a background-style check which reuses the cache.
  pub async fn trigger_check(&self) -> Result<serde_json::Value> {
    self.post("/trigger-check", &serde_json::json!({})).await
  }

  pub async fn recheck_container(
    &self,
    name: &str,
  ) -> Result<CheckedContainer> {
    self.get(&format!("/container/{name}/recheck")).await
  }

  pub async fn update(
    &self,
    request: UpdateRequest,
  ) -> Result<UpdateStartedResponse> {
    self.post("/update", &request).await
  }

  pub async fn update_batch(
    &self,
    request: BatchUpdateRequest,
  ) -> Result<UpdateStartedResponse> {
    self.post("/update/batch", &request).await
  }

  pub async fn rollback(
    &self,
    operation_id: impl Into<String>,
  ) -> Result<UpdateStartedResponse> {
    self
      .post(
        "/rollback",
        &RollbackRequest {
          operation_id: operation_id.into(),
        },
      )
      .await
  }

  pub async fn restart(
    &self,
    container: impl Into<String>,
  ) -> Result<UpdateStartedResponse> {
    self
      .post(
        "/restart",
        &RestartRequest {
          container: container.into(),
        },
      )
      .await
  }

  pub async fn list_operations(
    &self,
    query: &OperationsQuery,
  ) -> Result<Vec<UpdateOperation>> {
    let mut path = String::from("/operations?");
    if let Some(container) = &query.container {
      path.push_str(&format!("container={container}&"));
    }
    if let Some(status) = &query.status {
      path.push_str(&format!("status={status}&"));
    }
    if let Some(operation_type) = &query.operation_type {
      path.push_str(&format!("type={operation_type}&"));
    }
    if let Some(limit) = query.limit {
      path.push_str(&format!("limit={limit}&"));
    }
    self.get(path.trim_end_matches(['?', '&'])).await
  }

  pub async fn get_operation(
    &self,
    id: &str,
  ) -> Result<UpdateOperation> {
    self.get(&format!("/operations/{id}")).await
  }

  pub async fn backups(&self) -> Result<BackupsResponse> {
    self.get("/backups").await
  }

  pub async fn policies(&self) -> Result<PoliciesResponse> {
    self.get("/policies").await
  }

  pub async fn labels(
    &self,
    container: &str,
  ) -> Result<LabelsResponse> {
    self.get(&format!("/labels/{container}")).await
  }

  pub async fn set_label(
    &self,
    request: SetLabelRequest,
  ) -> Result<LabelsResponse> {
    self.post("/labels/set", &request).await
  }

  pub async fn remove_label(
    &self,
    request: RemoveLabelRequest,
  ) -> Result<LabelsResponse> {
    self.post("/labels/remove", &request).await
  }

  pub async fn scripts(&self) -> Result<Vec<ScriptInfo>> {
    self.get("/scripts").await
  }

  pub async fn assigned_scripts(
    &self,
  ) -> Result<std::collections::HashMap<String, String>> {
    self.get("/scripts/assigned").await
  }

  pub async fn assign_script(
    &self,
    request: AssignScriptRequest,
  ) -> Result<serde_json::Value> {
    self.post("/scripts/assign", &request).await
  }

  pub async fn unassign_script(
    &self,
    container: &str,
  ) -> Result<serde_json::Value> {
    self
      .delete(&format!("/scripts/assign/{container}"))
      .await
  }

  pub async fn registry_tags(
    &self,
    image: &str,
  ) -> Result<RegistryTagsResponse> {
    self.get(&format!("/registry/tags/{image}")).await
  }

  async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
    let res = self
      .client
      .get(format!("{}{path}", self.address))
      .send()
      .await?;
    Self::handle(res).await
  }

  async fn post<B: Serialize, T: DeserializeOwned>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<T> {
    let res = self
      .client
      .post(format!("{}{path}", self.address))
      .json(body)
      .send()
      .await?;
    Self::handle(res).await
  }

  async fn delete<T: DeserializeOwned>(
    &self,
    path: &str,
  ) -> Result<T> {
    let res = self
      .client
      .delete(format!("{}{path}", self.address))
      .send()
      .await?;
    Self::handle(res).await
  }

  async fn handle<T: DeserializeOwned>(
    res: reqwest::Response,
  ) -> Result<T> {
    let status = res.status();
    if status.is_success() {
      return Ok(res.json().await?);
    }
    match res.json::<ApiErrorEnvelope>().await {
      Ok(envelope) => Err(ClientError::Api(envelope.error)),
      Err(e) => Err(ClientError::Api(ApiErrorBody {
        message: format!(
          "request failed with status {status}, body unreadable: {e}"
        ),
        code: crate::api::ErrorCode::Internal,
      })),
    }
  }
}
