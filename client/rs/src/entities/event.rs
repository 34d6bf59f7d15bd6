use serde::{Deserialize, Serialize};
use strum::Display;

use super::operation::OperationStatus;

/// The stage a running operation is in, in pipeline order.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UpdateStage {
  #[default]
  Queued,
  PreCheck,
  Backup,
  Rewrite,
  Pull,
  Recreate,
  Health,
  PostActions,
  Rollback,
  Complete,
  Failed,
}

impl UpdateStage {
  /// Coarse progress fraction reported with `update.progress` events.
  pub fn progress(&self) -> f32 {
    match self {
      UpdateStage::Queued => 0.0,
      UpdateStage::PreCheck => 0.1,
      UpdateStage::Backup => 0.2,
      UpdateStage::Rewrite => 0.3,
      UpdateStage::Pull => 0.5,
      UpdateStage::Recreate => 0.7,
      UpdateStage::Health => 0.85,
      UpdateStage::PostActions => 0.95,
      UpdateStage::Rollback => 0.95,
      UpdateStage::Complete | UpdateStage::Failed => 1.0,
    }
  }
}

/// Everything published on the event bus. The tag doubles as the SSE
/// event name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
  #[serde(rename = "update.progress")]
  UpdateProgress {
    operation_id: String,
    container_name: String,
    stage: UpdateStage,
    progress: f32,
    message: String,
  },
  #[serde(rename = "container.updated")]
  ContainerUpdated {
    name: String,
    old_version: Option<String>,
    new_version: Option<String>,
    status: OperationStatus,
  },
  #[serde(rename = "check.progress")]
  CheckProgress {
    checked: usize,
    total: usize,
    updates_found: usize,
  },
  #[serde(rename = "system.events_dropped")]
  EventsDropped { count: u64 },
}

impl Event {
  /// The wire name, also used for SSE `event:` lines and subscription
  /// filters.
  pub fn kind(&self) -> &'static str {
    match self {
      Event::UpdateProgress { .. } => "update.progress",
      Event::ContainerUpdated { .. } => "container.updated",
      Event::CheckProgress { .. } => "check.progress",
      Event::EventsDropped { .. } => "system.events_dropped",
    }
  }

  /// Per-operation ordering key: events for the same operation must
  /// reach a subscriber in publish order.
  pub fn operation_id(&self) -> Option<&str> {
    match self {
      Event::UpdateProgress { operation_id, .. } => {
        Some(operation_id)
      }
      _ => None,
    }
  }
}
