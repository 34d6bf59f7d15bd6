use serde::{Deserialize, Serialize};
use strum::Display;

use super::ContainerInfo;

pub use versioning::ChangeType;

/// The per-container outcome of an update check.
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
pub enum UpdateStatus {
  #[default]
  UpToDate,
  /// Moving tag whose digest matches the registry, with a concrete
  /// version tag the container could be pinned to instead.
  UpToDatePinnable,
  UpdateAvailable,
  /// An update exists but the container's pre-update check refused it.
  UpdateAvailableBlocked,
  /// The compose file names a different image than what is running.
  ComposeMismatch,
  /// Locally built image, nothing to check against.
  LocalImage,
  Ignored,
  CheckFailed,
  MetadataUnavailable,
}

impl UpdateStatus {
  /// Whether a plan may act on a container in this state.
  /// Blocked containers additionally require an explicit bypass.
  pub fn is_actionable(&self) -> bool {
    matches!(
      self,
      UpdateStatus::UpdateAvailable
        | UpdateStatus::UpdateAvailableBlocked
        | UpdateStatus::UpToDatePinnable
        | UpdateStatus::ComposeMismatch
    )
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDecision {
  pub status: UpdateStatus,
  pub current_version: Option<String>,
  pub latest_version: Option<String>,
  #[serde(default)]
  pub change_type: ChangeType,
  /// Captured output of the failing pre-update check.
  pub pre_update_check_fail: Option<String>,
  pub reason: Option<String>,
}

impl UpdateDecision {
  pub fn ignored() -> UpdateDecision {
    UpdateDecision {
      status: UpdateStatus::Ignored,
      ..Default::default()
    }
  }

  pub fn failed(reason: impl Into<String>) -> UpdateDecision {
    UpdateDecision {
      status: UpdateStatus::CheckFailed,
      reason: Some(reason.into()),
      ..Default::default()
    }
  }

  pub fn metadata_unavailable(
    reason: impl Into<String>,
  ) -> UpdateDecision {
    UpdateDecision {
      status: UpdateStatus::MetadataUnavailable,
      reason: Some(reason.into()),
      ..Default::default()
    }
  }
}

/// One container with its check outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckedContainer {
  pub container: ContainerInfo,
  pub decision: UpdateDecision,
}

/// The result of a full discovery + check pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryResult {
  pub containers: Vec<CheckedContainer>,
  pub total: usize,
  pub updates_available: usize,
  pub checked_at: i64,
}

impl DiscoveryResult {
  pub fn new(containers: Vec<CheckedContainer>) -> DiscoveryResult {
    let total = containers.len();
    let updates_available = containers
      .iter()
      .filter(|c| {
        matches!(
          c.decision.status,
          UpdateStatus::UpdateAvailable
            | UpdateStatus::UpdateAvailableBlocked
        )
      })
      .count();
    DiscoveryResult {
      containers,
      total,
      updates_available,
      checked_at: super::convoy_timestamp(),
    }
  }

  pub fn get(&self, name: &str) -> Option<&CheckedContainer> {
    self.containers.iter().find(|c| c.container.name == name)
  }
}
