use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

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
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationType {
  #[default]
  Single,
  Batch,
  Rollback,
  Restart,
}

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
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationStatus {
  #[default]
  Queued,
  InProgress,
  /// The daemon's own container is being replaced; finalized by the
  /// resume pass at next startup.
  PendingRestart,
  Complete,
  Failed,
  RolledBack,
}

impl OperationStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      OperationStatus::Complete
        | OperationStatus::Failed
        | OperationStatus::RolledBack
    )
  }
}

/// A persisted record of one update / rollback / restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOperation {
  /// Monotonically sortable, derived from the start time:
  /// `YYYYMMDDHHMMSS-xxxxxx`.
  pub id: String,
  pub container_name: String,
  pub stack: Option<String>,
  #[serde(rename = "type")]
  pub operation_type: OperationType,
  pub status: OperationStatus,
  pub old_version: Option<String>,
  pub new_version: Option<String>,
  pub started_at: i64,
  pub completed_at: Option<i64>,
  pub error_message: Option<String>,
  /// Restart-only dependents driven under this operation.
  #[serde(default)]
  pub dependents_affected: Vec<String>,
  #[serde(default)]
  pub rollback_occurred: bool,
  /// Digest of the image pulled by this operation. Consulted when a
  /// pending_restart row is finalized at startup.
  pub pulled_digest: Option<String>,
}

/// One backup row per operation per compose file touched.
/// Survives deletion of the owning operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeBackup {
  pub id: i64,
  pub operation_id: String,
  pub container_name: String,
  pub stack: Option<String>,
  pub compose_file_path: String,
  pub backup_file_path: String,
  pub env_backup_path: Option<String>,
  pub backup_timestamp: i64,
}

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
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyScope {
  #[default]
  Global,
  Stack,
  Container,
}

/// Rollback behavior at container / stack / global scope.
/// Lookup resolves container, then stack, then the global row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackPolicy {
  pub scope: PolicyScope,
  /// Empty for the global row.
  pub entity_id: String,
  pub auto_rollback_enabled: bool,
  pub health_check_required: bool,
}

/// A persisted batch waiting to execute, surviving restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueuedUpdate {
  pub id: i64,
  pub stack: Option<String>,
  pub containers: Vec<String>,
  pub priority: i64,
  pub queued_at: i64,
}
