use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ContainerInfo;

/// Options steering plan construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanOptions {
  /// Pull restart-after dependents into the plan transitively.
  #[serde(default)]
  pub include_dependents: bool,
  /// Keep downgrade selections instead of dropping them with a warning.
  #[serde(default)]
  pub allow_downgrades: bool,
  /// Containers whose failing pre-update check should be overridden.
  #[serde(default)]
  pub bypass_checks: Vec<String>,
  /// Stop the whole run at the first failed container.
  #[serde(default)]
  pub abort_on_failure: bool,
  /// Explicit target versions, keyed by container name. Containers
  /// not present update to the checker's latest.
  #[serde(default)]
  pub version_overrides: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PlanStats {
  pub to_update: usize,
  pub restart_only: usize,
  pub dropped: usize,
}

/// A dependency-closed, topologically ordered execution plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePlan {
  /// The names the caller asked for.
  pub selected: Vec<String>,
  /// Every container the plan touches, updates and restart-only both.
  pub affected: Vec<ContainerInfo>,
  /// Execution order over `affected`. Restart-after dependencies come
  /// before their dependents.
  pub execution_order: Vec<String>,
  /// Subset of `affected` that is only restarted, no image change.
  pub restart_only: Vec<String>,
  /// Containers whose pre-update check block was explicitly bypassed.
  pub bypassed: Vec<String>,
  pub warnings: Vec<String>,
  pub stats: PlanStats,
}

impl UpdatePlan {
  pub fn is_restart_only(&self, name: &str) -> bool {
    self.restart_only.iter().any(|n| n == name)
  }

  pub fn container(&self, name: &str) -> Option<&ContainerInfo> {
    self.affected.iter().find(|c| c.name == name)
  }
}
