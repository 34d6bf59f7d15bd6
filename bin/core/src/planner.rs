//! Plan construction: validates a selection against the latest
//! discovery, expands the restart-after closure, orders execution
//! with a stable topological sort, and re-validates just before
//! execution.

use std::collections::{HashMap, HashSet};

use convoy_client::entities::{
  check::{DiscoveryResult, UpdateStatus},
  plan::{PlanOptions, PlanStats, UpdatePlan},
};
use versioning::{ChangeType, TagKind, change_type, parse_tag};

use crate::checker::policy::resolve_labels;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
  #[error("unknown container: {0}")]
  UnknownContainer(String),
  #[error("container {name} is not actionable (status: {status})")]
  NotActionable { name: String, status: UpdateStatus },
  #[error(
    "container {name} is blocked by its pre-update check: {reason}"
  )]
  Blocked { name: String, reason: String },
  #[error("plan validation failed: {0}")]
  Invalid(String),
}

pub fn build_plan(
  selection: &[String],
  discovery: &DiscoveryResult,
  options: &PlanOptions,
  namespace: &str,
) -> Result<UpdatePlan, PlanError> {
  let mut warnings = Vec::new();
  let mut bypassed = Vec::new();
  let mut dropped = 0usize;

  // 1 + 2: every selected name must exist and be actionable.
  let mut updates: Vec<String> = Vec::new();
  for name in selection {
    let Some(checked) = discovery.get(name) else {
      return Err(PlanError::UnknownContainer(name.clone()));
    };
    let status = checked.decision.status;
    if !status.is_actionable() {
      return Err(PlanError::NotActionable {
        name: name.clone(),
        status,
      });
    }
    if status == UpdateStatus::UpdateAvailableBlocked {
      if options.bypass_checks.contains(name) {
        bypassed.push(name.clone());
      } else {
        return Err(PlanError::Blocked {
          name: name.clone(),
          reason: checked
            .decision
            .pre_update_check_fail
            .clone()
            .unwrap_or_else(|| "pre-update check failed".into()),
        });
      }
    }
    if updates.contains(name) {
      continue;
    }
    // Downgrades are dropped unless explicitly allowed.
    if !options.allow_downgrades
      && is_downgrade(checked, options)
    {
      warnings.push(format!(
        "dropping {name}: target version is a downgrade \
         (pass allow_downgrades to keep it)"
      ));
      dropped += 1;
      continue;
    }
    // Annotate :latest -> version migrations for the UI.
    let current = parse_tag(&checked.container.image.tag);
    if current.kind == TagKind::Moving
      && let Some(latest) = &checked.decision.latest_version
      && parse_tag(latest).kind != TagKind::Moving
    {
      warnings.push(format!(
        "{name} migrates moving tag '{}' to pinned version {latest}",
        checked.container.image.tag
      ));
    }
    updates.push(name.clone());
  }

  // 3: restart-after closure, transitive over discovery.
  let mut planned: Vec<String> = updates.clone();
  let mut restart_only: Vec<String> = Vec::new();
  if options.include_dependents {
    let mut frontier: HashSet<String> =
      planned.iter().cloned().collect();
    loop {
      let mut added = Vec::new();
      for checked in &discovery.containers {
        let name = &checked.container.name;
        if frontier.contains(name) {
          continue;
        }
        let policy =
          resolve_labels(&checked.container.labels, namespace);
        if policy
          .restart_after
          .iter()
          .any(|trigger| frontier.contains(trigger))
        {
          added.push(name.clone());
        }
      }
      if added.is_empty() {
        break;
      }
      for name in added {
        frontier.insert(name.clone());
        restart_only.push(name.clone());
        planned.push(name);
      }
    }
  }

  // Edges: trigger before dependent, restricted to the plan set.
  let planned_set: HashSet<&String> = planned.iter().collect();
  let mut deps: HashMap<String, Vec<String>> = HashMap::new();
  for name in &planned {
    let Some(checked) = discovery.get(name) else {
      continue;
    };
    let policy =
      resolve_labels(&checked.container.labels, namespace);
    let triggers = policy
      .restart_after
      .into_iter()
      .filter(|t| planned_set.contains(t) && t != name)
      .collect::<Vec<_>>();
    deps.insert(name.clone(), triggers);
  }

  // 4: cycles are warnings, broken by preserving input order.
  for cycle in find_cycles(&planned, &deps) {
    warnings.push(format!(
      "restart-after cycle detected ({}); executing in selection order",
      cycle.join(" -> ")
    ));
    for name in &cycle {
      if let Some(triggers) = deps.get_mut(name) {
        triggers.retain(|t| !cycle.contains(t));
      }
    }
  }

  let stack_of = |name: &String| {
    discovery
      .get(name)
      .and_then(|c| c.container.stack.clone())
  };
  let execution_order = stable_topo(&planned, &deps, &stack_of);

  let affected = planned
    .iter()
    .filter_map(|name| {
      discovery.get(name).map(|c| c.container.clone())
    })
    .collect::<Vec<_>>();

  let stats = PlanStats {
    to_update: updates.len(),
    restart_only: restart_only.len(),
    dropped,
  };
  Ok(UpdatePlan {
    selected: selection.to_vec(),
    affected,
    execution_order,
    restart_only,
    bypassed,
    warnings,
    stats,
  })
}

fn is_downgrade(
  checked: &convoy_client::entities::check::CheckedContainer,
  options: &PlanOptions,
) -> bool {
  let name = &checked.container.name;
  match options.version_overrides.get(name) {
    Some(target) => {
      change_type(
        &parse_tag(&checked.container.image.tag),
        &parse_tag(target),
      ) == ChangeType::Downgrade
    }
    None => checked.decision.change_type == ChangeType::Downgrade,
  }
}

/// Stable topological order. Ties prefer (a) the stack of the
/// previously emitted container, then (b) input order. Dependents
/// always come after their triggers.
fn stable_topo(
  planned: &[String],
  deps: &HashMap<String, Vec<String>>,
  stack_of: &impl Fn(&String) -> Option<String>,
) -> Vec<String> {
  let mut remaining: Vec<String> = planned.to_vec();
  let mut emitted: HashSet<String> = HashSet::new();
  let mut order = Vec::with_capacity(planned.len());

  while !remaining.is_empty() {
    let ready: Vec<usize> = remaining
      .iter()
      .enumerate()
      .filter(|(_, name)| {
        deps
          .get(*name)
          .map(|triggers| {
            triggers.iter().all(|t| emitted.contains(t))
          })
          .unwrap_or(true)
      })
      .map(|(i, _)| i)
      .collect();
    if ready.is_empty() {
      // Unbreakable cycle remnant: fall back to input order.
      order.extend(remaining.drain(..));
      break;
    }
    let previous_stack =
      order.last().and_then(|last: &String| stack_of(last));
    let pick = previous_stack
      .and_then(|stack| {
        ready
          .iter()
          .find(|i| stack_of(&remaining[**i]) == Some(stack.clone()))
          .copied()
      })
      .unwrap_or(ready[0]);
    let name = remaining.remove(pick);
    emitted.insert(name.clone());
    order.push(name);
  }
  order
}

/// Tarjan SCC over the plan graph. Returns components with more than
/// one member (mutual restart-after) in input order.
fn find_cycles(
  planned: &[String],
  deps: &HashMap<String, Vec<String>>,
) -> Vec<Vec<String>> {
  struct Tarjan<'a> {
    names: &'a [String],
    index_of: HashMap<&'a String, usize>,
    deps: &'a HashMap<String, Vec<String>>,
    index: usize,
    indices: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    components: Vec<Vec<usize>>,
  }

  impl Tarjan<'_> {
    fn strongconnect(&mut self, v: usize) {
      self.indices[v] = Some(self.index);
      self.lowlink[v] = self.index;
      self.index += 1;
      self.stack.push(v);
      self.on_stack[v] = true;

      let neighbors = self
        .deps
        .get(&self.names[v])
        .map(|triggers| {
          triggers
            .iter()
            .filter_map(|t| self.index_of.get(t).copied())
            .collect::<Vec<_>>()
        })
        .unwrap_or_default();
      for w in neighbors {
        if self.indices[w].is_none() {
          self.strongconnect(w);
          self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
        } else if self.on_stack[w] {
          self.lowlink[v] =
            self.lowlink[v].min(self.indices[w].unwrap_or(0));
        }
      }

      if Some(self.lowlink[v]) == self.indices[v] {
        let mut component = Vec::new();
        while let Some(w) = self.stack.pop() {
          self.on_stack[w] = false;
          component.push(w);
          if w == v {
            break;
          }
        }
        self.components.push(component);
      }
    }
  }

  let index_of: HashMap<&String, usize> = planned
    .iter()
    .enumerate()
    .map(|(i, name)| (name, i))
    .collect();
  let mut tarjan = Tarjan {
    names: planned,
    index_of,
    deps,
    index: 0,
    indices: vec![None; planned.len()],
    lowlink: vec![0; planned.len()],
    on_stack: vec![false; planned.len()],
    stack: Vec::new(),
    components: Vec::new(),
  };
  for v in 0..planned.len() {
    if tarjan.indices[v].is_none() {
      tarjan.strongconnect(v);
    }
  }
  tarjan
    .components
    .into_iter()
    .filter(|c| c.len() > 1)
    .map(|mut component| {
      component.sort_unstable();
      component
        .into_iter()
        .map(|i| planned[i].clone())
        .collect()
    })
    .collect()
}

/// Re-checks plan invariants just before execution.
pub fn validate_plan(
  plan: &UpdatePlan,
  namespace: &str,
) -> Result<(), PlanError> {
  if plan.execution_order.is_empty() {
    return Err(PlanError::Invalid(
      "execution order is empty".into(),
    ));
  }
  let order_set: HashSet<&String> =
    plan.execution_order.iter().collect();
  if order_set.len() != plan.execution_order.len() {
    return Err(PlanError::Invalid(
      "execution order contains duplicates".into(),
    ));
  }
  for container in &plan.affected {
    if !order_set.contains(&container.name) {
      return Err(PlanError::Invalid(format!(
        "affected container {} missing from execution order",
        container.name
      )));
    }
  }
  if plan.affected.len() != plan.execution_order.len() {
    return Err(PlanError::Invalid(
      "execution order names unknown containers".into(),
    ));
  }
  let position: HashMap<&String, usize> = plan
    .execution_order
    .iter()
    .enumerate()
    .map(|(i, name)| (name, i))
    .collect();
  for container in &plan.affected {
    let policy = resolve_labels(&container.labels, namespace);
    for trigger in &policy.restart_after {
      if let (Some(&t), Some(&c)) =
        (position.get(trigger), position.get(&container.name))
        && t > c
        && !plan
          .warnings
          .iter()
          .any(|w| w.contains("cycle"))
      {
        return Err(PlanError::Invalid(format!(
          "{} ordered before its trigger {trigger}",
          container.name
        )));
      }
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use convoy_client::entities::{
    ContainerInfo, ImageRef,
    check::{CheckedContainer, UpdateDecision},
  };

  use super::*;

  fn container(
    name: &str,
    stack: &str,
    image: &str,
    labels: &[(&str, &str)],
    decision: UpdateDecision,
  ) -> CheckedContainer {
    CheckedContainer {
      container: ContainerInfo {
        name: name.to_string(),
        stack: Some(stack.to_string()),
        image: ImageRef::parse(image),
        labels: labels
          .iter()
          .map(|(k, v)| (k.to_string(), v.to_string()))
          .collect::<HashMap<_, _>>(),
        ..Default::default()
      },
      decision,
    }
  }

  fn update_available(latest: &str) -> UpdateDecision {
    UpdateDecision {
      status: UpdateStatus::UpdateAvailable,
      latest_version: Some(latest.to_string()),
      change_type: ChangeType::Patch,
      ..Default::default()
    }
  }

  fn discovery(
    containers: Vec<CheckedContainer>,
  ) -> DiscoveryResult {
    DiscoveryResult::new(containers)
  }

  #[test]
  fn dependents_follow_their_trigger() {
    let discovery = discovery(vec![
      container(
        "gluetun",
        "media",
        "qmcgaw/gluetun:v3.39.0",
        &[],
        update_available("v3.39.1"),
      ),
      container(
        "qbittorrent",
        "media",
        "lscr.io/linuxserver/qbittorrent:4.6.2",
        &[("convoy.restart-after", "gluetun")],
        UpdateDecision::default(),
      ),
    ]);
    let plan = build_plan(
      &["gluetun".to_string()],
      &discovery,
      &PlanOptions {
        include_dependents: true,
        ..Default::default()
      },
      "convoy",
    )
    .unwrap();
    assert_eq!(plan.execution_order, ["gluetun", "qbittorrent"]);
    assert_eq!(plan.restart_only, ["qbittorrent"]);
    validate_plan(&plan, "convoy").unwrap();
  }

  #[test]
  fn transitive_closure_is_followed() {
    let discovery = discovery(vec![
      container(
        "vpn",
        "media",
        "qmcgaw/gluetun:v3.39.0",
        &[],
        update_available("v3.39.1"),
      ),
      container(
        "proxy",
        "media",
        "x/proxy:1.0.0",
        &[("convoy.restart-after", "vpn")],
        UpdateDecision::default(),
      ),
      container(
        "web",
        "media",
        "x/web:1.0.0",
        &[("convoy.restart-after", "proxy")],
        UpdateDecision::default(),
      ),
    ]);
    let plan = build_plan(
      &["vpn".to_string()],
      &discovery,
      &PlanOptions {
        include_dependents: true,
        ..Default::default()
      },
      "convoy",
    )
    .unwrap();
    assert_eq!(plan.execution_order, ["vpn", "proxy", "web"]);
    assert_eq!(plan.restart_only.len(), 2);
  }

  #[test]
  fn unknown_selection_is_a_hard_error() {
    let result = build_plan(
      &["ghost".to_string()],
      &discovery(vec![]),
      &PlanOptions::default(),
      "convoy",
    );
    assert!(matches!(
      result,
      Err(PlanError::UnknownContainer(name)) if name == "ghost"
    ));
  }

  #[test]
  fn blocked_without_bypass_is_a_hard_error() {
    let discovery = discovery(vec![container(
      "postgres",
      "db",
      "postgres:16.2",
      &[("convoy.pre-update-check", "/scripts/check.sh")],
      UpdateDecision {
        status: UpdateStatus::UpdateAvailableBlocked,
        pre_update_check_fail: Some("2 active sessions".into()),
        ..Default::default()
      },
    )]);
    let result = build_plan(
      &["postgres".to_string()],
      &discovery,
      &PlanOptions::default(),
      "convoy",
    );
    match result {
      Err(PlanError::Blocked { name, reason }) => {
        assert_eq!(name, "postgres");
        assert_eq!(reason, "2 active sessions");
      }
      other => panic!("unexpected: {other:?}"),
    }

    // Bypassing makes it plannable.
    let plan = build_plan(
      &["postgres".to_string()],
      &discovery,
      &PlanOptions {
        bypass_checks: vec!["postgres".to_string()],
        ..Default::default()
      },
      "convoy",
    )
    .unwrap();
    assert_eq!(plan.bypassed, ["postgres"]);
  }

  #[test]
  fn non_actionable_selection_is_rejected() {
    let discovery = discovery(vec![container(
      "nginx",
      "web",
      "nginx:1.25.3",
      &[],
      UpdateDecision {
        status: UpdateStatus::UpToDate,
        ..Default::default()
      },
    )]);
    assert!(matches!(
      build_plan(
        &["nginx".to_string()],
        &discovery,
        &PlanOptions::default(),
        "convoy",
      ),
      Err(PlanError::NotActionable { .. })
    ));
  }

  #[test]
  fn downgrades_dropped_with_warning() {
    let discovery = discovery(vec![container(
      "nginx",
      "web",
      "nginx:1.26.0",
      &[],
      UpdateDecision {
        status: UpdateStatus::UpdateAvailable,
        latest_version: Some("1.25.3".into()),
        change_type: ChangeType::Downgrade,
        ..Default::default()
      },
    )]);
    let plan = build_plan(
      &["nginx".to_string()],
      &discovery,
      &PlanOptions::default(),
      "convoy",
    )
    .unwrap();
    assert!(plan.execution_order.is_empty());
    assert_eq!(plan.stats.dropped, 1);
    assert!(plan.warnings[0].contains("downgrade"));
  }

  #[test]
  fn cycles_warn_and_preserve_input_order() {
    let discovery = discovery(vec![
      container(
        "a",
        "s",
        "x/a:1.0.0",
        &[("convoy.restart-after", "b")],
        update_available("1.0.1"),
      ),
      container(
        "b",
        "s",
        "x/b:1.0.0",
        &[("convoy.restart-after", "a")],
        update_available("1.0.1"),
      ),
    ]);
    let plan = build_plan(
      &["a".to_string(), "b".to_string()],
      &discovery,
      &PlanOptions {
        include_dependents: true,
        ..Default::default()
      },
      "convoy",
    )
    .unwrap();
    assert!(
      plan.warnings.iter().any(|w| w.contains("cycle")),
      "expected cycle warning, got {:?}",
      plan.warnings
    );
    assert_eq!(plan.execution_order, ["a", "b"]);
  }

  #[test]
  fn same_stack_groups_in_order() {
    let discovery = discovery(vec![
      container(
        "web1",
        "alpha",
        "x/a:1.0.0",
        &[],
        update_available("1.0.1"),
      ),
      container(
        "db1",
        "beta",
        "x/b:1.0.0",
        &[],
        update_available("1.0.1"),
      ),
      container(
        "web2",
        "alpha",
        "x/c:1.0.0",
        &[],
        update_available("1.0.1"),
      ),
    ]);
    let plan = build_plan(
      &[
        "web1".to_string(),
        "db1".to_string(),
        "web2".to_string(),
      ],
      &discovery,
      &PlanOptions::default(),
      "convoy",
    )
    .unwrap();
    // alpha containers group together.
    assert_eq!(plan.execution_order, ["web1", "web2", "db1"]);
  }
}
