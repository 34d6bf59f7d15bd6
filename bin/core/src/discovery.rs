//! Discovery: engine listing -> [ContainerInfo]. Compose membership
//! comes from the engine labels compose stamps on every container it
//! creates; stored label overrides and script assignments merge over
//! the engine labels (override wins). Recomputed on every check.

use std::collections::HashMap;

use convoy_client::entities::{ContainerInfo, ImageRef};
use tracing::{debug, warn};

use crate::{
  config::core_config,
  engine::{EngineContainer, docker_client},
  state::store,
};

pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
pub const COMPOSE_CONFIG_FILES_LABEL: &str =
  "com.docker.compose.project.config_files";

/// config_kv key: `{container: {label: value}}`.
pub const LABEL_OVERRIDES_KEY: &str = "label_overrides";
/// config_kv key: `{container: script_path}`.
pub const SCRIPT_ASSIGNMENTS_KEY: &str = "script_assignments";

pub type LabelOverrides = HashMap<String, HashMap<String, String>>;

pub async fn discover_containers()
-> anyhow::Result<Vec<ContainerInfo>> {
  let summaries = docker_client().list_containers().await?;
  let overrides: LabelOverrides = store()
    .get_kv_json(LABEL_OVERRIDES_KEY)?
    .unwrap_or_default();
  let assignments: HashMap<String, String> = store()
    .get_kv_json(SCRIPT_ASSIGNMENTS_KEY)?
    .unwrap_or_default();

  let mut containers = Vec::with_capacity(summaries.len());
  for summary in summaries {
    let name = summary.name.clone();
    match build_info(summary, &overrides, &assignments).await {
      Ok(info) => containers.push(info),
      Err(e) => {
        // One broken container never fails the discovery pass.
        warn!("skipping container {name} in discovery | {e:#}");
      }
    }
  }
  Ok(containers)
}

/// Re-discovers a single container by name.
pub async fn discover_container(
  name: &str,
) -> anyhow::Result<Option<ContainerInfo>> {
  let summaries = docker_client().list_containers().await?;
  let Some(summary) =
    summaries.into_iter().find(|c| c.name == name)
  else {
    return Ok(None);
  };
  let overrides: LabelOverrides = store()
    .get_kv_json(LABEL_OVERRIDES_KEY)?
    .unwrap_or_default();
  let assignments: HashMap<String, String> = store()
    .get_kv_json(SCRIPT_ASSIGNMENTS_KEY)?
    .unwrap_or_default();
  Ok(Some(
    build_info(summary, &overrides, &assignments).await?,
  ))
}

async fn build_info(
  summary: EngineContainer,
  overrides: &LabelOverrides,
  assignments: &HashMap<String, String>,
) -> anyhow::Result<ContainerInfo> {
  let engine = docker_client();
  let inspected = engine.inspect_container(&summary.name).await?;
  let image = ImageRef::parse(&inspected.image);

  let current_digest = match engine
    .image_digest(
      &image,
      inspected.image_id.as_deref().unwrap_or(&inspected.image),
    )
    .await
  {
    Ok(digest) => digest,
    Err(e) => {
      debug!(
        "no local digest for {} | {e:#}",
        summary.name
      );
      None
    }
  };

  let mut labels = inspected.labels;
  if let Some(container_overrides) = overrides.get(&summary.name) {
    for (key, value) in container_overrides {
      labels.insert(key.clone(), value.clone());
    }
  }
  let namespace = &core_config().label_namespace;
  let pre_check_key = format!("{namespace}.pre-update-check");
  if let Some(script) = assignments.get(&summary.name)
    && !labels.contains_key(&pre_check_key)
  {
    labels.insert(pre_check_key, script.clone());
  }

  let stack = labels.get(COMPOSE_PROJECT_LABEL).cloned();
  let service_name = labels.get(COMPOSE_SERVICE_LABEL).cloned();
  let compose_file = labels
    .get(COMPOSE_CONFIG_FILES_LABEL)
    .and_then(|files| files.split(',').next())
    .map(|f| f.to_string());

  let mut info = ContainerInfo {
    name: summary.name,
    stack,
    compose_file,
    service_name,
    image,
    current_digest,
    labels,
    has_healthcheck: inspected.has_healthcheck,
    restart_policy: inspected.restart_policy,
    state: inspected.state,
    compose_image: None,
    env_var_name: None,
    compose_default: None,
  };
  resolve_compose_image(&mut info).await;
  Ok(info)
}

/// Reads the service's image line out of its compose file, resolving
/// `${VAR:-default}` interpolations against the sibling `.env` file.
async fn resolve_compose_image(info: &mut ContainerInfo) {
  let (Some(compose_file), Some(service)) =
    (info.compose_file.clone(), info.service_name.clone())
  else {
    return;
  };
  let text = match tokio::fs::read_to_string(&compose_file).await {
    Ok(text) => text,
    Err(e) => {
      debug!(
        "cannot read compose file {compose_file} for {} | {e}",
        info.name
      );
      return;
    }
  };
  let Some(line) = rewrite::find_service_image(&text, &service)
  else {
    return;
  };
  match line.env_var {
    Some(interp) => {
      let env_value = match env_file_path(&compose_file) {
        Some(env_path) => {
          tokio::fs::read_to_string(&env_path)
            .await
            .ok()
            .and_then(|env| {
              rewrite::env_var_value(&env, &interp.var)
            })
        }
        None => None,
      };
      info.compose_image =
        env_value.or_else(|| interp.default.clone());
      info.env_var_name = Some(interp.var);
      info.compose_default = interp.default;
    }
    None => info.compose_image = Some(line.value),
  }
}

/// The conventional env file next to a compose file.
pub fn env_file_path(compose_file: &str) -> Option<std::path::PathBuf>
{
  let path = std::path::Path::new(compose_file);
  let env = path.parent()?.join(".env");
  Some(env)
}
