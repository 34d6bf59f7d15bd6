//! The container-engine adapter: bollard for list / inspect / digest
//! resolution, the engine CLI for pulls and restarts, and the compose
//! CLI for service recreation.

use std::{
  collections::HashMap, path::Path, sync::OnceLock, time::Duration,
};

use anyhow::Context;
use bollard::{
  Docker,
  query_parameters::{
    InspectContainerOptions, ListContainersOptions,
  },
};
use command::run_convoy_command;
use convoy_client::entities::{CommandLog, ImageRef};
use tokio_util::sync::CancellationToken;

use crate::config::core_config;

pub fn docker_client() -> &'static DockerClient {
  static DOCKER_CLIENT: OnceLock<DockerClient> = OnceLock::new();
  DOCKER_CLIENT.get_or_init(Default::default)
}

pub struct DockerClient {
  docker: Docker,
}

impl Default for DockerClient {
  fn default() -> DockerClient {
    DockerClient {
      docker: Docker::connect_with_defaults()
        .expect("failed to connect to docker daemon"),
    }
  }
}

/// Summary of one running unit as the engine reports it.
#[derive(Debug, Clone)]
pub struct EngineContainer {
  pub name: String,
  pub image: String,
  pub labels: HashMap<String, String>,
  pub state: String,
}

/// Inspect-level detail for one container.
#[derive(Debug, Clone, Default)]
pub struct InspectedContainer {
  pub name: String,
  pub image: String,
  pub image_id: Option<String>,
  pub labels: HashMap<String, String>,
  pub has_healthcheck: bool,
  pub state: String,
  pub health: Option<String>,
  pub restart_policy: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
  Healthy,
  Unhealthy(String),
  Timeout,
}

impl DockerClient {
  pub async fn list_containers(
    &self,
  ) -> anyhow::Result<Vec<EngineContainer>> {
    let containers = self
      .docker
      .list_containers(Some(ListContainersOptions {
        all: true,
        ..Default::default()
      }))
      .await
      .context("failed to list containers from engine")?;
    let containers = containers
      .into_iter()
      .flat_map(|container| {
        let name = container
          .names
          .context("no names on container")?
          .pop()
          .context("no names on container (empty vec)")?
          .replace('/', "");
        anyhow::Ok(EngineContainer {
          name,
          image: container.image.unwrap_or_default(),
          labels: container.labels.unwrap_or_default(),
          state: container
            .state
            .map(|s| s.to_string().to_lowercase())
            .unwrap_or_default(),
        })
      })
      .collect();
    Ok(containers)
  }

  pub async fn inspect_container(
    &self,
    name: &str,
  ) -> anyhow::Result<InspectedContainer> {
    let container = self
      .docker
      .inspect_container(name, None::<InspectContainerOptions>)
      .await
      .with_context(|| {
        format!("failed to inspect container {name}")
      })?;
    let config = container.config.unwrap_or_default();
    let state = container.state.unwrap_or_default();
    Ok(InspectedContainer {
      name: name.to_string(),
      image: config.image.unwrap_or_default(),
      image_id: container.image,
      labels: config.labels.unwrap_or_default(),
      has_healthcheck: config
        .healthcheck
        .as_ref()
        .and_then(|h| h.test.as_ref())
        .is_some_and(|test| !test.is_empty()),
      state: state
        .status
        .map(|s| s.to_string().to_lowercase())
        .unwrap_or_default(),
      health: state
        .health
        .and_then(|h| h.status)
        .map(|s| s.to_string().to_lowercase()),
      restart_policy: container
        .host_config
        .and_then(|hc| hc.restart_policy)
        .and_then(|rp| rp.name)
        .map(|name| name.to_string())
        .unwrap_or_default(),
    })
  }

  /// The digest the engine reports locally for this image
  /// (RepoDigests), preferring the entry matching the reference's
  /// repository.
  pub async fn image_digest(
    &self,
    image: &ImageRef,
    image_id_or_ref: &str,
  ) -> anyhow::Result<Option<String>> {
    let inspected = self
      .docker
      .inspect_image(image_id_or_ref)
      .await
      .with_context(|| {
        format!("failed to inspect image {image_id_or_ref}")
      })?;
    let repo_digests = inspected.repo_digests.unwrap_or_default();
    let matching = repo_digests
      .iter()
      .find(|entry| {
        ImageRef::parse(entry).repository == image.repository
      })
      .or_else(|| repo_digests.first());
    Ok(
      matching
        .and_then(|entry| entry.split_once('@'))
        .map(|(_, digest)| digest.to_string()),
    )
  }

  /// Polls the container every second until it is healthy (or, with
  /// no declared healthcheck, running plus a settle delay), up to
  /// `timeout`.
  pub async fn wait_for_health(
    &self,
    name: &str,
    has_healthcheck: bool,
    timeout: Duration,
    cancel: &CancellationToken,
  ) -> anyhow::Result<HealthOutcome> {
    let settle_delay = core_config().settle_delay;
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
      if cancel.is_cancelled() {
        anyhow::bail!("health wait cancelled");
      }
      let inspected = self.inspect_container(name).await?;
      if has_healthcheck {
        match inspected.health.as_deref() {
          Some("healthy") => return Ok(HealthOutcome::Healthy),
          Some("unhealthy") => {
            return Ok(HealthOutcome::Unhealthy(format!(
              "container {name} reported unhealthy"
            )));
          }
          _ => {}
        }
      } else if inspected.state == "running" {
        tokio::time::sleep(settle_delay).await;
        let settled = self.inspect_container(name).await?;
        if settled.state == "running" {
          return Ok(HealthOutcome::Healthy);
        }
      } else if matches!(
        inspected.state.as_str(),
        "exited" | "dead"
      ) {
        return Ok(HealthOutcome::Unhealthy(format!(
          "container {name} is {}",
          inspected.state
        )));
      }
      if tokio::time::Instant::now() >= deadline {
        return Ok(HealthOutcome::Timeout);
      }
      tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("health wait cancelled"),
        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
      }
    }
  }
}

pub fn docker_compose() -> &'static str {
  if core_config().legacy_compose_cli {
    "docker-compose"
  } else {
    "docker compose"
  }
}

pub async fn pull_image(image: &str) -> CommandLog {
  run_convoy_command(
    "Docker Pull",
    None,
    format!("docker pull {image}"),
  )
  .await
}

pub async fn restart_container(name: &str) -> CommandLog {
  run_convoy_command(
    "Docker Restart",
    None,
    format!("docker restart {name}"),
  )
  .await
}

/// Brings up the single service through the compose CLI; the
/// engine's own dependency handling applies transparently.
pub async fn compose_up(
  compose_file: &Path,
  service: &str,
) -> CommandLog {
  let docker_compose = docker_compose();
  run_convoy_command(
    "Compose Up",
    compose_file.parent(),
    format!(
      "{docker_compose} -f {} up -d {service}",
      compose_file.display()
    ),
  )
  .await
}

pub async fn compose_restart(
  compose_file: &Path,
  service: &str,
) -> CommandLog {
  let docker_compose = docker_compose();
  run_convoy_command(
    "Compose Restart",
    compose_file.parent(),
    format!(
      "{docker_compose} -f {} restart {service}",
      compose_file.display()
    ),
  )
  .await
}
