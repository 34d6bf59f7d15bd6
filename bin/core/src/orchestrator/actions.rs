//! The post-update action language:
//! `restart:c1,c2` | `compose-restart:svc` | `script:/abs/path` |
//! `exec:<shell cmd>`. Several actions may be chained with `;`.
//! Action failures are surfaced on the operation but never trigger
//! rollback.

use std::path::Path;

use command::run_convoy_command_with_env;
use convoy_client::entities::ContainerInfo;

use crate::{
  config::core_config,
  engine::{compose_restart, restart_container},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostUpdateAction {
  Restart(Vec<String>),
  ComposeRestart(String),
  Script(String),
  Exec(String),
}

pub fn parse_actions(
  spec: &str,
) -> Result<Vec<PostUpdateAction>, String> {
  spec
    .split(';')
    .map(str::trim)
    .filter(|part| !part.is_empty())
    .map(parse_action)
    .collect()
}

fn parse_action(spec: &str) -> Result<PostUpdateAction, String> {
  let (kind, arg) = spec
    .split_once(':')
    .ok_or_else(|| format!("malformed action '{spec}'"))?;
  let arg = arg.trim();
  if arg.is_empty() {
    return Err(format!("action '{kind}' is missing its argument"));
  }
  match kind.trim() {
    "restart" => Ok(PostUpdateAction::Restart(
      arg
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect(),
    )),
    "compose-restart" => {
      Ok(PostUpdateAction::ComposeRestart(arg.to_string()))
    }
    "script" => {
      if !arg.starts_with('/') {
        return Err(format!(
          "script action requires an absolute path, got '{arg}'"
        ));
      }
      Ok(PostUpdateAction::Script(arg.to_string()))
    }
    "exec" => Ok(PostUpdateAction::Exec(arg.to_string())),
    other => Err(format!("unknown action kind '{other}'")),
  }
}

/// Executes the whole action spec. Returns the first failure as a
/// message; later actions still run.
pub async fn run_post_update(
  spec: &str,
  info: &ContainerInfo,
) -> Result<(), String> {
  let actions = parse_actions(spec)?;
  let mut first_failure = None;
  for action in actions {
    if let Err(e) = run_action(&action, info).await {
      first_failure.get_or_insert(e);
    }
  }
  match first_failure {
    Some(e) => Err(e),
    None => Ok(()),
  }
}

async fn run_action(
  action: &PostUpdateAction,
  info: &ContainerInfo,
) -> Result<(), String> {
  let timeout = core_config().script_timeout;
  match action {
    PostUpdateAction::Restart(names) => {
      for name in names {
        let log = restart_container(name).await;
        if !log.success {
          return Err(format!(
            "restart of {name} failed: {}",
            log.combined_output(300)
          ));
        }
      }
      Ok(())
    }
    PostUpdateAction::ComposeRestart(service) => {
      let Some(compose_file) = &info.compose_file else {
        return Err(
          "compose-restart requires a compose-managed container"
            .to_string(),
        );
      };
      let log =
        compose_restart(Path::new(compose_file), service).await;
      if log.success {
        Ok(())
      } else {
        Err(format!(
          "compose restart of {service} failed: {}",
          log.combined_output(300)
        ))
      }
    }
    PostUpdateAction::Script(path) => {
      let log = run_convoy_command_with_env(
        "Post Update Script",
        None,
        path,
        &[("CONTAINER_NAME", &info.name)],
        timeout,
      )
      .await;
      if log.success {
        Ok(())
      } else {
        Err(format!(
          "script {path} failed: {}",
          log.combined_output(300)
        ))
      }
    }
    PostUpdateAction::Exec(cmd) => {
      let log = run_convoy_command_with_env(
        "Post Update Exec",
        None,
        cmd,
        &[("CONTAINER_NAME", &info.name)],
        timeout,
      )
      .await;
      if log.success {
        Ok(())
      } else {
        Err(format!(
          "exec failed: {}",
          log.combined_output(300)
        ))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_each_action_kind() {
    assert_eq!(
      parse_actions("restart:c1, c2").unwrap(),
      [PostUpdateAction::Restart(vec![
        "c1".to_string(),
        "c2".to_string()
      ])]
    );
    assert_eq!(
      parse_actions("compose-restart:web").unwrap(),
      [PostUpdateAction::ComposeRestart("web".to_string())]
    );
    assert_eq!(
      parse_actions("script:/opt/hooks/notify.sh").unwrap(),
      [PostUpdateAction::Script(
        "/opt/hooks/notify.sh".to_string()
      )]
    );
    assert_eq!(
      parse_actions("exec:curl -fsS http://ntfy/updated").unwrap(),
      [PostUpdateAction::Exec(
        "curl -fsS http://ntfy/updated".to_string()
      )]
    );
  }

  #[test]
  fn chains_split_on_semicolons() {
    let actions =
      parse_actions("restart:a; exec:echo done").unwrap();
    assert_eq!(actions.len(), 2);
  }

  #[test]
  fn rejects_malformed_specs() {
    assert!(parse_actions("restart").is_err());
    assert!(parse_actions("teleport:a").is_err());
    assert!(parse_actions("script:relative/path.sh").is_err());
    assert!(parse_actions("exec:").is_err());
  }
}
