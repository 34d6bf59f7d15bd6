#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  #[error("authentication failed | {0}")]
  AuthFailed(String),
  #[error("not found | {0}")]
  NotFound(String),
  #[error("rate limited by registry | {0}")]
  RateLimited(String),
  #[error("registry temporarily unavailable | {0}")]
  CircuitOpen(String),
  #[error("transient network error | {0}")]
  Transient(String),
  #[error("cancelled")]
  Cancelled,
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

impl RegistryError {
  /// Only transient network errors are worth retrying; everything
  /// else would fail the same way again.
  pub fn is_retryable(&self) -> bool {
    matches!(self, RegistryError::Transient(_))
  }

  /// Whether this failure should count against the registry's
  /// circuit. 404s and auth problems are definitive answers from a
  /// healthy registry.
  pub fn counts_against_circuit(&self) -> bool {
    matches!(
      self,
      RegistryError::Transient(_)
        | RegistryError::RateLimited(_)
        | RegistryError::Other(_)
    )
  }
}

/// Maps a reqwest failure onto the taxonomy.
pub fn from_reqwest(e: reqwest::Error) -> RegistryError {
  if e.is_timeout() || e.is_connect() || e.is_request() {
    RegistryError::Transient(e.to_string())
  } else {
    RegistryError::Other(e.into())
  }
}

/// Maps a non-2xx response status onto the taxonomy.
pub fn from_status(
  status: reqwest::StatusCode,
  context: impl std::fmt::Display,
) -> RegistryError {
  match status.as_u16() {
    401 | 403 => RegistryError::AuthFailed(context.to_string()),
    404 => RegistryError::NotFound(context.to_string()),
    429 => RegistryError::RateLimited(context.to_string()),
    _ => RegistryError::Other(anyhow::anyhow!(
      "registry returned status {status} | {context}"
    )),
  }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
