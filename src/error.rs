use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the cache controller.
///
/// A non-success HTTP status is not a failure on the request path: strategies hand such
/// responses back untouched. `Upstream` only exists for callers that choose to interpret
/// a returned response as an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
  #[error("network request failed: {0}")]
  Transport(String),
  #[error("cache storage failed: {0}")]
  Storage(String),
  #[error("upstream responded with status {status}")]
  Upstream { status: u16 },
  #[error("failed to seed {url}: {reason}")]
  Install { url: String, reason: String },
  #[error("invalid configuration: {0}")]
  Config(String),
  #[error("controller lifecycle: {0}")]
  Lifecycle(String),
  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl Error {
  pub fn transport(msg: impl std::fmt::Display) -> Self {
    Self::Transport(msg.to_string())
  }

  pub fn storage(msg: impl std::fmt::Display) -> Self {
    Self::Storage(msg.to_string())
  }

  pub fn is_transport(&self) -> bool {
    matches!(self, Self::Transport(_))
  }
}
