//! Request classification by URL prefix.

use url::Url;

use crate::cache::Purpose;

/// Picks the namespace, and with it the strategy, for a request URL.
///
/// First match wins: immutable source, then remote API, then everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
  immutable_prefix: String,
  remote_api_prefix: String,
}

impl Router {
  pub fn new(immutable_prefix: impl Into<String>, remote_api_prefix: impl Into<String>) -> Self {
    Self {
      immutable_prefix: immutable_prefix.into(),
      remote_api_prefix: remote_api_prefix.into(),
    }
  }

  pub fn classify(&self, url: &Url) -> Purpose {
    let url = url.as_str();
    if url.starts_with(&self.immutable_prefix) {
      Purpose::Immutable
    } else if url.starts_with(&self.remote_api_prefix) {
      Purpose::RemoteApi
    } else {
      Purpose::Static
    }
  }
}
