//! Entry-count bound for a namespace.
//!
//! Victims are chosen by insertion order, oldest first. Reads never refresh an entry's
//! position, so this approximates LRU without tracking access.

use super::namespace::CacheHandle;
use crate::error::Result;
use crate::http::RequestKey;

pub const DEFAULT_MAX_ENTRIES: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
  max_entries: usize,
}

impl Default for EvictionPolicy {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_ENTRIES)
  }
}

impl EvictionPolicy {
  pub fn new(max_entries: usize) -> Self {
    Self { max_entries }
  }

  /// Keys to drop from an oldest-first listing so that at most `max_entries` remain.
  pub fn victims<'a>(&self, keys: &'a [RequestKey]) -> &'a [RequestKey] {
    let excess = keys.len().saturating_sub(self.max_entries);
    &keys[..excess]
  }

  /// Delete the oldest entries of `cache` until the bound holds. Returns how many went.
  pub async fn enforce(&self, cache: &CacheHandle) -> Result<usize> {
    let keys = cache.keys().await?;
    let victims = self.victims(&keys);

    for key in victims {
      cache.delete(key).await?;
      tracing::debug!(cache = cache.name(), %key, "evicted");
    }

    Ok(victims.len())
  }
}
