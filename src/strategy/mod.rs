//! Strategies resolving a request through cache and network.
//!
//! Each strategy owns the handle of the one namespace it reads and writes. Opportunistic
//! cache writes never fail a request: storage errors on that path are logged and dropped.
//! A failed cache read is treated as a miss.

mod immutable;
mod network_first;
mod stale_while_revalidate;

pub use immutable::ImmutableFetch;
pub use network_first::NetworkFirst;
pub use stale_while_revalidate::StaleWhileRevalidate;

use async_trait::async_trait;
use tracing::warn;

use crate::cache::CacheHandle;
use crate::error::Result;
use crate::http::{Request, Response};

#[async_trait]
pub trait Strategy: Send + Sync {
  async fn respond(&self, request: &Request) -> Result<Response>;
}

async fn lookup(cache: &CacheHandle, request: &Request) -> Option<Response> {
  match cache.lookup(request).await {
    Ok(found) => found,
    Err(e) => {
      warn!(
        cache = cache.name(),
        url = %request.url,
        error = %e,
        "cache read failed, treating as miss"
      );
      None
    }
  }
}

async fn store(cache: &CacheHandle, request: &Request, response: &Response) {
  if let Err(e) = cache.put(request, response).await {
    warn!(cache = cache.name(), url = %request.url, error = %e, "cache write failed");
  }
}
