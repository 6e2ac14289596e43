//! Cache-first for content that never changes, with a bounded entry count.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

use super::{lookup, store, Strategy};
use crate::background::TaskSink;
use crate::cache::{CacheHandle, EvictionPolicy};
use crate::error::Result;
use crate::http::{Fetcher, Request, Response};

pub struct ImmutableFetch {
  cache: CacheHandle,
  fetcher: Arc<dyn Fetcher>,
  eviction: EvictionPolicy,
  tasks: TaskSink,
}

impl ImmutableFetch {
  pub fn new(
    cache: CacheHandle,
    fetcher: Arc<dyn Fetcher>,
    eviction: EvictionPolicy,
    tasks: TaskSink,
  ) -> Self {
    Self {
      cache,
      fetcher,
      eviction,
      tasks,
    }
  }
}

#[async_trait]
impl Strategy for ImmutableFetch {
  async fn respond(&self, request: &Request) -> Result<Response> {
    // A hit is good forever; no revalidation.
    if let Some(cached) = lookup(&self.cache, request).await {
      debug!(url = %request.url, "immutable hit");
      return Ok(cached);
    }

    let response = self.fetcher.fetch(request).await.map_err(|e| {
      error!(url = %request.url, error = %e, "request failed");
      e
    })?;

    if response.is_success() {
      store(&self.cache, request, &response).await;

      // The sweep runs after the response is handed back; readers may briefly see
      // more than the bound.
      let cache = self.cache.clone();
      let eviction = self.eviction;
      self.tasks.spawn("evict", async move {
        let evicted = eviction.enforce(&cache).await?;
        if evicted > 0 {
          debug!(cache = cache.name(), evicted, "eviction sweep");
        }
        Ok(())
      });
    }

    Ok(response)
  }
}
