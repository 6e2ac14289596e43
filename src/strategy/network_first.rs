//! Network-first with cache fallback for responses that change between calls.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{lookup, store, Strategy};
use crate::cache::CacheHandle;
use crate::error::Result;
use crate::http::{Fetcher, Request, Response};

pub struct NetworkFirst {
  cache: CacheHandle,
  fetcher: Arc<dyn Fetcher>,
}

impl NetworkFirst {
  pub fn new(cache: CacheHandle, fetcher: Arc<dyn Fetcher>) -> Self {
    Self { cache, fetcher }
  }
}

#[async_trait]
impl Strategy for NetworkFirst {
  async fn respond(&self, request: &Request) -> Result<Response> {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          store(&self.cache, request, &response).await;
        }
        Ok(response)
      }
      // Only a transport failure falls back; an error status is still a live answer.
      Err(e) if e.is_transport() => match lookup(&self.cache, request).await {
        Some(cached) => {
          warn!(url = %request.url, error = %e, "network unavailable, serving cached response");
          Ok(cached)
        }
        None => {
          debug!(url = %request.url, "network unavailable and nothing cached");
          Err(e)
        }
      },
      Err(e) => Err(e),
    }
  }
}
