//! Serve from cache right away and refresh the entry in the background.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use super::{lookup, Strategy};
use crate::background::TaskSink;
use crate::cache::CacheHandle;
use crate::error::{Error, Result};
use crate::http::{Fetcher, Request, Response};

pub struct StaleWhileRevalidate {
  cache: CacheHandle,
  fetcher: Arc<dyn Fetcher>,
  tasks: TaskSink,
}

impl StaleWhileRevalidate {
  pub fn new(cache: CacheHandle, fetcher: Arc<dyn Fetcher>, tasks: TaskSink) -> Self {
    Self {
      cache,
      fetcher,
      tasks,
    }
  }

  /// Start the network fetch as a detached task. When `waiter` is given the fetch result is
  /// also handed to it, before the cache write happens.
  fn revalidate(&self, request: &Request, waiter: Option<oneshot::Sender<Result<Response>>>) {
    let cache = self.cache.clone();
    let fetcher = Arc::clone(&self.fetcher);
    let request = request.clone();

    self.tasks.spawn("revalidate", async move {
      let response = match (fetcher.fetch(&request).await, waiter) {
        (Ok(response), Some(waiter)) => {
          let _ = waiter.send(Ok(response.clone()));
          response
        }
        (Ok(response), None) => response,
        // The waiting caller owns this failure
        (Err(e), Some(waiter)) => {
          let _ = waiter.send(Err(e));
          return Ok(());
        }
        (Err(e), None) => return Err(e),
      };

      cache.put(&request, &response).await?;
      debug!(url = %request.url, status = response.status, "revalidated");
      Ok(())
    });
  }
}

#[async_trait]
impl Strategy for StaleWhileRevalidate {
  async fn respond(&self, request: &Request) -> Result<Response> {
    if let Some(cached) = lookup(&self.cache, request).await {
      self.revalidate(request, None);
      return Ok(cached);
    }

    let (tx, rx) = oneshot::channel();
    self.revalidate(request, Some(tx));
    rx.await
      .map_err(|_| Error::transport(format!("{}: fetch abandoned", request.url)))?
  }
}
